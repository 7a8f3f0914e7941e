// Reference Frames - Center-of-gravity view of a trajectory

use serde::Serialize;

use crate::physics_engine::{weighted_centroid, Trajectory, Vector3};

/// Trajectory re-expressed around the mass-weighted center of gravity.
///
/// `relative_positions[body][step]`; the other two series are indexed by step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CogFrame {
    cog_position: Vec<Vector3>,
    relative_positions: Vec<Vec<Vector3>>,
    cog_in_relative_frame: Vec<Vector3>,
}

/// Derive the COG frame of `trajectory` for bodies of the given masses
pub fn derive_frame(trajectory: &Trajectory, masses: &[f64]) -> CogFrame {
    let body_count = trajectory.body_count();
    let steps = trajectory.step_count();

    let mut cog_position = Vec::with_capacity(steps);
    let mut relative_positions = vec![Vec::with_capacity(steps); body_count];
    let mut cog_in_relative_frame = Vec::with_capacity(steps);

    for positions in trajectory.positions() {
        let cog = weighted_centroid(masses, positions.iter().copied());
        let relative: Vec<Vector3> = positions.iter().map(|r| r.sub(&cog)).collect();

        cog_in_relative_frame.push(weighted_centroid(masses, relative.iter().copied()));
        for (series, r) in relative_positions.iter_mut().zip(relative) {
            series.push(r);
        }
        cog_position.push(cog);
    }

    CogFrame {
        cog_position,
        relative_positions,
        cog_in_relative_frame,
    }
}

impl CogFrame {
    pub fn step_count(&self) -> usize {
        self.cog_position.len()
    }

    pub fn cog_position(&self) -> &[Vector3] {
        &self.cog_position
    }

    pub fn relative_positions(&self) -> &[Vec<Vector3>] {
        &self.relative_positions
    }

    /// Path of one body around the COG
    pub fn relative_path(&self, body: usize) -> &[Vector3] {
        &self.relative_positions[body]
    }

    /// Relative positions of every body at one step
    pub fn relative_at(&self, step: usize) -> Vec<Vector3> {
        self.relative_positions.iter().map(|s| s[step]).collect()
    }

    pub fn cog_in_relative_frame(&self) -> &[Vector3] {
        &self.cog_in_relative_frame
    }

    /// Largest distance of the relative-frame centroid from the origin.
    /// Should be round-off small for any trajectory.
    pub fn centroid_residual(&self) -> f64 {
        self.cog_in_relative_frame
            .iter()
            .map(Vector3::magnitude)
            .fold(0.0, f64::max)
    }
}
