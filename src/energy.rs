// Energy Tracking - Kinetic energy series for plotting
//
// The aggregate is the sum of kinetic energies only. It is not conserved and is not
// meant to be; total_mechanical_energy in physics_engine covers the conserved quantity.

use serde::Serialize;

use crate::physics_engine::Trajectory;

/// Closed interval spanned by a series, used to size plot axes
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesRange {
    pub min: f64,
    pub max: f64,
}

impl SeriesRange {
    fn of(values: &[f64]) -> Option<Self> {
        let (first, rest) = values.split_first()?;
        let init = Self {
            min: *first,
            max: *first,
        };
        Some(rest.iter().fold(init, |r, &v| Self {
            min: r.min.min(v),
            max: r.max.max(v),
        }))
    }
}

/// `per_body_kinetic_energy[body][step]` and `aggregate_energy[step]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergySeries {
    per_body_kinetic_energy: Vec<Vec<f64>>,
    aggregate_energy: Vec<f64>,
}

/// KE_i = ½ m_i |v_i|² at every step, each body with its own mass
pub fn derive_energy(trajectory: &Trajectory, masses: &[f64]) -> EnergySeries {
    let steps = trajectory.step_count();
    let mut per_body_kinetic_energy = vec![Vec::with_capacity(steps); masses.len()];
    let mut aggregate_energy = Vec::with_capacity(steps);

    for velocities in trajectory.velocities() {
        let mut total = 0.0;
        for ((series, m), v) in per_body_kinetic_energy.iter_mut().zip(masses).zip(velocities) {
            let ke = 0.5 * m * v.magnitude_squared();
            series.push(ke);
            total += ke;
        }
        aggregate_energy.push(total);
    }

    EnergySeries {
        per_body_kinetic_energy,
        aggregate_energy,
    }
}

impl EnergySeries {
    pub fn step_count(&self) -> usize {
        self.aggregate_energy.len()
    }

    pub fn per_body_kinetic_energy(&self) -> &[Vec<f64>] {
        &self.per_body_kinetic_energy
    }

    pub fn body_series(&self, body: usize) -> &[f64] {
        &self.per_body_kinetic_energy[body]
    }

    pub fn aggregate_energy(&self) -> &[f64] {
        &self.aggregate_energy
    }

    /// Series of every body truncated to steps `0..=index`
    pub fn body_prefixes(&self, index: usize) -> Vec<&[f64]> {
        self.per_body_kinetic_energy
            .iter()
            .map(|s| &s[..=index])
            .collect()
    }

    pub fn aggregate_prefix(&self, index: usize) -> &[f64] {
        &self.aggregate_energy[..=index]
    }

    pub fn body_range(&self, body: usize) -> Option<SeriesRange> {
        SeriesRange::of(&self.per_body_kinetic_energy[body])
    }

    pub fn aggregate_range(&self) -> Option<SeriesRange> {
        SeriesRange::of(&self.aggregate_energy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputForm;
    use crate::physics_engine::{integrate, Vector3};

    fn two_step_trajectory() -> Trajectory {
        Trajectory::from_samples(
            vec![0.0, 1.0],
            vec![vec![Vector3::zero(), Vector3::new(1.0, 0.0, 0.0)]; 2],
            vec![
                vec![Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 2.0, 0.0)],
                vec![Vector3::new(3.0, 4.0, 0.0), Vector3::zero()],
            ],
        )
    }

    #[test]
    fn test_each_body_uses_its_own_mass() {
        let energy = derive_energy(&two_step_trajectory(), &[2.0, 10.0]);
        assert_eq!(energy.body_series(0), &[1.0, 25.0]);
        assert_eq!(energy.body_series(1), &[20.0, 0.0]);
        assert_eq!(energy.aggregate_energy(), &[21.0, 25.0]);
    }

    #[test]
    fn test_ranges() {
        let energy = derive_energy(&two_step_trajectory(), &[2.0, 10.0]);
        assert_eq!(energy.body_range(1), Some(SeriesRange { min: 0.0, max: 20.0 }));
        assert_eq!(energy.aggregate_range(), Some(SeriesRange { min: 21.0, max: 25.0 }));
    }

    #[test]
    fn test_prefixes_include_current_step() {
        let energy = derive_energy(&two_step_trajectory(), &[2.0, 10.0]);
        assert_eq!(energy.aggregate_prefix(0), &[21.0]);
        let prefixes = energy.body_prefixes(1);
        assert_eq!(prefixes.len(), 2);
        assert_eq!(prefixes[0].len(), 2);
    }

    #[test]
    fn test_example_run_aggregate_is_sum_of_bodies() {
        let config = InputForm::three_body().parse().unwrap();
        let traj = integrate(&config).unwrap();
        let energy = derive_energy(&traj, &config.masses());

        assert_eq!(energy.step_count(), traj.step_count());
        for step in 0..energy.step_count() {
            let sum: f64 = (0..3).map(|b| energy.body_series(b)[step]).sum();
            assert_eq!(sum, energy.aggregate_energy()[step]);
            assert!(energy.aggregate_energy()[step] >= 0.0);
        }

        // Step 0 comes straight from the initial velocities
        let v0 = Vector3::new(10.0, 20.0, 30.0);
        assert_eq!(energy.body_series(0)[0], 0.5 * 1e26 * v0.magnitude_squared());
    }
}
