// Physics Engine - Two/Three-Body Gravitational Motion
// Implements the Newtonian gravity field, state packing, and trajectory integration

use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::error::DomainError;
use crate::ode_solver::{DormandPrince, OdeSystem, SolverStats};

// =============================================================================
// PHYSICAL CONSTANTS (km, kg, s)
// =============================================================================

/// Gravitational constant (km³/(kg·s²))
pub const G_KM: f64 = 6.6743e-20;

// =============================================================================
// 3D VECTOR MATHEMATICS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    pub fn magnitude(&self) -> f64 {
        self.magnitude_squared().sqrt()
    }

    pub fn magnitude_squared(&self) -> f64 {
        self.dot(self)
    }

    pub fn dot(&self, other: &Vector3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn scale(&self, s: f64) -> Self {
        Self {
            x: self.x * s,
            y: self.y * s,
            z: self.z * s,
        }
    }

    pub fn add(&self, other: &Vector3) -> Vector3 {
        Vector3 {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }

    pub fn sub(&self, other: &Vector3) -> Vector3 {
        Vector3 {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for Vector3 {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// Mass-weighted centroid Σ m_i·p_i / Σ m_i
pub fn weighted_centroid(masses: &[f64], points: impl IntoIterator<Item = Vector3>) -> Vector3 {
    let total: f64 = masses.iter().sum();
    let weighted = masses
        .iter()
        .zip(points)
        .fold(Vector3::zero(), |acc, (m, p)| acc.add(&p.scale(*m)));
    weighted.scale(1.0 / total)
}

// =============================================================================
// BODY
// =============================================================================

/// A point mass. Identity is its index in the configuration (1-based in messages).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub mass: f64,         // kg
    pub position: Vector3, // km
    pub velocity: Vector3, // km/s
}

impl Body {
    pub fn new(mass: f64, position: Vector3, velocity: Vector3) -> Self {
        Self {
            mass,
            position,
            velocity,
        }
    }

    /// 0.5 * m * |v|²
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.velocity.magnitude_squared()
    }
}

// =============================================================================
// STATE VECTOR LAYOUT
// =============================================================================
//
// y = [r_1 .. r_k, v_1 .. v_k], three components each, so len(y) = 6k.

/// Concatenate body states into the solver layout
pub fn pack_state(bodies: &[Body]) -> Vec<f64> {
    let mut y = Vec::with_capacity(6 * bodies.len());
    for b in bodies {
        y.extend_from_slice(&b.position.to_array());
    }
    for b in bodies {
        y.extend_from_slice(&b.velocity.to_array());
    }
    y
}

fn vector_at(y: &[f64], offset: usize) -> Vector3 {
    Vector3::new(y[offset], y[offset + 1], y[offset + 2])
}

/// Split a packed state back into per-body positions and velocities
pub fn unpack_state(y: &[f64], body_count: usize) -> (Vec<Vector3>, Vec<Vector3>) {
    let positions = (0..body_count).map(|i| vector_at(y, 3 * i)).collect();
    let velocities = (0..body_count)
        .map(|i| vector_at(y, 3 * (body_count + i)))
        .collect();
    (positions, velocities)
}

// =============================================================================
// GRAVITY FIELD
// =============================================================================

/// Pairwise Newtonian attraction between k point masses, no softening.
///
/// a_i = G * Σ_{j≠i} m_j (r_j - r_i) / |r_j - r_i|³
#[derive(Debug, Clone, PartialEq)]
pub struct GravityField {
    g: f64,
    masses: Vec<f64>,
}

impl GravityField {
    pub fn new(g: f64, masses: Vec<f64>) -> Self {
        Self { g, masses }
    }

    pub fn for_bodies(g: f64, bodies: &[Body]) -> Self {
        Self::new(g, bodies.iter().map(|b| b.mass).collect())
    }

    pub fn body_count(&self) -> usize {
        self.masses.len()
    }

    /// Acceleration of every body at the given positions
    pub fn accelerations(&self, t: f64, positions: &[Vector3]) -> Result<Vec<Vector3>, DomainError> {
        let k = self.masses.len();
        let mut out = vec![Vector3::zero(); k];

        for i in 0..k {
            let ri = positions[i];
            for j in 0..k {
                if j == i {
                    continue;
                }
                let r_vec = positions[j].sub(&ri);
                let r = r_vec.magnitude();
                let inv_r3 = 1.0 / (r * r * r);

                // r == 0 gives inf here; so does a separation whose cube underflows
                if r == 0.0 || !inv_r3.is_finite() {
                    let (first, second) = if i < j { (i + 1, j + 1) } else { (j + 1, i + 1) };
                    return Err(DomainError::Singularity {
                        first,
                        second,
                        t,
                        separation: r,
                    });
                }

                out[i] = out[i].add(&r_vec.scale(self.g * self.masses[j] * inv_r3));
            }
        }

        Ok(out)
    }

    /// dy/dt for a packed state: [v_1 .. v_k, a_1 .. a_k]
    pub fn derivative(&self, t: f64, y: &[f64], dydt: &mut [f64]) -> Result<(), DomainError> {
        let k = self.masses.len();
        debug_assert_eq!(y.len(), 6 * k);
        debug_assert_eq!(dydt.len(), 6 * k);

        if let Some(component) = y.iter().position(|v| !v.is_finite()) {
            return Err(DomainError::NonFiniteState { component, t });
        }

        let (positions, _) = unpack_state(y, k);
        let accelerations = self.accelerations(t, &positions)?;

        dydt[..3 * k].copy_from_slice(&y[3 * k..]);
        for (i, a) in accelerations.iter().enumerate() {
            dydt[3 * (k + i)..3 * (k + i) + 3].copy_from_slice(&a.to_array());
        }

        Ok(())
    }
}

impl OdeSystem for GravityField {
    fn dimension(&self) -> usize {
        6 * self.masses.len()
    }

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) -> Result<(), DomainError> {
        self.derivative(t, y, dydt)
    }
}

// =============================================================================
// TRAJECTORY
// =============================================================================

/// Time-indexed states of one run, aligned with the configured time grid.
/// `positions[step][body]`, same for velocities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    times: Vec<f64>,
    positions: Vec<Vec<Vector3>>,
    velocities: Vec<Vec<Vector3>>,
    stats: SolverStats,
}

impl Trajectory {
    /// Build from per-step samples. Every step must hold the same number of bodies.
    pub fn from_samples(
        times: Vec<f64>,
        positions: Vec<Vec<Vector3>>,
        velocities: Vec<Vec<Vector3>>,
    ) -> Self {
        debug_assert_eq!(times.len(), positions.len());
        debug_assert_eq!(times.len(), velocities.len());
        Self {
            times,
            positions,
            velocities,
            stats: SolverStats::default(),
        }
    }

    fn from_states(times: Vec<f64>, states: Vec<Vec<f64>>, body_count: usize, stats: SolverStats) -> Self {
        let (positions, velocities) = states
            .iter()
            .map(|y| unpack_state(y, body_count))
            .unzip();
        Self {
            times,
            positions,
            velocities,
            stats,
        }
    }

    pub fn step_count(&self) -> usize {
        self.times.len()
    }

    pub fn body_count(&self) -> usize {
        self.positions.first().map_or(0, Vec::len)
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn positions(&self) -> &[Vec<Vector3>] {
        &self.positions
    }

    pub fn velocities(&self) -> &[Vec<Vector3>] {
        &self.velocities
    }

    /// Positions of all bodies at one step
    pub fn positions_at(&self, step: usize) -> &[Vector3] {
        &self.positions[step]
    }

    pub fn velocities_at(&self, step: usize) -> &[Vector3] {
        &self.velocities[step]
    }

    /// Path of a single body over the whole run
    pub fn body_path(&self, body: usize) -> impl Iterator<Item = Vector3> + '_ {
        self.positions.iter().map(move |p| p[body])
    }

    /// Reassemble bodies at `step` with the given masses
    pub fn bodies_at(&self, step: usize, masses: &[f64]) -> Vec<Body> {
        masses
            .iter()
            .zip(&self.positions[step])
            .zip(&self.velocities[step])
            .map(|((m, r), v)| Body::new(*m, *r, *v))
            .collect()
    }

    pub fn stats(&self) -> SolverStats {
        self.stats
    }
}

// =============================================================================
// INTEGRATOR
// =============================================================================

/// Integrate the configured bodies over the configured time grid.
///
/// The returned trajectory has one sample per grid time, and sample 0 is the
/// initial state exactly. Any singularity met along the way aborts the run.
pub fn integrate(config: &SimulationConfig) -> Result<Trajectory, DomainError> {
    let field = GravityField::for_bodies(config.gravitational_constant(), config.bodies());
    let y0 = pack_state(config.bodies());
    let times = config.time_grid().samples();

    let settings = config.solver();
    let mut solver = DormandPrince::new(settings.tolerances, settings.max_steps_per_interval);
    let states = solver.integrate_grid(&field, &y0, &times)?;

    Ok(Trajectory::from_states(
        times,
        states,
        field.body_count(),
        solver.stats,
    ))
}

// =============================================================================
// ENERGY CALCULATIONS (for integrator accuracy checks)
// =============================================================================

/// Total mechanical energy: kinetic plus pairwise potential -G m_i m_j / r.
///
/// A diagnostic only; the energy series shown to the user is kinetic.
pub fn total_mechanical_energy(bodies: &[Body], g: f64) -> f64 {
    let kinetic: f64 = bodies.iter().map(Body::kinetic_energy).sum();

    let mut potential = 0.0;
    for i in 0..bodies.len() {
        for j in (i + 1)..bodies.len() {
            let r = bodies[i].position.sub(&bodies[j].position).magnitude();
            potential -= g * bodies[i].mass * bodies[j].mass / r;
        }
    }

    kinetic + potential
}

// =============================================================================
// TESTS
// =============================================================================
