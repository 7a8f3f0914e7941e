// Configuration - Input capture, validation, and runtime settings
// Turns raw text fields into a validated SimulationConfig before any numeric work

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FieldError, FieldErrorKind, ValidationError};
use crate::ode_solver::Tolerances;
use crate::physics_engine::{Body, Vector3, G_KM};

/// Upper bound on grid samples; beyond this a run would not fit comfortably in memory
pub const MAX_SAMPLES: usize = 10_000_000;

// =============================================================================
// TIME GRID
// =============================================================================

/// `t0, t0 + dt, t0 + 2dt, ...` strictly below `tf`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeGrid")]
pub struct TimeGrid {
    t0: f64,
    tf: f64,
    dt: f64,
}

/// Unchecked wire form; every decoded grid goes through `TimeGrid::new`
#[derive(Deserialize)]
struct RawTimeGrid {
    t0: f64,
    tf: f64,
    dt: f64,
}

impl TryFrom<RawTimeGrid> for TimeGrid {
    type Error = ValidationError;

    fn try_from(raw: RawTimeGrid) -> Result<Self, Self::Error> {
        Self::new(raw.t0, raw.tf, raw.dt)
    }
}

impl TimeGrid {
    pub fn new(t0: f64, tf: f64, dt: f64) -> Result<Self, ValidationError> {
        let mut errors = Vec::new();
        for (field, value) in [("t0", t0), ("tf", tf), ("dt", dt)] {
            if !value.is_finite() {
                errors.push(FieldError::new(field, FieldErrorKind::NotFinite));
            }
        }
        if !errors.is_empty() {
            return Err(ValidationError { errors });
        }

        if dt <= 0.0 {
            errors.push(FieldError::new("dt", FieldErrorKind::NonPositiveStep(dt)));
        }
        if tf <= t0 {
            errors.push(FieldError::new(
                "tf",
                FieldErrorKind::InvertedTimeRange { t0, tf },
            ));
        }
        if !errors.is_empty() {
            return Err(ValidationError { errors });
        }

        let grid = Self { t0, tf, dt };
        // dt below the spacing of floats around t0 would repeat samples
        if grid.time_at(1) <= grid.time_at(0) {
            return Err(ValidationError::single(
                "dt",
                FieldErrorKind::NonPositiveStep(dt),
            ));
        }

        let len = grid.sample_count();
        if len < 2 {
            return Err(ValidationError::single("dt", FieldErrorKind::TooFewSamples(len)));
        }
        if len > MAX_SAMPLES {
            return Err(ValidationError::single("dt", FieldErrorKind::TooManySamples(len)));
        }

        Ok(grid)
    }

    fn sample_count(&self) -> usize {
        let n = ((self.tf - self.t0) / self.dt).ceil();
        if n >= usize::MAX as f64 {
            usize::MAX
        } else {
            n as usize
        }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.sample_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start(&self) -> f64 {
        self.t0
    }

    pub fn stop(&self) -> f64 {
        self.tf
    }

    pub fn step(&self) -> f64 {
        self.dt
    }

    pub fn time_at(&self, index: usize) -> f64 {
        self.t0 + index as f64 * self.dt
    }

    pub fn samples(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.time_at(i)).collect()
    }
}

// =============================================================================
// SOLVER SETTINGS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    pub tolerances: Tolerances,
    /// Steps allowed between two consecutive grid times
    pub max_steps_per_interval: usize,
}

impl SolverSettings {
    pub const DEFAULT_MAX_STEPS: usize = 500;

    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        for (field, value) in [
            ("solver.rtol", self.tolerances.rtol),
            ("solver.atol", self.tolerances.atol),
        ] {
            if !value.is_finite() || value <= 0.0 {
                errors.push(FieldError::new(field, FieldErrorKind::InvalidTolerance(value)));
            }
        }
        if self.max_steps_per_interval == 0 {
            errors.push(FieldError::new(
                "solver.max_steps_per_interval",
                FieldErrorKind::ZeroStepLimit,
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { errors })
        }
    }
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            tolerances: Tolerances::default(),
            max_steps_per_interval: Self::DEFAULT_MAX_STEPS,
        }
    }
}

// =============================================================================
// SIMULATION CONFIG
// =============================================================================

/// Validated input for one run. Invariants: 2 or 3 bodies, positive finite
/// masses, finite initial states, a grid of at least two samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationConfig {
    bodies: Vec<Body>,
    gravitational_constant: f64,
    time_grid: TimeGrid,
    solver: SolverSettings,
}

impl SimulationConfig {
    pub fn new(bodies: Vec<Body>, time_grid: TimeGrid) -> Result<Self, ValidationError> {
        let mut errors = Vec::new();
        if !(2..=3).contains(&bodies.len()) {
            errors.push(FieldError::new(
                "bodies",
                FieldErrorKind::BodyCount(bodies.len()),
            ));
        }

        for (i, body) in bodies.iter().enumerate() {
            let prefix = format!("body{}", i + 1);
            if !body.mass.is_finite() {
                errors.push(FieldError::new(format!("{prefix}.mass"), FieldErrorKind::NotFinite));
            } else if body.mass <= 0.0 {
                errors.push(FieldError::new(
                    format!("{prefix}.mass"),
                    FieldErrorKind::NonPositiveMass(body.mass),
                ));
            }
            if !body.position.is_finite() {
                errors.push(FieldError::new(
                    format!("{prefix}.position"),
                    FieldErrorKind::NotFinite,
                ));
            }
            if !body.velocity.is_finite() {
                errors.push(FieldError::new(
                    format!("{prefix}.velocity"),
                    FieldErrorKind::NotFinite,
                ));
            }
        }

        if !errors.is_empty() {
            return Err(ValidationError { errors });
        }

        Ok(Self {
            bodies,
            gravitational_constant: G_KM,
            time_grid,
            solver: SolverSettings::default(),
        })
    }

    /// Override G (unit systems other than km/kg/s)
    pub fn with_gravitational_constant(mut self, g: f64) -> Result<Self, ValidationError> {
        if !g.is_finite() || g <= 0.0 {
            return Err(ValidationError::single("G", FieldErrorKind::InvalidConstant(g)));
        }
        self.gravitational_constant = g;
        Ok(self)
    }

    pub fn with_solver(mut self, solver: SolverSettings) -> Result<Self, ValidationError> {
        solver.validate()?;
        self.solver = solver;
        Ok(self)
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn masses(&self) -> Vec<f64> {
        self.bodies.iter().map(|b| b.mass).collect()
    }

    pub fn gravitational_constant(&self) -> f64 {
        self.gravitational_constant
    }

    pub fn time_grid(&self) -> &TimeGrid {
        &self.time_grid
    }

    pub fn solver(&self) -> &SolverSettings {
        &self.solver
    }
}

// =============================================================================
// INPUT FORM (raw text from the UI)
// =============================================================================

/// Text fields for one body, exactly as typed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyFields {
    pub mass: String,
    pub position: [String; 3],
    pub velocity: [String; 3],
}

impl BodyFields {
    pub fn new(mass: &str, position: [&str; 3], velocity: [&str; 3]) -> Self {
        Self {
            mass: mass.to_string(),
            position: position.map(str::to_string),
            velocity: velocity.map(str::to_string),
        }
    }
}

/// Everything the user can edit before pressing start.
///
/// Parsing is a separate pass from integration: `parse` either yields a
/// config or every field error at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputForm {
    pub bodies: Vec<BodyFields>,
    pub t0: String,
    pub tf: String,
    pub dt: String,
}

const AXES: [&str; 3] = ["x", "y", "z"];

fn default_body(index: usize) -> BodyFields {
    match index {
        0 => BodyFields::new("1e26", ["0", "0", "0"], ["10", "20", "30"]),
        1 => BodyFields::new("1e20", ["0", "3000", "0"], ["0", "40", "0"]),
        _ => BodyFields::new("1e10", ["3000", "0", "0"], ["0", "40", "0"]),
    }
}

impl Default for InputForm {
    fn default() -> Self {
        Self {
            bodies: vec![default_body(0), default_body(1)],
            t0: "0".to_string(),
            tf: "480".to_string(),
            dt: "0.5".to_string(),
        }
    }
}

impl InputForm {
    /// Defaults with the third body enabled
    pub fn three_body() -> Self {
        let mut form = Self::default();
        form.set_three_body(true);
        form
    }

    pub fn is_three_body(&self) -> bool {
        self.bodies.len() == 3
    }

    /// Add the default third body, or drop it
    pub fn set_three_body(&mut self, enabled: bool) {
        if enabled && self.bodies.len() < 3 {
            self.bodies.push(default_body(2));
        } else if !enabled {
            self.bodies.truncate(2);
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse and validate every field
    pub fn parse(&self) -> Result<SimulationConfig, ValidationError> {
        let mut errors = Vec::new();

        if !(2..=3).contains(&self.bodies.len()) {
            errors.push(FieldError::new(
                "bodies",
                FieldErrorKind::BodyCount(self.bodies.len()),
            ));
        }

        let mut bodies = Vec::with_capacity(self.bodies.len());
        for (i, fields) in self.bodies.iter().enumerate() {
            let prefix = format!("body{}", i + 1);

            let mass = parse_real(&format!("{prefix}.mass"), &fields.mass, &mut errors);
            if let Some(m) = mass {
                if m <= 0.0 {
                    errors.push(FieldError::new(
                        format!("{prefix}.mass"),
                        FieldErrorKind::NonPositiveMass(m),
                    ));
                }
            }
            let position = parse_vector(&format!("{prefix}.position"), &fields.position, &mut errors);
            let velocity = parse_vector(&format!("{prefix}.velocity"), &fields.velocity, &mut errors);

            if let (Some(m), Some(r), Some(v)) = (mass, position, velocity) {
                bodies.push(Body::new(m, r, v));
            }
        }

        let t0 = parse_real("t0", &self.t0, &mut errors);
        let tf = parse_real("tf", &self.tf, &mut errors);
        let dt = parse_real("dt", &self.dt, &mut errors);

        let grid = match (t0, tf, dt) {
            (Some(t0), Some(tf), Some(dt)) => match TimeGrid::new(t0, tf, dt) {
                Ok(grid) => Some(grid),
                Err(e) => {
                    errors.extend(e.errors);
                    None
                }
            },
            _ => None,
        };

        if !errors.is_empty() {
            return Err(ValidationError { errors });
        }

        match grid {
            Some(grid) => SimulationConfig::new(bodies, grid),
            None => Err(ValidationError::single("dt", FieldErrorKind::TooFewSamples(0))),
        }
    }
}

fn parse_real(field: &str, text: &str, errors: &mut Vec<FieldError>) -> Option<f64> {
    match text.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        Ok(_) => {
            errors.push(FieldError::new(field, FieldErrorKind::NotFinite));
            None
        }
        Err(_) => {
            errors.push(FieldError::new(
                field,
                FieldErrorKind::NotANumber(text.to_string()),
            ));
            None
        }
    }
}

fn parse_vector(prefix: &str, texts: &[String; 3], errors: &mut Vec<FieldError>) -> Option<Vector3> {
    let mut out = [0.0; 3];
    let mut ok = true;
    for (i, text) in texts.iter().enumerate() {
        match parse_real(&format!("{prefix}.{}", AXES[i]), text, errors) {
            Some(v) => out[i] = v,
            None => ok = false,
        }
    }
    ok.then(|| Vector3::from(out))
}

// =============================================================================
// PLAYBACK SETTINGS
// =============================================================================

/// Cadence and initial speed of the playback loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    pub tick_interval: Duration,
    pub initial_speed: usize,
}

impl PlaybackSettings {
    pub const TICK_ENV: &'static str = "ORBIT_SIM_TICK_MS";
    pub const SPEED_ENV: &'static str = "ORBIT_SIM_SPEED";

    /// Read overrides from the process environment (and a `.env` file if present)
    pub fn from_env() -> Result<Self, ValidationError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but with an explicit variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        let mut errors = Vec::new();

        if let Some(raw) = lookup(Self::TICK_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => settings.tick_interval = Duration::from_millis(ms),
                Ok(ms) => errors.push(FieldError::new(
                    Self::TICK_ENV,
                    FieldErrorKind::NonPositiveStep(ms as f64),
                )),
                Err(_) => errors.push(FieldError::new(Self::TICK_ENV, FieldErrorKind::NotANumber(raw))),
            }
        }

        if let Some(raw) = lookup(Self::SPEED_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(speed) => settings.initial_speed = speed,
                Err(_) => errors.push(FieldError::new(Self::SPEED_ENV, FieldErrorKind::NotANumber(raw))),
            }
        }

        if errors.is_empty() {
            Ok(settings)
        } else {
            Err(ValidationError { errors })
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(10),
            initial_speed: 10,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_time_grid_matches_half_open_range() {
        let grid = TimeGrid::new(0.0, 480.0, 0.5).unwrap();
        assert_eq!(grid.len(), 960);
        let samples = grid.samples();
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[959], 479.5);
        assert!(samples.windows(2).all(|w| w[1] > w[0]));

        // Stop not on the grid: last sample is the one just below it
        let grid = TimeGrid::new(1.0, 2.05, 0.1).unwrap();
        assert_eq!(grid.len(), 11);
        assert!(grid.samples()[10] < 2.05);
    }

    #[test]
    fn test_time_grid_rejects_bad_ranges() {
        let err = TimeGrid::new(10.0, 5.0, 0.5).unwrap_err();
        assert!(err.has_field("tf"));

        let err = TimeGrid::new(0.0, 5.0, 0.0).unwrap_err();
        assert!(err.has_field("dt"));

        let err = TimeGrid::new(0.0, 5.0, -1.0).unwrap_err();
        assert!(err.has_field("dt"));

        let err = TimeGrid::new(0.0, f64::INFINITY, 1.0).unwrap_err();
        assert_eq!(err.errors[0].kind, FieldErrorKind::NotFinite);

        // One sample only
        let err = TimeGrid::new(0.0, 0.5, 1.0).unwrap_err();
        assert_eq!(err.errors[0].kind, FieldErrorKind::TooFewSamples(1));
    }

    #[test]
    fn test_time_grid_json_is_validated() {
        let grid: TimeGrid = serde_json::from_str(r#"{"t0":0,"tf":10,"dt":0.5}"#).unwrap();
        assert_eq!(grid.len(), 20);
        assert!(!grid.is_empty());
        let json = serde_json::to_string(&grid).unwrap();
        assert_eq!(serde_json::from_str::<TimeGrid>(&json).unwrap(), grid);

        for bad in [
            r#"{"t0":0,"tf":10,"dt":-1}"#,
            r#"{"t0":0,"tf":10,"dt":0}"#,
            r#"{"t0":10,"tf":0,"dt":1}"#,
            r#"{"t0":0,"tf":0.5,"dt":1}"#,
        ] {
            let err = serde_json::from_str::<TimeGrid>(bad).unwrap_err();
            assert!(err.to_string().contains("invalid simulation input"), "{bad}: {err}");
        }
    }

    #[test]
    fn test_default_form_parses_to_example_scenario() {
        let config = InputForm::default().parse().unwrap();
        assert_eq!(config.body_count(), 2);
        assert_eq!(config.masses(), vec![1e26, 1e20]);
        assert_eq!(config.bodies()[1].position, Vector3::new(0.0, 3000.0, 0.0));
        assert_eq!(config.bodies()[0].velocity, Vector3::new(10.0, 20.0, 30.0));
        assert_eq!(config.time_grid().len(), 960);
        assert_eq!(config.gravitational_constant(), 6.6743e-20);
    }

    #[test]
    fn test_three_body_toggle() {
        let mut form = InputForm::default();
        assert!(!form.is_three_body());

        form.set_three_body(true);
        assert!(form.is_three_body());
        assert_eq!(form.bodies[2].mass, "1e10");
        // toggling on twice does not add a fourth body
        form.set_three_body(true);
        assert_eq!(form.bodies.len(), 3);

        let config = form.parse().unwrap();
        assert_eq!(config.body_count(), 3);

        form.set_three_body(false);
        assert_eq!(form.bodies.len(), 2);
    }

    #[test]
    fn test_parse_collects_every_field_error() {
        let mut form = InputForm::default();
        form.bodies[0].mass = "heavy".to_string();
        form.bodies[1].mass = "-5".to_string();
        form.bodies[1].position[2] = "".to_string();
        form.dt = "0".to_string();

        let err = form.parse().unwrap_err();
        assert!(err.has_field("body1.mass"));
        assert!(err.has_field("body2.mass"));
        assert!(err.has_field("body2.position.z"));
        assert!(err.has_field("dt"));
        assert_eq!(err.errors.len(), 4);
        assert_eq!(
            err.errors[0].kind,
            FieldErrorKind::NotANumber("heavy".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_non_finite_text() {
        let mut form = InputForm::default();
        form.bodies[0].velocity[0] = "inf".to_string();
        form.tf = "NaN".to_string();
        let err = form.parse().unwrap_err();
        assert!(err.has_field("body1.velocity.x"));
        assert!(err.has_field("tf"));
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let mut form = InputForm::default();
        form.bodies[0].mass = "  2e25 ".to_string();
        let config = form.parse().unwrap();
        assert_eq!(config.masses()[0], 2e25);
    }

    #[test]
    fn test_body_count_is_enforced() {
        let mut form = InputForm::default();
        form.bodies.truncate(1);
        let err = form.parse().unwrap_err();
        assert_eq!(err.errors[0].kind, FieldErrorKind::BodyCount(1));

        let grid = TimeGrid::new(0.0, 1.0, 0.5).unwrap();
        let one = vec![Body::new(1.0, Vector3::zero(), Vector3::zero()); 4];
        assert!(SimulationConfig::new(one, grid).is_err());
    }

    #[test]
    fn test_form_json_round_trip_keeps_text() {
        let form = InputForm::three_body();
        let json = form.to_json().unwrap();
        assert!(json.contains("\"1e26\""));
        assert_eq!(InputForm::from_json(&json).unwrap(), form);
    }

    #[test]
    fn test_solver_settings_validation() {
        let config = InputForm::default().parse().unwrap();
        let bad = SolverSettings {
            tolerances: Tolerances::new(0.0, f64::NAN),
            max_steps_per_interval: 0,
        };
        let err = config.clone().with_solver(bad).unwrap_err();
        assert_eq!(err.errors.len(), 3);

        let err = config.with_gravitational_constant(-1.0).unwrap_err();
        assert_eq!(err.errors[0].kind, FieldErrorKind::InvalidConstant(-1.0));
        assert!(err.has_field("G"));
    }

    #[test]
    fn test_playback_settings_from_lookup() {
        let vars: HashMap<&str, &str> = [("ORBIT_SIM_TICK_MS", "25"), ("ORBIT_SIM_SPEED", "3")]
            .into_iter()
            .collect();
        let settings = PlaybackSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.tick_interval, Duration::from_millis(25));
        assert_eq!(settings.initial_speed, 3);

        let defaults = PlaybackSettings::from_lookup(|_| None).unwrap();
        assert_eq!(defaults, PlaybackSettings::default());
        assert_eq!(defaults.tick_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_playback_settings_reject_garbage() {
        let err = PlaybackSettings::from_lookup(|k| match k {
            "ORBIT_SIM_TICK_MS" => Some("0".to_string()),
            "ORBIT_SIM_SPEED" => Some("-2".to_string()),
            _ => None,
        })
        .unwrap_err();
        assert!(err.has_field("ORBIT_SIM_TICK_MS"));
        assert!(err.has_field("ORBIT_SIM_SPEED"));
    }
}
