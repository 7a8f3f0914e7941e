// Error Types - Validation and integration failures
// Every failure the engine can report is a typed value; presentation is left to the caller

use serde::Serialize;
use thiserror::Error;

// =============================================================================
// VALIDATION (raised before any numeric work)
// =============================================================================

/// Why a single input field was rejected
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
pub enum FieldErrorKind {
    #[error("'{0}' is not a number")]
    NotANumber(String),

    #[error("value must be finite")]
    NotFinite,

    #[error("mass must be strictly positive (got {0})")]
    NonPositiveMass(f64),

    #[error("time step must be strictly positive (got {0})")]
    NonPositiveStep(f64),

    #[error("end time {tf} must be greater than start time {t0}")]
    InvertedTimeRange { t0: f64, tf: f64 },

    #[error("time grid has {0} sample(s), at least 2 are required")]
    TooFewSamples(usize),

    #[error("time grid has {0} samples, which exceeds the supported maximum")]
    TooManySamples(usize),

    #[error("step limit per interval must be at least 1")]
    ZeroStepLimit,

    #[error("expected 2 or 3 bodies, got {0}")]
    BodyCount(usize),

    #[error("physical constant must be finite and strictly positive (got {0})")]
    InvalidConstant(f64),

    #[error("tolerance must be finite and strictly positive (got {0})")]
    InvalidTolerance(f64),
}

/// A rejected input field, named the way the input form names it (e.g. `body2.position.y`)
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{field}: {kind}")]
pub struct FieldError {
    pub field: String,
    pub kind: FieldErrorKind,
}

impl FieldError {
    pub fn new(field: impl Into<String>, kind: FieldErrorKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

/// Malformed or out-of-domain input. Carries every field that failed, not just the first.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("invalid simulation input ({} field error(s)): {}", .errors.len(), summarize(.errors))]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, kind: FieldErrorKind) -> Self {
        Self {
            errors: vec![FieldError::new(field, kind)],
        }
    }

    /// True if any error was reported for `field`
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// DOMAIN (raised during integration)
// =============================================================================

/// Runtime failure while integrating an otherwise valid configuration
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
pub enum DomainError {
    /// Two bodies share a position, so the inverse-cube law has no value
    #[error("bodies {first} and {second} coincide at t = {t} (separation {separation})")]
    Singularity {
        first: usize,
        second: usize,
        t: f64,
        separation: f64,
    },

    #[error("state component {component} is not finite at t = {t}")]
    NonFiniteState { component: usize, t: f64 },

    #[error("step size underflow at t = {t} (h = {h})")]
    StepSizeUnderflow { t: f64, h: f64 },

    #[error("more than {max_steps} steps needed between t = {from} and t = {to}")]
    StepLimitExceeded { from: f64, to: f64, max_steps: usize },
}

// =============================================================================
// SESSION BOUNDARY
// =============================================================================

/// Failure of a whole run request, as seen by the caller of the session
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}
