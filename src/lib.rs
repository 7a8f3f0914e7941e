// Orbit Sim - Two/Three-Body Gravitational Trajectory Engine
// Library entry point: integration, COG frame, energy series, and playback session

pub mod config;
pub mod energy;
pub mod error;
pub mod frames;
pub mod ode_solver;
pub mod physics_engine;
pub mod playback;
pub mod state_manager;

pub use config::{InputForm, PlaybackSettings, SimulationConfig, SolverSettings, TimeGrid};
pub use energy::{derive_energy, EnergySeries};
pub use error::{DomainError, SimulationError, ValidationError};
pub use frames::{derive_frame, CogFrame};
pub use physics_engine::{integrate, total_mechanical_energy, Body, GravityField, Trajectory, Vector3, G_KM};
pub use playback::{PlaybackCursor, PlaybackState};
pub use state_manager::{spawn_playback, AppState, FrameSink, SimulationRun, Snapshot, TickFrame};
