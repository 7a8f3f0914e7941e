// State Manager - Thread-safe session state and the playback loop
// Holds the current run behind a lock, swaps it on reconfiguration, and drives playback ticks

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::{InputForm, PlaybackSettings, SimulationConfig};
use crate::energy::{derive_energy, EnergySeries};
use crate::error::{DomainError, SimulationError};
use crate::frames::{derive_frame, CogFrame};
use crate::ode_solver::SolverStats;
use crate::physics_engine::{integrate, Trajectory, Vector3};
use crate::playback::{PlaybackCursor, PlaybackState};

// =============================================================================
// SIMULATION RUN (immutable once built)
// =============================================================================

/// Config plus everything derived from it. Never mutated; replaced as a whole.
#[derive(Debug)]
pub struct SimulationRun {
    config: SimulationConfig,
    trajectory: Trajectory,
    frame: CogFrame,
    energy: EnergySeries,
    computed_at: DateTime<Utc>,
}

impl SimulationRun {
    /// Integrate and derive both views. Pure batch work, no locks.
    pub fn compute(config: SimulationConfig) -> Result<Self, DomainError> {
        let trajectory = integrate(&config)?;
        let masses = config.masses();
        let frame = derive_frame(&trajectory, &masses);
        let energy = derive_energy(&trajectory, &masses);

        Ok(Self {
            config,
            trajectory,
            frame,
            energy,
            computed_at: Utc::now(),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn frame(&self) -> &CogFrame {
        &self.frame
    }

    pub fn energy(&self) -> &EnergySeries {
        &self.energy
    }

    pub fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    pub fn step_count(&self) -> usize {
        self.trajectory.step_count()
    }

    pub fn info(&self) -> RunInfo {
        RunInfo {
            body_count: self.config.body_count(),
            step_count: self.step_count(),
            t0: self.config.time_grid().start(),
            tf: self.config.time_grid().stop(),
            dt: self.config.time_grid().step(),
            computed_at: self.computed_at,
            solver: self.trajectory.stats(),
        }
    }
}

/// Run metadata for the frontend
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub body_count: usize,
    pub step_count: usize,
    pub t0: f64,
    pub tf: f64,
    pub dt: f64,
    pub computed_at: DateTime<Utc>,
    pub solver: SolverStats,
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// One playback position in one run. Keeps the run alive while it is being drawn.
#[derive(Debug, Clone)]
pub struct TickFrame {
    pub run: Arc<SimulationRun>,
    pub index: usize,
}

/// Read-only view handed to the renderer
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot<'a> {
    pub index: usize,
    pub time: f64,
    pub step_count: usize,
    pub positions: &'a [Vector3],
    pub cog_position: Vector3,
    pub relative_positions: Vec<Vector3>,
    pub cog_in_relative_frame: Vector3,
    /// Steps 0..=index
    pub per_body_kinetic_energy: Vec<&'a [f64]>,
    pub aggregate_energy: &'a [f64],
}

impl TickFrame {
    pub fn snapshot(&self) -> Snapshot<'_> {
        let run = &*self.run;
        let i = self.index;
        Snapshot {
            index: i,
            time: run.trajectory.times()[i],
            step_count: run.step_count(),
            positions: run.trajectory.positions_at(i),
            cog_position: run.frame.cog_position()[i],
            relative_positions: run.frame.relative_at(i),
            cog_in_relative_frame: run.frame.cog_in_relative_frame()[i],
            per_body_kinetic_energy: run.energy.body_prefixes(i),
            aggregate_energy: run.energy.aggregate_prefix(i),
        }
    }
}

// =============================================================================
// GLOBAL STATE
// =============================================================================

#[derive(Debug)]
struct Session {
    run: Option<Arc<SimulationRun>>,
    cursor: PlaybackCursor,
}

/// Shared handle to the session. Clones refer to the same state.
#[derive(Debug, Clone)]
pub struct AppState {
    session: Arc<RwLock<Session>>,
}

impl AppState {
    pub fn new(settings: &PlaybackSettings) -> Self {
        Self {
            session: Arc::new(RwLock::new(Session {
                run: None,
                cursor: PlaybackCursor::new(0, settings.initial_speed),
            })),
        }
    }

    /// Parse the form and replace the current run
    pub fn reconfigure(&self, form: &InputForm) -> Result<Arc<SimulationRun>, SimulationError> {
        let config = form.parse().map_err(|e| {
            tracing::warn!("[session] rejected input: {}", e);
            e
        })?;
        self.load(config)
    }

    /// Replace the current run with one computed from `config`.
    ///
    /// The new run is built before the lock is taken; run and cursor then change
    /// under a single write lock. On failure nothing changes.
    pub fn load(&self, config: SimulationConfig) -> Result<Arc<SimulationRun>, SimulationError> {
        let run = match SimulationRun::compute(config) {
            Ok(run) => Arc::new(run),
            Err(e) => {
                tracing::warn!("[session] integration failed, keeping previous run: {}", e);
                return Err(e.into());
            }
        };

        {
            let mut session = self.session.write();
            session.cursor.reset(run.step_count());
            session.run = Some(Arc::clone(&run));
        }

        let stats = run.trajectory().stats();
        tracing::info!(
            "[session] new run: {} bodies, {} steps ({} accepted / {} rejected solver steps)",
            run.config().body_count(),
            run.step_count(),
            stats.accepted_steps,
            stats.rejected_steps
        );
        Ok(run)
    }

    pub fn current_run(&self) -> Option<Arc<SimulationRun>> {
        self.session.read().run.clone()
    }

    pub fn run_info(&self) -> Option<RunInfo> {
        self.session.read().run.as_ref().map(|r| r.info())
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.session.read().cursor.clone()
    }

    /// Advance the cursor. `None` when paused or when nothing has been computed yet.
    pub fn tick(&self) -> Option<TickFrame> {
        let mut session = self.session.write();
        if !session.cursor.is_running() {
            return None;
        }
        let run = session.run.clone()?;
        let index = session.cursor.tick();
        Some(TickFrame { run, index })
    }

    /// Frame at the current index without advancing
    pub fn current_frame(&self) -> Option<TickFrame> {
        let session = self.session.read();
        let run = session.run.clone()?;
        Some(TickFrame {
            run,
            index: session.cursor.index(),
        })
    }

    pub fn set_speed(&self, speed: usize) {
        self.session.write().cursor.set_speed(speed);
        tracing::debug!("[session] speed set to {}", speed);
    }

    pub fn pause(&self) {
        self.session.write().cursor.pause();
    }

    pub fn resume(&self) {
        self.session.write().cursor.resume();
    }

    pub fn toggle_pause(&self) -> PlaybackState {
        self.session.write().cursor.toggle()
    }

    /// Jump back to step 0 of the current run
    pub fn restart(&self) {
        let mut session = self.session.write();
        let steps = session.run.as_ref().map_or(0, |r| r.step_count());
        session.cursor.reset(steps);
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(&PlaybackSettings::default())
    }
}

// =============================================================================
// PLAYBACK LOOP (runs as a tokio task)
// =============================================================================

/// Receives each frame produced by the playback loop
pub trait FrameSink: Send {
    fn render(&mut self, frame: &TickFrame);
}

/// Tick at a fixed cadence until `shutdown` flips to true (or its sender is dropped).
///
/// Rendering happens inline, so a slow sink delays the next tick; missed ticks are
/// skipped, never replayed. Returns the sink once stopped.
pub async fn run_playback<S: FrameSink>(
    state: AppState,
    settings: PlaybackSettings,
    mut sink: S,
    mut shutdown: watch::Receiver<bool>,
) -> S {
    let mut ticker = interval(settings.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!("[playback] started, tick every {:?}", settings.tick_interval);

    let mut rendered = 0usize;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(frame) = state.tick() {
                    sink.render(&frame);
                    rendered += 1;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("[playback] stopped after {} frames", rendered);
    sink
}

/// A running playback task
pub struct PlaybackHandle<S> {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<S>,
}

impl<S> PlaybackHandle<S> {
    /// Signal shutdown and wait for the loop to return the sink
    pub async fn stop(self) -> Result<S, tokio::task::JoinError> {
        // Receiver gone means the task already ended
        let _ = self.shutdown.send(true);
        self.task.await
    }
}

pub fn spawn_playback<S>(state: AppState, settings: PlaybackSettings, sink: S) -> PlaybackHandle<S>
where
    S: FrameSink + 'static,
{
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(run_playback(state, settings, sink, rx));
    PlaybackHandle { shutdown, task }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldErrorKind;
    use std::time::Duration;

    fn short_form() -> InputForm {
        let mut form = InputForm::default();
        form.tf = "50".to_string();
        form
    }

    #[derive(Default)]
    struct Recorder {
        indices: Vec<usize>,
    }

    impl FrameSink for Recorder {
        fn render(&mut self, frame: &TickFrame) {
            self.indices.push(frame.index);
        }
    }

    #[test]
    fn test_tick_needs_run_and_running_cursor() {
        let state = AppState::default();
        state.resume();
        assert!(state.tick().is_none());
        assert!(state.current_frame().is_none());

        state.reconfigure(&short_form()).unwrap();
        state.pause();
        assert!(state.tick().is_none());

        state.resume();
        let frame = state.tick().unwrap();
        assert_eq!(frame.index, 10);
    }

    #[test]
    fn test_snapshot_fields() {
        let state = AppState::default();
        state.reconfigure(&InputForm::three_body()).unwrap();
        state.resume();
        state.tick();
        let frame = state.tick().unwrap();
        let snap = frame.snapshot();

        assert_eq!(snap.index, 20);
        assert_eq!(snap.time, 10.0);
        assert_eq!(snap.step_count, 960);
        assert_eq!(snap.positions.len(), 3);
        assert_eq!(snap.relative_positions.len(), 3);
        assert_eq!(snap.per_body_kinetic_energy.len(), 3);
        assert!(snap.per_body_kinetic_energy.iter().all(|s| s.len() == 21));
        assert_eq!(snap.aggregate_energy.len(), 21);
        assert!(snap.cog_in_relative_frame.magnitude() < 1e-9);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["index"], 20);
        assert_eq!(json["aggregate_energy"].as_array().unwrap().len(), 21);
    }

    #[test]
    fn test_reconfigure_resets_cursor() {
        let state = AppState::default();
        state.reconfigure(&short_form()).unwrap();
        state.resume();
        for _ in 0..3 {
            state.tick();
        }
        assert_eq!(state.cursor().index(), 30);

        let run = state.reconfigure(&InputForm::default()).unwrap();
        let cursor = state.cursor();
        assert_eq!(cursor.index(), 0);
        assert_eq!(cursor.step_count(), run.step_count());
        assert!(Arc::ptr_eq(&run, &state.current_run().unwrap()));
    }

    #[test]
    fn test_failed_reconfigure_keeps_previous_run() {
        let state = AppState::default();
        let first = state.reconfigure(&short_form()).unwrap();
        state.resume();
        state.tick();

        let mut bad = short_form();
        bad.bodies[1].mass = "0".to_string();
        let err = state.reconfigure(&bad).unwrap_err();
        match err {
            SimulationError::Validation(v) => {
                assert_eq!(v.errors[0].kind, FieldErrorKind::NonPositiveMass(0.0))
            }
            other => panic!("unexpected error {other:?}"),
        }

        // Coincident bodies pass validation but fail during integration
        let mut singular = short_form();
        singular.bodies[1].position = ["0", "0", "0"].map(String::from);
        let err = state.reconfigure(&singular).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Domain(DomainError::Singularity { first: 1, second: 2, .. })
        ));

        assert!(Arc::ptr_eq(&first, &state.current_run().unwrap()));
        assert_eq!(state.cursor().index(), 10);
    }

    #[test]
    fn test_held_frame_outlives_swap() {
        let state = AppState::default();
        state.reconfigure(&short_form()).unwrap();
        let held = state.current_frame().unwrap();

        state.reconfigure(&InputForm::three_body()).unwrap();
        // Old frame still describes the old run consistently
        let snap = held.snapshot();
        assert_eq!(snap.positions.len(), 2);
        assert_eq!(snap.step_count, 100);
        assert_eq!(state.run_info().unwrap().body_count, 3);
    }

    #[test]
    fn test_restart_and_toggle() {
        let state = AppState::default();
        state.reconfigure(&short_form()).unwrap();
        assert_eq!(state.toggle_pause(), PlaybackState::Running);
        state.set_speed(3);
        state.tick();
        state.tick();
        assert_eq!(state.cursor().index(), 6);

        state.restart();
        assert_eq!(state.cursor().index(), 0);
        assert_eq!(state.toggle_pause(), PlaybackState::Paused);
    }

    #[test]
    fn test_run_info() {
        let state = AppState::default();
        assert!(state.run_info().is_none());
        let before = Utc::now();
        state.reconfigure(&InputForm::default()).unwrap();
        let info = state.run_info().unwrap();
        assert_eq!(info.step_count, 960);
        assert_eq!(info.dt, 0.5);
        assert!(info.computed_at >= before);
        assert!(info.solver.accepted_steps > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_renders_on_cadence_and_stops() {
        let state = AppState::default();
        state.reconfigure(&short_form()).unwrap();
        state.set_speed(1);
        state.resume();

        let handle = spawn_playback(state.clone(), PlaybackSettings::default(), Recorder::default());
        tokio::time::sleep(Duration::from_millis(95)).await;
        let recorder = handle.stop().await.unwrap();

        let n = recorder.indices.len();
        assert!((9..=11).contains(&n), "rendered {n} frames");
        let expected: Vec<usize> = (1..=n).collect();
        assert_eq!(recorder.indices, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_ticks_are_coalesced() {
        let state = AppState::default();
        state.reconfigure(&short_form()).unwrap();
        state.set_speed(1);
        state.resume();

        let handle = spawn_playback(state.clone(), PlaybackSettings::default(), Recorder::default());
        tokio::task::yield_now().await;
        // Jump the clock far past several periods in one go
        tokio::time::advance(Duration::from_millis(105)).await;
        tokio::task::yield_now().await;
        let recorder = handle.stop().await.unwrap();

        assert!(!recorder.indices.is_empty());
        assert!(recorder.indices.len() < 5, "replayed {:?}", recorder.indices);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_session_renders_nothing() {
        let state = AppState::default();
        state.reconfigure(&short_form()).unwrap();

        let handle = spawn_playback(state.clone(), PlaybackSettings::default(), Recorder::default());
        tokio::time::sleep(Duration::from_millis(50)).await;
        let recorder = handle.stop().await.unwrap();

        assert!(recorder.indices.is_empty());
        assert_eq!(state.cursor().index(), 0);
    }
}
