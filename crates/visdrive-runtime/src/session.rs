//! [`SessionController`] – runs decision cycles for a bounded session and
//! guarantees the motors end on `Stop` with every device released.
//!
//! # State machine
//!
//! ```text
//! Idle ──acquire ok──▶ Running ──duration / cancel / actuator fault──▶ Draining ──▶ Stopped
//!   └──acquire failed (partial acquisitions released)──────────────────────────────▶ Stopped
//! ```
//!
//! Hardware is held by a [`HardwareLease`].  Draining the lease maps and dispatches
//! an explicit stop and releases the actuator and frame source; if the lease
//! is dropped without being drained (early return, panic unwinding) its
//! `Drop` impl drains it.
//!
//! Cancellation is cooperative: it is observed at cycle boundaries and
//! during the inter-cycle pause, never in the middle of a cycle.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use visdrive_hal::sim::{RecordingDriver, SimCamera};
//! use visdrive_runtime::session::{ExitReason, PreparedHardware, SessionConfig, SessionController};
//! # use visdrive_runtime::oracle::{DecisionOracle, OracleError, OraclePrompt};
//! # use visdrive_types::RawOracleResponse;
//! # struct AlwaysForward;
//! # #[async_trait::async_trait]
//! # impl DecisionOracle for AlwaysForward {
//! #     fn name(&self) -> &str { "fwd" }
//! #     async fn classify(&self, _: &visdrive_hal::Frame, _: &OraclePrompt)
//! #         -> Result<RawOracleResponse, OracleError> { Ok(RawOracleResponse::from_candidate("forward")) }
//! # }
//!
//! # tokio_test_block_on(async {
//! let config = SessionConfig {
//!     duration: Duration::from_millis(10),
//!     inter_cycle_pause: Duration::from_millis(5),
//!     ..SessionConfig::default()
//! };
//! let mut hardware = PreparedHardware::new(SimCamera::new("cam"), RecordingDriver::new("drive"));
//! let report = SessionController::new(config, Arc::new(AlwaysForward))
//!     .run(&mut hardware)
//!     .await;
//! assert_eq!(report.exit, ExitReason::DurationElapsed);
//! assert!(!report.records.is_empty());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;
use visdrive_hal::{ActuatorDriver, FrameSource};
use visdrive_types::{DecisionRecord, Directive, DriveError, DutyCycle, Vocabulary};

use crate::actuation::ActuationMapper;
use crate::cycle::DecisionCycle;
use crate::decision_log::DecisionLog;
use crate::oracle::{DecisionOracle, OraclePrompt};
use crate::render::Renderer;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Validated session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Wall-clock budget for the whole session.
    pub duration: Duration,
    /// Bound on each oracle call.
    pub oracle_timeout: Duration,
    /// Pause after every cycle; cancellation is observed during it.
    pub inter_cycle_pause: Duration,
    /// Duty cycle for every motion directive.
    pub duty_cycle: DutyCycle,
    /// Words the structured prompt admits.
    pub vocabulary: Vocabulary,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            oracle_timeout: Duration::from_secs(10),
            inter_cycle_pause: Duration::from_secs(1),
            duty_cycle: DutyCycle::clamped(75),
            vocabulary: Vocabulary::Full,
        }
    }
}

impl SessionConfig {
    /// # Errors
    ///
    /// Returns [`DriveError::InvalidConfig`] when `duty_percent` exceeds 100
    /// or `oracle_timeout` is zero.
    pub fn new(
        duration: Duration,
        oracle_timeout: Duration,
        inter_cycle_pause: Duration,
        duty_percent: u8,
        vocabulary: Vocabulary,
    ) -> Result<Self, DriveError> {
        let config = Self {
            duration,
            oracle_timeout,
            inter_cycle_pause,
            duty_cycle: DutyCycle::new(duty_percent)?,
            vocabulary,
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`DriveError::InvalidConfig`] for a zero oracle timeout.
    pub fn validate(&self) -> Result<(), DriveError> {
        if self.oracle_timeout.is_zero() {
            return Err(DriveError::InvalidConfig(
                "oracle timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable, level-triggered stop request.
///
/// Safe to raise from any thread (signal handlers, stdin watchers) and
/// idempotent.
#[derive(Clone, Debug)]
pub struct CancelSignal(Arc<watch::Sender<bool>>);

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }

    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once [`cancel`][Self::cancel] has been called (immediately
    /// if it already was).
    pub async fn cancelled(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hardware acquisition
// ─────────────────────────────────────────────────────────────────────────────

/// Opens the devices a session needs.  Called once, on entry to `Running`.
pub trait HardwareProvider {
    /// # Errors
    ///
    /// Any error aborts session start-up.
    fn open_frame_source(&mut self) -> Result<Box<dyn FrameSource>, DriveError>;

    /// # Errors
    ///
    /// Any error aborts session start-up; the frame source opened before is
    /// released.
    fn open_actuator(&mut self) -> Result<Box<dyn ActuatorDriver>, DriveError>;
}

/// A [`HardwareProvider`] that hands over devices that are already open.
///
/// Each device can be taken once; a second session on the same value fails
/// to start.
#[derive(Default)]
pub struct PreparedHardware {
    frames: Option<Box<dyn FrameSource>>,
    actuator: Option<Box<dyn ActuatorDriver>>,
}

impl PreparedHardware {
    pub fn new(
        frames: impl FrameSource + 'static,
        actuator: impl ActuatorDriver + 'static,
    ) -> Self {
        Self {
            frames: Some(Box::new(frames)),
            actuator: Some(Box::new(actuator)),
        }
    }

    /// Only a frame source; opening the actuator fails.
    pub fn frames_only(frames: impl FrameSource + 'static) -> Self {
        Self {
            frames: Some(Box::new(frames)),
            actuator: None,
        }
    }
}

impl HardwareProvider for PreparedHardware {
    fn open_frame_source(&mut self) -> Result<Box<dyn FrameSource>, DriveError> {
        self.frames
            .take()
            .ok_or_else(|| DriveError::hardware("frame_source", "not available"))
    }

    fn open_actuator(&mut self) -> Result<Box<dyn ActuatorDriver>, DriveError> {
        self.actuator
            .take()
            .ok_or_else(|| DriveError::hardware("actuator", "not available"))
    }
}

/// What draining a [`HardwareLease`] achieved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// The final stop command was accepted by the actuator.
    pub stop_dispatched: bool,
    /// Failures while stopping or releasing, in order.
    pub errors: Vec<DriveError>,
}

/// Exclusive ownership of the session's frame source and actuator.
///
/// The final stop is produced by the same [`ActuationMapper`] that drives
/// the cycles.
pub struct HardwareLease {
    frames: Option<Box<dyn FrameSource>>,
    actuator: Option<Box<dyn ActuatorDriver>>,
    mapper: ActuationMapper,
}

impl HardwareLease {
    /// Open the frame source, then the actuator.
    ///
    /// # Errors
    ///
    /// Returns the first open failure.  Anything opened before it is
    /// released again before returning.
    pub fn acquire(
        provider: &mut dyn HardwareProvider,
        mapper: ActuationMapper,
    ) -> Result<Self, DriveError> {
        let mut lease = Self {
            frames: Some(provider.open_frame_source()?),
            actuator: None,
            mapper,
        };
        // On error `lease` drops here and releases the frame source.
        lease.actuator = Some(provider.open_actuator()?);
        Ok(lease)
    }

    /// Mutable access to both devices, or `None` once drained.
    pub fn devices(
        &mut self,
    ) -> Option<(
        &mut (dyn FrameSource + 'static),
        &mut (dyn ActuatorDriver + 'static),
    )> {
        match (self.frames.as_deref_mut(), self.actuator.as_deref_mut()) {
            (Some(frames), Some(actuator)) => Some((frames, actuator)),
            _ => None,
        }
    }

    pub fn is_drained(&self) -> bool {
        self.frames.is_none() && self.actuator.is_none()
    }

    /// Map and dispatch `Stop`, release the actuator, release the frame
    /// source.  Every step runs even if an earlier one failed.  Idempotent.
    pub fn drain(&mut self) -> DrainReport {
        let mut report = DrainReport::default();
        if let Some(mut actuator) = self.actuator.take() {
            match actuator.dispatch(self.mapper.map(Directive::Stop)) {
                Ok(()) => report.stop_dispatched = true,
                Err(e) => report.errors.push(e),
            }
            if let Err(e) = actuator.release() {
                report.errors.push(e);
            }
        }
        if let Some(mut frames) = self.frames.take() {
            if let Err(e) = frames.release() {
                report.errors.push(e);
            }
        }
        report
    }
}

impl Drop for HardwareLease {
    fn drop(&mut self) {
        if self.is_drained() {
            return;
        }
        let report = self.drain();
        for e in &report.errors {
            warn!(error = %e, "hardware release on drop failed");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session state & report
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Why the session left `Running` (or never reached it).
#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
    DurationElapsed,
    Cancelled,
    /// The actuator rejected a command; nothing after it could be trusted.
    ActuatorFault(DriveError),
    /// Hardware could not be acquired.
    StartupFailed(DriveError),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::DurationElapsed => f.write_str("session duration elapsed"),
            ExitReason::Cancelled => f.write_str("cancelled by operator"),
            ExitReason::ActuatorFault(e) => write!(f, "actuator fault: {e}"),
            ExitReason::StartupFailed(e) => write!(f, "start-up failed: {e}"),
        }
    }
}

/// Everything left after a session reached `Stopped`.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub exit: ExitReason,
    /// The Decision Log, in cycle order.
    pub records: Vec<DecisionRecord>,
    /// Every state the session passed through, ending in `Stopped`.
    pub transitions: Vec<SessionState>,
    pub drain: DrainReport,
}

impl SessionReport {
    pub fn final_state(&self) -> SessionState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(SessionState::Idle)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionController
// ─────────────────────────────────────────────────────────────────────────────

pub struct SessionController {
    config: SessionConfig,
    cycle: DecisionCycle,
    cancel: CancelSignal,
    log: DecisionLog,
    transitions: Vec<SessionState>,
}

impl SessionController {
    /// A controller using the structured prompt for `config.vocabulary`.
    pub fn new(config: SessionConfig, oracle: Arc<dyn DecisionOracle>) -> Self {
        let prompt = OraclePrompt::structured(config.vocabulary);
        Self::with_prompt(config, oracle, prompt)
    }

    pub fn with_prompt(
        config: SessionConfig,
        oracle: Arc<dyn DecisionOracle>,
        prompt: OraclePrompt,
    ) -> Self {
        let cycle = DecisionCycle::new(
            oracle,
            prompt,
            ActuationMapper::new(config.duty_cycle),
            config.oracle_timeout,
        );
        Self {
            config,
            cycle,
            cancel: CancelSignal::new(),
            log: DecisionLog::new(),
            transitions: vec![SessionState::Idle],
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.cycle = self.cycle.with_renderer(renderer);
        self
    }

    /// Use an externally owned cancellation signal.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Live view of the Decision Log while the session runs.
    pub fn subscribe(&self) -> broadcast::Receiver<DecisionRecord> {
        self.log.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(SessionState::Idle)
    }

    fn enter(&mut self, state: SessionState) {
        info!(from = ?self.state(), to = ?state, "session state change");
        self.transitions.push(state);
    }

    /// Run the session to completion.  Never fails: every fault ends in a
    /// [`SessionReport`] with the motors stopped and hardware released.
    pub async fn run(self, provider: &mut dyn HardwareProvider) -> SessionReport {
        let session_id = Uuid::new_v4();
        let span = info_span!("session", %session_id);
        self.run_inner(session_id, provider).instrument(span).await
    }

    async fn run_inner(
        mut self,
        session_id: Uuid,
        provider: &mut dyn HardwareProvider,
    ) -> SessionReport {
        let mut lease = match HardwareLease::acquire(provider, *self.cycle.mapper()) {
            Ok(lease) => lease,
            Err(e) => {
                error!(error = %e, "hardware acquisition failed");
                self.enter(SessionState::Stopped);
                return self.finish(session_id, ExitReason::StartupFailed(e), DrainReport::default());
            }
        };

        self.enter(SessionState::Running);
        info!(
            duration = ?self.config.duration,
            oracle_timeout = ?self.config.oracle_timeout,
            duty_cycle = %self.config.duty_cycle,
            "session running"
        );
        let exit = self.drive(&mut lease).await;
        info!(reason = %exit, cycles = self.log.len(), "leaving running state");

        self.enter(SessionState::Draining);
        let drain = lease.drain();
        for e in &drain.errors {
            warn!(error = %e, "drain step failed");
        }

        self.enter(SessionState::Stopped);
        self.finish(session_id, exit, drain)
    }

    async fn drive(&mut self, lease: &mut HardwareLease) -> ExitReason {
        let started = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                return ExitReason::Cancelled;
            }
            if started.elapsed() >= self.config.duration {
                return ExitReason::DurationElapsed;
            }
            let Some((frames, actuator)) = lease.devices() else {
                return ExitReason::ActuatorFault(DriveError::hardware(
                    "session",
                    "hardware lease already drained",
                ));
            };
            if let Err(e) = self.cycle.run(frames, actuator, &mut self.log).await {
                return ExitReason::ActuatorFault(e);
            }

            let remaining = self.config.duration.saturating_sub(started.elapsed());
            let pause = self.config.inter_cycle_pause.min(remaining);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.cancel.cancelled() => {}
            }
        }
    }

    fn finish(self, session_id: Uuid, exit: ExitReason, drain: DrainReport) -> SessionReport {
        SessionReport {
            session_id,
            exit,
            records: self.log.into_records(),
            transitions: self.transitions,
            drain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use visdrive_hal::sim::{RecordingDriver, ScriptedFrameSource};

    fn mapper() -> ActuationMapper {
        ActuationMapper::new(DutyCycle::clamped(60))
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = SessionConfig::default();
        assert_eq!(config.duration, Duration::from_secs(60));
        assert_eq!(config.oracle_timeout, Duration::from_secs(10));
        assert_eq!(config.inter_cycle_pause, Duration::from_secs(1));
        assert_eq!(config.duty_cycle.percent(), 75);
        config.validate().unwrap();
    }

    #[test]
    fn config_rejects_bad_duty_and_zero_timeout() {
        let secs = Duration::from_secs;
        assert!(SessionConfig::new(secs(1), secs(1), secs(1), 101, Vocabulary::Full).is_err());
        assert!(
            SessionConfig::new(secs(1), Duration::ZERO, secs(1), 50, Vocabulary::Full).is_err()
        );
        assert!(SessionConfig::new(secs(1), secs(1), secs(1), 100, Vocabulary::Motion).is_ok());
    }

    #[tokio::test]
    async fn cancel_signal_is_level_triggered() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        assert!(!signal.is_cancelled());
        clone.cancel();
        clone.cancel();
        assert!(signal.is_cancelled());
        // Already raised: resolves immediately.
        signal.cancelled().await;
    }

    #[test]
    fn lease_drain_stops_then_releases_everything() {
        let frames = ScriptedFrameSource::new("cam");
        let source_probe = frames.probe();
        let driver = RecordingDriver::new("drive");
        let driver_probe = driver.probe();
        let mut hardware = PreparedHardware::new(frames, driver);

        let mut lease = HardwareLease::acquire(&mut hardware, mapper()).unwrap();
        let report = lease.drain();
        assert!(report.stop_dispatched);
        assert!(report.errors.is_empty());
        assert_eq!(
            driver_probe.last_attempt(),
            Some(mapper().map(Directive::Stop))
        );
        assert!(driver_probe.last_attempt().unwrap().is_stop());
        assert!(driver_probe.is_released());
        assert!(source_probe.is_released());

        // Idempotent.
        assert_eq!(lease.drain(), DrainReport::default());
        assert_eq!(driver_probe.release_count(), 1);
    }

    #[test]
    fn dropping_an_undrained_lease_releases_hardware() {
        let frames = ScriptedFrameSource::new("cam");
        let source_probe = frames.probe();
        let driver = RecordingDriver::new("drive");
        let driver_probe = driver.probe();
        let mut hardware = PreparedHardware::new(frames, driver);
        {
            let _lease = HardwareLease::acquire(&mut hardware, mapper()).unwrap();
        }
        assert!(driver_probe.last_attempt().unwrap().is_stop());
        assert!(driver_probe.is_released());
        assert!(source_probe.is_released());
    }

    #[test]
    fn failed_actuator_open_releases_frame_source() {
        let frames = ScriptedFrameSource::new("cam");
        let source_probe = frames.probe();
        let mut hardware = PreparedHardware::frames_only(frames);
        assert!(HardwareLease::acquire(&mut hardware, mapper()).is_err());
        assert!(source_probe.is_released());
    }

    #[test]
    fn drain_keeps_going_after_a_rejected_stop() {
        let frames = ScriptedFrameSource::new("cam");
        let source_probe = frames.probe();
        let driver = RecordingDriver::new("drive").fail_after(0);
        let driver_probe = driver.probe();
        let mut hardware = PreparedHardware::new(frames, driver);

        let mut lease = HardwareLease::acquire(&mut hardware, mapper()).unwrap();
        let report = lease.drain();
        assert!(!report.stop_dispatched);
        assert_eq!(report.errors.len(), 1);
        assert!(driver_probe.last_attempt().unwrap().is_stop());
        assert!(driver_probe.is_released());
        assert!(source_probe.is_released());
    }

    #[test]
    fn exit_reason_display() {
        assert_eq!(ExitReason::Cancelled.to_string(), "cancelled by operator");
        let fault = ExitReason::ActuatorFault(DriveError::hardware("drive", "gone"));
        assert!(fault.to_string().contains("gone"));
    }
}
