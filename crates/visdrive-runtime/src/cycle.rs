//! [`DecisionCycle`] – one perception → decision → actuation iteration.
//!
//! Each call to [`DecisionCycle::run`]:
//!
//! 1. **Capture** – ask the frame source for a frame.  A failed capture skips
//!    the oracle entirely.
//! 2. **Ask** – call the [`DecisionOracle`] under `oracle_timeout`.  Expiry
//!    is a failure like any other.
//! 3. **Resolve** – run the [`SafetyPolicy`].
//! 4. **Act** – map with the [`ActuationMapper`] and dispatch.
//! 5. **Record** – append to the [`DecisionLog`].
//!
//! Only a dispatch failure is returned as an error; the cycle is then not
//! recorded.  Perception and oracle failures are folded into a `Stop` plus an
//! anomaly on the record.

use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, debug, error, info, info_span, warn};
use visdrive_hal::{ActuatorDriver, Frame, FrameSource};
use visdrive_types::{ActuationCommand, Anomaly, Directive, DriveError};

use crate::actuation::ActuationMapper;
use crate::decision_log::DecisionLog;
use crate::oracle::{DecisionOracle, OraclePrompt};
use crate::policy::{OracleOutcome, SafetyPolicy};
use crate::render::Renderer;

/// Summary of a completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub sequence: u64,
    pub directive: Directive,
    pub command: ActuationCommand,
    pub anomaly: Option<Anomaly>,
}

/// Everything one iteration needs apart from the hardware, which the session
/// lends it per call.
pub struct DecisionCycle {
    oracle: Arc<dyn DecisionOracle>,
    prompt: OraclePrompt,
    policy: SafetyPolicy,
    mapper: ActuationMapper,
    oracle_timeout: Duration,
    renderer: Option<Box<dyn Renderer>>,
}

impl DecisionCycle {
    /// The safety policy checks answers against the vocabulary `prompt`
    /// instructs the oracle to use.
    pub fn new(
        oracle: Arc<dyn DecisionOracle>,
        prompt: OraclePrompt,
        mapper: ActuationMapper,
        oracle_timeout: Duration,
    ) -> Self {
        Self {
            policy: SafetyPolicy::new(prompt.vocabulary()),
            oracle,
            prompt,
            mapper,
            oracle_timeout,
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn mapper(&self) -> &ActuationMapper {
        &self.mapper
    }

    /// Run one iteration.
    ///
    /// # Errors
    ///
    /// Returns the actuator's error if the command could not be dispatched.
    /// The session treats this as fatal.
    pub async fn run(
        &mut self,
        frames: &mut dyn FrameSource,
        actuator: &mut dyn ActuatorDriver,
        log: &mut DecisionLog,
    ) -> Result<CycleOutcome, DriveError> {
        let sequence = log.len() as u64 + 1;
        let span = info_span!("cycle", cycle = sequence);
        self.run_inner(sequence, frames, actuator, log)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &mut self,
        sequence: u64,
        frames: &mut dyn FrameSource,
        actuator: &mut dyn ActuatorDriver,
        log: &mut DecisionLog,
    ) -> Result<CycleOutcome, DriveError> {
        // ── Capture ─────────────────────────────────────────────────────────
        let (frame, outcome) = match frames.next_frame() {
            Ok(frame) => {
                let outcome = self.ask(&frame).await;
                (Some(frame), outcome)
            }
            Err(DriveError::FrameUnavailable(reason)) => {
                (None, OracleOutcome::FrameUnavailable(reason))
            }
            Err(other) => (None, OracleOutcome::FrameUnavailable(other.to_string())),
        };

        // ── Resolve ─────────────────────────────────────────────────────────
        let resolution = self.policy.resolve(outcome);
        if let Some(anomaly) = &resolution.anomaly {
            warn!(anomaly = %anomaly, "defaulting to stop");
        }
        let directive = resolution.directive;

        // ── Act ─────────────────────────────────────────────────────────────
        let command = self.mapper.map(directive);
        if let Err(e) = actuator.dispatch(command) {
            error!(driver = actuator.id(), directive = %directive, error = %e, "dispatch failed");
            return Err(e);
        }
        info!(
            directive = %directive,
            confidence = resolution.metadata.as_ref().and_then(|m| m.confidence),
            "directive dispatched"
        );

        if let (Some(renderer), Some(frame)) = (self.renderer.as_mut(), frame.as_ref()) {
            if let Err(e) = renderer.render(frame, directive, resolution.metadata.as_ref()) {
                warn!(error = %e, "renderer failed");
            }
        }

        // ── Record ──────────────────────────────────────────────────────────
        let anomaly = resolution.anomaly.clone();
        log.append(directive, resolution.metadata, resolution.anomaly);

        Ok(CycleOutcome {
            sequence,
            directive,
            command,
            anomaly,
        })
    }

    async fn ask(&self, frame: &Frame) -> OracleOutcome {
        debug!(oracle = self.oracle.name(), timeout = ?self.oracle_timeout, "asking oracle");
        match tokio::time::timeout(self.oracle_timeout, self.oracle.classify(frame, &self.prompt))
            .await
        {
            Ok(Ok(response)) => OracleOutcome::Responded(response),
            Ok(Err(e)) => OracleOutcome::Failed(e.to_string()),
            Err(_) => OracleOutcome::TimedOut,
        }
    }
}
