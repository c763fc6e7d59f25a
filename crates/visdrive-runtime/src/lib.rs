//! `visdrive-runtime` – the perception → decision → actuation loop.
//!
//! # Modules
//!
//! - [`policy`] – [`SafetyPolicy`][policy::SafetyPolicy]: resolves any oracle
//!   outcome, including failures and timeouts, into exactly one
//!   [`Directive`][visdrive_types::Directive], defaulting to `Stop`.
//! - [`actuation`] – [`ActuationMapper`][actuation::ActuationMapper]: the
//!   fixed directive → left/right channel command table.
//! - [`decision_log`] – [`DecisionLog`][decision_log::DecisionLog]: the
//!   append-only cycle history with a live broadcast view.
//! - [`cycle`] – [`DecisionCycle`][cycle::DecisionCycle]: one capture, ask,
//!   resolve, act, record iteration.
//! - [`session`] – [`SessionController`][session::SessionController]: the
//!   `Idle → Running → Draining → Stopped` state machine with scoped hardware
//!   acquisition through [`HardwareLease`][session::HardwareLease].
//! - [`oracle`] – the [`DecisionOracle`][oracle::DecisionOracle] trait, the
//!   versioned [`OraclePrompt`][oracle::OraclePrompt] templates and the
//!   OpenAI-compatible [`VisionOracle`][oracle::VisionOracle] client.
//! - [`encode`] – JPEG + base64 data URLs for oracle requests.
//! - [`render`] – the operator decision panel.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP export.

pub mod actuation;
pub mod cycle;
pub mod decision_log;
pub mod encode;
pub mod oracle;
pub mod policy;
pub mod render;
pub mod session;
pub mod telemetry;

pub use actuation::ActuationMapper;
pub use cycle::{CycleOutcome, DecisionCycle};
pub use decision_log::DecisionLog;
pub use oracle::{DecisionOracle, OracleError, OraclePrompt, OracleStrategy, VisionOracle};
pub use policy::{OracleOutcome, Resolution, SafetyPolicy};
pub use render::{ConsoleRenderer, Renderer};
pub use session::{
    CancelSignal, ExitReason, HardwareLease, HardwareProvider, PreparedHardware, SessionConfig,
    SessionController, SessionReport, SessionState,
};
pub use telemetry::{TracerProviderGuard, init_tracing};
