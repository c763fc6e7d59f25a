use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The five motion directives the control loop can act on.
///
/// Nothing downstream of the safety defaulting policy can hold any other
/// value: unknown oracle answers are resolved to [`Directive::Stop`] before a
/// `Directive` is ever constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Directive {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl Directive {
    /// Every directive, in table order.
    pub const ALL: [Directive; 5] = [
        Directive::Forward,
        Directive::Backward,
        Directive::Left,
        Directive::Right,
        Directive::Stop,
    ];

    /// Lower-case wire word for this directive (`"forward"`, `"stop"`, …).
    pub fn as_str(self) -> &'static str {
        match self {
            Directive::Forward => "forward",
            Directive::Backward => "backward",
            Directive::Left => "left",
            Directive::Right => "right",
            Directive::Stop => "stop",
        }
    }

    /// Parse a candidate word, ignoring case and surrounding whitespace.
    ///
    /// Returns `None` for anything that is not exactly one of the five
    /// directive words.
    pub fn parse(candidate: &str) -> Option<Self> {
        let word = candidate.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|d| d.as_str() == word)
    }

    /// `true` for every directive that produces wheel motion.
    pub fn is_motion(self) -> bool {
        self != Directive::Stop
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Directive::Forward => "Forward",
            Directive::Backward => "Backward",
            Directive::Left => "Left",
            Directive::Right => "Right",
            Directive::Stop => "Stop",
        };
        f.write_str(label)
    }
}

/// The set of directive words the oracle is instructed to answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vocabulary {
    /// forward / backward / left / right / stop
    #[default]
    Full,
    /// forward / backward / left / right. `stop` is only ever reached by
    /// falling back.
    Motion,
}

impl Vocabulary {
    /// Whether an oracle answer of `directive` is in this vocabulary.
    pub fn admits(self, directive: Directive) -> bool {
        match self {
            Vocabulary::Full => true,
            Vocabulary::Motion => directive.is_motion(),
        }
    }

    /// The admitted words, in table order.
    pub fn words(self) -> Vec<&'static str> {
        Directive::ALL
            .into_iter()
            .filter(|d| self.admits(*d))
            .map(Directive::as_str)
            .collect()
    }
}

/// PWM duty cycle in percent, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DutyCycle(u8);

impl DutyCycle {
    pub const ZERO: DutyCycle = DutyCycle(0);
    pub const FULL: DutyCycle = DutyCycle(100);

    /// # Errors
    ///
    /// Returns [`DriveError::InvalidConfig`] when `percent` exceeds 100.
    pub fn new(percent: u8) -> Result<Self, DriveError> {
        if percent > 100 {
            return Err(DriveError::InvalidConfig(format!(
                "duty cycle {percent}% is outside 0..=100"
            )));
        }
        Ok(Self(percent))
    }

    /// Like [`new`][Self::new] but saturating at 100 %.
    pub const fn clamped(percent: u8) -> Self {
        if percent > 100 { Self(100) } else { Self(percent) }
    }

    pub fn percent(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for DutyCycle {
    type Error = DriveError;

    fn try_from(percent: u8) -> Result<Self, Self::Error> {
        Self::new(percent)
    }
}

impl From<DutyCycle> for u8 {
    fn from(duty: DutyCycle) -> Self {
        duty.0
    }
}

impl fmt::Display for DutyCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Rotation sense requested from one drive channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelDirection {
    DriveForward,
    DriveReverse,
    Hold,
}

/// Command for a single drive channel (one side of the robot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelCommand {
    pub direction: ChannelDirection,
    pub duty_cycle: DutyCycle,
}

impl ChannelCommand {
    pub fn forward(duty_cycle: DutyCycle) -> Self {
        Self {
            direction: ChannelDirection::DriveForward,
            duty_cycle,
        }
    }

    pub fn reverse(duty_cycle: DutyCycle) -> Self {
        Self {
            direction: ChannelDirection::DriveReverse,
            duty_cycle,
        }
    }

    /// Hold the channel: no direction, 0 % duty.
    pub fn hold() -> Self {
        Self {
            direction: ChannelDirection::Hold,
            duty_cycle: DutyCycle::ZERO,
        }
    }

    pub fn is_hold(&self) -> bool {
        self.direction == ChannelDirection::Hold && self.duty_cycle == DutyCycle::ZERO
    }
}

/// Commands for both drive channels of the differential base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActuationCommand {
    pub left: ChannelCommand,
    pub right: ChannelCommand,
}

impl ActuationCommand {
    /// Both channels held at 0 % duty.
    pub fn stop() -> Self {
        Self {
            left: ChannelCommand::hold(),
            right: ChannelCommand::hold(),
        }
    }

    pub fn is_stop(&self) -> bool {
        self.left.is_hold() && self.right.is_hold()
    }
}

/// Free-form scene metadata that may accompany an oracle answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleMetadata {
    pub obstacles: Vec<String>,
    pub path_description: Option<String>,
    /// Oracle confidence in its answer, 0–100.
    pub confidence: Option<u8>,
    pub reasoning: Option<String>,
}

impl OracleMetadata {
    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
            && self.path_description.is_none()
            && self.confidence.is_none()
            && self.reasoning.is_none()
    }
}

/// Structured scene report the oracle is asked to produce.
///
/// Only used to describe the expected shape (its JSON Schema is embedded in
/// the instruction template); incoming payloads are parsed leniently by
/// [`RawOracleResponse::from_json`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OracleReport {
    /// A single direction word.
    pub navigation_command: String,
    /// Potential obstacles in view.
    pub obstacles: Vec<String>,
    /// Brief description of the navigation environment.
    pub path_description: String,
    /// Confidence in the navigation command, 0–100.
    pub confidence_level: u8,
    /// Why this command was chosen.
    pub reasoning: String,
}

/// An oracle answer before validation.
///
/// The candidate may be missing or outside the directive vocabulary; the
/// safety defaulting policy decides what it means.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOracleResponse {
    pub candidate: Option<String>,
    pub metadata: OracleMetadata,
}

impl RawOracleResponse {
    /// A bare single-word answer with no metadata.
    pub fn from_candidate(candidate: impl Into<String>) -> Self {
        Self {
            candidate: Some(candidate.into()),
            metadata: OracleMetadata::default(),
        }
    }

    /// Parse a structured JSON report.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::OracleFailed`] when `raw` is not JSON or is not
    /// a JSON object.
    pub fn from_json(raw: &str) -> Result<Self, DriveError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| DriveError::OracleFailed(format!("unparseable oracle payload: {e}")))?;
        Self::from_value(&value)
    }

    /// Like [`from_json`][Self::from_json] for an already-decoded value.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::OracleFailed`] when `value` is not an object.
    pub fn from_value(value: &Value) -> Result<Self, DriveError> {
        let obj = value.as_object().ok_or_else(|| {
            DriveError::OracleFailed(format!("expected a JSON object, got: {value}"))
        })?;

        let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

        let obstacles = obj
            .get("obstacles")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let confidence = obj.get("confidence_level").and_then(parse_confidence);

        Ok(Self {
            candidate: text("navigation_command"),
            metadata: OracleMetadata {
                obstacles,
                path_description: text("path_description"),
                confidence,
                reasoning: text("reasoning"),
            },
        })
    }
}

fn parse_confidence(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(0.0, 100.0) as u8)
}

/// Non-fatal condition observed while resolving a cycle's directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum Anomaly {
    /// The frame source could not deliver a frame; the oracle was not called.
    FrameUnavailable(String),
    /// Transport error or an unparseable payload.
    OracleFailed(String),
    /// No answer within the allotted window.
    OracleTimedOut,
    /// The answer carried no candidate directive.
    MissingDirective,
    /// The candidate was not in the instructed vocabulary.
    OutOfVocabulary(String),
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::FrameUnavailable(reason) => write!(f, "frame unavailable: {reason}"),
            Anomaly::OracleFailed(reason) => write!(f, "oracle failed: {reason}"),
            Anomaly::OracleTimedOut => f.write_str("oracle timed out"),
            Anomaly::MissingDirective => f.write_str("oracle answer had no directive"),
            Anomaly::OutOfVocabulary(word) => write!(f, "invalid command received: {word:?}"),
        }
    }
}

/// One completed decision cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// 1-based position of the cycle within its session.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub directive: Directive,
    pub metadata: Option<OracleMetadata>,
    pub anomaly: Option<Anomaly>,
}

/// Global error type spanning hardware faults, oracle payload and
/// configuration problems.  Oracle timeouts are not errors: the decision
/// cycle records them as [`Anomaly::OracleTimedOut`].
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DriveError {
    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Frame Capture Failed: {0}")]
    FrameUnavailable(String),

    #[error("Oracle Error: {0}")]
    OracleFailed(String),

    #[error("Invalid Configuration: {0}")]
    InvalidConfig(String),

    #[error("Render Error: {0}")]
    Render(String),
}

impl DriveError {
    /// Shorthand for [`DriveError::HardwareFault`].
    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        DriveError::HardwareFault {
            component: component.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_parse_ignores_case_and_whitespace() {
        assert_eq!(Directive::parse("forward"), Some(Directive::Forward));
        assert_eq!(Directive::parse("  LEFT\n"), Some(Directive::Left));
        assert_eq!(Directive::parse("Stop"), Some(Directive::Stop));
        assert_eq!(Directive::parse("BackWard"), Some(Directive::Backward));
    }

    #[test]
    fn directive_parse_rejects_unknown_words() {
        for word in ["", "up", "forward.", "turn left", "rightward", "halt"] {
            assert_eq!(Directive::parse(word), None, "{word:?} must not parse");
        }
    }

    #[test]
    fn directive_serializes_lowercase() {
        let json = serde_json::to_string(&Directive::Backward).unwrap();
        assert_eq!(json, "\"backward\"");
        let back: Directive = serde_json::from_str("\"right\"").unwrap();
        assert_eq!(back, Directive::Right);
    }

    #[test]
    fn motion_vocabulary_excludes_stop() {
        assert!(Vocabulary::Full.admits(Directive::Stop));
        assert!(!Vocabulary::Motion.admits(Directive::Stop));
        assert!(Vocabulary::Motion.admits(Directive::Left));
        assert_eq!(
            Vocabulary::Motion.words(),
            vec!["forward", "backward", "left", "right"]
        );
    }

    #[test]
    fn duty_cycle_rejects_values_above_100() {
        assert_eq!(DutyCycle::new(75).unwrap().percent(), 75);
        assert!(DutyCycle::new(100).is_ok());
        assert!(matches!(
            DutyCycle::new(101),
            Err(DriveError::InvalidConfig(_))
        ));
        assert!(serde_json::from_str::<DutyCycle>("150").is_err());
    }

    #[test]
    fn stop_command_holds_both_channels() {
        let stop = ActuationCommand::stop();
        assert!(stop.is_stop());
        assert_eq!(stop.left.direction, ChannelDirection::Hold);
        assert_eq!(stop.right.duty_cycle, DutyCycle::ZERO);

        let moving = ActuationCommand {
            left: ChannelCommand::forward(DutyCycle::FULL),
            right: ChannelCommand::hold(),
        };
        assert!(!moving.is_stop());
    }

    #[test]
    fn from_json_reads_full_report() {
        let raw = r#"{
            "navigation_command": "Forward",
            "obstacles": ["chair", 3, "box"],
            "path_description": "clear corridor",
            "confidence_level": 90,
            "reasoning": "nothing ahead"
        }"#;
        let resp = RawOracleResponse::from_json(raw).unwrap();
        assert_eq!(resp.candidate.as_deref(), Some("Forward"));
        assert_eq!(resp.metadata.obstacles, vec!["chair", "box"]);
        assert_eq!(resp.metadata.path_description.as_deref(), Some("clear corridor"));
        assert_eq!(resp.metadata.confidence, Some(90));
        assert_eq!(resp.metadata.reasoning.as_deref(), Some("nothing ahead"));
    }

    #[test]
    fn from_json_tolerates_partial_reports() {
        let resp = RawOracleResponse::from_json(r#"{"confidence_level": "55%"}"#).unwrap();
        assert!(resp.candidate.is_none());
        assert_eq!(resp.metadata.confidence, Some(55));
        assert!(resp.metadata.obstacles.is_empty());

        let resp = RawOracleResponse::from_json(r#"{"navigation_command": 4}"#).unwrap();
        assert!(resp.candidate.is_none());
    }

    #[test]
    fn from_json_clamps_confidence() {
        let resp = RawOracleResponse::from_json(r#"{"confidence_level": 250}"#).unwrap();
        assert_eq!(resp.metadata.confidence, Some(100));
        let resp = RawOracleResponse::from_json(r#"{"confidence_level": -3}"#).unwrap();
        assert_eq!(resp.metadata.confidence, Some(0));
    }

    #[test]
    fn from_json_rejects_non_objects() {
        for raw in ["forward", "[\"forward\"]", "\"forward\"", "{not json"] {
            assert!(
                matches!(RawOracleResponse::from_json(raw), Err(DriveError::OracleFailed(_))),
                "{raw:?} must be rejected"
            );
        }
    }

    #[test]
    fn oracle_report_schema_names_every_field() {
        let schema = serde_json::to_value(schemars::schema_for!(OracleReport)).unwrap();
        let text = schema.to_string();
        for field in [
            "navigation_command",
            "obstacles",
            "path_description",
            "confidence_level",
            "reasoning",
        ] {
            assert!(text.contains(field), "schema is missing {field}");
        }
    }

    #[test]
    fn decision_record_roundtrip() {
        let record = DecisionRecord {
            sequence: 1,
            timestamp: Utc::now(),
            directive: Directive::Stop,
            metadata: None,
            anomaly: Some(Anomaly::OutOfVocabulary("jump".into())),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: DecisionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn drive_error_display() {
        let err = DriveError::hardware("left_channel", "pin write failed");
        assert!(err.to_string().contains("left_channel"));

        let err = DriveError::InvalidConfig("duty cycle 120 exceeds 100".into());
        assert_eq!(
            err.to_string(),
            "Invalid Configuration: duty cycle 120 exceeds 100"
        );
    }
}
