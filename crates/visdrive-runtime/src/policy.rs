//! [`SafetyPolicy`] – resolves whatever the oracle produced into exactly one
//! [`Directive`].
//!
//! Rules, applied in order:
//!
//! 1. No usable answer (frame capture failed, transport error, timeout,
//!    payload that is not a report at all) → [`Directive::Stop`].
//! 2. Answer without a candidate, or with a candidate outside the instructed
//!    [`Vocabulary`] → [`Directive::Stop`] plus an [`Anomaly`].
//! 3. Otherwise → the matching directive.
//!
//! A late answer is treated exactly like a failed one.  Nothing here retries
//! or performs I/O.

use visdrive_types::{Anomaly, Directive, OracleMetadata, RawOracleResponse, Vocabulary};

/// What happened when the cycle asked for a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleOutcome {
    /// The oracle answered within the window.
    Responded(RawOracleResponse),
    /// Transport error or a payload that could not be parsed.
    Failed(String),
    /// No answer within the allotted window.
    TimedOut,
    /// No frame was captured, so the oracle was never called.
    FrameUnavailable(String),
}

/// The validated projection of an [`OracleOutcome`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub directive: Directive,
    pub anomaly: Option<Anomaly>,
    /// Oracle metadata, when the answer carried any.
    pub metadata: Option<OracleMetadata>,
}

impl Resolution {
    fn stop(anomaly: Anomaly, metadata: Option<OracleMetadata>) -> Self {
        Self {
            directive: Directive::Stop,
            anomaly: Some(anomaly),
            metadata,
        }
    }
}

/// The safety defaulting policy for one oracle vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyPolicy {
    vocabulary: Vocabulary,
}

impl SafetyPolicy {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> Vocabulary {
        self.vocabulary
    }

    /// Resolve `outcome` into a directive.  Total: every input yields a
    /// resolution, and every failure yields [`Directive::Stop`].
    pub fn resolve(&self, outcome: OracleOutcome) -> Resolution {
        match outcome {
            OracleOutcome::FrameUnavailable(reason) => {
                Resolution::stop(Anomaly::FrameUnavailable(reason), None)
            }
            OracleOutcome::Failed(reason) => Resolution::stop(Anomaly::OracleFailed(reason), None),
            OracleOutcome::TimedOut => Resolution::stop(Anomaly::OracleTimedOut, None),
            OracleOutcome::Responded(response) => self.resolve_response(response),
        }
    }

    fn resolve_response(&self, response: RawOracleResponse) -> Resolution {
        let metadata = (!response.metadata.is_empty()).then_some(response.metadata);

        let candidate = match response.candidate {
            Some(c) if !c.trim().is_empty() => c,
            _ => return Resolution::stop(Anomaly::MissingDirective, metadata),
        };

        match Directive::parse(&candidate).filter(|d| self.vocabulary.admits(*d)) {
            Some(directive) => Resolution {
                directive,
                anomaly: None,
                metadata,
            },
            None => Resolution::stop(
                Anomaly::OutOfVocabulary(candidate.trim().to_string()),
                metadata,
            ),
        }
    }
}
