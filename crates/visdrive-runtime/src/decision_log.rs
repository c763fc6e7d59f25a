//! [`DecisionLog`] – append-only, ordered history of a session's cycles.
//!
//! Records are numbered from 1 and stamped on append.  Timestamps never go
//! backwards even if the wall clock does: a record is stamped with the later
//! of "now" and the previous record's timestamp.
//!
//! Live monitoring goes through [`DecisionLog::subscribe`], which hands out a
//! [`broadcast::Receiver`].  Appends never wait for subscribers; a subscriber
//! that falls more than the channel capacity behind skips the oldest records
//! (it never sees a partial one).

use chrono::Utc;
use tokio::sync::broadcast;
use visdrive_types::{Anomaly, DecisionRecord, Directive, OracleMetadata};

/// Records buffered per live subscriber before the oldest are dropped.
const LIVE_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct DecisionLog {
    records: Vec<DecisionRecord>,
    live: broadcast::Sender<DecisionRecord>,
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionLog {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            records: Vec::new(),
            live,
        }
    }

    /// Append the outcome of one completed cycle and return the stored
    /// record.
    pub fn append(
        &mut self,
        directive: Directive,
        metadata: Option<OracleMetadata>,
        anomaly: Option<Anomaly>,
    ) -> &DecisionRecord {
        let now = Utc::now();
        let timestamp = match self.records.last() {
            Some(prev) if prev.timestamp > now => prev.timestamp,
            _ => now,
        };
        let record = DecisionRecord {
            sequence: self.records.len() as u64 + 1,
            timestamp,
            directive,
            metadata,
            anomaly,
        };
        // No subscribers is the common case.
        let _ = self.live.send(record.clone());
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    /// Live view of future appends.
    pub fn subscribe(&self) -> broadcast::Receiver<DecisionRecord> {
        self.live.subscribe()
    }

    pub fn records(&self) -> &[DecisionRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&DecisionRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records carrying an anomaly.
    pub fn anomaly_count(&self) -> usize {
        self.records.iter().filter(|r| r.anomaly.is_some()).count()
    }

    pub fn into_records(self) -> Vec<DecisionRecord> {
        self.records
    }
}
