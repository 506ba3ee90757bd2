use std::collections::BTreeMap;

use serde::Serialize;
use wayback_core::{Timestamp, TimestampFormat};

use crate::FailureKind;

/// End-of-session tallies, logged and written to `manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub urls_total: usize,
    pub urls_succeeded: usize,
    pub urls_dropped: usize,
    pub urls_failed: usize,
    pub snapshots_saved: usize,
    pub snapshots_failed: usize,
    pub bytes_written: u64,
    /// Failure counts keyed by [`FailureKind::label`].
    pub failures: BTreeMap<String, usize>,
    pub cancelled: bool,
}

impl SessionSummary {
    pub fn record_failure(&mut self, kind: &FailureKind) {
        *self.failures.entry(kind.label().to_string()).or_default() += 1;
    }

    pub fn is_clean(&self) -> bool {
        self.urls_dropped == 0 && self.urls_failed == 0 && !self.cancelled
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Manifest<'a> {
    pub(crate) seeds: Vec<&'a str>,
    pub(crate) from: Timestamp,
    pub(crate) to: Timestamp,
    pub(crate) timestamp_format: TimestampFormat,
    pub(crate) summary: &'a SessionSummary,
}
