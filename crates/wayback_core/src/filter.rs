use regex::Regex;

use crate::config::ConfigError;
use crate::{SnapshotRecord, TimeRange};

/// Which URLs and capture instants a session is interested in.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub allow: Option<Regex>,
    pub deny: Option<Regex>,
    pub range: TimeRange,
}

impl FilterConfig {
    /// Compiles the allow/deny patterns. Blank patterns count as absent,
    /// so an empty `--deny` never rejects everything.
    pub fn from_patterns(
        allow: Option<&str>,
        deny: Option<&str>,
        range: TimeRange,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            allow: compile("allow", allow)?,
            deny: compile("deny", deny)?,
            range,
        })
    }

    /// Deny wins when both patterns match.
    pub fn url_allowed(&self, url: &str) -> bool {
        if self.deny.as_ref().is_some_and(|deny| deny.is_match(url)) {
            return false;
        }
        self.allow.as_ref().map_or(true, |allow| allow.is_match(url))
    }
}

fn compile(field: &'static str, pattern: Option<&str>) -> Result<Option<Regex>, ConfigError> {
    match pattern.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => Regex::new(p)
            .map(Some)
            .map_err(|source| ConfigError::Pattern { field, source }),
        None => Ok(None),
    }
}

/// Selects the captures worth fetching from an index listing.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    config: FilterConfig,
}

impl SnapshotFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Returns the eligible records in chronological order.
    ///
    /// Only 2xx captures that pass the allow/deny patterns are eligible.
    /// Single-point ranges keep the one capture nearest to and not after
    /// the instant; on equal timestamps the first listed record wins.
    /// Wider ranges keep every capture inside the bounds, collapsing runs
    /// of consecutive captures that share a content digest.
    pub fn filter<I>(&self, records: I) -> Vec<SnapshotRecord>
    where
        I: IntoIterator<Item = SnapshotRecord>,
    {
        let eligible = records
            .into_iter()
            .filter(|record| record.is_success() && self.config.url_allowed(record.original_url()));

        let range = self.config.range;
        if range.is_single_point() {
            return nearest_prior(eligible, range.to()).into_iter().collect();
        }

        let mut in_range: Vec<SnapshotRecord> =
            eligible.filter(|record| range.contains(record.timestamp())).collect();
        in_range.sort_by_key(SnapshotRecord::timestamp);

        let mut kept: Vec<SnapshotRecord> = Vec::with_capacity(in_range.len());
        for record in in_range {
            let repeated = match (kept.last().and_then(SnapshotRecord::digest), record.digest()) {
                (Some(prev), Some(current)) => prev == current,
                _ => false,
            };
            if !repeated {
                kept.push(record);
            }
        }
        kept
    }
}

fn nearest_prior<I>(records: I, target: crate::Timestamp) -> Option<SnapshotRecord>
where
    I: Iterator<Item = SnapshotRecord>,
{
    records
        .filter(|record| record.timestamp() <= target)
        .fold(None, |best: Option<SnapshotRecord>, record| match best {
            Some(current) if current.timestamp() >= record.timestamp() => Some(current),
            _ => Some(record),
        })
}
