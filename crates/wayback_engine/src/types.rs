use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use wayback_core::{JobResultKind, Timestamp};

pub use wayback_core::JobId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The index could not be reached, even after retrying.
    IndexUnavailable,
    /// The index answered with something other than CDX rows.
    IndexParse,
    NoSnapshotAvailable,
    RedirectLoop,
    /// The archive answered 429 or 503.
    RateLimited,
    Timeout,
    Network,
    InvalidUrl,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    HttpStatus(u16),
    /// A fetched snapshot could not be written to disk.
    Persist,
    Cancelled,
}

impl FailureKind {
    /// Stable key used when tallying failures in the session summary.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::IndexUnavailable => "index_unavailable",
            FailureKind::IndexParse => "index_parse",
            FailureKind::NoSnapshotAvailable => "no_snapshot_available",
            FailureKind::RedirectLoop => "redirect_loop",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Timeout => "timeout",
            FailureKind::Network => "network",
            FailureKind::InvalidUrl => "invalid_url",
            FailureKind::TooLarge { .. } => "too_large",
            FailureKind::HttpStatus(_) => "http_status",
            FailureKind::Persist => "persist",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::IndexUnavailable => write!(f, "index unavailable"),
            FailureKind::IndexParse => write!(f, "malformed index response"),
            FailureKind::NoSnapshotAvailable => write!(f, "no snapshot available"),
            FailureKind::RedirectLoop => write!(f, "redirect loop"),
            FailureKind::RateLimited => write!(f, "rate limited"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Persist => write!(f, "write failed"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A per-URL failure. Never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{url}: {kind}: {message}")]
pub struct MirrorError {
    pub kind: FailureKind,
    pub url: String,
    pub message: String,
}

impl MirrorError {
    pub fn new(kind: FailureKind, url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    SnapshotSaved {
        job_id: JobId,
        original_url: String,
        timestamp: Timestamp,
        path: PathBuf,
        bytes: u64,
    },
    SnapshotFailed {
        job_id: JobId,
        archived_url: String,
        error: MirrorError,
    },
    UrlDropped {
        job_id: JobId,
        error: MirrorError,
    },
    ThrottleAdjusted {
        previous: usize,
        current: usize,
    },
    JobCompleted {
        job_id: JobId,
        result: JobResultKind,
    },
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

pub struct ChannelProgressSink {
    tx: std::sync::mpsc::Sender<EngineEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: std::sync::mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: EngineEvent) {}
}
