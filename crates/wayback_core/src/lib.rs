//! Wayback core: pure snapshot selection, throttling and crawl-frontier logic.
mod config;
mod effect;
mod filter;
mod msg;
mod range;
mod snapshot;
mod state;
mod summary;
mod throttle;
mod timestamp;
mod update;

pub use config::{
    seed_url, ArchiveEndpoints, ConfigError, MirrorConfig, RawOptions, RetryPolicy,
    DEFAULT_CDX_URL, DEFAULT_SNAPSHOT_BASE,
};
pub use effect::{Effect, StopPolicy};
pub use filter::{FilterConfig, SnapshotFilter};
pub use msg::Msg;
pub use range::TimeRange;
pub use snapshot::{archived_url_for, capture_timestamp, SnapshotRecord};
pub use state::{
    normalize_url_for_dedupe, CrawlState, JobId, JobRecord, JobResultKind, SessionState,
};
pub use summary::CrawlSummary;
pub use throttle::{
    LatencyWindow, RequestOutcome, ThrottleAdjustment, ThrottleController, ThrottleSettings,
    ThrottleState,
};
pub use timestamp::{Timestamp, TimestampError, TimestampFormat};
pub use update::update;
