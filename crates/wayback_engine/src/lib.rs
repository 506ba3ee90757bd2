//! Wayback engine: archive IO, request rewriting and the session driver.
mod decode;
mod engine;
mod fetch;
mod gate;
mod index;
mod links;
mod paths;
mod persist;
mod rewriter;
mod summary;
mod types;

pub use decode::{decode_page, is_html, DecodedPage};
pub use engine::{MirrorEngine, MANIFEST_FILE};
pub use fetch::{FetchOutput, FetchSettings, Fetcher, ReqwestFetcher};
pub use gate::{ThrottleGate, ThrottlePermit};
pub use index::{url_pattern, CdxIndexClient, IndexSettings, SnapshotIndex};
pub use links::extract_links;
pub use paths::snapshot_path;
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError, SnapshotWriter};
pub use rewriter::{
    AnnotatedResponse, ArchivedRequest, ArchivedResponse, CrawlRequest, Dispatch, DropReason,
    RequestRewriter, RewriteContext,
};
pub use summary::SessionSummary;
pub use types::{
    ChannelProgressSink, EngineEvent, FailureKind, JobId, MirrorError, NullSink, ProgressSink,
};
