//! Request rewriting between the crawl frontier and the archive.
//!
//! The frontier only ever talks about live URLs. [`RequestRewriter::before_dispatch`]
//! turns each of them into requests for archived captures, and
//! [`RequestRewriter::after_response`] tags the answers with the capture
//! they came from so persistence and link discovery keep working on
//! original-looking URLs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OnceCell;
use url::Url;
use wayback_core::{
    capture_timestamp, normalize_url_for_dedupe, RequestOutcome, RetryPolicy, SnapshotFilter,
    SnapshotRecord, TimeRange, Timestamp,
};

use engine_logging::{engine_debug, engine_warn};

use crate::gate::ThrottleGate;
use crate::index::{url_pattern, SnapshotIndex};
use crate::{FailureKind, JobId, MirrorError};

/// A request for a live URL, as produced by the crawl frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRequest {
    pub job_id: JobId,
    pub url: Url,
}

/// A request for one archived capture of a live URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedRequest {
    pub job_id: JobId,
    pub original_url: Url,
    pub archived_url: String,
    pub timestamp: Timestamp,
}

impl ArchivedRequest {
    fn from_record(job_id: JobId, original_url: &Url, record: &SnapshotRecord) -> Self {
        Self {
            job_id,
            original_url: original_url.clone(),
            archived_url: record.archived_url().to_string(),
            timestamp: record.timestamp(),
        }
    }

    /// Reads a request that already names a capture, such as
    /// `https://web.archive.org/web/20070221000000id_/http://example.com/`.
    pub fn from_forwarded(request: &CrawlRequest) -> Option<Self> {
        let archived_url = request.url.as_str();
        let timestamp = capture_timestamp(archived_url)?;
        let (_, after_web) = archived_url.split_once("/web/")?;
        let (_, original) = after_web.split_once('/')?;
        let original_url = Url::parse(original).ok()?;
        Some(Self {
            job_id: request.job_id,
            original_url,
            archived_url: archived_url.to_string(),
            timestamp,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Every capture of this URL has already been handed out.
    AlreadyDispatched,
    Failed(MirrorError),
}

/// What the crawl engine should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The request already targets the archive; send it unchanged.
    Forward(CrawlRequest),
    /// Fetch these captures instead. Never empty.
    Rewrite(Vec<ArchivedRequest>),
    Drop(DropReason),
}

/// The raw answer to an [`ArchivedRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedResponse {
    pub request: ArchivedRequest,
    /// Where the redirect chain ended.
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// A response as downstream consumers see it: the live URL plus the
/// capture instant it was resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedResponse {
    pub job_id: JobId,
    pub original_url: Url,
    pub timestamp: Timestamp,
    pub archived_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl AnnotatedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

type Resolution = Arc<OnceCell<Arc<[SnapshotRecord]>>>;

enum Slot {
    /// Resolution in progress or finished but not yet dispatched.
    Pending(Resolution),
    Exhausted,
}

/// Per-session cache from logical URL to its eligible captures.
///
/// A slot's records are only visible once fully resolved; concurrent
/// lookups of the same URL share one resolution.
#[derive(Default)]
pub struct RewriteContext {
    slots: Mutex<HashMap<String, Slot>>,
}

impl RewriteContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// `None` when the URL was already dispatched.
    fn resolution(&self, key: &str) -> Option<Resolution> {
        let mut slots = self.lock();
        match slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::Pending(Resolution::default()))
        {
            Slot::Pending(cell) => Some(cell.clone()),
            Slot::Exhausted => None,
        }
    }

    /// Marks `key` exhausted. Only the first claimant of a given
    /// resolution gets `true`.
    fn claim(&self, key: &str, resolution: &Resolution) -> bool {
        let mut slots = self.lock();
        match slots.get(key) {
            Some(Slot::Pending(cell)) if Arc::ptr_eq(cell, resolution) => {
                slots.insert(key.to_string(), Slot::Exhausted);
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Index lookups share the archive's concurrency limit with fetches.
struct IndexThrottle {
    gate: Arc<ThrottleGate>,
    retry: RetryPolicy,
}

pub struct RequestRewriter {
    index: Arc<dyn SnapshotIndex>,
    filter: SnapshotFilter,
    snapshot_base: String,
    context: RewriteContext,
    throttle: Option<IndexThrottle>,
}

impl RequestRewriter {
    pub fn new(index: Arc<dyn SnapshotIndex>, filter: SnapshotFilter, snapshot_base: impl Into<String>) -> Self {
        Self {
            index,
            filter,
            snapshot_base: snapshot_base.into(),
            context: RewriteContext::new(),
            throttle: None,
        }
    }

    /// Sends every index lookup through `gate`. Lookups the index rejects
    /// as rate limited are retried after `retry`'s backoff.
    pub fn with_throttle(mut self, gate: Arc<ThrottleGate>, retry: RetryPolicy) -> Self {
        self.throttle = Some(IndexThrottle { gate, retry });
        self
    }

    pub fn context(&self) -> &RewriteContext {
        &self.context
    }

    pub async fn before_dispatch(&self, request: CrawlRequest) -> Dispatch {
        if request.url.as_str().starts_with(&self.snapshot_base) {
            return Dispatch::Forward(request);
        }

        let key = normalize_url_for_dedupe(&request.url);
        let Some(resolution) = self.context.resolution(&key) else {
            engine_debug!("{} already dispatched", request.url);
            return Dispatch::Drop(DropReason::AlreadyDispatched);
        };

        let records = match resolution.get_or_try_init(|| self.resolve(&request.url)).await {
            Ok(records) => records.clone(),
            Err(err) => return Dispatch::Drop(DropReason::Failed(err)),
        };

        if !self.context.claim(&key, &resolution) {
            return Dispatch::Drop(DropReason::AlreadyDispatched);
        }
        if records.is_empty() {
            return Dispatch::Drop(DropReason::Failed(MirrorError::new(
                FailureKind::NoSnapshotAvailable,
                request.url.as_str(),
                "no capture matches the time range and patterns",
            )));
        }

        Dispatch::Rewrite(
            records
                .iter()
                .map(|record| ArchivedRequest::from_record(request.job_id, &request.url, record))
                .collect(),
        )
    }

    pub fn after_response(&self, response: ArchivedResponse) -> AnnotatedResponse {
        let ArchivedResponse {
            request,
            final_url,
            status,
            content_type,
            body,
        } = response;
        let timestamp = capture_timestamp(&final_url).unwrap_or(request.timestamp);
        if timestamp != request.timestamp {
            engine_debug!(
                "{} resolved to capture {timestamp} instead of {}",
                request.original_url,
                request.timestamp
            );
        }
        AnnotatedResponse {
            job_id: request.job_id,
            original_url: request.original_url,
            timestamp,
            archived_url: final_url,
            status,
            content_type,
            body,
        }
    }

    /// Drops every cached resolution and the index's memoized listings;
    /// called when a session ends.
    pub fn clear(&self) {
        self.context.clear();
        self.index.clear();
    }

    async fn resolve(&self, url: &Url) -> Result<Arc<[SnapshotRecord]>, MirrorError> {
        let pattern = url_pattern(url);
        let range = self.filter.config().range;
        let listed = self.throttled_lookup(&pattern, range).await;
        // The filtered result now lives in the rewrite context.
        self.index.evict(&pattern, range.index_window());
        let listed = match listed {
            Ok(records) => records,
            Err(err) if err.kind == FailureKind::IndexParse => {
                engine_warn!("{err}; treating as no captures");
                return Ok(Arc::from(Vec::new()));
            }
            Err(err) => return Err(err),
        };
        let eligible = self.filter.filter(listed.iter().cloned());
        engine_debug!("{url}: {} of {} capture(s) eligible", eligible.len(), listed.len());
        Ok(eligible.into())
    }

    async fn throttled_lookup(
        &self,
        pattern: &str,
        range: TimeRange,
    ) -> Result<Arc<[SnapshotRecord]>, MirrorError> {
        let Some(throttle) = &self.throttle else {
            return self.lookup(pattern, range).await;
        };
        let max_attempts = throttle.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let permit = throttle.gate.acquire().await;
            let result = self.lookup(pattern, range).await;
            let outcome = match &result {
                Ok(_) => RequestOutcome::Success,
                Err(err) if err.kind == FailureKind::RateLimited => RequestOutcome::RateLimited,
                Err(_) => RequestOutcome::Failed,
            };
            let adjustment = permit.finish(outcome);
            if adjustment.changed() {
                engine_debug!(
                    "Index lookup moved the concurrency limit {} -> {}",
                    adjustment.previous,
                    adjustment.current
                );
            }
            match result {
                Err(err) if err.kind == FailureKind::RateLimited && attempt < max_attempts => {
                    let delay = throttle.retry.delay_before(attempt);
                    engine_warn!("{err}; retrying index lookup in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn lookup(&self, pattern: &str, range: TimeRange) -> Result<Arc<[SnapshotRecord]>, MirrorError> {
        if range.is_single_point() {
            self.index.latest(pattern, range.to()).await
        } else {
            self.index.query(pattern, range).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crawl(url: &str) -> CrawlRequest {
        CrawlRequest {
            job_id: 4,
            url: Url::parse(url).unwrap(),
        }
    }

    #[test]
    fn forwarded_requests_keep_their_capture() {
        let request = crawl("https://web.archive.org/web/20070221000000id_/http://example.com/a");
        let archived = ArchivedRequest::from_forwarded(&request).unwrap();
        assert_eq!(archived.original_url.as_str(), "http://example.com/a");
        assert_eq!(archived.timestamp.to_string(), "20070221000000");
        assert!(ArchivedRequest::from_forwarded(&crawl("http://example.com/")).is_none());
    }

    #[test]
    fn context_claims_once() {
        let context = RewriteContext::new();
        let resolution = context.resolution("http://example.com/").unwrap();
        assert!(context.claim("http://example.com/", &resolution));
        assert!(!context.claim("http://example.com/", &resolution));
        assert!(context.resolution("http://example.com/").is_none());
        context.clear();
        assert!(context.is_empty());
    }
}
