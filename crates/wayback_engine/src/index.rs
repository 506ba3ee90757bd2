//! CDX snapshot index client.
//!
//! Queries `output=json` listings page by page, following the archive's
//! resume keys, and memoizes complete results per `(pattern, range)` until
//! the caller evicts them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::stream::{self, Stream, TryStreamExt};
use tokio::sync::OnceCell;
use url::Url;
use wayback_core::{
    archived_url_for, MirrorConfig, RetryPolicy, SnapshotRecord, TimeRange, Timestamp,
    DEFAULT_CDX_URL, DEFAULT_SNAPSHOT_BASE,
};

use engine_logging::{engine_debug, engine_warn};

use crate::fetch::is_rate_limit;
use crate::{FailureKind, MirrorError};

const CDX_FIELDS: &str = "timestamp,original,statuscode,mimetype,digest";

#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub cdx_url: String,
    pub snapshot_base: String,
    /// Per request; retries get a fresh budget.
    pub timeout: Duration,
    pub page_size: usize,
    /// Pagination stops after this many pages even if the index has more.
    pub max_pages: usize,
    pub retry: RetryPolicy,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            cdx_url: DEFAULT_CDX_URL.to_string(),
            snapshot_base: DEFAULT_SNAPSHOT_BASE.to_string(),
            timeout: Duration::from_secs(30),
            page_size: 5_000,
            max_pages: 50,
            retry: RetryPolicy::default(),
        }
    }
}

impl IndexSettings {
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self {
            cdx_url: config.archive.cdx_url.clone(),
            snapshot_base: config.archive.snapshot_base.clone(),
            timeout: config.index_timeout,
            page_size: config.index_page_size,
            max_pages: config.index_max_pages,
            retry: config.retry,
        }
    }
}

/// Source of snapshot listings for a URL pattern.
#[async_trait::async_trait]
pub trait SnapshotIndex: Send + Sync {
    /// All captures of `url_pattern` inside `range`, oldest first.
    async fn query(
        &self,
        url_pattern: &str,
        range: TimeRange,
    ) -> Result<Arc<[SnapshotRecord]>, MirrorError>;

    /// The most recent captures of `url_pattern` at or before `until`,
    /// oldest first. Implementations may cap how far back they look.
    async fn latest(
        &self,
        url_pattern: &str,
        until: Timestamp,
    ) -> Result<Arc<[SnapshotRecord]>, MirrorError> {
        self.query(url_pattern, TimeRange::single_point(until).index_window())
            .await
    }

    /// Forgets any memoized listing for `url_pattern` in `range`.
    fn evict(&self, _url_pattern: &str, _range: TimeRange) {}

    /// Forgets every memoized listing.
    fn clear(&self) {}
}

/// The index pattern for a crawl URL: no scheme, no port.
pub fn url_pattern(url: &Url) -> String {
    let mut pattern = url.host_str().unwrap_or_default().to_string();
    pattern.push_str(url.path());
    if let Some(query) = url.query() {
        pattern.push('?');
        pattern.push_str(query);
    }
    pattern
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    pattern: String,
    range: TimeRange,
    newest_first: bool,
}

type Listing = Arc<OnceCell<Arc<[SnapshotRecord]>>>;

pub struct CdxIndexClient {
    settings: IndexSettings,
    client: reqwest::Client,
    cache: Mutex<HashMap<QueryKey, Listing>>,
}

impl CdxIndexClient {
    pub fn new(settings: IndexSettings) -> Result<Self, MirrorError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| MirrorError::new(FailureKind::Network, &settings.cdx_url, err.to_string()))?;
        Ok(Self {
            settings,
            client,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    /// Number of memoized listings.
    pub fn cached(&self) -> usize {
        self.cache_lock().len()
    }

    fn listing(&self, key: QueryKey) -> Listing {
        self.cache_lock().entry(key).or_default().clone()
    }

    fn cache_lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Listing>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lazily walks the listing, yielding one page of records at a time.
    pub fn query_stream<'a>(
        &'a self,
        url_pattern: &'a str,
        range: TimeRange,
    ) -> impl Stream<Item = Result<Vec<SnapshotRecord>, MirrorError>> + 'a {
        stream::try_unfold(Cursor::Start, move |cursor| self.next_page(url_pattern, range, cursor))
    }

    async fn next_page(
        &self,
        url_pattern: &str,
        range: TimeRange,
        cursor: Cursor,
    ) -> Result<Option<(Vec<SnapshotRecord>, Cursor)>, MirrorError> {
        let (resume_key, page) = match cursor {
            Cursor::Done => return Ok(None),
            Cursor::Start => (None, 1),
            Cursor::Resume { key, page } => (Some(key), page),
        };
        let limit = self.settings.page_size.to_string();
        let (records, next_key) = self
            .fetch_page(url_pattern, range, &limit, resume_key.as_deref())
            .await?;
        let next = match next_key {
            Some(key) if page < self.settings.max_pages => Cursor::Resume { key, page: page + 1 },
            Some(_) => {
                engine_warn!("Index listing for {url_pattern} truncated after {page} page(s)");
                Cursor::Done
            }
            None => Cursor::Done,
        };
        Ok(Some((records, next)))
    }

    async fn collect(&self, url_pattern: &str, range: TimeRange) -> Result<Arc<[SnapshotRecord]>, MirrorError> {
        let mut records: Vec<SnapshotRecord> = self
            .query_stream(url_pattern, range)
            .try_concat()
            .await?;
        records.sort_by_key(SnapshotRecord::timestamp);
        engine_debug!("Index lists {} capture(s) for {url_pattern}", records.len());
        Ok(records.into())
    }

    /// One request with a negative limit: the index answers with the
    /// last `page_size` captures of the window, so the newest ones are
    /// never lost to pagination limits.
    async fn collect_latest(
        &self,
        url_pattern: &str,
        range: TimeRange,
    ) -> Result<Arc<[SnapshotRecord]>, MirrorError> {
        let limit = format!("-{}", self.settings.page_size.max(1));
        let (mut records, _) = self.fetch_page(url_pattern, range, &limit, None).await?;
        records.sort_by_key(SnapshotRecord::timestamp);
        engine_debug!(
            "Index lists {} recent capture(s) for {url_pattern} up to {}",
            records.len(),
            range.to()
        );
        Ok(records.into())
    }

    async fn fetch_page(
        &self,
        url_pattern: &str,
        range: TimeRange,
        limit: &str,
        resume_key: Option<&str>,
    ) -> Result<(Vec<SnapshotRecord>, Option<String>), MirrorError> {
        let url = self.page_url(url_pattern, range, limit, resume_key)?;
        let body = self.get_with_retry(&url, url_pattern).await?;
        let page = parse_cdx_page(&body, &self.settings.snapshot_base)
            .map_err(|message| MirrorError::new(FailureKind::IndexParse, url_pattern, message))?;
        Ok((page.records, page.resume_key))
    }

    fn page_url(
        &self,
        url_pattern: &str,
        range: TimeRange,
        limit: &str,
        resume_key: Option<&str>,
    ) -> Result<Url, MirrorError> {
        let mut url = Url::parse(&self.settings.cdx_url)
            .map_err(|err| MirrorError::new(FailureKind::InvalidUrl, &self.settings.cdx_url, err.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("url", url_pattern)
                .append_pair("output", "json")
                .append_pair("fl", CDX_FIELDS)
                .append_pair("from", &range.from().to_string())
                .append_pair("to", &range.to().to_string())
                .append_pair("limit", limit);
            if !limit.starts_with('-') {
                query.append_pair("showResumeKey", "true");
            }
            if let Some(key) = resume_key {
                query.append_pair("resumeKey", key);
            }
        }
        Ok(url)
    }

    async fn get_with_retry(&self, url: &Url, url_pattern: &str) -> Result<Vec<u8>, MirrorError> {
        let max_attempts = self.settings.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.get_once(url).await {
                Ok(body) => return Ok(body),
                Err(failure) if failure.rate_limited => {
                    // Overload goes back to the caller's throttle unretried.
                    return Err(MirrorError::new(FailureKind::RateLimited, url_pattern, failure.message));
                }
                Err(failure) if failure.transient && attempt < max_attempts => {
                    let delay = self.settings.retry.delay_before(attempt);
                    engine_warn!(
                        "Index query for {url_pattern} failed (attempt {attempt}/{max_attempts}): {}; retrying in {delay:?}",
                        failure.message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => {
                    return Err(MirrorError::new(
                        FailureKind::IndexUnavailable,
                        url_pattern,
                        format!("{} (after {attempt} attempt(s))", failure.message),
                    ));
                }
            }
        }
    }

    async fn get_once(&self, url: &Url) -> Result<Vec<u8>, AttemptFailure> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.settings.timeout)
            .send()
            .await
            .map_err(AttemptFailure::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptFailure {
                transient: status.is_server_error(),
                rate_limited: is_rate_limit(status.as_u16()),
                message: format!("index answered {status}"),
            });
        }
        let body = response.bytes().await.map_err(AttemptFailure::from_reqwest)?;
        Ok(body.to_vec())
    }
}

#[async_trait::async_trait]
impl SnapshotIndex for CdxIndexClient {
    async fn query(
        &self,
        url_pattern: &str,
        range: TimeRange,
    ) -> Result<Arc<[SnapshotRecord]>, MirrorError> {
        let listing = self.listing(QueryKey {
            pattern: url_pattern.to_string(),
            range,
            newest_first: false,
        });
        listing
            .get_or_try_init(|| self.collect(url_pattern, range))
            .await
            .cloned()
    }

    async fn latest(
        &self,
        url_pattern: &str,
        until: Timestamp,
    ) -> Result<Arc<[SnapshotRecord]>, MirrorError> {
        let range = TimeRange::single_point(until).index_window();
        let listing = self.listing(QueryKey {
            pattern: url_pattern.to_string(),
            range,
            newest_first: true,
        });
        listing
            .get_or_try_init(|| self.collect_latest(url_pattern, range))
            .await
            .cloned()
    }

    fn evict(&self, url_pattern: &str, range: TimeRange) {
        self.cache_lock()
            .retain(|key, _| !(key.pattern == url_pattern && key.range == range));
    }

    fn clear(&self) {
        self.cache_lock().clear();
    }
}

enum Cursor {
    Start,
    Resume { key: String, page: usize },
    Done,
}

struct AttemptFailure {
    transient: bool,
    rate_limited: bool,
    message: String,
}

impl AttemptFailure {
    fn from_reqwest(err: reqwest::Error) -> Self {
        Self {
            transient: err.is_timeout() || err.is_connect(),
            rate_limited: false,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct CdxPage {
    pub(crate) records: Vec<SnapshotRecord>,
    pub(crate) resume_key: Option<String>,
}

/// Parses one `output=json` page. The first row names the columns; an
/// empty row separates the data from a trailing `[resumeKey]` row.
pub(crate) fn parse_cdx_page(body: &[u8], snapshot_base: &str) -> Result<CdxPage, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CdxPage::default());
    }
    let rows: Vec<Vec<String>> =
        serde_json::from_slice(body).map_err(|err| format!("expected CDX rows: {err}"))?;
    let mut rows = rows.into_iter();
    let Some(header) = rows.next() else {
        return Ok(CdxPage::default());
    };
    let columns = Columns::from_header(&header)?;

    let mut page = CdxPage::default();
    while let Some(row) = rows.next() {
        if row.is_empty() {
            page.resume_key = rows
                .next()
                .and_then(|row| row.into_iter().next())
                .filter(|key| !key.is_empty());
            break;
        }
        if row.len() != header.len() {
            return Err(format!(
                "row has {} field(s), header has {}",
                row.len(),
                header.len()
            ));
        }
        if let Some(record) = columns.record(&row, snapshot_base) {
            page.records.push(record);
        }
    }
    Ok(page)
}

struct Columns {
    timestamp: usize,
    original: usize,
    status: usize,
    mime: Option<usize>,
    digest: Option<usize>,
}

impl Columns {
    fn from_header(header: &[String]) -> Result<Self, String> {
        let find = |name: &str| header.iter().position(|column| column == name);
        let required = |name: &str| find(name).ok_or_else(|| format!("missing `{name}` column"));
        Ok(Self {
            timestamp: required("timestamp")?,
            original: required("original")?,
            status: required("statuscode")?,
            mime: find("mimetype"),
            digest: find("digest"),
        })
    }

    fn record(&self, row: &[String], snapshot_base: &str) -> Option<SnapshotRecord> {
        let raw_timestamp = &row[self.timestamp];
        let original = &row[self.original];
        let Ok(timestamp) = Timestamp::parse_compact(raw_timestamp) else {
            engine_debug!("Skipping capture of {original} with timestamp {raw_timestamp:?}");
            return None;
        };
        let Ok(status) = row[self.status].parse::<u16>() else {
            engine_debug!("Skipping capture of {original} at {timestamp} without a status");
            return None;
        };
        let mime = self.mime.map_or("unknown", |i| row[i].as_str());
        let record = SnapshotRecord::new(
            original.as_str(),
            timestamp,
            archived_url_for(snapshot_base, timestamp, original),
            status,
            mime,
        );
        Some(match self.digest {
            Some(i) => record.with_digest(row[i].as_str()),
            None => record,
        })
    }
}
