//! Session driver: runs the crawl frontier against the archive.
//!
//! The frontier's pure `update` decides which URLs to visit; this module
//! executes its effects. Each job goes through the [`RequestRewriter`],
//! then every capture it fans out to is fetched behind the
//! [`ThrottleGate`], tagged, stored and scanned for further links.

use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;
use wayback_core::{
    update, CrawlState, Effect, FilterConfig, JobResultKind, MirrorConfig, Msg, RequestOutcome,
    SnapshotFilter, StopPolicy, ThrottleController,
};

use engine_logging::{engine_debug, engine_error, engine_info, engine_warn};

use crate::decode::{decode_page, is_html};
use crate::fetch::{FetchSettings, Fetcher, ReqwestFetcher};
use crate::gate::ThrottleGate;
use crate::index::{CdxIndexClient, IndexSettings, SnapshotIndex};
use crate::links::extract_links;
use crate::persist::{ensure_output_dir, AtomicFileWriter, PersistError, SnapshotWriter};
use crate::rewriter::{ArchivedRequest, CrawlRequest, Dispatch, DropReason, RequestRewriter};
use crate::summary::{Manifest, SessionSummary};
use crate::{EngineEvent, FailureKind, JobId, MirrorError, ProgressSink};

pub const MANIFEST_FILE: &str = "manifest.json";

pub struct MirrorEngine {
    config: MirrorConfig,
    index: Arc<dyn SnapshotIndex>,
    fetcher: Arc<dyn Fetcher>,
    cancel: CancellationToken,
    finish: CancellationToken,
}

impl MirrorEngine {
    /// Builds an engine talking to the archive endpoints in `config`.
    pub fn new(config: MirrorConfig) -> Result<Self, MirrorError> {
        let index = CdxIndexClient::new(IndexSettings::from_config(&config))?;
        let fetcher = ReqwestFetcher::new(FetchSettings::from_config(&config));
        Ok(Self::with_components(config, Arc::new(index), Arc::new(fetcher)))
    }

    pub fn with_components(
        config: MirrorConfig,
        index: Arc<dyn SnapshotIndex>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            index,
            fetcher,
            cancel: CancellationToken::new(),
            finish: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Cancelling this token aborts the session: pending index queries and
    /// in-flight fetches are dropped and the summary is still produced.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancelling this token winds the session down gently: jobs already
    /// queued run to completion but their links are not followed.
    pub fn finish_token(&self) -> CancellationToken {
        self.finish.clone()
    }

    /// Runs one session to completion. Only an unusable output directory
    /// is an error; per-URL failures end up in the summary.
    pub async fn run(&self, sink: Arc<dyn ProgressSink>) -> Result<SessionSummary, PersistError> {
        ensure_output_dir(&self.config.output_dir)?;

        let controller = Arc::new(ThrottleController::new(self.config.throttle_settings()));
        let gate = Arc::new(ThrottleGate::new(controller));
        let rewriter = Arc::new(
            RequestRewriter::new(
                Arc::clone(&self.index),
                SnapshotFilter::new(self.config.filter.clone()),
                self.config.archive.snapshot_base.clone(),
            )
            .with_throttle(Arc::clone(&gate), self.config.retry),
        );
        let ctx = Arc::new(JobContext {
            rewriter: Arc::clone(&rewriter),
            gate,
            fetcher: Arc::clone(&self.fetcher),
            writer: SnapshotWriter::new(self.config.output_dir.clone(), self.config.timestamp_format),
            links: self.config.filter.clone(),
            sink: Arc::clone(&sink),
            cancel: self.cancel.child_token(),
        });

        engine_info!(
            "Mirroring {} seed(s) from {} to {} into {}",
            self.config.seeds.len(),
            self.config.filter.range.from(),
            self.config.filter.range.to(),
            self.config.output_dir.display()
        );

        let mut summary = SessionSummary::default();
        let mut jobs: JoinSet<JobReport> = JoinSet::new();
        let mut stop_sent = false;
        let mut finish_sent = false;

        let crawl_timeout = self.config.crawl_timeout;
        let deadline = async move {
            match crawl_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let seeds = self.config.seeds.iter().map(Url::to_string).collect();
        let (mut state, effects) = update(CrawlState::new(), Msg::SeedsSubmitted(seeds));
        let mut pending: VecDeque<Effect> = effects.into();

        'session: loop {
            while let Some(effect) = pending.pop_front() {
                match effect {
                    Effect::StartSession => engine_debug!("Session started"),
                    Effect::EnqueueUrl { job_id, url, depth } => {
                        engine_debug!("Job {job_id} queued at depth {depth}: {url}");
                        let ctx = Arc::clone(&ctx);
                        jobs.spawn(async move {
                            AssertUnwindSafe(run_job(ctx, job_id, url))
                                .catch_unwind()
                                .await
                                .unwrap_or_else(|_| {
                                    engine_error!("Job {job_id} panicked");
                                    JobReport::new(job_id).failed()
                                })
                        });
                    }
                    Effect::StopFinish { policy: StopPolicy::Immediate } => ctx.cancel.cancel(),
                    Effect::StopFinish { policy: StopPolicy::Finish } => {
                        engine_debug!("Waiting for {} queued job(s)", state.pending());
                    }
                    Effect::SessionFinished => break 'session,
                }
            }

            let msg = tokio::select! {
                biased;
                _ = self.cancel.cancelled(), if !stop_sent => {
                    stop_sent = true;
                    summary.cancelled = true;
                    engine_warn!("Session cancelled; abandoning in-flight requests");
                    Msg::StopRequested { policy: StopPolicy::Immediate }
                }
                _ = &mut deadline, if !stop_sent => {
                    stop_sent = true;
                    summary.cancelled = true;
                    engine_warn!("Crawl timeout reached; stopping");
                    Msg::StopRequested { policy: StopPolicy::Immediate }
                }
                _ = self.finish.cancelled(), if !finish_sent && !stop_sent => {
                    finish_sent = true;
                    summary.cancelled = true;
                    engine_warn!("Stop requested; finishing queued jobs without following links");
                    Msg::StopRequested { policy: StopPolicy::Finish }
                }
                joined = jobs.join_next() => match joined {
                    Some(Ok(report)) => {
                        let (next, effects) = apply_report(state, &mut summary, report);
                        state = next;
                        pending.extend(effects);
                        continue 'session;
                    }
                    Some(Err(err)) => {
                        engine_error!("Job task aborted: {err}");
                        continue 'session;
                    }
                    None => break 'session,
                },
            };
            let (next, effects) = update(state, msg);
            state = next;
            pending.extend(effects);
        }

        rewriter.clear();
        summary.urls_total = state.summary().jobs_total;
        log_summary(&summary);
        self.write_manifest(&summary);
        Ok(summary)
    }

    fn write_manifest(&self, summary: &SessionSummary) {
        let manifest = Manifest {
            seeds: self.config.seeds.iter().map(Url::as_str).collect(),
            from: self.config.filter.range.from(),
            to: self.config.filter.range.to(),
            timestamp_format: self.config.timestamp_format,
            summary,
        };
        let written = serde_json::to_vec_pretty(&manifest)
            .map_err(PersistError::from)
            .and_then(|json| AtomicFileWriter::new(self.config.output_dir.clone()).write(MANIFEST_FILE, &json));
        match written {
            Ok(path) => engine_debug!("Wrote {}", path.display()),
            Err(err) => engine_warn!("Could not write {MANIFEST_FILE}: {err}"),
        }
    }
}

fn apply_report(
    mut state: CrawlState,
    summary: &mut SessionSummary,
    report: JobReport,
) -> (CrawlState, Vec<Effect>) {
    summary.snapshots_saved += report.snapshots_saved;
    summary.bytes_written += report.bytes_written;
    summary.snapshots_failed += report.snapshot_failures;
    for kind in &report.failures {
        summary.record_failure(kind);
    }
    match report.result {
        JobResultKind::Succeeded => summary.urls_succeeded += 1,
        JobResultKind::Dropped => summary.urls_dropped += 1,
        JobResultKind::Failed => summary.urls_failed += 1,
    }

    let mut effects = Vec::new();
    if !report.links.is_empty() {
        let (next, more) = update(
            state,
            Msg::LinksDiscovered {
                job_id: report.job_id,
                links: report.links,
            },
        );
        state = next;
        effects.extend(more);
    }
    let (state, more) = update(
        state,
        Msg::JobDone {
            job_id: report.job_id,
            result: report.result,
        },
    );
    effects.extend(more);
    (state, effects)
}

fn log_summary(summary: &SessionSummary) {
    engine_info!(
        "Session finished: {} URL(s), {} succeeded, {} dropped, {} failed; {} snapshot(s) saved ({} bytes), {} failed",
        summary.urls_total,
        summary.urls_succeeded,
        summary.urls_dropped,
        summary.urls_failed,
        summary.snapshots_saved,
        summary.bytes_written,
        summary.snapshots_failed
    );
    for (kind, count) in &summary.failures {
        engine_info!("  {kind}: {count}");
    }
}

struct JobContext {
    rewriter: Arc<RequestRewriter>,
    gate: Arc<ThrottleGate>,
    fetcher: Arc<dyn Fetcher>,
    writer: SnapshotWriter,
    /// Applied to discovered links before they reach the frontier.
    links: FilterConfig,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct JobReport {
    job_id: JobId,
    result: JobResultKind,
    links: Vec<String>,
    snapshots_saved: usize,
    snapshot_failures: usize,
    bytes_written: u64,
    failures: Vec<FailureKind>,
}

impl JobReport {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            result: JobResultKind::Dropped,
            links: Vec::new(),
            snapshots_saved: 0,
            snapshot_failures: 0,
            bytes_written: 0,
            failures: Vec::new(),
        }
    }

    fn failed(mut self) -> Self {
        self.result = JobResultKind::Failed;
        self
    }

    fn dropped(mut self, ctx: &JobContext, error: MirrorError) -> Self {
        engine_warn!("Dropped {error}");
        self.failures.push(error.kind.clone());
        ctx.sink.emit(EngineEvent::UrlDropped {
            job_id: self.job_id,
            error,
        });
        self.result = JobResultKind::Dropped;
        self
    }
}

enum SnapshotResult {
    Saved { bytes: u64, links: Vec<String> },
    Failed(MirrorError),
}

async fn run_job(ctx: Arc<JobContext>, job_id: JobId, url: String) -> JobReport {
    let report = JobReport::new(job_id);
    let parsed = match Url::parse(&url) {
        Ok(parsed) => parsed,
        Err(err) => {
            let error = MirrorError::new(FailureKind::InvalidUrl, &url, err.to_string());
            return finish(&ctx, report.dropped(&ctx, error));
        }
    };
    let request = CrawlRequest { job_id, url: parsed };

    let dispatch = tokio::select! {
        _ = ctx.cancel.cancelled() => {
            let error = MirrorError::new(FailureKind::Cancelled, &url, "session stopped before resolution");
            return finish(&ctx, report.dropped(&ctx, error));
        }
        dispatch = ctx.rewriter.before_dispatch(request) => dispatch,
    };

    let requests = match dispatch {
        Dispatch::Rewrite(requests) => requests,
        Dispatch::Forward(request) => match ArchivedRequest::from_forwarded(&request) {
            Some(archived) => vec![archived],
            None => {
                let error = MirrorError::new(FailureKind::InvalidUrl, &url, "archive URL without a capture timestamp");
                return finish(&ctx, report.dropped(&ctx, error));
            }
        },
        Dispatch::Drop(DropReason::AlreadyDispatched) => {
            engine_debug!("Job {job_id}: {url} was already dispatched");
            return finish(&ctx, report);
        }
        Dispatch::Drop(DropReason::Failed(error)) => return finish(&ctx, report.dropped(&ctx, error)),
    };

    engine_debug!("Job {job_id}: {url} resolved to {} capture(s)", requests.len());
    let results = join_all(requests.into_iter().map(|request| fetch_snapshot(&ctx, request))).await;

    let mut report = report;
    let mut links_seen = HashSet::new();
    for result in results {
        match result {
            SnapshotResult::Saved { bytes, links } => {
                report.snapshots_saved += 1;
                report.bytes_written += bytes;
                report
                    .links
                    .extend(links.into_iter().filter(|link| links_seen.insert(link.clone())));
            }
            SnapshotResult::Failed(error) => {
                report.snapshot_failures += 1;
                report.failures.push(error.kind);
            }
        }
    }
    report.result = if report.snapshots_saved > 0 {
        JobResultKind::Succeeded
    } else {
        JobResultKind::Failed
    };
    finish(&ctx, report)
}

fn finish(ctx: &JobContext, report: JobReport) -> JobReport {
    ctx.sink.emit(EngineEvent::JobCompleted {
        job_id: report.job_id,
        result: report.result,
    });
    report
}

async fn fetch_snapshot(ctx: &JobContext, request: ArchivedRequest) -> SnapshotResult {
    let job_id = request.job_id;
    let archived_url = request.archived_url.clone();
    let result = fetch_and_store(ctx, request).await;
    if let SnapshotResult::Failed(error) = &result {
        engine_warn!("Snapshot failed: {error}");
        ctx.sink.emit(EngineEvent::SnapshotFailed {
            job_id,
            archived_url,
            error: error.clone(),
        });
    }
    result
}

async fn fetch_and_store(ctx: &JobContext, request: ArchivedRequest) -> SnapshotResult {
    let cancelled = |url: &str| {
        SnapshotResult::Failed(MirrorError::new(FailureKind::Cancelled, url, "session stopped"))
    };

    let permit = tokio::select! {
        _ = ctx.cancel.cancelled() => return cancelled(&request.archived_url),
        permit = ctx.gate.acquire() => permit,
    };
    let fetched = tokio::select! {
        _ = ctx.cancel.cancelled() => return cancelled(&request.archived_url),
        fetched = ctx.fetcher.fetch(&request) => fetched,
    };

    let output = match fetched {
        Ok(output) => output,
        Err(error) => {
            permit.finish(RequestOutcome::Failed);
            return SnapshotResult::Failed(error);
        }
    };

    let status = output.response.status;
    let outcome = if output.rate_limited {
        RequestOutcome::RateLimited
    } else if (200..400).contains(&status) {
        RequestOutcome::Success
    } else {
        RequestOutcome::Failed
    };
    let adjustment = permit.finish(outcome);
    if adjustment.changed() {
        engine_debug!("Concurrency limit {} -> {}", adjustment.previous, adjustment.current);
        ctx.sink.emit(EngineEvent::ThrottleAdjusted {
            previous: adjustment.previous,
            current: adjustment.current,
        });
    }

    let response = ctx.rewriter.after_response(output.response);
    if !response.is_success() {
        let kind = if crate::fetch::is_rate_limit(status) {
            FailureKind::RateLimited
        } else {
            FailureKind::HttpStatus(status)
        };
        return SnapshotResult::Failed(MirrorError::new(
            kind,
            response.archived_url,
            format!("archive answered {status} for {}", response.original_url),
        ));
    }

    let path = match ctx.writer.write(&response) {
        Ok(path) => path,
        Err(err) => {
            return SnapshotResult::Failed(MirrorError::new(
                FailureKind::Persist,
                response.original_url.as_str(),
                err.to_string(),
            ))
        }
    };
    let bytes = response.body.len() as u64;
    engine_debug!("Saved {} ({bytes} bytes)", path.display());
    ctx.sink.emit(EngineEvent::SnapshotSaved {
        job_id: response.job_id,
        original_url: response.original_url.to_string(),
        timestamp: response.timestamp,
        path,
        bytes,
    });

    let links = if is_html(response.content_type.as_deref(), &response.body) {
        let page = decode_page(&response.body, response.content_type.as_deref());
        extract_links(&page.text, &response.original_url)
            .into_iter()
            .filter(|link| ctx.links.url_allowed(link))
            .collect()
    } else {
        Vec::new()
    };
    SnapshotResult::Saved { bytes, links }
}
