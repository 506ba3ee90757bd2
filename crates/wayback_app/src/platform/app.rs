use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use engine_logging::{engine_debug, engine_error, engine_info};
use wayback_core::MirrorConfig;
use wayback_engine::{EngineEvent, MirrorEngine, ProgressSink, SessionSummary};

use crate::cli::Cli;
use crate::platform::logging;

const EXIT_INCOMPLETE: u8 = 1;
const EXIT_FATAL: u8 = 2;

pub fn run_app() -> ExitCode {
    let cli = Cli::parse();
    logging::initialize(cli.verbose, cli.log_file.as_deref());

    let config = match MirrorConfig::from_options(cli.into_options()) {
        Ok(config) => config,
        Err(err) => {
            engine_error!("Invalid configuration: {err}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match run_session(config) {
        Ok(summary) if summary.is_clean() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(EXIT_INCOMPLETE),
        Err(err) => {
            engine_error!("{err:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn run_session(config: MirrorConfig) -> Result<SessionSummary> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(async move {
        let output_dir = config.output_dir.clone();
        let engine = MirrorEngine::new(config).context("failed to set up the archive client")?;

        let finish = engine.finish_token();
        let cancel = engine.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            engine_info!("Interrupted; finishing queued pages (press Ctrl-C again to abort)");
            finish.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                engine_info!("Aborting in-flight requests");
                cancel.cancel();
            }
        });

        let progress = Arc::new(ProgressLog::default());
        let summary = engine
            .run(progress.clone())
            .await
            .with_context(|| format!("cannot mirror into {}", output_dir.display()))?;

        engine_info!(
            "Saved {} snapshot(s) into {}",
            progress.saved(),
            output_dir.display()
        );
        Ok(summary)
    })
}

/// Reports session progress through the logger.
#[derive(Debug, Default)]
struct ProgressLog {
    saved: AtomicUsize,
}

impl ProgressLog {
    fn saved(&self) -> usize {
        self.saved.load(Ordering::Relaxed)
    }
}

impl ProgressSink for ProgressLog {
    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::SnapshotSaved {
                original_url,
                timestamp,
                bytes,
                ..
            } => {
                self.saved.fetch_add(1, Ordering::Relaxed);
                engine_info!("Saved {original_url} @ {timestamp} ({bytes} bytes)");
            }
            EngineEvent::ThrottleAdjusted { previous, current } => {
                engine_debug!("Concurrency limit {previous} -> {current}");
            }
            EngineEvent::JobCompleted { job_id, result } => {
                engine_debug!("Job {job_id} finished: {result:?}");
            }
            // Failures are already logged by the engine with URL and cause.
            EngineEvent::SnapshotFailed { .. } | EngineEvent::UrlDropped { .. } => {}
        }
    }
}
