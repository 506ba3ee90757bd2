use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::{FilterConfig, ThrottleSettings, TimeRange, Timestamp, TimestampError, TimestampFormat};

pub const DEFAULT_CDX_URL: &str = "https://web.archive.org/cdx/search/cdx";
pub const DEFAULT_SNAPSHOT_BASE: &str = "https://web.archive.org/web/";

/// Problems that stop a session before any request is sent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid `{field}` timestamp: {source}")]
    Timestamp {
        field: &'static str,
        #[source]
        source: TimestampError,
    },
    #[error("time range starts at {from} but ends earlier at {to}")]
    InvertedRange { from: Timestamp, to: Timestamp },
    #[error("invalid `{field}` pattern: {source}")]
    Pattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("invalid seed {seed:?}: {reason}")]
    InvalidSeed { seed: String, reason: String },
    #[error("at least one domain or URL is required")]
    NoSeeds,
    #[error("target concurrency must be a positive number, got {0}")]
    Concurrency(f64),
}

/// Where the archive's index and captures live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEndpoints {
    pub cdx_url: String,
    pub snapshot_base: String,
}

impl Default for ArchiveEndpoints {
    fn default() -> Self {
        Self {
            cdx_url: DEFAULT_CDX_URL.to_string(),
            snapshot_base: DEFAULT_SNAPSHOT_BASE.to_string(),
        }
    }
}

/// Exponential backoff for transient archive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`.
    pub fn delay_before(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Raw values as collected by a front end, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawOptions {
    pub seeds: Vec<String>,
    pub output_dir: PathBuf,
    pub from: Option<String>,
    pub to: Option<String>,
    pub allow: Option<String>,
    pub deny: Option<String>,
    pub concurrency: f64,
    pub unix_timestamps: bool,
    pub verbose: bool,
    pub index_timeout: Option<Duration>,
    pub fetch_timeout: Option<Duration>,
    pub crawl_timeout: Option<Duration>,
}

/// Everything a mirroring session needs, validated up front and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub seeds: Vec<Url>,
    pub output_dir: PathBuf,
    pub filter: FilterConfig,
    pub target_concurrency: f64,
    pub timestamp_format: TimestampFormat,
    pub verbose: bool,
    pub archive: ArchiveEndpoints,
    pub index_timeout: Duration,
    pub fetch_timeout: Duration,
    /// Upper bound for the whole session; `None` runs until the frontier drains.
    pub crawl_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub redirect_limit: usize,
    pub index_page_size: usize,
    /// Safety limit on index pagination per query.
    pub index_max_pages: usize,
    pub max_bytes: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            output_dir: PathBuf::from("website"),
            filter: FilterConfig::default(),
            target_concurrency: 10.0,
            timestamp_format: TimestampFormat::Compact,
            verbose: false,
            archive: ArchiveEndpoints::default(),
            index_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(60),
            crawl_timeout: None,
            retry: RetryPolicy::default(),
            redirect_limit: 5,
            index_page_size: 5_000,
            index_max_pages: 50,
            max_bytes: 50 * 1024 * 1024,
        }
    }
}

impl MirrorConfig {
    pub fn from_options(options: RawOptions) -> Result<Self, ConfigError> {
        if options.seeds.is_empty() {
            return Err(ConfigError::NoSeeds);
        }
        if !options.concurrency.is_finite() || options.concurrency <= 0.0 {
            return Err(ConfigError::Concurrency(options.concurrency));
        }

        let seeds = options
            .seeds
            .iter()
            .map(|seed| seed_url(seed))
            .collect::<Result<Vec<_>, _>>()?;
        let range = TimeRange::parse(options.from.as_deref(), options.to.as_deref())?;
        let filter = FilterConfig::from_patterns(options.allow.as_deref(), options.deny.as_deref(), range)?;

        let defaults = Self::default();
        Ok(Self {
            seeds,
            output_dir: options.output_dir,
            filter,
            target_concurrency: options.concurrency,
            timestamp_format: if options.unix_timestamps {
                TimestampFormat::Unix
            } else {
                TimestampFormat::Compact
            },
            verbose: options.verbose,
            index_timeout: options.index_timeout.unwrap_or(defaults.index_timeout),
            fetch_timeout: options.fetch_timeout.unwrap_or(defaults.fetch_timeout),
            crawl_timeout: options.crawl_timeout,
            ..defaults
        })
    }

    pub fn throttle_settings(&self) -> ThrottleSettings {
        ThrottleSettings {
            target_concurrency: self.target_concurrency,
            ..ThrottleSettings::default()
        }
    }
}

/// Turns `example.com` or `https://example.com/start` into a crawlable URL.
/// Bare domains get the `http` scheme.
pub fn seed_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let url = Url::parse(&candidate).map_err(|err| ConfigError::InvalidSeed {
        seed: raw.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(ConfigError::InvalidSeed {
            seed: raw.to_string(),
            reason: "expected an http(s) URL with a host".to_string(),
        }),
    }
}
