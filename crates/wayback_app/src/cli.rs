use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use wayback_core::RawOptions;

/// Mirrors the archived history of a website to a local directory.
#[derive(Parser, Debug)]
#[command(name = "wayback-mirror", version, about)]
pub struct Cli {
    /// Domains or URLs to mirror (e.g. `example.com` or `https://example.com/docs`)
    #[arg(value_name = "DOMAIN", required = true)]
    pub domains: Vec<String>,

    /// Directory the snapshots are written to
    #[arg(short, long, default_value = "website")]
    pub output: PathBuf,

    /// Earliest capture to fetch (YYYYMMDD[hhmmss], ISO 8601 or epoch seconds)
    #[arg(short, long, default_value = "10000101")]
    pub from: String,

    /// Latest capture to fetch. Equal to `--from`, it selects the single
    /// capture nearest to that instant.
    #[arg(short, long, default_value = "30000101")]
    pub to: String,

    /// Only fetch URLs matching this regular expression
    #[arg(short, long, value_name = "REGEX")]
    pub allow: Option<String>,

    /// Skip URLs matching this regular expression (wins over `--allow`)
    #[arg(short, long, value_name = "REGEX")]
    pub deny: Option<String>,

    /// Target number of concurrent requests; values below 1 space requests out
    #[arg(short, long, default_value_t = 10.0)]
    pub concurrency: f64,

    /// Name snapshot files by Unix epoch seconds instead of 14-digit timestamps
    #[arg(short, long)]
    pub unix: bool,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,

    /// Seconds to wait for one index query
    #[arg(long, value_name = "SECS")]
    pub index_timeout: Option<u64>,

    /// Seconds to wait for one archived capture
    #[arg(long, value_name = "SECS")]
    pub fetch_timeout: Option<u64>,

    /// Stop the whole session after this many seconds
    #[arg(long, value_name = "SECS")]
    pub crawl_timeout: Option<u64>,

    /// Also write the log to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn into_options(self) -> RawOptions {
        RawOptions {
            seeds: self.domains,
            output_dir: self.output,
            from: Some(self.from),
            to: Some(self.to),
            allow: self.allow,
            deny: self.deny,
            concurrency: self.concurrency,
            unix_timestamps: self.unix,
            verbose: self.verbose,
            index_timeout: self.index_timeout.map(Duration::from_secs),
            fetch_timeout: self.fetch_timeout.map(Duration::from_secs),
            crawl_timeout: self.crawl_timeout.map(Duration::from_secs),
        }
    }
}
