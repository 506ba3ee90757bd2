use std::collections::{BTreeMap, BTreeSet, HashSet};

use url::Url;

use crate::summary::CrawlSummary;

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    /// Stop requested; waiting for in-flight jobs.
    Finishing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResultKind {
    /// At least one snapshot of the URL was stored.
    Succeeded,
    /// The URL was skipped: no eligible snapshot, already handled, or filtered.
    Dropped,
    /// Every dispatched snapshot failed.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub url: String,
    pub depth: usize,
    pub outcome: Option<JobResultKind>,
}

/// Crawl frontier: which logical URLs exist, which are allowed, which are done.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CrawlState {
    session: SessionState,
    allowed_hosts: BTreeSet<String>,
    seen: HashSet<String>,
    jobs: BTreeMap<JobId, JobRecord>,
    next_job_id: JobId,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> SessionState {
        self.session
    }

    pub fn job(&self, job_id: JobId) -> Option<&JobRecord> {
        self.jobs.get(&job_id)
    }

    pub fn pending(&self) -> usize {
        self.jobs.values().filter(|job| job.outcome.is_none()).count()
    }

    pub fn summary(&self) -> CrawlSummary {
        let mut summary = CrawlSummary {
            session: self.session,
            jobs_total: self.jobs.len(),
            ..CrawlSummary::default()
        };
        for job in self.jobs.values() {
            match job.outcome {
                Some(JobResultKind::Succeeded) => summary.succeeded += 1,
                Some(JobResultKind::Dropped) => summary.dropped += 1,
                Some(JobResultKind::Failed) => summary.failed += 1,
                None => summary.pending += 1,
            }
        }
        summary
    }

    pub(crate) fn start_session(&mut self) {
        self.session = SessionState::Running;
    }

    pub(crate) fn finish_session(&mut self) {
        self.session = SessionState::Finishing;
    }

    pub(crate) fn mark_finished(&mut self) {
        self.session = SessionState::Finished;
    }

    pub(crate) fn allow_host(&mut self, host: &str) {
        let host = host.trim_start_matches("www.").to_ascii_lowercase();
        self.allowed_hosts.insert(host);
    }

    /// A host is allowed when it is a seed host or one of its subdomains.
    pub fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.allowed_hosts.iter().any(|allowed| {
            host == *allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Registers a URL as a new job unless its normalized form was seen before.
    pub(crate) fn enqueue(&mut self, url: &Url, depth: usize) -> Option<(JobId, String)> {
        let key = normalize_url_for_dedupe(url);
        if !self.seen.insert(key) {
            return None;
        }
        self.next_job_id += 1;
        let job_id = self.next_job_id;
        let url = url.to_string();
        self.jobs.insert(
            job_id,
            JobRecord {
                url: url.clone(),
                depth,
                outcome: None,
            },
        );
        Some((job_id, url))
    }

    pub(crate) fn apply_done(&mut self, job_id: JobId, result: JobResultKind) -> bool {
        match self.jobs.get_mut(&job_id) {
            Some(job) if job.outcome.is_none() => {
                job.outcome = Some(result);
                true
            }
            _ => false,
        }
    }
}

/// Dedupe key for logical URLs: no fragment, no trailing slash on non-root
/// paths, default ports dropped, host lowercased.
pub fn normalize_url_for_dedupe(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(path.trim_end_matches('/'));
    }
    normalized.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_key_ignores_fragment_and_trailing_slash() {
        let a = Url::parse("http://Example.com/docs/#intro").unwrap();
        let b = Url::parse("http://example.com:80/docs").unwrap();
        assert_eq!(normalize_url_for_dedupe(&a), normalize_url_for_dedupe(&b));
    }

    #[test]
    fn subdomains_of_seed_hosts_are_allowed() {
        let mut state = CrawlState::new();
        state.allow_host("www.example.com");
        assert!(state.host_allowed("example.com"));
        assert!(state.host_allowed("static.example.com"));
        assert!(!state.host_allowed("badexample.com"));
    }
}
