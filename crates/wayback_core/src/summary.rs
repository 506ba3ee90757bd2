use crate::SessionState;

/// Per-URL tallies of a crawl, as reported at session end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CrawlSummary {
    pub session: SessionState,
    pub jobs_total: usize,
    pub succeeded: usize,
    pub dropped: usize,
    pub failed: usize,
    pub pending: usize,
}

impl CrawlSummary {
    pub fn is_clean(&self) -> bool {
        self.dropped == 0 && self.failed == 0 && self.pending == 0
    }
}
