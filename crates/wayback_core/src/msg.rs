#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Starting points of the crawl; their hosts bound link following.
    SeedsSubmitted(Vec<String>),
    /// Links found in a stored page, already passed through the URL filter.
    LinksDiscovered {
        job_id: crate::JobId,
        links: Vec<String>,
    },
    /// A job has been fully handled by the engine.
    JobDone {
        job_id: crate::JobId,
        result: crate::JobResultKind,
    },
    /// Caller asked to stop the session.
    StopRequested { policy: crate::StopPolicy },
}
