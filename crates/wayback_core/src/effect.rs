#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    EnqueueUrl {
        job_id: crate::JobId,
        url: String,
        depth: usize,
    },
    StartSession,
    StopFinish { policy: StopPolicy },
    /// Every enqueued job has reported back.
    SessionFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPolicy {
    /// Let in-flight jobs complete, enqueue nothing new.
    Finish,
    /// Cancel in-flight jobs.
    Immediate,
}
