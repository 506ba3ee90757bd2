use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use wayback_core::{RequestOutcome, ThrottleAdjustment, ThrottleController};

/// Admits requests while the controller's in-flight limit allows it.
pub struct ThrottleGate {
    controller: Arc<ThrottleController>,
    released: Notify,
    last_start: Mutex<Option<Instant>>,
}

impl ThrottleGate {
    pub fn new(controller: Arc<ThrottleController>) -> Self {
        Self {
            controller,
            released: Notify::new(),
            last_start: Mutex::new(None),
        }
    }

    pub fn controller(&self) -> &ThrottleController {
        &self.controller
    }

    /// Waits for a free slot, then for the pacing interval when the target
    /// asks for less than one request at a time.
    pub async fn acquire(self: &Arc<Self>) -> ThrottlePermit {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if self.controller.try_start() {
                break;
            }
            released.await;
        }

        let mut permit = ThrottlePermit {
            gate: Arc::clone(self),
            started: Instant::now(),
            finished: false,
        };
        self.pace().await;
        permit.started = Instant::now();
        permit
    }

    async fn pace(&self) {
        let interval = self.controller.dispatch_interval();
        let mut last_start = self.last_start.lock().await;
        if let Some(previous) = *last_start {
            if !interval.is_zero() {
                tokio::time::sleep_until(previous + interval).await;
            }
        }
        *last_start = Some(Instant::now());
    }

    fn release(&self) {
        self.released.notify_waiters();
    }
}

/// One admitted request. Dropping it unfinished releases the slot
/// without touching the latency window.
pub struct ThrottlePermit {
    gate: Arc<ThrottleGate>,
    started: Instant,
    finished: bool,
}

impl ThrottlePermit {
    pub fn finish(mut self, outcome: RequestOutcome) -> ThrottleAdjustment {
        self.finished = true;
        let adjustment = self
            .gate
            .controller
            .on_request_complete(self.started.elapsed(), outcome);
        self.gate.release();
        adjustment
    }
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        if !self.finished {
            self.gate.controller.on_request_cancelled();
            self.gate.release();
        }
    }
}
