//! Adaptive concurrency limit for requests sent to the archive.
//!
//! An additive-increase/multiplicative-decrease controller: fast responses
//! grow the in-flight limit one step at a time up to the target, slow
//! responses and rate-limit signals cut it. The controller only keeps
//! bookkeeping; callers gate their own dispatch on [`ThrottleController::max_in_flight`].

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleSettings {
    /// Desired number of concurrent requests. Values below 1 ask for
    /// spacing between requests rather than parallelism.
    pub target_concurrency: f64,
    pub initial_limit: usize,
    /// Number of recent latencies averaged for each decision.
    pub window_size: usize,
    /// Average latency below which the limit may grow.
    pub fast_latency: Duration,
    /// Average latency above which the limit shrinks.
    pub slow_latency: Duration,
    pub additive_step: usize,
    /// Multiplier applied on decrease, in `(0, 1)`.
    pub decrease_factor: f64,
    /// Hard ceiling is `ceil(target_concurrency) * safety_factor`.
    pub safety_factor: usize,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            target_concurrency: 10.0,
            initial_limit: 1,
            window_size: 20,
            fast_latency: Duration::from_secs(2),
            slow_latency: Duration::from_secs(8),
            additive_step: 1,
            decrease_factor: 0.5,
            safety_factor: 2,
        }
    }
}

/// How a dispatched request ended, as far as the throttle cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Failed,
    /// The archive answered 429/503 or otherwise signalled overload.
    RateLimited,
}

/// A change of the in-flight limit caused by one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleAdjustment {
    pub previous: usize,
    pub current: usize,
}

impl ThrottleAdjustment {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Fixed-capacity window over the most recent latencies, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, seconds: f64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(seconds);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.samples.iter()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleState {
    pub target_concurrency: f64,
    pub current_limit: usize,
    pub in_flight: usize,
    pub recent_latencies: LatencyWindow,
    /// Completions observed since the last latency-driven change.
    completions_since_change: usize,
}

/// Shared by every in-flight request. Each call takes the lock only for
/// the bookkeeping update, never across IO.
#[derive(Debug)]
pub struct ThrottleController {
    settings: ThrottleSettings,
    state: Mutex<ThrottleState>,
}

impl ThrottleController {
    pub fn new(settings: ThrottleSettings) -> Self {
        let state = ThrottleState {
            target_concurrency: settings.target_concurrency,
            current_limit: settings.initial_limit.max(1),
            in_flight: 0,
            recent_latencies: LatencyWindow::new(settings.window_size),
            completions_since_change: 0,
        };
        Self { settings, state: Mutex::new(state) }
    }

    pub fn settings(&self) -> &ThrottleSettings {
        &self.settings
    }

    /// Records a dispatch unconditionally.
    pub fn on_request_start(&self) {
        self.lock().in_flight += 1;
    }

    /// Records a dispatch only if it keeps `in_flight` within the limit.
    pub fn try_start(&self) -> bool {
        let mut state = self.lock();
        if state.in_flight < self.clamped_limit(state.current_limit) {
            state.in_flight += 1;
            true
        } else {
            false
        }
    }

    /// Releases a slot whose request was abandoned before completing.
    pub fn on_request_cancelled(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    pub fn on_request_complete(&self, latency: Duration, outcome: RequestOutcome) -> ThrottleAdjustment {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.recent_latencies.push(latency.as_secs_f64());
        state.completions_since_change += 1;

        let previous = state.current_limit;
        let average = state.recent_latencies.average().unwrap_or_default();

        if outcome == RequestOutcome::RateLimited {
            state.current_limit = self.decreased(previous);
            state.completions_since_change = 0;
        } else if average > self.settings.slow_latency.as_secs_f64() {
            // At most one cut per `previous` completions.
            if state.completions_since_change >= previous {
                state.current_limit = self.decreased(previous);
                state.completions_since_change = 0;
            }
        } else if average < self.settings.fast_latency.as_secs_f64() {
            let grown = previous.saturating_add(self.settings.additive_step.max(1));
            state.current_limit = grown.min(self.growth_ceiling());
        }

        ThrottleAdjustment {
            previous,
            current: state.current_limit,
        }
    }

    /// The number of requests that may be in flight right now.
    pub fn max_in_flight(&self) -> usize {
        let state = self.lock();
        self.clamped_limit(state.current_limit)
    }

    /// Spacing between request starts. Only non-zero for targets below 1,
    /// where it stretches each request to `latency / target`.
    pub fn dispatch_interval(&self) -> Duration {
        let target = self.settings.target_concurrency;
        if target >= 1.0 || target <= 0.0 {
            return Duration::ZERO;
        }
        let state = self.lock();
        match state.recent_latencies.average() {
            Some(average) => Duration::try_from_secs_f64(average / target).unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }

    pub fn snapshot(&self) -> ThrottleState {
        self.lock().clone()
    }

    fn decreased(&self, current: usize) -> usize {
        let cut = (current as f64 * self.settings.decrease_factor).floor() as usize;
        cut.min(current.saturating_sub(1)).max(1)
    }

    fn growth_ceiling(&self) -> usize {
        (self.settings.target_concurrency.floor() as usize).max(1)
    }

    fn hard_ceiling(&self) -> usize {
        let target = self.settings.target_concurrency.ceil().max(1.0) as usize;
        target.saturating_mul(self.settings.safety_factor.max(1))
    }

    fn clamped_limit(&self, limit: usize) -> usize {
        limit.clamp(1, self.hard_ceiling())
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_drops_oldest_sample() {
        let mut window = LatencyWindow::new(3);
        for sample in [1.0, 2.0, 3.0, 4.0] {
            window.push(sample);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
        assert_eq!(window.average(), Some(3.0));
    }

    #[test]
    fn decrease_always_makes_progress_above_one() {
        let controller = ThrottleController::new(ThrottleSettings::default());
        assert_eq!(controller.decreased(10), 5);
        assert_eq!(controller.decreased(3), 1);
        assert_eq!(controller.decreased(2), 1);
        assert_eq!(controller.decreased(1), 1);
    }

    #[test]
    fn polite_targets_space_out_dispatch() {
        let controller = ThrottleController::new(ThrottleSettings {
            target_concurrency: 0.5,
            ..ThrottleSettings::default()
        });
        assert_eq!(controller.dispatch_interval(), Duration::ZERO);
        controller.on_request_start();
        controller.on_request_complete(Duration::from_millis(400), RequestOutcome::Success);
        assert_eq!(controller.dispatch_interval(), Duration::from_millis(800));
        assert_eq!(controller.max_in_flight(), 1);
    }
}
