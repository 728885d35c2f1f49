use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Answered with a parsed result
    Success,
    /// Answered with the empty fallback payload
    Fallback,
    /// Rejected with 400
    Rejected,
    /// The client went away before an answer was written
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub fallback_requests: u64,
    pub rejected_requests: u64,
    pub cancelled_requests: u64,
    pub active_requests: usize,
    pub average_response_time_ms: f64,
    #[serde(skip)]
    total_response_time_ms: u64,
}

/// Request counters shared by all handlers
#[derive(Debug)]
pub struct RequestTracker {
    start_time: Instant,
    stats: RwLock<RequestStats>,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            stats: RwLock::new(RequestStats::default()),
        }
    }

    /// Count a new request. Dropping the guard without
    /// [`RequestGuard::finish`] records it as cancelled.
    pub fn start_request(self: &Arc<Self>) -> RequestGuard {
        {
            let mut stats = self.stats.write();
            stats.total_requests += 1;
            stats.active_requests += 1;
        }
        RequestGuard {
            tracker: Arc::clone(self),
            started: Instant::now(),
            finished: false,
        }
    }

    fn complete_request(&self, started: Instant, outcome: Outcome) {
        let mut stats = self.stats.write();
        stats.active_requests = stats.active_requests.saturating_sub(1);

        match outcome {
            Outcome::Success => stats.successful_requests += 1,
            Outcome::Fallback => stats.fallback_requests += 1,
            Outcome::Rejected => stats.rejected_requests += 1,
            Outcome::Cancelled => stats.cancelled_requests += 1,
        }

        stats.total_response_time_ms += started.elapsed().as_millis() as u64;
        let completed = stats.successful_requests
            + stats.fallback_requests
            + stats.rejected_requests
            + stats.cancelled_requests;
        stats.average_response_time_ms =
            stats.total_response_time_ms as f64 / completed as f64;
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn active_requests(&self) -> usize {
        self.stats.read().active_requests
    }

    pub fn get_stats(&self) -> RequestStats {
        self.stats.read().clone()
    }
}

/// One in-flight request; completes exactly once
#[derive(Debug)]
pub struct RequestGuard {
    tracker: Arc<RequestTracker>,
    started: Instant,
    finished: bool,
}

impl RequestGuard {
    pub fn finish(mut self, outcome: Outcome) {
        self.finished = true;
        self.tracker.complete_request(self.started, outcome);
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker.complete_request(self.started, Outcome::Cancelled);
        }
    }
}
