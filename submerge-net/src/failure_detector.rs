use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use submerge_base::NodeId;

/// Records per-node success/exception events and latency. The core only
/// ever calls `record_success`/`record_exception`; the liveness query is
/// consumed by the (out-of-scope) routing strategy upstream, so the
/// policy here is a deliberately minimal placeholder rather than a tuned
/// availability algorithm.
pub struct FailureDetector {
    availability_window: Duration,
    stats: Mutex<HashMap<NodeId, NodeStats>>,
}

#[derive(Clone, Debug, Default)]
struct NodeStats {
    successes: u64,
    failures: u64,
    last_event_was_success: bool,
    last_exception_at: Option<Instant>,
}

impl FailureDetector {
    pub fn new(availability_window: Duration) -> Self {
        FailureDetector {
            availability_window,
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_success(&self, node: NodeId, request_time_ms: u64) {
        let mut stats = self.lock();
        let entry = stats.entry(node).or_default();
        entry.successes += 1;
        entry.last_event_was_success = true;
        tracing::debug!(node = node.0, request_time_ms, "recorded store success");
    }

    pub fn record_exception(&self, node: NodeId, request_time_ms: u64, error: &dyn std::error::Error) {
        let mut stats = self.lock();
        let entry = stats.entry(node).or_default();
        entry.failures += 1;
        entry.last_event_was_success = false;
        entry.last_exception_at = Some(Instant::now());
        tracing::warn!(node = node.0, request_time_ms, %error, "recorded store exception");
    }

    pub fn is_available(&self, node: NodeId) -> bool {
        match self.lock().get(&node) {
            None => true,
            Some(s) if s.last_event_was_success => true,
            Some(s) => match s.last_exception_at {
                Some(at) => at.elapsed() >= self.availability_window,
                None => true,
            },
        }
    }

    pub fn successes(&self, node: NodeId) -> u64 {
        self.lock().get(&node).map(|s| s.successes).unwrap_or(0)
    }

    pub fn failures(&self, node: NodeId) -> u64 {
        self.lock().get(&node).map(|s| s.failures).unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, NodeStats>> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}
