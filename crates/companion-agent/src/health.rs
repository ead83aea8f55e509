//! Activity and error counters, shared across the runtime via `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct HealthCounters {
    started_at: Instant,
    messages: AtomicU64,
    errors: AtomicU64,
    tool_calls: AtomicU64,
    agent_runs: AtomicU64,
}

impl HealthCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            messages: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            tool_calls: AtomicU64::new(0),
            agent_runs: AtomicU64::new(0),
        }
    }

    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_call(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_agent_run(&self) {
        self.agent_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            messages: self.messages.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            agent_runs: self.agent_runs.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub uptime_secs: u64,
    pub messages: u64,
    pub errors: u64,
    pub tool_calls: u64,
    pub agent_runs: u64,
}
