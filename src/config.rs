//! Executor tuning knobs, `Default`-able and environment-overridable in the
//! same style the ecosystem's provider crates configure themselves.

use std::time::Duration;

fn env_duration_ms(var: &str, default_ms: u64) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_ms))
}

fn env_usize(var: &str, default: usize) -> usize {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

/// Tuning knobs for the event executor and provider-displacement shutdown.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Global time budget for one event's handler fan-out (§5).
    pub dispatch_timeout: Duration,
    /// Budget given to a displaced provider's listener task to consume its
    /// shutdown signal before the registry gives up on it.
    pub listener_shutdown_budget: Duration,
    /// Budget given to the dispatcher to drain its queue on `shutdown()`.
    pub dispatcher_drain_budget: Duration,
    /// Capacity of the bounded channel each provider listener enqueues
    /// events onto.
    pub event_queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout: env_duration_ms("OPENFEATURE_EVENT_DISPATCH_TIMEOUT_MS", 500),
            listener_shutdown_budget: env_duration_ms("OPENFEATURE_LISTENER_SHUTDOWN_BUDGET_MS", 200),
            dispatcher_drain_budget: env_duration_ms("OPENFEATURE_DISPATCHER_DRAIN_BUDGET_MS", 200),
            event_queue_capacity: env_usize("OPENFEATURE_EVENT_QUEUE_CAPACITY", 1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_nominal_values() {
        // SAFETY: tests run single-threaded enough for this var not to be
        // raced by other tests reading the same key.
        unsafe {
            std::env::remove_var("OPENFEATURE_EVENT_DISPATCH_TIMEOUT_MS");
        }
        let cfg = ExecutorConfig::default();
        assert_eq!(cfg.dispatch_timeout, Duration::from_millis(500));
        assert_eq!(cfg.listener_shutdown_budget, Duration::from_millis(200));
        assert_eq!(cfg.event_queue_capacity, 1000);
    }
}
