use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SupervisorConfig;

/// Source of "now" for the restart policy.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Exponential restart delay, doubling up to a cap. Never reset.
#[derive(Debug, Clone)]
pub struct BackoffState {
    current: Duration,
    max: Duration,
}

impl BackoffState {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return the delay to wait now and double the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

/// Timestamps of restarts inside a sliding window.
#[derive(Debug, Clone)]
pub struct RestartHistory {
    window: Duration,
    records: VecDeque<Instant>,
}

impl RestartHistory {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            records: VecDeque::new(),
        }
    }

    /// Drop records that are at least one window old.
    pub fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.records.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.records.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record(&mut self, at: Instant) {
        self.records.push_back(at);
    }

    pub fn recent(&self) -> usize {
        self.records.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Restart after `delay`. `attempt` counts restarts in the current window.
    Restart { delay: Duration, attempt: usize },
    /// The window already holds `recent` restarts; stop for good.
    GiveUp { recent: usize },
}

/// Decides what happens after each crash.
pub struct RestartPolicy {
    clock: Arc<dyn Clock>,
    backoff: BackoffState,
    history: RestartHistory,
    max_restarts: usize,
}

impl RestartPolicy {
    pub fn new(config: &SupervisorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            backoff: BackoffState::new(config.initial_delay(), config.max_delay()),
            history: RestartHistory::new(config.window()),
            max_restarts: config.max_restarts,
        }
    }

    pub fn on_crash(&mut self) -> RestartDecision {
        let now = self.clock.now();
        self.history.prune(now);

        let recent = self.history.recent();
        if recent >= self.max_restarts {
            return RestartDecision::GiveUp { recent };
        }

        self.history.record(now);
        RestartDecision::Restart {
            delay: self.backoff.next_delay(),
            attempt: self.history.recent(),
        }
    }
}

impl std::fmt::Debug for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestartPolicy")
            .field("backoff", &self.backoff)
            .field("history", &self.history)
            .field("max_restarts", &self.max_restarts)
            .finish()
    }
}
