//! Restart policy for the supervised worker.
//!
//! Restarts are counted in a rolling window. Once `max_restarts` restarts
//! fall inside the window the supervisor gives up.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Delay before the first restart; doubles per restart in the window.
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Upper bound on the restart delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: usize,
    pub window: Duration,
}

impl RestartPolicy {
    pub const fn new(max_restarts: usize, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
        }
    }

    /// Delay for the n-th restart in the window (1-based).
    pub fn backoff(&self, restarts_in_window: usize) -> Duration {
        let exponent = restarts_in_window.saturating_sub(1).min(16) as u32;
        INITIAL_BACKOFF
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(MAX_BACKOFF)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart { delay: Duration, attempt: usize },
    GiveUp,
}

/// Restart timestamps within the current window.
#[derive(Debug)]
pub struct RestartTracker {
    policy: RestartPolicy,
    history: VecDeque<Instant>,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            history: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> RestartPolicy {
        self.policy
    }

    /// Record an unexpected worker exit at `now` and decide what to do.
    pub fn record_exit(&mut self, now: Instant) -> RestartDecision {
        while let Some(&oldest) = self.history.front() {
            if now.saturating_duration_since(oldest) > self.policy.window {
                self.history.pop_front();
            } else {
                break;
            }
        }

        if self.history.len() >= self.policy.max_restarts {
            return RestartDecision::GiveUp;
        }

        self.history.push_back(now);
        let attempt = self.history.len();
        RestartDecision::Restart {
            delay: self.policy.backoff(attempt),
            attempt,
        }
    }
}
