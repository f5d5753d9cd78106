//! Keeps a daemon's poll loop alive.
//!
//! The [`Supervisor`] runs the loop as a worker task. An unexpected exit
//! (error, panic, or return without shutdown) is restarted after a backoff
//! delay until [`RestartPolicy`] gives up. On shutdown the worker's token is
//! cancelled and an in-progress cycle gets `shutdown_timeout` to finish
//! before the worker is aborted.

pub mod poll;
pub mod restart;
pub mod signal;

pub use poll::{run_poll_loop, PollCycle};
pub use restart::{RestartDecision, RestartPolicy, RestartTracker};
pub use signal::shutdown_on_signal;

use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};

pub struct Supervisor<F> {
    name: &'static str,
    factory: F,
    interval: Duration,
    shutdown_timeout: Duration,
    tracker: RestartTracker,
}

impl<C, F> Supervisor<F>
where
    C: PollCycle,
    F: FnMut() -> C,
{
    /// `factory` builds a fresh cycle for every (re)start.
    pub fn new(
        name: &'static str,
        factory: F,
        interval: Duration,
        policy: RestartPolicy,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            name,
            factory,
            interval,
            shutdown_timeout,
            tracker: RestartTracker::new(policy),
        }
    }

    /// Run until `shutdown` fires or the restart limit is reached.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RestartLimitReached`] when the worker keeps
    /// failing within the restart window.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(daemon = self.name, "Supervisor started");

        loop {
            let worker_token = shutdown.child_token();
            let cycle = (self.factory)();
            let mut handle = tokio::spawn(run_poll_loop(
                cycle,
                self.interval,
                worker_token.clone(),
            ));

            let exit = tokio::select! {
                joined = &mut handle => joined,
                _ = shutdown.cancelled() => {
                    self.drain(handle).await;
                    return Ok(());
                }
            };

            if shutdown.is_cancelled() {
                tracing::info!(daemon = self.name, "Worker stopped");
                return Ok(());
            }
            log_unexpected_exit(self.name, exit);

            match self.tracker.record_exit(Instant::now()) {
                RestartDecision::GiveUp => {
                    let policy = self.tracker.policy();
                    tracing::error!(
                        daemon = self.name,
                        max_restarts = policy.max_restarts,
                        window = ?policy.window,
                        "Maximum restarts reached, shutting down"
                    );
                    return Err(PipelineError::RestartLimitReached {
                        restarts: policy.max_restarts,
                        window: policy.window,
                    });
                }
                RestartDecision::Restart { delay, attempt } => {
                    tracing::warn!(
                        daemon = self.name,
                        attempt,
                        delay = ?delay,
                        "Restarting worker after backoff"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.cancelled() => return Ok(()),
                    }
                }
            }
        }
    }

    async fn drain(&self, mut handle: JoinHandle<Result<()>>) {
        tracing::info!(
            daemon = self.name,
            timeout = ?self.shutdown_timeout,
            "Shutdown requested, waiting for worker"
        );
        match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => tracing::info!(daemon = self.name, "Worker stopped"),
            Ok(Ok(Err(e))) => {
                tracing::warn!(daemon = self.name, error = %e, "Worker failed during shutdown")
            }
            Ok(Err(e)) => {
                tracing::warn!(daemon = self.name, error = %e, "Worker panicked during shutdown")
            }
            Err(_) => {
                tracing::warn!(daemon = self.name, "Worker did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

fn log_unexpected_exit(name: &'static str, exit: std::result::Result<Result<()>, JoinError>) {
    match exit {
        Ok(Ok(())) => tracing::warn!(daemon = name, "Worker exited without shutdown request"),
        Ok(Err(e)) => tracing::error!(daemon = name, error = %e, "Worker failed"),
        Err(e) => tracing::error!(daemon = name, error = %e, "Worker panicked"),
    }
}
