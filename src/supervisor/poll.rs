use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};

/// One unit of daemon work, run once per poll interval.
///
/// Cycles are synchronous and run on the blocking pool. Long cycles should
/// check `cancel` between jobs; an in-flight transfer is never interrupted.
pub trait PollCycle: Send + 'static {
    fn name(&self) -> &'static str;

    fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<()>;
}

/// Run `cycle` every `interval` until `cancel` fires.
///
/// Returns `Ok(())` only on cancellation. A cycle error or panic ends the
/// loop and is reported to the supervisor.
pub async fn run_poll_loop<C: PollCycle>(
    mut cycle: C,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let name = cycle.name();
    tracing::info!(worker = name, interval = ?interval, "Poll loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let token = cancel.clone();
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let result = cycle.run_cycle(&token);
            (cycle, result)
        })
        .await
        .map_err(|e| PipelineError::Worker(format!("{} poll cycle panicked: {}", name, e)))?;
        cycle = returned;
        result?;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!(worker = name, "Poll loop stopped");
    Ok(())
}
