use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::config::WatchdogConfig;
use crate::error::Result;
use crate::job::{Job, JobState, RenameOutcome};
use crate::scanner::SharedDir;
use crate::supervisor::PollCycle;

use super::candidate::{prepare, select_next, Prepared};
use super::launcher::{InferenceLauncher, LaunchOutcome};

/// What one scheduler cycle did.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// A job is already active; nothing was dispatched.
    Busy,
    /// No valid ready job.
    Idle,
    /// The job was activated and the executable launched (or logged in dry run).
    Launched(PathBuf),
    /// Another process claimed the job first.
    Claimed,
    /// Activation or launch failed; the job was moved to error.
    Failed(PathBuf),
}

/// Scheduler daemon: activates at most one ready job at a time.
pub struct Watchdog {
    shared: SharedDir,
    launcher: InferenceLauncher,
}

impl Watchdog {
    pub fn new(shared: SharedDir, launcher: InferenceLauncher) -> Self {
        Self { shared, launcher }
    }

    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self::new(
            SharedDir::new(&config.daemon.scan_directory, config.daemon.layout()),
            InferenceLauncher::from_config(config),
        )
    }

    /// Run one scheduling decision.
    pub fn dispatch_next(&mut self) -> Result<Dispatch> {
        let mut snapshot = self.shared.scan()?;
        tracing::debug!(jobs = snapshot.len(), states = ?snapshot.counts(), "Scanned shared directory");

        if snapshot.has_active() {
            tracing::debug!("A job is active, waiting");
            return Ok(Dispatch::Busy);
        }

        let mut candidates = Vec::new();
        for job in snapshot.take(JobState::Ready) {
            match prepare(job) {
                Prepared::Candidate(candidate) => candidates.push(candidate),
                Prepared::Invalid(mut job) => {
                    job.demote_to_error();
                }
                Prepared::Gone => {}
            }
        }

        let Some(winner) = select_next(candidates) else {
            return Ok(Dispatch::Idle);
        };
        tracing::info!(
            job = %winner.job.path().display(),
            priority = winner.priority,
            "Selected next job"
        );
        Ok(self.activate(winner.job))
    }

    fn activate(&self, mut job: Job) -> Dispatch {
        match job.transition(JobState::Active) {
            RenameOutcome::Renamed => {}
            RenameOutcome::Vanished => {
                tracing::debug!(job = %job.path().display(), "Job claimed elsewhere");
                return Dispatch::Claimed;
            }
            RenameOutcome::Failed(e) => {
                tracing::error!(job = %job.path().display(), error = %e, "Could not activate job");
                job.set_error(format!("E2_01 Could not rename folder to active: {}", e));
                job.demote_to_error();
                return Dispatch::Failed(job.path().to_path_buf());
            }
        }

        match self.launcher.launch(job.path()) {
            Ok(LaunchOutcome::Spawned { .. }) | Ok(LaunchOutcome::DryRun) => {
                Dispatch::Launched(job.path().to_path_buf())
            }
            Err(e) => {
                tracing::error!(job = %job.path().display(), error = %e, "Could not launch inference");
                job.set_error(format!("E2_03 Could not launch inference: {}", e));
                job.demote_to_error();
                Dispatch::Failed(job.path().to_path_buf())
            }
        }
    }
}

impl PollCycle for Watchdog {
    fn name(&self) -> &'static str {
        "watchdog"
    }

    fn run_cycle(&mut self, _cancel: &CancellationToken) -> Result<()> {
        self.dispatch_next().map(|_| ())
    }
}
