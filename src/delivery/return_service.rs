use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;
use tokio_util::sync::CancellationToken;

use crate::config::ReturnServiceConfig;
use crate::error::Result;
use crate::job::{DestinationKeys, Job, JobState};
use crate::scanner::SharedDir;
use crate::supervisor::PollCycle;
use crate::transmit::{dataset, Destination, DicomStoreScu, Payload, StoreService, Transmitter};

use super::archive::archive_artifact;
use super::placeholder::ErrorStructBuilder;

const NO_OUTPUT_DIR: &str = "ERROR 4.01 No RTStruct generated from inference";
const NO_ARTIFACT: &str = "ERROR 4.01 No RTStruct found after inference";
const TOO_MANY_ARTIFACTS: &str = "ERROR 4.02 Too many RTStructs found after inference";

/// What happened to one job during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Delivered everywhere (or expired) and removed.
    Deleted,
    /// Renamed to `handled_error_` for manual review.
    Quarantined,
    /// Left untouched this cycle.
    Kept,
    /// Disappeared while being processed.
    Vanished,
}

/// Delivery daemon: ships finished results and error placeholders, then
/// cleans up.
pub struct ReturnService<S = DicomStoreScu> {
    shared: SharedDir,
    keys: DestinationKeys,
    transmitter: Transmitter<S>,
    placeholder: ErrorStructBuilder,
    archive: Option<PathBuf>,
    retention: Duration,
}

impl ReturnService<DicomStoreScu> {
    pub fn from_config(config: &ReturnServiceConfig) -> Self {
        Self::with_store(config, DicomStoreScu::new(config.ae_title.trim()))
    }
}

impl<S: StoreService> ReturnService<S> {
    pub fn with_store(config: &ReturnServiceConfig, store: S) -> Self {
        Self {
            shared: SharedDir::new(&config.daemon.scan_directory, config.daemon.layout()),
            keys: DestinationKeys::new(&config.return_dicom_key, &config.return_directory_key),
            transmitter: Transmitter::new(store),
            placeholder: ErrorStructBuilder::new(config.provenance.clone()),
            archive: config.archive().map(Path::to_path_buf),
            retention: config.retention(),
        }
    }

    pub fn store(&self) -> &S {
        self.transmitter.store()
    }

    /// Process every job of one scan, stopping early when `cancel` fires.
    pub fn process_all(&self, cancel: &CancellationToken) -> Result<Vec<(PathBuf, JobOutcome)>> {
        let snapshot = self.shared.scan()?;
        tracing::debug!(jobs = snapshot.len(), states = ?snapshot.counts(), "Scanned shared directory");

        let mut outcomes = Vec::new();
        for job in snapshot.jobs() {
            if cancel.is_cancelled() {
                tracing::info!("Shutdown requested, stopping after current job");
                break;
            }
            let path = job.path().to_path_buf();
            let outcome = self.process(job.clone());
            outcomes.push((path, outcome));
        }
        Ok(outcomes)
    }

    fn process(&self, job: Job) -> JobOutcome {
        match job.state() {
            JobState::Inferred => self.handle_inferred(job),
            JobState::Error => self.handle_error(job),
            JobState::Handled => self.collect_garbage(&job, SystemTime::now()),
            JobState::Ready | JobState::Active | JobState::Receiving | JobState::Unknown => {
                JobOutcome::Kept
            }
        }
    }

    /// Common load step: the job config must exist and name a destination.
    fn load_destinations(&self, job: &mut Job) -> std::result::Result<Vec<Destination>, JobOutcome> {
        if !job.exists() {
            return Err(JobOutcome::Vanished);
        }
        let config = match job.read_config() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(job = %job.path().display(), error = %e, "Could not read AI config file");
                return Err(quarantine(job));
            }
        };
        match config.destinations(&self.keys) {
            Ok(destinations) => Ok(destinations),
            Err(e) => {
                tracing::error!(job = %job.path().display(), error = %e, "Invalid return destinations");
                Err(quarantine(job))
            }
        }
    }

    fn handle_inferred(&self, mut job: Job) -> JobOutcome {
        tracing::info!(job = %job.path().display(), "Handling inferred job");
        let destinations = match self.load_destinations(&mut job) {
            Ok(destinations) => destinations,
            Err(outcome) => return outcome,
        };

        let artifact = match find_artifact(&job) {
            Ok(artifact) => artifact,
            Err(reason) => {
                tracing::error!(job = %job.path().display(), reason, "No deliverable result");
                job.set_error(reason);
                if let Err(e) = job.write_error_marker() {
                    tracing::warn!(job = %job.path().display(), error = %e, "Could not write error marker");
                }
                return self.run_error_flow(job, &destinations, reason);
            }
        };

        if let Some(root) = &self.archive {
            self.archive(&job, root, &artifact);
        }

        let payload = Payload {
            scan_files: scan_files_if_needed(&job, &destinations),
            artifact,
        };
        let report = self.transmitter.deliver(&destinations, &payload);

        if report.all_succeeded() {
            match job.delete() {
                Ok(()) => {
                    tracing::info!(job = %job.path().display(), "Delivered and deleted job");
                    JobOutcome::Deleted
                }
                Err(e) => {
                    tracing::error!(job = %job.path().display(), error = %e, "Could not delete delivered job");
                    quarantine(&mut job)
                }
            }
        } else {
            tracing::warn!(
                job = %job.path().display(),
                failed = report.failures().count(),
                total = report.outcomes.len(),
                "Delivery incomplete, keeping result for review"
            );
            quarantine(&mut job)
        }
    }

    fn handle_error(&self, mut job: Job) -> JobOutcome {
        tracing::info!(job = %job.path().display(), "Handling failed job");
        let destinations = match self.load_destinations(&mut job) {
            Ok(destinations) => destinations,
            Err(outcome) => return outcome,
        };
        match job.read_error_reason() {
            Some(reason) => self.run_error_flow(job, &destinations, &reason),
            None => {
                tracing::error!(job = %job.path().display(), "Error marker missing or empty");
                quarantine(&mut job)
            }
        }
    }

    /// Send a placeholder naming `reason`, best effort, then quarantine.
    fn run_error_flow(&self, mut job: Job, destinations: &[Destination], reason: &str) -> JobOutcome {
        let source = job.input_dir();
        if !source.is_dir() {
            tracing::error!(job = %job.path().display(), "Source images missing, cannot build placeholder");
            return quarantine(&mut job);
        }

        match self.placeholder.build(&source, job.path(), reason) {
            Ok(placeholder) => {
                let payload = Payload {
                    scan_files: scan_files_if_needed(&job, destinations),
                    artifact: placeholder,
                };
                let report = self.transmitter.deliver(destinations, &payload);
                if !report.all_succeeded() {
                    tracing::warn!(
                        job = %job.path().display(),
                        failed = report.failures().count(),
                        "Placeholder not delivered everywhere"
                    );
                }
            }
            Err(e) => {
                tracing::error!(job = %job.path().display(), error = %e, "Could not build placeholder");
            }
        }
        quarantine(&mut job)
    }

    fn collect_garbage(&self, job: &Job, now: SystemTime) -> JobOutcome {
        let Some(age) = job.age(now) else {
            return JobOutcome::Kept;
        };
        if age <= self.retention {
            return JobOutcome::Kept;
        }
        match job.delete() {
            Ok(()) => {
                tracing::info!(job = %job.path().display(), age_days = age.as_secs() / 86_400, "Deleted expired job");
                JobOutcome::Deleted
            }
            Err(e) => {
                tracing::warn!(job = %job.path().display(), error = %e, "Could not delete expired job");
                JobOutcome::Kept
            }
        }
    }

    fn archive(&self, job: &Job, root: &Path, artifact: &Path) {
        let patient_id = match dataset::read_patient_id(artifact) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(job = %job.path().display(), error = %e, "Could not archive result");
                return;
            }
        };
        match archive_artifact(
            root,
            Local::now().date_naive(),
            &patient_id,
            artifact,
            &job.config_path(),
        ) {
            Ok(folder) => tracing::info!(archive = %folder.display(), "Archived result and config"),
            Err(e) => tracing::error!(job = %job.path().display(), error = %e, "Could not archive result"),
        }
    }
}

impl<S: StoreService + 'static> PollCycle for ReturnService<S> {
    fn name(&self) -> &'static str {
        "return-service"
    }

    fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.process_all(cancel).map(|_| ())
    }
}

fn quarantine(job: &mut Job) -> JobOutcome {
    if job.quarantine().is_renamed() {
        JobOutcome::Quarantined
    } else if job.exists() {
        JobOutcome::Kept
    } else {
        JobOutcome::Vanished
    }
}

/// The single `*.dcm` result in the output directory.
fn find_artifact(job: &Job) -> std::result::Result<PathBuf, &'static str> {
    let output = job.output_dir();
    if !output.is_dir() {
        return Err(NO_OUTPUT_DIR);
    }
    let mut files = dataset::list_dicom_files(&output).map_err(|_| NO_OUTPUT_DIR)?;
    match files.len() {
        0 => Err(NO_ARTIFACT),
        1 => Ok(files.remove(0)),
        _ => Err(TOO_MANY_ARTIFACTS),
    }
}

fn scan_files_if_needed(
    job: &Job,
    destinations: &[Destination],
) -> std::result::Result<Vec<PathBuf>, String> {
    if !destinations.iter().any(Destination::send_scan) {
        return Ok(Vec::new());
    }
    dataset::list_dicom_files(&job.input_dir()).map_err(|e| {
        tracing::error!(job = %job.path().display(), error = %e, "Could not list source images");
        e.to_string()
    })
}
