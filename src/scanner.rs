use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::job::{Job, JobLayout, JobState};

/// The shared directory both daemons poll.
#[derive(Debug, Clone)]
pub struct SharedDir {
    path: PathBuf,
    layout: JobLayout,
}

impl SharedDir {
    pub fn new(path: impl Into<PathBuf>, layout: JobLayout) -> Self {
        Self {
            path: path.into(),
            layout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &JobLayout {
        &self.layout
    }

    /// Classify every immediate subdirectory. Files are ignored.
    ///
    /// Called once per poll cycle; snapshots are never reused across cycles.
    pub fn scan(&self) -> Result<ScanSnapshot> {
        let entries = fs::read_dir(&self.path).map_err(|source| PipelineError::Scan {
            path: self.path.clone(),
            source,
        })?;

        let mut jobs = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(dir = %self.path.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let job = Job::open(path, &self.layout);
            tracing::debug!(job = %job.path().display(), state = %job.state(), "Found job folder");
            jobs.push(job);
        }
        jobs.sort_by(|a, b| a.path().cmp(b.path()));

        Ok(ScanSnapshot { jobs })
    }
}

/// The jobs seen by one scan, sorted by path.
#[derive(Debug, Default)]
pub struct ScanSnapshot {
    jobs: Vec<Job>,
}

impl ScanSnapshot {
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn in_state(&self, state: JobState) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(move |job| job.state() == state)
    }

    pub fn has_active(&self) -> bool {
        self.in_state(JobState::Active).next().is_some()
    }

    /// Move out all jobs in the given state.
    pub fn take(&mut self, state: JobState) -> Vec<Job> {
        let (taken, kept): (Vec<Job>, Vec<Job>) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|job| job.state() == state);
        self.jobs = kept;
        taken
    }

    pub fn counts(&self) -> HashMap<JobState, usize> {
        let mut counts = HashMap::new();
        for job in &self.jobs {
            *counts.entry(job.state()).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
