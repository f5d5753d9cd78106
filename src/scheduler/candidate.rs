use std::time::SystemTime;

use crate::job::{Job, NiceLevel};

/// A validated `ready` job with its dispatch key.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub job: Job,
    pub priority: i32,
    pub modified: SystemTime,
}

impl Candidate {
    /// Lower priority first, then older.
    pub fn key(&self) -> (i32, SystemTime) {
        (self.priority, self.modified)
    }
}

/// Result of validating one `ready` job.
#[derive(Debug)]
pub enum Prepared {
    Candidate(Candidate),
    /// Failed pre-validation; the job carries its error message.
    Invalid(Job),
    /// Disappeared since the scan, claimed or removed by someone else.
    Gone,
}

/// Pre-validate a `ready` job and read its priority.
///
/// The priority is read once here; the job is re-read on the next cycle.
pub fn prepare(mut job: Job) -> Prepared {
    if !job.exists() {
        tracing::debug!(job = %job.path().display(), "Ready job disappeared before validation");
        return Prepared::Gone;
    }
    if !job.has_config() {
        tracing::error!(job = %job.path().display(), "AI config file does not exist");
        job.set_error("E2_02 AI config file does not exist.");
        return Prepared::Invalid(job);
    }
    let config = match job.read_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(job = %job.path().display(), error = %e, "Could not read AI config file");
            job.set_error(format!("E2_02 AI config file could not be read: {}", e));
            return Prepared::Invalid(job);
        }
    };

    let nice = config.nice_level();
    match &nice {
        NiceLevel::Set(_) => {}
        NiceLevel::Missing => {
            tracing::warn!(job = %job.path().display(), default = nice.or_default(), "No nicelevel in config, using default");
        }
        NiceLevel::Malformed(raw) => {
            tracing::warn!(job = %job.path().display(), value = %raw, default = nice.or_default(), "Could not parse nicelevel, using default");
        }
    }

    let modified = job.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    Prepared::Candidate(Candidate {
        job,
        priority: nice.or_default(),
        modified,
    })
}

/// Pick the candidate with the smallest `(priority, modified)` key.
///
/// Ties on both keep the first candidate, which is the scan's path order.
pub fn select_next(candidates: Vec<Candidate>) -> Option<Candidate> {
    candidates.into_iter().min_by_key(Candidate::key)
}
