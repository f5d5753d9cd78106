use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::job::config::JobConfig;
use crate::job::state::{strip_state_prefix, JobState};
use crate::job::JobLayout;

/// Outcome of an attempted state transition.
///
/// Renames are the only transition primitive, so every caller branches on
/// this instead of assuming success.
#[derive(Debug)]
pub enum RenameOutcome {
    Renamed,
    /// The source no longer exists: another process claimed the job.
    Vanished,
    Failed(io::Error),
}

impl RenameOutcome {
    pub fn is_renamed(&self) -> bool {
        matches!(self, RenameOutcome::Renamed)
    }
}

/// One job directory inside the shared scan directory.
#[derive(Debug, Clone)]
pub struct Job {
    path: PathBuf,
    state: JobState,
    layout: JobLayout,
    modified: Option<SystemTime>,
    error_message: Option<String>,
}

impl Job {
    /// Classify a directory. Reads only the name and the marker's existence.
    pub fn open(path: PathBuf, layout: &JobLayout) -> Self {
        let name = file_name(&path);
        let has_marker = path.join(&layout.error_file).exists();
        let state = JobState::classify(&name, has_marker);
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
        Self {
            path,
            state,
            layout: layout.clone(),
            modified,
            error_message: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn name(&self) -> String {
        file_name(&self.path)
    }

    /// The directory name without its state prefix.
    pub fn base_name(&self) -> String {
        strip_state_prefix(&self.name()).to_string()
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Time since the last modification, if known.
    pub fn age(&self, now: SystemTime) -> Option<Duration> {
        self.modified
            .and_then(|modified| now.duration_since(modified).ok())
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join(&self.layout.ai_config_filename)
    }

    pub fn error_marker_path(&self) -> PathBuf {
        self.path.join(&self.layout.error_file)
    }

    /// Directory holding the external executable's result artifact.
    pub fn output_dir(&self) -> PathBuf {
        self.path.join(super::OUTPUT_DIR)
    }

    /// Directory holding the source images.
    pub fn input_dir(&self) -> PathBuf {
        self.path.join(super::INPUT_DIR)
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn has_config(&self) -> bool {
        self.config_path().is_file()
    }

    pub fn read_config(&self) -> io::Result<JobConfig> {
        JobConfig::load(&self.config_path())
    }

    /// First line of the error marker. `None` if missing, unreadable or empty.
    pub fn read_error_reason(&self) -> Option<String> {
        let text = fs::read_to_string(self.error_marker_path()).ok()?;
        let line = text.lines().next()?.trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }

    /// Rename `<prefix>X` to `<state prefix>X`. `Handled` becomes `handled_error_X`.
    pub fn transition(&mut self, target: JobState) -> RenameOutcome {
        let prefix = match target {
            JobState::Handled => "handled_error_",
            other => match other.prefix() {
                Some(prefix) => prefix,
                None => {
                    return RenameOutcome::Failed(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "cannot transition to a state without prefix",
                    ))
                }
            },
        };
        let new_name = format!("{}{}", prefix, self.base_name());
        self.rename_to(&new_name)
    }

    /// Compare-and-swap rename within the parent directory.
    ///
    /// The destination must not exist. A missing source means the job was
    /// claimed elsewhere.
    pub fn rename_to(&mut self, new_name: &str) -> RenameOutcome {
        if !self.path.exists() {
            return RenameOutcome::Vanished;
        }
        let target = self.path.with_file_name(new_name);
        if target.exists() {
            return RenameOutcome::Failed(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", target.display()),
            ));
        }
        match fs::rename(&self.path, &target) {
            Ok(()) => {
                tracing::debug!(from = %self.path.display(), to = %target.display(), "Renamed job");
                self.path = target;
                self.state = JobState::classify(new_name, self.error_marker_path().exists());
                RenameOutcome::Renamed
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => RenameOutcome::Vanished,
            Err(e) => RenameOutcome::Failed(e),
        }
    }

    /// Persist the error message as the error marker.
    pub fn write_error_marker(&self) -> io::Result<()> {
        let message = self.error_message.as_deref().unwrap_or("Unknown error");
        fs::write(self.error_marker_path(), message)
    }

    /// Demote a job to `error_`: write the marker, then rename.
    ///
    /// If the rename fails the marker alone still classifies the job as an
    /// error on the next cycle.
    pub fn demote_to_error(&mut self) -> RenameOutcome {
        if let Err(e) = self.write_error_marker() {
            tracing::warn!(job = %self.path.display(), error = %e, "Could not write error marker");
        }
        tracing::info!(job = %self.path.display(), reason = ?self.error_message, "Moving job to error");
        let outcome = self.transition(JobState::Error);
        if let RenameOutcome::Failed(e) = &outcome {
            tracing::error!(job = %self.path.display(), error = %e, "Could not rename job to error");
            self.state = JobState::Error;
        }
        outcome
    }

    /// Rename to `handled_error_` for manual review. Already-handled jobs are left alone.
    ///
    /// If `handled_error_X` is taken the job becomes `handled_error_X_02`,
    /// `_03`, ... so a quarantine never fails on a name collision.
    pub fn quarantine(&mut self) -> RenameOutcome {
        if self.state.is_terminal() {
            tracing::debug!(job = %self.path.display(), "Job already quarantined");
            return RenameOutcome::Renamed;
        }
        let base = format!("handled_error_{}", self.base_name());
        let mut outcome = self.rename_to(&base);
        let mut n: u32 = 2;
        while let RenameOutcome::Failed(e) = &outcome {
            if e.kind() != io::ErrorKind::AlreadyExists {
                break;
            }
            outcome = self.rename_to(&format!("{}_{:02}", base, n));
            n += 1;
        }
        match &outcome {
            RenameOutcome::Renamed => {
                tracing::info!(job = %self.path.display(), "Quarantined job")
            }
            RenameOutcome::Vanished => {
                tracing::warn!(job = %self.path.display(), "Job vanished before quarantine")
            }
            RenameOutcome::Failed(e) => {
                tracing::error!(job = %self.path.display(), error = %e, "Could not quarantine job")
            }
        }
        outcome
    }

    pub fn delete(&self) -> io::Result<()> {
        fs::remove_dir_all(&self.path)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout() -> JobLayout {
        JobLayout::new("aiconfig.txt", "error.txt")
    }

    fn make_dir(root: &TempDir, name: &str) -> PathBuf {
        let path = root.path().join(name);
        fs::create_dir(&path).unwrap();
        path
    }

    #[test]
    fn open_classifies_from_name() {
        let root = TempDir::new().unwrap();
        let job = Job::open(make_dir(&root, "ready_abc"), &layout());
        assert_eq!(job.state(), JobState::Ready);
        assert_eq!(job.base_name(), "abc");
        assert!(job.modified().is_some());
    }

    #[test]
    fn error_marker_forces_error_state() {
        let root = TempDir::new().unwrap();
        let path = make_dir(&root, "active_abc");
        fs::write(path.join("error.txt"), "E3_10 failed").unwrap();
        let job = Job::open(path, &layout());
        assert_eq!(job.state(), JobState::Error);
        assert_eq!(job.read_error_reason().as_deref(), Some("E3_10 failed"));
    }

    #[test]
    fn transition_renames_and_reclassifies() {
        let root = TempDir::new().unwrap();
        let mut job = Job::open(make_dir(&root, "ready_abc"), &layout());

        assert!(job.transition(JobState::Active).is_renamed());
        assert_eq!(job.state(), JobState::Active);
        assert_eq!(job.path(), root.path().join("active_abc"));
        assert!(!root.path().join("ready_abc").exists());
    }

    #[test]
    fn losing_a_rename_race_reports_vanished() {
        let root = TempDir::new().unwrap();
        let path = make_dir(&root, "ready_abc");
        let mut first = Job::open(path.clone(), &layout());
        let mut second = Job::open(path, &layout());

        assert!(first.transition(JobState::Active).is_renamed());
        assert!(matches!(
            second.transition(JobState::Active),
            RenameOutcome::Vanished
        ));
    }

    #[test]
    fn rename_onto_existing_directory_fails() {
        let root = TempDir::new().unwrap();
        make_dir(&root, "active_abc");
        let mut job = Job::open(make_dir(&root, "ready_abc"), &layout());

        assert!(matches!(
            job.transition(JobState::Active),
            RenameOutcome::Failed(_)
        ));
        assert_eq!(job.state(), JobState::Ready);
    }

    #[test]
    fn demote_writes_marker_and_renames() {
        let root = TempDir::new().unwrap();
        let mut job = Job::open(make_dir(&root, "ready_abc"), &layout());
        job.set_error("E2_02 AI config file does not exist.");

        assert!(job.demote_to_error().is_renamed());
        let moved = root.path().join("error_abc");
        assert!(moved.is_dir());
        assert_eq!(
            fs::read_to_string(moved.join("error.txt")).unwrap(),
            "E2_02 AI config file does not exist."
        );
    }

    #[test]
    fn quarantine_uses_handled_error_prefix() {
        let root = TempDir::new().unwrap();
        let mut job = Job::open(make_dir(&root, "inferred_abc"), &layout());
        assert!(job.quarantine().is_renamed());
        assert!(root.path().join("handled_error_abc").is_dir());
        assert_eq!(job.state(), JobState::Handled);
    }

    #[test]
    fn quarantine_skips_taken_handled_names() {
        let root = TempDir::new().unwrap();
        make_dir(&root, "handled_error_abc");
        make_dir(&root, "handled_error_abc_02");
        let mut job = Job::open(make_dir(&root, "inferred_abc"), &layout());

        assert!(job.quarantine().is_renamed());
        assert_eq!(job.path(), root.path().join("handled_error_abc_03"));
        assert_eq!(job.state(), JobState::Handled);
        assert!(!root.path().join("inferred_abc").exists());
    }

    #[test]
    fn empty_marker_has_no_reason() {
        let root = TempDir::new().unwrap();
        let path = make_dir(&root, "error_abc");
        fs::write(path.join("error.txt"), "\n").unwrap();
        let job = Job::open(path, &layout());
        assert!(job.read_error_reason().is_none());
    }
}
