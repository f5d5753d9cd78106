use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::config::WatchdogConfig;

/// What happened when a job was handed to the inference executable.
#[derive(Debug, PartialEq, Eq)]
pub enum LaunchOutcome {
    Spawned { pid: Option<u32> },
    DryRun,
}

/// Starts the external inference executable for an activated job.
///
/// The child is detached: it gets its own process group, no stdio, and is
/// never waited on. It reports back only by renaming the job directory.
#[derive(Debug, Clone)]
pub struct InferenceLauncher {
    command: PathBuf,
    args: Vec<String>,
    dry_run: bool,
}

impl InferenceLauncher {
    pub fn new(command: PathBuf, args: Vec<String>, dry_run: bool) -> Self {
        Self {
            command,
            args,
            dry_run,
        }
    }

    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self::new(
            config.inference_command.clone(),
            config.inference_args.clone(),
            config.dry_run,
        )
    }

    /// The full command line, job path last.
    pub fn command_line(&self, job_path: &Path) -> Vec<String> {
        let mut line = Vec::with_capacity(self.args.len() + 2);
        line.push(self.command.display().to_string());
        line.extend(self.args.iter().cloned());
        line.push(job_path.display().to_string());
        line
    }

    /// Must be called from within a tokio runtime context.
    pub fn launch(&self, job_path: &Path) -> io::Result<LaunchOutcome> {
        let command_line = self.command_line(job_path);
        if self.dry_run {
            tracing::info!(command = ?command_line, "Dry run, not launching inference");
            return Ok(LaunchOutcome::DryRun);
        }

        tracing::debug!(command = ?command_line, "Launching inference");
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .arg(job_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn()?;
        let pid = child.id();
        tracing::info!(job = %job_path.display(), pid = ?pid, "Inference launched");
        Ok(LaunchOutcome::Spawned { pid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_appends_job_path() {
        let launcher = InferenceLauncher::new(
            PathBuf::from("/usr/bin/python3"),
            vec!["main.py".to_string(), "--folder".to_string()],
            false,
        );
        assert_eq!(
            launcher.command_line(Path::new("/scan/active_x")),
            vec!["/usr/bin/python3", "main.py", "--folder", "/scan/active_x"]
        );
    }

    #[test]
    fn dry_run_does_not_spawn() {
        let launcher = InferenceLauncher::new(PathBuf::from("/does/not/exist"), Vec::new(), true);
        assert_eq!(
            launcher.launch(Path::new("/scan/active_x")).unwrap(),
            LaunchOutcome::DryRun
        );
    }

    #[tokio::test]
    async fn missing_executable_fails_to_launch() {
        let launcher = InferenceLauncher::new(PathBuf::from("/does/not/exist"), Vec::new(), false);
        assert!(launcher.launch(Path::new("/scan/active_x")).is_err());
    }

    #[tokio::test]
    async fn launch_does_not_wait_for_child() {
        let launcher = InferenceLauncher::new(
            PathBuf::from("/bin/sh"),
            vec!["-c".to_string(), "sleep 5".to_string(), "sh".to_string()],
            false,
        );
        let started = std::time::Instant::now();
        let outcome = launcher.launch(Path::new("/tmp")).unwrap();
        assert!(matches!(outcome, LaunchOutcome::Spawned { pid: Some(_) }));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }
}
