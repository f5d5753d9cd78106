use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::job::JobLayout;
use crate::supervisor::RestartPolicy;

/// Logging target and retention.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the daily rotated log files. Must exist.
    pub dir: PathBuf,
    /// Level for this crate (trace, debug, info, warn, error).
    #[serde(default = "default_level")]
    pub level: String,
    /// Number of daily log files to keep.
    #[serde(default = "default_days_to_keep")]
    pub days_to_keep: usize,
    /// Separate level for the DICOM networking crate, which is chatty at debug.
    #[serde(default = "default_network_level")]
    pub network_level: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_network_level() -> String {
    "warn".to_string()
}

const fn default_days_to_keep() -> usize {
    30
}

/// Settings shared by both daemons.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// The shared directory holding one subdirectory per job.
    pub scan_directory: PathBuf,
    #[serde(default = "default_scan_interval_sec")]
    pub scan_interval_sec: u64,
    #[serde(default = "default_ai_config_filename")]
    pub ai_config_filename: String,
    #[serde(default = "default_error_file")]
    pub error_file: String,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: usize,
    #[serde(default = "default_max_restart_window_sec")]
    pub max_restart_window_sec: u64,
    /// How long a shutdown waits for an in-progress poll cycle.
    #[serde(default = "default_shutdown_timeout_sec")]
    pub shutdown_timeout_sec: u64,
    pub logging: LoggingConfig,
}

const fn default_scan_interval_sec() -> u64 {
    5
}

fn default_ai_config_filename() -> String {
    "aiconfig.txt".to_string()
}

fn default_error_file() -> String {
    "error.txt".to_string()
}

const fn default_max_restarts() -> usize {
    5
}

const fn default_max_restart_window_sec() -> u64 {
    360
}

const fn default_shutdown_timeout_sec() -> u64 {
    500
}

impl DaemonConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_sec)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_sec)
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::new(
            self.max_restarts,
            Duration::from_secs(self.max_restart_window_sec),
        )
    }

    pub fn layout(&self) -> JobLayout {
        JobLayout::new(&self.ai_config_filename, &self.error_file)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require_dir("scan_directory", &self.scan_directory)?;
        require_dir("logging.dir", &self.logging.dir)?;

        if !(1..=60).contains(&self.scan_interval_sec) {
            return Err(invalid(
                "scan_interval_sec",
                format!("must be within 1..=60, got {}", self.scan_interval_sec),
            ));
        }
        if self.max_restarts < 1 {
            return Err(invalid("max_restarts", "must be at least 1"));
        }
        if self.max_restart_window_sec < 60 {
            return Err(invalid(
                "max_restart_window_sec",
                format!("must be at least 60, got {}", self.max_restart_window_sec),
            ));
        }
        if self.ai_config_filename.trim().is_empty() {
            return Err(invalid("ai_config_filename", "must not be empty"));
        }
        if self.error_file.trim().is_empty() {
            return Err(invalid("error_file", "must not be empty"));
        }
        if self.logging.days_to_keep < 1 {
            return Err(invalid("logging.days_to_keep", "must be at least 1"));
        }
        require_level("logging.level", &self.logging.level)?;
        require_level("logging.network_level", &self.logging.network_level)?;
        Ok(())
    }
}

/// Configuration for the scheduler daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    #[serde(flatten)]
    pub daemon: DaemonConfig,
    /// Executable launched for every activated job.
    pub inference_command: PathBuf,
    /// Arguments placed before the job path, e.g. `["main.py", "--folder"]`.
    #[serde(default)]
    pub inference_args: Vec<String>,
    /// Log the launch command instead of running it.
    #[serde(default)]
    pub dry_run: bool,
}

impl WatchdogConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = read_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.daemon.validate()?;
        if !self.inference_command.is_file() {
            return Err(ConfigError::BadPath {
                field: "inference_command",
                path: self.inference_command.clone(),
            });
        }
        Ok(())
    }
}

/// Tags stamped on placeholder structure sets produced by the error flow.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvenanceConfig {
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
    #[serde(default = "default_institution_name")]
    pub institution_name: String,
    #[serde(default = "default_model_name_prefix")]
    pub model_name_prefix: String,
    /// Organisation root for generated SOP Instance UIDs, ending with a dot.
    #[serde(default = "default_uid_root")]
    pub uid_root: String,
}

fn default_manufacturer() -> String {
    "rtqueue".to_string()
}

fn default_institution_name() -> String {
    "Unknown Institution".to_string()
}

fn default_model_name_prefix() -> String {
    "AI_".to_string()
}

fn default_uid_root() -> String {
    "2.25.".to_string()
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            manufacturer: default_manufacturer(),
            institution_name: default_institution_name(),
            model_name_prefix: default_model_name_prefix(),
            uid_root: default_uid_root(),
        }
    }
}

/// Configuration for the delivery daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct ReturnServiceConfig {
    #[serde(flatten)]
    pub daemon: DaemonConfig,
    /// Calling AE title used for every association.
    pub ae_title: String,
    /// Key prefix for DICOM node groups in the per-job config.
    #[serde(default = "default_return_dicom_key")]
    pub return_dicom_key: String,
    /// Key prefix for directory groups in the per-job config.
    #[serde(default = "default_return_directory_key")]
    pub return_directory_key: String,
    /// Retention of `handled_*` directories.
    #[serde(default = "default_days_before_deletion")]
    pub days_before_deletion: u64,
    #[serde(default = "default_do_archive")]
    pub do_archive: bool,
    #[serde(default)]
    pub archive_directory: Option<PathBuf>,
    #[serde(default)]
    pub provenance: ProvenanceConfig,
}

fn default_return_dicom_key() -> String {
    "ReturnDicomNode".to_string()
}

fn default_return_directory_key() -> String {
    "ReturnDirectory".to_string()
}

const fn default_days_before_deletion() -> u64 {
    30
}

const fn default_do_archive() -> bool {
    true
}

impl ReturnServiceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = read_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.days_before_deletion * 24 * 60 * 60)
    }

    /// The archive directory, when archiving is enabled.
    pub fn archive(&self) -> Option<&Path> {
        if self.do_archive {
            self.archive_directory.as_deref()
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.daemon.validate()?;

        let ae_len = self.ae_title.trim().len();
        if ae_len == 0 || ae_len > 16 {
            return Err(invalid("ae_title", "must be 1 to 16 characters"));
        }
        if self.return_dicom_key.trim().is_empty() {
            return Err(invalid("return_dicom_key", "must not be empty"));
        }
        if self.return_directory_key.trim().is_empty() {
            return Err(invalid("return_directory_key", "must not be empty"));
        }
        if !(1..=90).contains(&self.days_before_deletion) {
            return Err(invalid(
                "days_before_deletion",
                format!("must be within 1..=90, got {}", self.days_before_deletion),
            ));
        }
        if self.do_archive {
            match &self.archive_directory {
                Some(dir) => require_dir("archive_directory", dir)?,
                None => {
                    return Err(invalid(
                        "archive_directory",
                        "required when do_archive is true",
                    ))
                }
            }
        }
        if !self.provenance.uid_root.ends_with('.')
            || !self
                .provenance
                .uid_root
                .chars()
                .all(|c| c.is_ascii_digit() || c == '.')
        {
            return Err(invalid(
                "provenance.uid_root",
                "must be dotted digits ending with '.'",
            ));
        }
        Ok(())
    }
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn require_dir(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(ConfigError::BadPath {
            field,
            path: path.to_path_buf(),
        })
    }
}

fn require_level(field: &'static str, level: &str) -> Result<(), ConfigError> {
    level
        .parse::<tracing::Level>()
        .map(|_| ())
        .map_err(|_| invalid(field, format!("unknown log level '{}'", level)))
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}
