//! Job directories and their state machine.
//!
//! A job is a subdirectory of the shared scan directory. Its state lives in
//! the name prefix (`ready_`, `active_`, `inferred_`, ...) plus the presence
//! of an error marker file; nothing else is stored. State changes happen only
//! through [`Job::transition`], an atomic rename within the scan directory.

pub mod config;
pub mod directory;
pub mod state;

pub use config::{DestinationKeys, JobConfig, JobConfigError, NiceLevel, DEFAULT_NICE_LEVEL};
pub use directory::{Job, RenameOutcome};
pub use state::JobState;

/// Subdirectory holding the result artifact written by the inference step.
pub const OUTPUT_DIR: &str = "dcmoutput";

/// Subdirectory holding the source images.
pub const INPUT_DIR: &str = "dcminput";

/// File names every participant agrees on inside a job directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLayout {
    pub ai_config_filename: String,
    pub error_file: String,
}

impl JobLayout {
    pub fn new(ai_config_filename: &str, error_file: &str) -> Self {
        Self {
            ai_config_filename: ai_config_filename.to_string(),
            error_file: error_file.to_string(),
        }
    }
}

impl Default for JobLayout {
    fn default() -> Self {
        Self::new("aiconfig.txt", "error.txt")
    }
}
