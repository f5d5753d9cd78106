//! Scheduler daemon.
//!
//! Each cycle scans the shared directory and, when no job is active, picks
//! the ready job with the lowest `(nicelevel, mtime)`, renames it to
//! `active_` and launches the inference executable on it.
//!
//! # Components
//!
//! - [`candidate`]: pre-validation and priority selection
//! - [`InferenceLauncher`]: detached launch of the external executable
//! - [`Watchdog`]: the poll cycle tying both together

pub mod candidate;
pub mod launcher;
pub mod watchdog;

pub use candidate::{select_next, Candidate};
pub use launcher::{InferenceLauncher, LaunchOutcome};
pub use watchdog::{Dispatch, Watchdog};
