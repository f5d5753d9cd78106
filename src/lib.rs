//! Filesystem-queue pipeline for AI segmentation jobs.
//!
//! Two daemons share one directory. The scheduler ([`scheduler::Watchdog`])
//! activates one `ready_` job at a time and launches inference on it; the
//! return service ([`delivery::ReturnService`]) ships results and error
//! placeholders to DICOM nodes and directories. Both run under a
//! [`supervisor::Supervisor`] that restarts the poll loop with backoff.

pub mod config;
pub mod delivery;
pub mod error;
pub mod job;
pub mod logging;
pub mod scanner;
pub mod scheduler;
pub mod supervisor;
pub mod transmit;
