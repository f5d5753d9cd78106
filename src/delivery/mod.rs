//! Return service daemon.
//!
//! Ships `inferred_` results to their destinations, turns `error_` jobs into
//! placeholder structure sets, and expires old `handled_` directories.

pub mod archive;
pub mod placeholder;
pub mod return_service;

pub use placeholder::{ErrorStructBuilder, PlaceholderError};
pub use return_service::{JobOutcome, ReturnService};
