//! Delivery of result artifacts to their destinations.
//!
//! A job lists one or more destinations, each either a directory or a DICOM
//! node. [`Transmitter::deliver`] attempts every destination and collects the
//! per-destination results into a [`DeliveryReport`]; one failing
//! destination never stops the others.

pub mod dataset;
pub mod dicom;
pub mod directory;

pub use dicom::{DicomStoreScu, StoreService};

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransmitError {
    #[error("Destination directory {0} does not exist")]
    MissingDirectory(String),

    #[error("Could not create destination folder {dir}: {source}")]
    CreateDir {
        /// Masked, see [`mask_path`].
        dir: String,
        #[source]
        source: io::Error,
    },

    #[error("Source images unavailable: {0}")]
    ScanUnavailable(String),

    #[error("Could not copy {file}: {source}")]
    Copy {
        file: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not read DICOM file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Association with {node} failed: {reason}")]
    Association { node: String, reason: String },

    #[error("No accepted presentation context for {sop_class} ({file})")]
    NoPresentationContext { sop_class: String, file: PathBuf },

    #[error("C-STORE of {file} failed with status {status:#06X}")]
    StoreStatus { file: PathBuf, status: u16 },

    #[error("DICOM network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DicomNode {
    pub host: String,
    pub port: u16,
    /// Called AE title.
    pub ae_title: String,
    pub send_scan: bool,
}

impl fmt::Display for DicomNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.ae_title, self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Directory { root: PathBuf, send_scan: bool },
    Node(DicomNode),
}

impl Destination {
    pub fn send_scan(&self) -> bool {
        match self {
            Destination::Directory { send_scan, .. } => *send_scan,
            Destination::Node(node) => node.send_scan,
        }
    }

    /// Log-safe description; directory paths are masked.
    pub fn label(&self) -> String {
        match self {
            Destination::Directory { root, .. } => mask_path(root),
            Destination::Node(node) => node.to_string(),
        }
    }
}

/// What a job sends: the artifact plus the source images for `send_scan`
/// destinations.
#[derive(Debug, Clone)]
pub struct Payload {
    pub artifact: PathBuf,
    /// Source images, or why they could not be listed. A listing failure
    /// fails every `send_scan` destination.
    pub scan_files: Result<Vec<PathBuf>, String>,
}

impl Payload {
    fn files_for(&self, destination: &Destination) -> Result<Vec<PathBuf>, TransmitError> {
        let mut files = vec![self.artifact.clone()];
        if destination.send_scan() {
            let scan = self
                .scan_files
                .as_ref()
                .map_err(|reason| TransmitError::ScanUnavailable(reason.clone()))?;
            files.extend(scan.iter().cloned());
        }
        Ok(files)
    }
}

#[derive(Debug)]
pub struct DestinationOutcome {
    pub label: String,
    pub result: Result<usize, TransmitError>,
}

#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub outcomes: Vec<DestinationOutcome>,
}

impl DeliveryReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &DestinationOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

/// Fans a payload out to every destination.
#[derive(Debug, Clone)]
pub struct Transmitter<S> {
    store: S,
}

impl<S: StoreService> Transmitter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn deliver(&self, destinations: &[Destination], payload: &Payload) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for destination in destinations {
            let label = destination.label();
            let result = payload
                .files_for(destination)
                .and_then(|files| match destination {
                    Destination::Directory { root, .. } => {
                        directory::copy_to_directory(root, &payload.artifact, &files)
                    }
                    Destination::Node(node) => self.store.store(node, &files),
                });
            match &result {
                Ok(count) => tracing::info!(destination = %label, files = count, "Delivered"),
                Err(e) => tracing::error!(destination = %label, error = %e, "Delivery failed"),
            }
            report.outcomes.push(DestinationOutcome { label, result });
        }
        report
    }
}

/// Mask the trailing half of a path for logging.
///
/// Keeps the first `len - len(name) / 2` characters, where `name` is the
/// final component, and replaces the rest with `*`.
pub fn mask_path(path: &Path) -> String {
    let full: Vec<char> = path.display().to_string().chars().collect();
    let name_len = path
        .file_name()
        .map(|n| n.to_string_lossy().chars().count())
        .unwrap_or(0);
    let keep = full.len().saturating_sub(name_len / 2);
    let mut masked: String = full[..keep].iter().collect();
    masked.extend(std::iter::repeat('*').take(full.len() - keep));
    masked
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn mask_hides_half_of_the_last_component() {
        assert_eq!(mask_path(Path::new("/srv/returns/abcdef")), "/srv/returns/abc***");
        assert_eq!(mask_path(Path::new("/srv/x")), "/srv/x");
    }

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(String, usize)>>,
        fail_host: Option<String>,
    }

    impl StoreService for Recording {
        fn store(&self, node: &DicomNode, files: &[PathBuf]) -> Result<usize, TransmitError> {
            self.calls
                .lock()
                .unwrap()
                .push((node.host.clone(), files.len()));
            if self.fail_host.as_deref() == Some(node.host.as_str()) {
                return Err(TransmitError::Network("refused".to_string()));
            }
            Ok(files.len())
        }
    }

    fn node(host: &str, send_scan: bool) -> Destination {
        Destination::Node(DicomNode {
            host: host.to_string(),
            port: 104,
            ae_title: "PLAN".to_string(),
            send_scan,
        })
    }

    #[test]
    fn fan_out_attempts_every_destination() {
        let transmitter = Transmitter::new(Recording {
            fail_host: Some("a".to_string()),
            ..Default::default()
        });
        let payload = Payload {
            artifact: PathBuf::from("/job/dcmoutput/rt.dcm"),
            scan_files: Ok(vec![PathBuf::from("/job/dcminput/1.dcm"), PathBuf::from("/job/dcminput/2.dcm")]),
        };

        let report = transmitter.deliver(&[node("a", false), node("b", true)], &payload);

        assert!(!report.all_succeeded());
        assert_eq!(report.failures().count(), 1);
        let calls = transmitter.store().calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("a".to_string(), 1), ("b".to_string(), 3)]);
    }

    #[test]
    fn unlisted_scan_fails_only_send_scan_destinations() {
        let transmitter = Transmitter::new(Recording::default());
        let payload = Payload {
            artifact: PathBuf::from("/job/dcmoutput/rt.dcm"),
            scan_files: Err("dcminput missing".to_string()),
        };

        let report = transmitter.deliver(&[node("a", false), node("b", true)], &payload);

        assert!(report.outcomes[0].result.is_ok());
        assert!(matches!(
            report.outcomes[1].result,
            Err(TransmitError::ScanUnavailable(_))
        ));
        let calls = transmitter.store().calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("a".to_string(), 1)]);
    }
}
