//! Per-job configuration file (`aiconfig.txt`).
//!
//! The file is line oriented, one `Key:"Value"` pair per line. Keys are
//! case-insensitive. Destination groups repeat with a numeric suffix
//! (`ReturnDicomNodeIP_1`, `ReturnDicomNodePort_1`, ...).

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::transmit::{Destination, DicomNode};

/// Priority used when a job does not declare a usable nicelevel.
pub const DEFAULT_NICE_LEVEL: i32 = 10;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum JobConfigError {
    #[error("No return destination found in job config")]
    NoDestinations,

    #[error("Destination group {group} is missing {field}")]
    IncompleteDestination { group: String, field: &'static str },

    #[error("Destination group {group} has an invalid port: {value}")]
    InvalidPort { group: String, value: String },
}

/// Result of looking up the nicelevel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NiceLevel {
    Set(i32),
    Missing,
    Malformed(String),
}

impl NiceLevel {
    pub fn or_default(&self) -> i32 {
        match self {
            NiceLevel::Set(level) => *level,
            NiceLevel::Missing | NiceLevel::Malformed(_) => DEFAULT_NICE_LEVEL,
        }
    }
}

/// Key prefixes that introduce destination groups.
#[derive(Debug, Clone)]
pub struct DestinationKeys {
    dicom: String,
    directory: String,
}

impl DestinationKeys {
    pub fn new(dicom: &str, directory: &str) -> Self {
        Self {
            dicom: dicom.to_ascii_lowercase(),
            directory: directory.to_ascii_lowercase(),
        }
    }
}

impl Default for DestinationKeys {
    fn default() -> Self {
        Self::new("ReturnDicomNode", "ReturnDirectory")
    }
}

/// Parsed key/value pairs of a per-job config file.
#[derive(Debug, Clone, Default)]
pub struct JobConfig {
    /// Lowercased keys in file order.
    entries: Vec<(String, String)>,
}

impl JobConfig {
    pub fn load(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let (key, value) = line.split_once(':')?;
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                Some((key.to_ascii_lowercase(), parse_value(value)))
            })
            .collect();
        Self { entries }
    }

    /// First value for a key, compared case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn nice_level(&self) -> NiceLevel {
        match self.get("nicelevel") {
            None => NiceLevel::Missing,
            Some(raw) => raw
                .trim()
                .parse()
                .map(NiceLevel::Set)
                .unwrap_or_else(|_| NiceLevel::Malformed(raw.to_string())),
        }
    }

    pub fn model_name(&self) -> Option<&str> {
        self.get("modelname")
    }

    pub fn model_hash(&self) -> Option<&str> {
        self.get("modelhash")
    }

    /// Build the destination list: directories first, then DICOM nodes, each
    /// ordered by group number.
    pub fn destinations(&self, keys: &DestinationKeys) -> Result<Vec<Destination>, JobConfigError> {
        let mut directories: BTreeMap<GroupId, BTreeMap<String, String>> = BTreeMap::new();
        let mut nodes: BTreeMap<GroupId, BTreeMap<String, String>> = BTreeMap::new();

        // Match the longer prefix first so one prefix may extend the other.
        let (first, second) = if keys.dicom.len() >= keys.directory.len() {
            ((&keys.dicom, &mut nodes), (&keys.directory, &mut directories))
        } else {
            ((&keys.directory, &mut directories), (&keys.dicom, &mut nodes))
        };
        let mut groups = [first, second];

        for (key, value) in &self.entries {
            for (prefix, target) in groups.iter_mut() {
                if let Some(rest) = key.strip_prefix(prefix.as_str()) {
                    let (field, group) = split_group(rest);
                    target
                        .entry(group)
                        .or_default()
                        .entry(field.to_string())
                        .or_insert_with(|| value.clone());
                    break;
                }
            }
        }

        let mut destinations = Vec::new();

        for (group, fields) in directories {
            let root = fields
                .get("")
                .filter(|v| !v.is_empty())
                .ok_or_else(|| JobConfigError::IncompleteDestination {
                    group: group.to_string(),
                    field: "path",
                })?;
            destinations.push(Destination::Directory {
                root: PathBuf::from(root),
                send_scan: parse_flag(fields.get("sendscan")),
            });
        }

        for (group, fields) in nodes {
            let required = |field: &'static str| {
                fields
                    .get(field)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| JobConfigError::IncompleteDestination {
                        group: group.to_string(),
                        field,
                    })
            };
            let host = required("ip")?;
            let port_raw = required("port")?;
            let ae_title = required("aet")?;
            let port = port_raw
                .trim()
                .parse()
                .map_err(|_| JobConfigError::InvalidPort {
                    group: group.to_string(),
                    value: port_raw.clone(),
                })?;
            destinations.push(Destination::Node(DicomNode {
                host: host.clone(),
                port,
                ae_title: ae_title.clone(),
                send_scan: parse_flag(fields.get("sendscan")),
            }));
        }

        if destinations.is_empty() {
            return Err(JobConfigError::NoDestinations);
        }
        Ok(destinations)
    }
}

/// Group suffix of a destination key. Numeric suffixes sort numerically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupId {
    Number(u32),
    Name(String),
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupId::Number(n) => write!(f, "{}", n),
            GroupId::Name(s) => write!(f, "{}", s),
        }
    }
}

/// Split `ip_1` into (`ip`, 1). A key without suffix belongs to group 0.
fn split_group(rest: &str) -> (&str, GroupId) {
    match rest.rsplit_once('_') {
        Some((field, suffix)) => {
            let group = suffix
                .parse()
                .map(GroupId::Number)
                .unwrap_or_else(|_| GroupId::Name(suffix.to_string()));
            (field, group)
        }
        None => (rest, GroupId::Number(0)),
    }
}

/// Take the quoted part of `"value"`, or the whole trimmed remainder.
fn parse_value(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(inner) = raw.strip_prefix('"') {
        match inner.find('"') {
            Some(end) => inner[..end].trim().to_string(),
            None => inner.trim().to_string(),
        }
    } else {
        raw.replace('"', "").trim().to_string()
    }
}

fn parse_flag(raw: Option<&String>) -> bool {
    raw.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"ModelName:"Prostate_MRL"
ModelHash:"9f2c"
NiceLevel:"3"
ReturnDicomNodeIP_1:"10.0.0.5"
ReturnDicomNodePort_1:"104"
ReturnDicomNodeAET_1:"PLANNING"
ReturnDicomNodeSendScan_1:"True"
ReturnDirectory_2:"\\share\out"
ReturnDirectory_1:"C:\results"
ReturnDirectorySendScan_1:"false"
"#;

    #[test]
    fn reads_scalar_keys_case_insensitively() {
        let cfg = JobConfig::parse(SAMPLE);
        assert_eq!(cfg.model_name(), Some("Prostate_MRL"));
        assert_eq!(cfg.model_hash(), Some("9f2c"));
        assert_eq!(cfg.get("NICELEVEL"), Some("3"));
        assert_eq!(cfg.nice_level(), NiceLevel::Set(3));
    }

    #[test]
    fn nice_level_defaults_when_missing_or_malformed() {
        let missing = JobConfig::parse("ModelName:\"x\"\n");
        assert_eq!(missing.nice_level(), NiceLevel::Missing);
        assert_eq!(missing.nice_level().or_default(), DEFAULT_NICE_LEVEL);

        let malformed = JobConfig::parse("NiceLevel:\"high\"\n");
        assert_eq!(
            malformed.nice_level(),
            NiceLevel::Malformed("high".to_string())
        );
        assert_eq!(malformed.nice_level().or_default(), DEFAULT_NICE_LEVEL);
    }

    #[test]
    fn destinations_are_grouped_and_ordered() {
        let cfg = JobConfig::parse(SAMPLE);
        let dests = cfg.destinations(&DestinationKeys::default()).unwrap();

        assert_eq!(
            dests,
            vec![
                Destination::Directory {
                    root: PathBuf::from("C:\\results"),
                    send_scan: false,
                },
                Destination::Directory {
                    root: PathBuf::from("\\\\share\\out"),
                    send_scan: false,
                },
                Destination::Node(DicomNode {
                    host: "10.0.0.5".to_string(),
                    port: 104,
                    ae_title: "PLANNING".to_string(),
                    send_scan: true,
                }),
            ]
        );
    }

    #[test]
    fn incomplete_node_is_rejected_at_load() {
        let cfg = JobConfig::parse("ReturnDicomNodeIP_1:\"10.0.0.5\"\nReturnDicomNodeAET_1:\"X\"\n");
        assert_eq!(
            cfg.destinations(&DestinationKeys::default()),
            Err(JobConfigError::IncompleteDestination {
                group: "1".to_string(),
                field: "port",
            })
        );
    }

    #[test]
    fn bad_port_is_rejected() {
        let cfg = JobConfig::parse(
            "ReturnDicomNodeIP_1:\"h\"\nReturnDicomNodePort_1:\"99999\"\nReturnDicomNodeAET_1:\"X\"\n",
        );
        assert!(matches!(
            cfg.destinations(&DestinationKeys::default()),
            Err(JobConfigError::InvalidPort { .. })
        ));
    }

    #[test]
    fn no_destinations_is_an_error() {
        let cfg = JobConfig::parse("NiceLevel:\"1\"\n");
        assert_eq!(
            cfg.destinations(&DestinationKeys::default()),
            Err(JobConfigError::NoDestinations)
        );
    }

    #[test]
    fn custom_prefixes_are_honoured() {
        let cfg = JobConfig::parse("OutDir_1:\"/tmp/out\"\nOutDirSendScan_1:\"TRUE\"\n");
        let keys = DestinationKeys::new("Node", "OutDir");
        let dests = cfg.destinations(&keys).unwrap();
        assert_eq!(
            dests,
            vec![Destination::Directory {
                root: PathBuf::from("/tmp/out"),
                send_scan: true,
            }]
        );
    }

    #[test]
    fn lines_without_separator_are_skipped() {
        let cfg = JobConfig::parse("garbage line\n\nNiceLevel:\"2\"\n");
        assert_eq!(cfg.nice_level(), NiceLevel::Set(2));
    }
}
