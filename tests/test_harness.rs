//! Shared fixtures for the daemon integration tests.
//!
//! Builds a scratch shared directory with job folders, writes small but
//! valid DICOM files, and provides a recording DICOM store.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use tempfile::TempDir;
use uuid::Uuid;

use rtqueue::config::{
    DaemonConfig, LoggingConfig, ProvenanceConfig, ReturnServiceConfig, WatchdogConfig,
};
use rtqueue::transmit::{DicomNode, StoreService, TransmitError};

/// A scratch workspace: the shared scan directory plus room for
/// destinations, archives and logs.
pub struct Workspace {
    pub root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        for dir in ["scan", "logs", "returns", "archive"] {
            fs::create_dir(root.path().join(dir)).unwrap();
        }
        Self { root }
    }

    pub fn scan_dir(&self) -> PathBuf {
        self.root.path().join("scan")
    }

    pub fn returns_dir(&self) -> PathBuf {
        self.root.path().join("returns")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.path().join("archive")
    }

    pub fn job_path(&self, name: &str) -> PathBuf {
        self.scan_dir().join(name)
    }

    /// Create a job folder, optionally with a per-job config.
    pub fn make_job(&self, name: &str, config: Option<&str>) -> PathBuf {
        let path = self.job_path(name);
        fs::create_dir(&path).unwrap();
        if let Some(config) = config {
            fs::write(path.join("aiconfig.txt"), config).unwrap();
        }
        path
    }

    pub fn daemon_config(&self) -> DaemonConfig {
        DaemonConfig {
            scan_directory: self.scan_dir(),
            scan_interval_sec: 1,
            ai_config_filename: "aiconfig.txt".to_string(),
            error_file: "error.txt".to_string(),
            max_restarts: 5,
            max_restart_window_sec: 360,
            shutdown_timeout_sec: 5,
            logging: LoggingConfig {
                dir: self.root.path().join("logs"),
                level: "debug".to_string(),
                days_to_keep: 7,
                network_level: "warn".to_string(),
            },
        }
    }

    pub fn watchdog_config(&self, command: &str, args: &[&str], dry_run: bool) -> WatchdogConfig {
        WatchdogConfig {
            daemon: self.daemon_config(),
            inference_command: PathBuf::from(command),
            inference_args: args.iter().map(|a| a.to_string()).collect(),
            dry_run,
        }
    }

    pub fn return_config(&self, archive: bool) -> ReturnServiceConfig {
        ReturnServiceConfig {
            daemon: self.daemon_config(),
            ae_title: "RTQUEUE".to_string(),
            return_dicom_key: "ReturnDicomNode".to_string(),
            return_directory_key: "ReturnDirectory".to_string(),
            days_before_deletion: 30,
            do_archive: archive,
            archive_directory: archive.then(|| self.archive_dir()),
            provenance: ProvenanceConfig::default(),
        }
    }
}

/// Per-job config returning to one directory and one DICOM node.
pub fn return_config_text(directory: &Path, node_host: &str, send_scan: bool) -> String {
    format!(
        "ModelName:\"Prostate\"\n\
         ReturnDirectory_1:\"{}\"\n\
         ReturnDicomNodeIP_1:\"{}\"\n\
         ReturnDicomNodePort_1:\"104\"\n\
         ReturnDicomNodeAET_1:\"PLANNING\"\n\
         ReturnDicomNodeSendScan_1:\"{}\"\n",
        directory.display(),
        node_host,
        if send_scan { "True" } else { "False" }
    )
}

pub fn set_mtime(path: &Path, time: SystemTime) {
    fs::File::open(path).unwrap().set_modified(time).unwrap();
}

pub fn days_ago(days: u64) -> SystemTime {
    SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60)
}

/// Study-level identifiers shared by every file of one fake patient.
pub struct Study {
    pub patient_id: String,
    pub study_uid: String,
    pub series_uid: String,
    pub frame_of_reference_uid: String,
}

impl Study {
    pub fn new(patient_id: &str) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            study_uid: new_uid(),
            series_uid: new_uid(),
            frame_of_reference_uid: new_uid(),
        }
    }
}

pub fn new_uid() -> String {
    let mut uid = format!("2.25.{}", Uuid::new_v4().as_u128());
    uid.truncate(64);
    uid
}

fn put(obj: &mut InMemDicomObject, tag: dicom_core::Tag, vr: VR, value: &str) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

/// Write a minimal DICOM file of the given SOP class.
pub fn write_dicom(path: &Path, sop_class: &str, modality: &str, study: &Study, slice: u32) {
    let sop_instance = new_uid();
    let mut obj = InMemDicomObject::new_empty();
    put(&mut obj, tags::SOP_CLASS_UID, VR::UI, sop_class);
    put(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, &sop_instance);
    put(&mut obj, tags::MODALITY, VR::CS, modality);
    put(&mut obj, tags::PATIENT_NAME, VR::PN, "Test^Patient");
    put(&mut obj, tags::PATIENT_ID, VR::LO, &study.patient_id);
    put(&mut obj, tags::STUDY_INSTANCE_UID, VR::UI, &study.study_uid);
    put(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, &study.series_uid);
    put(&mut obj, tags::FRAME_OF_REFERENCE_UID, VR::UI, &study.frame_of_reference_uid);
    put(
        &mut obj,
        tags::IMAGE_POSITION_PATIENT,
        VR::DS,
        &format!("-250\\-250\\{}", slice * 3),
    );

    let file = obj
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(sop_class)
                .media_storage_sop_instance_uid(sop_instance.as_str()),
        )
        .unwrap();
    file.write_to_file(path).unwrap();
}

/// Fill `<job>/dcminput/` with `count` CT slices.
pub fn write_scan(job: &Path, study: &Study, count: u32) {
    let input = job.join("dcminput");
    fs::create_dir_all(&input).unwrap();
    for slice in 0..count {
        write_dicom(
            &input.join(format!("CT{:03}.dcm", slice)),
            uids::CT_IMAGE_STORAGE,
            "CT",
            study,
            slice,
        );
    }
}

/// Write an inference result into `<job>/dcmoutput/<name>`.
pub fn write_result(job: &Path, study: &Study, name: &str) -> PathBuf {
    let output = job.join("dcmoutput");
    fs::create_dir_all(&output).unwrap();
    let path = output.join(name);
    write_dicom(&path, uids::RT_STRUCTURE_SET_STORAGE, "RTSTRUCT", study, 0);
    path
}

/// Store that records every call and fails for the listed hosts.
#[derive(Clone, Default)]
pub struct RecordingStore {
    pub calls: Arc<Mutex<Vec<(DicomNode, Vec<PathBuf>)>>>,
    pub failing_hosts: Vec<String>,
}

impl RecordingStore {
    pub fn failing(host: &str) -> Self {
        Self {
            failing_hosts: vec![host.to_string()],
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(DicomNode, Vec<PathBuf>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl StoreService for RecordingStore {
    fn store(&self, node: &DicomNode, files: &[PathBuf]) -> Result<usize, TransmitError> {
        self.calls
            .lock()
            .unwrap()
            .push((node.clone(), files.to_vec()));
        if self.failing_hosts.contains(&node.host) {
            return Err(TransmitError::Association {
                node: node.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(files.len())
    }
}
