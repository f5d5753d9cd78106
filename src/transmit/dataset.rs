//! Small helpers over DICOM files on disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dicom_dictionary_std::tags;
use dicom_object::{open_file, DefaultDicomObject};

use super::TransmitError;

/// Folder name used when the artifact carries no PatientID.
pub const UNKNOWN_PATIENT: &str = "Unknown";

pub fn open(path: &Path) -> Result<DefaultDicomObject, TransmitError> {
    open_file(path).map_err(|e| TransmitError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Trimmed string value of a tag, if present and non-empty.
pub fn string_value(obj: &DefaultDicomObject, tag: dicom_core::Tag) -> Option<String> {
    let value = obj.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_end_matches('\0').trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// PatientID of a DICOM file, `Unknown` when empty or absent.
pub fn read_patient_id(path: &Path) -> Result<String, TransmitError> {
    let obj = open(path)?;
    Ok(string_value(&obj, tags::PATIENT_ID).unwrap_or_else(|| UNKNOWN_PATIENT.to_string()))
}

/// Every `*.dcm` file (case-insensitive) directly inside `dir`, sorted.
pub fn list_dicom_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_dcm = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"));
        if is_dcm && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
