use std::fs;
use std::path::{Path, PathBuf};

use super::dataset::read_patient_id;
use super::{mask_path, TransmitError};

/// Copy `files` into `<root>/<PatientID>/`, PatientID read from `artifact`.
///
/// The root must exist; the patient folder is created on demand. Returns
/// the number of files copied.
pub fn copy_to_directory(
    root: &Path,
    artifact: &Path,
    files: &[PathBuf],
) -> Result<usize, TransmitError> {
    if !root.is_dir() {
        return Err(TransmitError::MissingDirectory(mask_path(root)));
    }
    let patient_id = read_patient_id(artifact)?;
    let target = root.join(sanitize(&patient_id));
    fs::create_dir_all(&target).map_err(|source| TransmitError::CreateDir {
        dir: mask_path(&target),
        source,
    })?;

    for file in files {
        let Some(name) = file.file_name() else {
            continue;
        };
        fs::copy(file, target.join(name)).map_err(|source| TransmitError::Copy {
            file: file.clone(),
            source,
        })?;
    }
    tracing::debug!(
        destination = %mask_path(&target),
        files = files.len(),
        "Copied files to return directory"
    );
    Ok(files.len())
}

/// PatientIDs become folder names; path separators must not escape the root.
fn sanitize(patient_id: &str) -> String {
    let cleaned: String = patient_id
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => super::dataset::UNKNOWN_PATIENT.to_string(),
        _ => cleaned,
    }
}
