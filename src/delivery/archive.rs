use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

/// Copy the artifact and the per-job config into a fresh
/// `<root>/<YYYYMMDD>_<PatientID>_<NN>` folder, NN counting from 01.
pub fn archive_artifact(
    root: &Path,
    date: NaiveDate,
    patient_id: &str,
    artifact: &Path,
    job_config: &Path,
) -> io::Result<PathBuf> {
    let target = next_free_folder(root, date, patient_id);
    fs::create_dir_all(&target)?;
    for file in [artifact, job_config] {
        if let Some(name) = file.file_name() {
            fs::copy(file, target.join(name))?;
        }
    }
    Ok(target)
}

fn next_free_folder(root: &Path, date: NaiveDate, patient_id: &str) -> PathBuf {
    let base = format!("{}_{}", date.format("%Y%m%d"), patient_id);
    (1..)
        .map(|n: u32| root.join(format!("{}_{:02}", base, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| root.join(base))
}
