//! Placeholder RT Structure Sets for failed jobs.
//!
//! When inference fails the planning system still receives a structure set,
//! referencing the source series, whose only ROI is a single point named after
//! the failure reason. Operators see the reason where they would otherwise
//! see the contours.

use std::path::{Path, PathBuf};

use chrono::Local;
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::mem::InMemElement;
use dicom_object::{DefaultDicomObject, FileMetaTableBuilder, InMemDicomObject};
use thiserror::Error;
use uuid::Uuid;

use crate::config::ProvenanceConfig;
use crate::transmit::dataset;
use crate::transmit::TransmitError;

/// Maximum length of a DICOM UID.
const MAX_UID_LEN: usize = 64;

/// Maximum length of a LO value (ROI name, model name).
const MAX_LO_LEN: usize = 64;

/// Component of the referenced study in RT Referenced Study Sequence.
const STUDY_COMPONENT_MANAGEMENT: &str = "1.2.840.10008.3.1.2.3.1";

/// Patient and study attributes carried over from the source images.
const COPIED_TAGS: [Tag; 11] = [
    tags::PATIENT_NAME,
    tags::PATIENT_ID,
    tags::PATIENT_BIRTH_DATE,
    tags::PATIENT_SEX,
    tags::STUDY_INSTANCE_UID,
    tags::STUDY_DATE,
    tags::STUDY_TIME,
    tags::STUDY_ID,
    tags::STUDY_DESCRIPTION,
    tags::ACCESSION_NUMBER,
    tags::REFERRING_PHYSICIAN_NAME,
];

#[derive(Error, Debug)]
pub enum PlaceholderError {
    #[error("No source images in {0}")]
    NoSourceImages(PathBuf),

    #[error("Could not list source images in {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Source(#[from] TransmitError),

    #[error("Could not write placeholder {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

/// Builds the placeholder structure set for a job's source series.
#[derive(Debug, Clone)]
pub struct ErrorStructBuilder {
    provenance: ProvenanceConfig,
}

impl ErrorStructBuilder {
    pub fn new(provenance: ProvenanceConfig) -> Self {
        Self { provenance }
    }

    /// Fresh SOP Instance UID: the org root followed by the decimal digits of
    /// a random UUID, cut to 64 characters.
    pub fn generate_uid(&self) -> String {
        let mut uid = format!("{}{}", self.provenance.uid_root, Uuid::new_v4().as_u128());
        uid.truncate(MAX_UID_LEN);
        uid
    }

    /// Write `rtstruct_<uid>.dcm` into `out_dir` and return its path.
    pub fn build(
        &self,
        source_dir: &Path,
        out_dir: &Path,
        reason: &str,
    ) -> Result<PathBuf, PlaceholderError> {
        let images = dataset::list_dicom_files(source_dir).map_err(|source| {
            PlaceholderError::List {
                path: source_dir.to_path_buf(),
                source,
            }
        })?;
        let first_path = images
            .first()
            .ok_or_else(|| PlaceholderError::NoSourceImages(source_dir.to_path_buf()))?;
        let first = dataset::open(first_path)?;

        let mut references = Vec::with_capacity(images.len());
        for image in &images {
            let obj = dataset::open(image)?;
            let class = dataset::string_value(&obj, tags::SOP_CLASS_UID).unwrap_or_default();
            let instance =
                dataset::string_value(&obj, tags::SOP_INSTANCE_UID).unwrap_or_default();
            references.push((class, instance));
        }

        let sop_instance_uid = self.generate_uid();
        let obj = self.structure_set(&first, &references, &sop_instance_uid, reason);
        let path = out_dir.join(format!("rtstruct_{}.dcm", sop_instance_uid));

        let file = obj
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::RT_STRUCTURE_SET_STORAGE)
                    .media_storage_sop_instance_uid(sop_instance_uid.as_str()),
            )
            .map_err(|e| PlaceholderError::Write {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        file.write_to_file(&path)
            .map_err(|e| PlaceholderError::Write {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(path = %path.display(), reason, "Created placeholder RTStruct");
        Ok(path)
    }

    fn structure_set(
        &self,
        first: &DefaultDicomObject,
        references: &[(String, String)],
        sop_instance_uid: &str,
        reason: &str,
    ) -> InMemDicomObject {
        let now = Local::now();
        let date = now.format("%Y%m%d").to_string();
        let time = now.format("%H%M%S").to_string();
        let frame_of_reference = dataset::string_value(first, tags::FRAME_OF_REFERENCE_UID)
            .unwrap_or_else(|| self.generate_uid());
        let study_uid = dataset::string_value(first, tags::STUDY_INSTANCE_UID).unwrap_or_default();
        let series_uid = dataset::string_value(first, tags::SERIES_INSTANCE_UID).unwrap_or_default();
        let position = dataset::string_value(first, tags::IMAGE_POSITION_PATIENT)
            .unwrap_or_else(|| "0\\0\\0".to_string());
        let roi_name = truncate(reason, MAX_LO_LEN);
        let model_name = truncate(
            &format!("{}{}", self.provenance.model_name_prefix, reason),
            MAX_LO_LEN,
        );

        let mut obj = InMemDicomObject::new_empty();
        for tag in COPIED_TAGS {
            if let Ok(element) = first.element(tag) {
                obj.put(element.clone());
            }
        }

        obj.put(text(tags::SOP_CLASS_UID, VR::UI, uids::RT_STRUCTURE_SET_STORAGE));
        obj.put(text(tags::SOP_INSTANCE_UID, VR::UI, sop_instance_uid));
        obj.put(text(tags::MODALITY, VR::CS, "RTSTRUCT"));
        obj.put(text(tags::SERIES_INSTANCE_UID, VR::UI, &self.generate_uid()));
        obj.put(text(tags::SERIES_NUMBER, VR::IS, "1"));
        obj.put(text(tags::SERIES_DATE, VR::DA, &date));
        obj.put(text(tags::SERIES_TIME, VR::TM, &time));
        obj.put(text(tags::SERIES_DESCRIPTION, VR::LO, &roi_name));
        obj.put(text(tags::MANUFACTURER, VR::LO, &self.provenance.manufacturer));
        obj.put(text(tags::INSTITUTION_NAME, VR::LO, &self.provenance.institution_name));
        obj.put(text(tags::MANUFACTURER_MODEL_NAME, VR::LO, &model_name));
        obj.put(text(tags::STRUCTURE_SET_LABEL, VR::SH, "ERROR"));
        obj.put(text(tags::STRUCTURE_SET_DATE, VR::DA, &date));
        obj.put(text(tags::STRUCTURE_SET_TIME, VR::TM, &time));

        let contour_images: Vec<InMemDicomObject> = references
            .iter()
            .map(|(class, instance)| image_reference(class, instance))
            .collect();
        let first_image = references
            .first()
            .map(|(class, instance)| image_reference(class, instance));

        let mut referenced_series = InMemDicomObject::new_empty();
        referenced_series.put(text(tags::SERIES_INSTANCE_UID, VR::UI, &series_uid));
        referenced_series.put(sequence(tags::CONTOUR_IMAGE_SEQUENCE, contour_images));

        let mut referenced_study = InMemDicomObject::new_empty();
        referenced_study.put(text(
            tags::REFERENCED_SOP_CLASS_UID,
            VR::UI,
            STUDY_COMPONENT_MANAGEMENT,
        ));
        referenced_study.put(text(tags::REFERENCED_SOP_INSTANCE_UID, VR::UI, &study_uid));
        referenced_study.put(sequence(
            tags::RT_REFERENCED_SERIES_SEQUENCE,
            vec![referenced_series],
        ));

        let mut frame = InMemDicomObject::new_empty();
        frame.put(text(tags::FRAME_OF_REFERENCE_UID, VR::UI, &frame_of_reference));
        frame.put(sequence(
            tags::RT_REFERENCED_STUDY_SEQUENCE,
            vec![referenced_study],
        ));
        obj.put(sequence(
            tags::REFERENCED_FRAME_OF_REFERENCE_SEQUENCE,
            vec![frame],
        ));

        let mut roi = InMemDicomObject::new_empty();
        roi.put(text(tags::ROI_NUMBER, VR::IS, "1"));
        roi.put(text(
            tags::REFERENCED_FRAME_OF_REFERENCE_UID,
            VR::UI,
            &frame_of_reference,
        ));
        roi.put(text(tags::ROI_NAME, VR::LO, &roi_name));
        roi.put(text(tags::ROI_GENERATION_ALGORITHM, VR::CS, "AUTOMATIC"));
        obj.put(sequence(tags::STRUCTURE_SET_ROI_SEQUENCE, vec![roi]));

        let mut contour = InMemDicomObject::new_empty();
        if let Some(image) = first_image {
            contour.put(sequence(tags::CONTOUR_IMAGE_SEQUENCE, vec![image]));
        }
        contour.put(text(tags::CONTOUR_GEOMETRIC_TYPE, VR::CS, "POINT"));
        contour.put(text(tags::NUMBER_OF_CONTOUR_POINTS, VR::IS, "1"));
        contour.put(text(tags::CONTOUR_DATA, VR::DS, &position));

        let mut roi_contour = InMemDicomObject::new_empty();
        roi_contour.put(text(tags::ROI_DISPLAY_COLOR, VR::IS, "255\\0\\0"));
        roi_contour.put(sequence(tags::CONTOUR_SEQUENCE, vec![contour]));
        roi_contour.put(text(tags::REFERENCED_ROI_NUMBER, VR::IS, "1"));
        obj.put(sequence(tags::ROI_CONTOUR_SEQUENCE, vec![roi_contour]));

        let mut observation = InMemDicomObject::new_empty();
        observation.put(text(tags::OBSERVATION_NUMBER, VR::IS, "1"));
        observation.put(text(tags::REFERENCED_ROI_NUMBER, VR::IS, "1"));
        observation.put(text(tags::RTROI_INTERPRETED_TYPE, VR::CS, "ORGAN"));
        observation.put(text(tags::ROI_INTERPRETER, VR::PN, ""));
        obj.put(sequence(
            tags::RTROI_OBSERVATIONS_SEQUENCE,
            vec![observation],
        ));

        obj
    }
}

fn image_reference(class: &str, instance: &str) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    item.put(text(tags::REFERENCED_SOP_CLASS_UID, VR::UI, class));
    item.put(text(tags::REFERENCED_SOP_INSTANCE_UID, VR::UI, instance));
    item
}

fn text(tag: Tag, vr: VR, value: &str) -> InMemElement {
    DataElement::new(tag, vr, PrimitiveValue::from(value))
}

fn sequence(tag: Tag, items: Vec<InMemDicomObject>) -> InMemElement {
    DataElement::new(tag, VR::SQ, DataSetSequence::from(items))
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_uses_root_and_fits_length() {
        let builder = ErrorStructBuilder::new(ProvenanceConfig {
            uid_root: "1.2.826.0.1.3680043.9.7225.".to_string(),
            ..ProvenanceConfig::default()
        });
        let uid = builder.generate_uid();
        assert!(uid.starts_with("1.2.826.0.1.3680043.9.7225."));
        assert!(uid.len() <= MAX_UID_LEN);
        assert!(uid.chars().all(|c| c.is_ascii_digit() || c == '.'));
        assert_ne!(uid, builder.generate_uid());
    }

    #[test]
    fn empty_source_directory_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let builder = ErrorStructBuilder::new(ProvenanceConfig::default());
        assert!(matches!(
            builder.build(dir.path(), dir.path(), "E3_10"),
            Err(PlaceholderError::NoSourceImages(_))
        ));
    }
}
