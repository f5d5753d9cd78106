//! C-STORE service class user over one association per destination.

use std::io::Write;
use std::path::{Path, PathBuf};

use dicom_core::{dicom_value, DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_encoding::TransferSyntaxIndex;
use dicom_object::{DefaultDicomObject, InMemDicomObject};
use dicom_transfer_syntax_registry::{entries, TransferSyntaxRegistry};
use dicom_ul::association::client::{ClientAssociation, ClientAssociationOptions};
use dicom_ul::pdu::{PDataValue, PDataValueType, Pdu, PresentationContextResultReason};

use super::dataset;
use super::{DicomNode, TransmitError};

/// C-STORE response statuses treated as stored.
const STATUS_SUCCESS: u16 = 0x0000;
const STATUS_WARNINGS: [u16; 3] = [0xB000, 0xB007, 0xB006];

const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

/// Sends a batch of DICOM files to one node.
///
/// This is the seam tests replace with a recording fake.
pub trait StoreService: Send {
    fn store(&self, node: &DicomNode, files: &[PathBuf]) -> Result<usize, TransmitError>;
}

/// Real network store using `dicom-ul`.
#[derive(Debug, Clone)]
pub struct DicomStoreScu {
    calling_ae_title: String,
}

impl DicomStoreScu {
    pub fn new(calling_ae_title: impl Into<String>) -> Self {
        Self {
            calling_ae_title: calling_ae_title.into(),
        }
    }
}

/// A file loaded for sending, with what the association must offer for it.
struct Outgoing {
    path: PathBuf,
    object: DefaultDicomObject,
    sop_class: String,
    sop_instance: String,
    transfer_syntax: String,
}

impl Outgoing {
    fn load(path: &Path) -> Result<Self, TransmitError> {
        let object = dataset::open(path)?;
        let meta = object.meta();
        let sop_class = trim_uid(meta.media_storage_sop_class_uid());
        let sop_instance = trim_uid(meta.media_storage_sop_instance_uid());
        let transfer_syntax = trim_uid(meta.transfer_syntax());
        Ok(Self {
            path: path.to_path_buf(),
            object,
            sop_class,
            sop_instance,
            transfer_syntax,
        })
    }
}

fn trim_uid(uid: &str) -> String {
    uid.trim_end_matches('\0').trim().to_string()
}

impl StoreService for DicomStoreScu {
    fn store(&self, node: &DicomNode, files: &[PathBuf]) -> Result<usize, TransmitError> {
        let outgoing = files
            .iter()
            .map(|path| Outgoing::load(path))
            .collect::<Result<Vec<_>, _>>()?;

        // One presentation context per SOP class, in first-seen order.
        let mut contexts: Vec<(String, Vec<String>)> = Vec::new();
        for file in &outgoing {
            match contexts.iter_mut().find(|(class, _)| *class == file.sop_class) {
                Some((_, syntaxes)) => {
                    if !syntaxes.contains(&file.transfer_syntax) {
                        syntaxes.insert(0, file.transfer_syntax.clone());
                    }
                }
                None => {
                    let mut syntaxes = vec![file.transfer_syntax.clone()];
                    for fallback in [EXPLICIT_VR_LE, IMPLICIT_VR_LE] {
                        if !syntaxes.iter().any(|ts| ts == fallback) {
                            syntaxes.push(fallback.to_string());
                        }
                    }
                    contexts.push((file.sop_class.clone(), syntaxes));
                }
            }
        }

        let mut options = ClientAssociationOptions::new()
            .calling_ae_title(self.calling_ae_title.clone())
            .called_ae_title(node.ae_title.clone());
        for (class, syntaxes) in &contexts {
            options = options.with_presentation_context(class.clone(), syntaxes.clone());
        }

        tracing::debug!(node = %node, contexts = contexts.len(), "Opening association");
        let mut association = options
            .establish((node.host.as_str(), node.port))
            .map_err(|e| TransmitError::Association {
                node: node.to_string(),
                reason: e.to_string(),
            })?;

        let mut sent = 0;
        for (index, file) in outgoing.iter().enumerate() {
            let message_id = (index % usize::from(u16::MAX)) as u16 + 1;
            if let Err(e) = store_one(&mut association, &contexts, file, message_id) {
                let _ = association.abort();
                return Err(e);
            }
            sent += 1;
        }

        association.release().map_err(|e| TransmitError::Network(e.to_string()))?;
        tracing::info!(node = %node, files = sent, "Stored files on DICOM node");
        Ok(sent)
    }
}

fn store_one(
    association: &mut ClientAssociation,
    contexts: &[(String, Vec<String>)],
    file: &Outgoing,
    message_id: u16,
) -> Result<(), TransmitError> {
    let position = contexts
        .iter()
        .position(|(class, _)| *class == file.sop_class)
        .ok_or_else(|| no_context(file))?;
    // Proposed contexts are numbered 1, 3, 5, ... in proposal order.
    let context_id = (position * 2 + 1) as u8;
    let accepted = association
        .presentation_contexts()
        .iter()
        .find(|pc| pc.id == context_id && pc.reason == PresentationContextResultReason::Acceptance)
        .ok_or_else(|| no_context(file))?;

    let ts = TransferSyntaxRegistry
        .get(trim_uid(&accepted.transfer_syntax).as_str())
        .ok_or_else(|| TransmitError::Network(format!(
            "unsupported transfer syntax {}",
            accepted.transfer_syntax
        )))?;

    let mut data = Vec::new();
    file.object
        .write_dataset_with_ts(&mut data, ts)
        .map_err(|e| TransmitError::Read {
            path: file.path.clone(),
            reason: e.to_string(),
        })?;

    let command = store_request(&file.sop_class, &file.sop_instance, message_id);
    let mut command_data = Vec::new();
    command
        .write_dataset_with_ts(&mut command_data, &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
        .map_err(|e| TransmitError::Network(e.to_string()))?;

    association
        .send(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: context_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data: command_data,
            }],
        })
        .map_err(|e| TransmitError::Network(e.to_string()))?;

    let mut writer = association.send_pdata(context_id);
    writer
        .write_all(&data)
        .map_err(|e| TransmitError::Network(e.to_string()))?;
    writer
        .finish()
        .map_err(|e| TransmitError::Network(e.to_string()))?;

    let status = match association
        .receive()
        .map_err(|e| TransmitError::Network(e.to_string()))?
    {
        Pdu::PData { data } => {
            let value = data
                .first()
                .ok_or_else(|| TransmitError::Network("empty C-STORE response".to_string()))?;
            let response = InMemDicomObject::read_dataset_with_ts(
                value.data.as_slice(),
                &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
            )
            .map_err(|e| TransmitError::Network(e.to_string()))?;
            response
                .element(tags::STATUS)
                .ok()
                .and_then(|e| e.to_int::<u16>().ok())
                .ok_or_else(|| TransmitError::Network("C-STORE response without status".to_string()))?
        }
        other => {
            return Err(TransmitError::Network(format!(
                "unexpected response PDU: {:?}",
                other
            )))
        }
    };

    if status == STATUS_SUCCESS {
        tracing::debug!(file = %file.path.display(), "C-STORE succeeded");
        Ok(())
    } else if STATUS_WARNINGS.contains(&status) {
        tracing::warn!(file = %file.path.display(), status = %format!("{:#06X}", status), "C-STORE completed with warning");
        Ok(())
    } else {
        Err(TransmitError::StoreStatus {
            file: file.path.clone(),
            status,
        })
    }
}

fn no_context(file: &Outgoing) -> TransmitError {
    TransmitError::NoPresentationContext {
        sop_class: file.sop_class.clone(),
        file: file.path.clone(),
    }
}

fn store_request(sop_class: &str, sop_instance: &str, message_id: u16) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(sop_class),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0001])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(sop_instance),
        ),
    ])
}
