use serde::{Deserialize, Serialize};

use crate::error::{ParcelError, ParcelResult};

/// Identifier of a stored message
pub type MessageId = u64;

/// One attachment descriptor, as recorded by the metadata store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentEntry {
    /// Attachment index within its message
    pub index: u64,
    /// Size of the decrypted attachment in bytes
    pub size: u64,
    /// Expected content digest (hex)
    pub hash: String,
}

impl AttachmentEntry {
    pub fn new(index: u64, size: u64, hash: &[u8]) -> Self {
        Self {
            index,
            size,
            hash: hex::encode(hash),
        }
    }

    /// Decode the expected digest.
    pub fn expected_hash(&self) -> ParcelResult<Vec<u8>> {
        hex::decode(&self.hash).map_err(|e| {
            ParcelError::DatabaseIntegrity(format!(
                "attachment {}: invalid hash '{}': {e}",
                self.index, self.hash
            ))
        })
    }
}

/// Ordered attachment list of one message.
///
/// The decrypted attachment stream of the message is the concatenation of all
/// attachments in this order, so the sizes must add up to exactly the number
/// of bytes that stream produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentManifest {
    pub message_id: MessageId,
    pub attachments: Vec<AttachmentEntry>,
}

impl AttachmentManifest {
    pub fn new(message_id: MessageId, attachments: Vec<AttachmentEntry>) -> Self {
        Self {
            message_id,
            attachments,
        }
    }

    /// Sum of all attachment sizes, saturating at `u64::MAX`
    pub fn total_size(&self) -> u64 {
        self.attachments
            .iter()
            .fold(0u64, |total, a| total.saturating_add(a.size))
    }

    pub fn len(&self) -> usize {
        self.attachments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> ParcelResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| ParcelError::Other(anyhow::anyhow!("manifest serialization: {e}")))
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> ParcelResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| ParcelError::DatabaseIntegrity(format!("manifest deserialization: {e}")))
    }
}
