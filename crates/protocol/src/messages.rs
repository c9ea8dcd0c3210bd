use serde::{Deserialize, Serialize};

use crate::types::{PackageRecord, TransferId, TransferStatus, TransferStatusInfo};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Announces a new package transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransferRequest {
    pub transfer_id: TransferId,
    pub expected_size: u64,
    pub name: String,
    pub version: String,
    pub vendor: String,
    /// SHA-256 hex digest of the whole package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Delivers one chunk of package data.
///
/// The `data` field is base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferChunkRequest {
    pub transfer_id: TransferId,
    pub index: u64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Finalizes a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishTransferRequest {
    pub transfer_id: TransferId,
}

/// Aborts a transfer and discards its buffered data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortTransferRequest {
    pub transfer_id: TransferId,
}

/// Asks for the status of one transfer, or of every active one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<TransferId>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Acknowledges a chunk with the transfer's current progress.
///
/// `received_bytes` lets a coordinator resume after a disconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub transfer_id: TransferId,
    pub index: u64,
    pub received_bytes: u64,
    pub expected_size: u64,
}

/// Acknowledges an abort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAborted {
    pub transfer_id: TransferId,
    /// `true` when the transfer had already been aborted.
    #[serde(default, skip_serializing_if = "is_false")]
    pub already_aborted: bool,
}

/// Status of the requested transfers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub transfers: Vec<TransferStatusInfo>,
}

/// Every package known to the agent, oldest completion first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageListResponse {
    pub packages: Vec<PackageRecord>,
}

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

/// Push notification for a transfer state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub transfer_id: TransferId,
    pub status: TransferStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

fn is_false(v: &bool) -> bool {
    !*v
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
