use serde::{Deserialize, Serialize};

/// Protocol version advertised by the agent.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum encoded envelope size accepted from a channel (72 MB).
///
/// A base64 chunk grows by a third on the wire, so this leaves room for the
/// default 48 MB chunk limit plus the envelope itself.
pub const MAX_MESSAGE_SIZE: usize = 72 * 1024 * 1024;

/// Message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from the coordinator
    #[serde(rename = "start_transfer")]
    StartTransfer,
    #[serde(rename = "transfer_chunk")]
    TransferChunk,
    #[serde(rename = "finish_transfer")]
    FinishTransfer,
    #[serde(rename = "abort_transfer")]
    AbortTransfer,
    #[serde(rename = "notify")]
    Notify,
    #[serde(rename = "get_all_packages")]
    GetAllPackages,

    // Responses to the coordinator
    #[serde(rename = "transfer_started")]
    TransferStarted,
    #[serde(rename = "chunk_ack")]
    ChunkAck,
    #[serde(rename = "transfer_finished")]
    TransferFinished,
    #[serde(rename = "transfer_aborted")]
    TransferAborted,
    #[serde(rename = "status_response")]
    StatusResponse,
    #[serde(rename = "package_list")]
    PackageList,
    #[serde(rename = "error")]
    Error,

    // Events pushed without a request
    #[serde(rename = "status_event")]
    StatusEvent,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Typed failure reported in [`ErrorBody::kind`](crate::ErrorBody).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    UnknownTransfer,
    DuplicateTransfer,
    IncompleteTransfer,
    LimitExceeded,
    IntegrityViolation,
    VerificationFailed,
    Internal,
    NotImplemented,
    Timeout,
}

impl ErrorKind {
    /// HTTP-like numeric code carried next to the kind.
    pub fn code(self) -> i32 {
        match self {
            Self::BadRequest => ERR_CODE_BAD_REQUEST,
            Self::Unauthorized => ERR_CODE_UNAUTHORIZED,
            Self::UnknownTransfer => ERR_CODE_NOT_FOUND,
            Self::DuplicateTransfer => ERR_CODE_CONFLICT,
            Self::IncompleteTransfer => ERR_CODE_PRECONDITION_FAILED,
            Self::LimitExceeded => ERR_CODE_TOO_LARGE,
            Self::IntegrityViolation | Self::VerificationFailed => ERR_CODE_UNPROCESSABLE,
            Self::Internal => ERR_CODE_INTERNAL,
            Self::NotImplemented => ERR_CODE_NOT_IMPLEMENTED,
            Self::Timeout => ERR_CODE_TIMEOUT,
        }
    }

    /// Wire name, as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::UnknownTransfer => "unknown_transfer",
            Self::DuplicateTransfer => "duplicate_transfer",
            Self::IncompleteTransfer => "incomplete_transfer",
            Self::LimitExceeded => "limit_exceeded",
            Self::IntegrityViolation => "integrity_violation",
            Self::VerificationFailed => "verification_failed",
            Self::Internal => "internal",
            Self::NotImplemented => "not_implemented",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common error codes.
pub const ERR_CODE_BAD_REQUEST: i32 = 400;
pub const ERR_CODE_UNAUTHORIZED: i32 = 401;
pub const ERR_CODE_NOT_FOUND: i32 = 404;
pub const ERR_CODE_CONFLICT: i32 = 409;
pub const ERR_CODE_PRECONDITION_FAILED: i32 = 412;
pub const ERR_CODE_TOO_LARGE: i32 = 413;
pub const ERR_CODE_UNPROCESSABLE: i32 = 422;
pub const ERR_CODE_INTERNAL: i32 = 500;
pub const ERR_CODE_NOT_IMPLEMENTED: i32 = 501;
pub const ERR_CODE_TIMEOUT: i32 = 504;
