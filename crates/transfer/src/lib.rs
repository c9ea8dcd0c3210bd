//! Chunked package reassembly with per-transfer locking.
//!
//! A [`Transfer`] buffers indexed chunks until the coordinator finishes or
//! aborts it. The [`TransferTable`] owns every active transfer behind its own
//! lock and remembers retired ids so they can never be reused.

mod chunked;
mod sink;
mod table;
mod types;
mod validation;

pub use chunked::{Payload, checksum_bytes, is_sha256_hex};
pub use sink::{PackageSink, SinkError};
pub use table::{AbortOutcome, TransferHandle, TransferTable};
pub use types::{ChunkOutcome, PackageMeta, Transfer};
pub use validation::{validate_meta, validate_name_component};

use ota_protocol::{ErrorKind, TransferId};

/// Errors produced while handling a transfer message.
///
/// Each variant maps onto one wire [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unknown transfer: {0}")]
    UnknownTransfer(TransferId),

    #[error("duplicate transfer: {0}")]
    DuplicateTransfer(TransferId),

    #[error("transfer {id} incomplete: {received} of {expected} bytes received")]
    IncompleteTransfer {
        id: TransferId,
        received: u64,
        expected: u64,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::UnknownTransfer(_) => ErrorKind::UnknownTransfer,
            Self::DuplicateTransfer(_) => ErrorKind::DuplicateTransfer,
            Self::IncompleteTransfer { .. } => ErrorKind::IncompleteTransfer,
            Self::LimitExceeded(_) => ErrorKind::LimitExceeded,
            Self::IntegrityViolation(_) => ErrorKind::IntegrityViolation,
            Self::VerificationFailed(_) => ErrorKind::VerificationFailed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Internal(_) => ErrorKind::Internal,
            Self::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_wire_codes() {
        let id = TransferId::from("t1");
        assert_eq!(TransferError::UnknownTransfer(id.clone()).kind().code(), 404);
        assert_eq!(TransferError::DuplicateTransfer(id.clone()).kind().code(), 409);
        assert_eq!(
            TransferError::IncompleteTransfer {
                id,
                received: 4,
                expected: 10
            }
            .kind(),
            ErrorKind::IncompleteTransfer
        );
        assert_eq!(TransferError::Unauthorized("x".into()).kind().code(), 401);
    }

    #[test]
    fn incomplete_message_reports_progress() {
        let err = TransferError::IncompleteTransfer {
            id: "t2".into(),
            received: 4,
            expected: 10,
        };
        assert_eq!(err.to_string(), "transfer t2 incomplete: 4 of 10 bytes received");
    }
}
