//! Typed view of an inbound envelope.

use crate::constants::MessageType;
use crate::envelope::Message;
use crate::messages::{
    AbortTransferRequest, FinishTransferRequest, NotifyRequest, StartTransferRequest,
    TransferChunkRequest,
};
use crate::types::TransferId;

/// Errors turning an envelope into a [`Request`].
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("missing payload for {0:?}")]
    MissingPayload(MessageType),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("unsupported message type: {0:?}")]
    Unsupported(MessageType),
}

/// Every message the coordinator may send.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Start(StartTransferRequest),
    Chunk(TransferChunkRequest),
    Finish(FinishTransferRequest),
    Abort(AbortTransferRequest),
    Notify(NotifyRequest),
    Report,
}

impl Request {
    /// Parses the envelope's payload according to its type.
    pub fn from_message(msg: &Message) -> Result<Self, RequestError> {
        match msg.msg_type {
            MessageType::StartTransfer => Ok(Self::Start(required(msg)?)),
            MessageType::TransferChunk => Ok(Self::Chunk(required(msg)?)),
            MessageType::FinishTransfer => Ok(Self::Finish(required(msg)?)),
            MessageType::AbortTransfer => Ok(Self::Abort(required(msg)?)),
            // An absent payload means "every active transfer".
            MessageType::Notify => Ok(Self::Notify(msg.parse_payload()?.unwrap_or_default())),
            MessageType::GetAllPackages => Ok(Self::Report),
            ref other => Err(RequestError::Unsupported(other.clone())),
        }
    }

    /// The transfer this request targets, if any.
    pub fn transfer_id(&self) -> Option<&TransferId> {
        match self {
            Self::Start(r) => Some(&r.transfer_id),
            Self::Chunk(r) => Some(&r.transfer_id),
            Self::Finish(r) => Some(&r.transfer_id),
            Self::Abort(r) => Some(&r.transfer_id),
            Self::Notify(r) => r.transfer_id.as_ref(),
            Self::Report => None,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Chunk(_) => "chunk",
            Self::Finish(_) => "finish",
            Self::Abort(_) => "abort",
            Self::Notify(_) => "notify",
            Self::Report => "report",
        }
    }
}

fn required<T: for<'de> serde::Deserialize<'de>>(msg: &Message) -> Result<T, RequestError> {
    msg.parse_payload()?
        .ok_or_else(|| RequestError::MissingPayload(msg.msg_type.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: &str) -> Message {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_start() {
        let msg = envelope(
            r#"{"id":"1","type":"start_transfer","payload":{"transferId":"t1","expectedSize":10,"name":"a","version":"1","vendor":"v"}}"#,
        );
        match Request::from_message(&msg).unwrap() {
            Request::Start(r) => {
                assert_eq!(r.transfer_id.as_str(), "t1");
                assert_eq!(r.expected_size, 10);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn parses_chunk() {
        let msg = envelope(
            r#"{"id":"2","type":"transfer_chunk","payload":{"transferId":"t1","index":1,"data":"AAEC"}}"#,
        );
        let req = Request::from_message(&msg).unwrap();
        assert_eq!(req.kind(), "chunk");
        assert_eq!(req.transfer_id().unwrap().as_str(), "t1");
        match req {
            Request::Chunk(c) => assert_eq!(c.data, vec![0, 1, 2]),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn notify_without_payload_targets_all() {
        let msg = envelope(r#"{"id":"3","type":"notify"}"#);
        let req = Request::from_message(&msg).unwrap();
        assert_eq!(req, Request::Notify(NotifyRequest::default()));
        assert!(req.transfer_id().is_none());
    }

    #[test]
    fn report_ignores_payload() {
        let msg = envelope(r#"{"id":"4","type":"get_all_packages","payload":{}}"#);
        assert_eq!(Request::from_message(&msg).unwrap(), Request::Report);
    }

    #[test]
    fn finish_requires_payload() {
        let msg = envelope(r#"{"id":"5","type":"finish_transfer"}"#);
        assert!(matches!(
            Request::from_message(&msg),
            Err(RequestError::MissingPayload(MessageType::FinishTransfer))
        ));
    }

    #[test]
    fn malformed_payload_is_invalid() {
        let msg = envelope(r#"{"id":"6","type":"abort_transfer","payload":{"id":7}}"#);
        assert!(matches!(
            Request::from_message(&msg),
            Err(RequestError::InvalidPayload(_))
        ));
    }

    #[test]
    fn responses_are_unsupported_inbound() {
        let msg = envelope(r#"{"id":"7","type":"chunk_ack"}"#);
        assert!(matches!(
            Request::from_message(&msg),
            Err(RequestError::Unsupported(MessageType::ChunkAck))
        ));
        let msg = envelope(r#"{"id":"8","type":"reboot"}"#);
        assert!(matches!(
            Request::from_message(&msg),
            Err(RequestError::Unsupported(MessageType::Unknown))
        ));
    }
}
