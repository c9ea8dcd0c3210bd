//! Shared fixtures for handler tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ota_auth::{
    AuthClient, AuthError, ClientCredentials, CredentialStore, RetryConfig, TokenResponse,
    TokenTransport, TransportFuture,
};
use ota_protocol::envelope::Message;
use ota_protocol::messages::{
    AbortTransferRequest, FinishTransferRequest, StartTransferRequest, StatusEvent,
    TransferChunkRequest,
};
use ota_protocol::{MessageType, Request};
use tokio::sync::mpsc;

use crate::config::HandlerConfig;
use crate::connection::Sender;
use crate::handler::TransferHandler;
use crate::report::ReportService;

/// Token endpoint stand-in: always grants, or always fails with `error`.
pub(crate) struct StaticTransport {
    pub calls: Arc<AtomicUsize>,
    pub error: Option<AuthError>,
}

impl TokenTransport for StaticTransport {
    fn request_token<'a>(
        &'a self,
        _credentials: &'a ClientCredentials,
        _scope: Option<&'a str>,
    ) -> TransportFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(TokenResponse {
                access_token: "test-token".into(),
                token_type: "Bearer".into(),
                expires_in: Some(3600),
                scope: None,
            }),
        };
        Box::pin(async move { outcome })
    }
}

pub(crate) struct Harness {
    pub handler: Arc<TransferHandler>,
    pub reports: Arc<ReportService>,
    pub events: mpsc::Receiver<Message>,
    pub exchanges: Arc<AtomicUsize>,
}

impl Harness {
    /// Drains every event pushed so far.
    pub fn drain_events(&mut self) -> Vec<StatusEvent> {
        let mut out = Vec::new();
        while let Ok(msg) = self.events.try_recv() {
            assert_eq!(msg.msg_type, MessageType::StatusEvent);
            out.push(msg.parse_payload().unwrap().unwrap());
        }
        out
    }
}

pub(crate) fn harness(config: HandlerConfig) -> Harness {
    harness_with_auth(config, None)
}

pub(crate) fn harness_with_auth(config: HandlerConfig, error: Option<AuthError>) -> Harness {
    let exchanges = Arc::new(AtomicUsize::new(0));
    let client = AuthClient::new(StaticTransport {
        calls: Arc::clone(&exchanges),
        error,
    })
    .with_retry(RetryConfig::no_retry());
    let creds = ClientCredentials::from_parts("device-1", "secret").unwrap();
    let store = Arc::new(CredentialStore::new(client, Some(creds)));

    let reports = Arc::new(ReportService::new());
    let (events, rx) = Sender::channel(crate::SEND_BUFFER_SIZE);
    let handler = Arc::new(TransferHandler::new(
        store,
        Arc::clone(&reports),
        config,
        events,
    ));
    Harness {
        handler,
        reports,
        events: rx,
        exchanges,
    }
}

pub(crate) fn start(id: &str, size: u64) -> Request {
    start_with_checksum(id, size, None)
}

pub(crate) fn start_with_checksum(id: &str, size: u64, checksum: Option<String>) -> Request {
    Request::Start(StartTransferRequest {
        transfer_id: id.into(),
        expected_size: size,
        name: "firmware".into(),
        version: "1.0.0".into(),
        vendor: "acme".into(),
        checksum,
    })
}

pub(crate) fn chunk(id: &str, index: u64, data: &[u8]) -> Request {
    Request::Chunk(TransferChunkRequest {
        transfer_id: id.into(),
        index,
        data: data.to_vec(),
    })
}

pub(crate) fn finish(id: &str) -> Request {
    Request::Finish(FinishTransferRequest {
        transfer_id: id.into(),
    })
}

pub(crate) fn abort(id: &str) -> Request {
    Request::Abort(AbortTransferRequest {
        transfer_id: id.into(),
    })
}

/// Wraps a request in an envelope, as the coordinator would send it.
pub(crate) fn envelope(id: &str, req: &Request) -> Message {
    let msg = match req {
        Request::Start(r) => Message::new(id, MessageType::StartTransfer, Some(r)),
        Request::Chunk(r) => Message::new(id, MessageType::TransferChunk, Some(r)),
        Request::Finish(r) => Message::new(id, MessageType::FinishTransfer, Some(r)),
        Request::Abort(r) => Message::new(id, MessageType::AbortTransfer, Some(r)),
        Request::Notify(r) => Message::new(id, MessageType::Notify, Some(r)),
        Request::Report => Message::new(id, MessageType::GetAllPackages, Option::<&()>::None),
    };
    msg.unwrap()
}
