//! The transfer state machine behind the credential gate.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use ota_auth::CredentialStore;
use ota_protocol::constants::MessageType;
use ota_protocol::envelope::Message;
use ota_protocol::messages::{
    ChunkAck, PackageListResponse, StartTransferRequest, StatusEvent, StatusResponse,
    TransferAborted, TransferChunkRequest,
};
use ota_protocol::{PackageRecord, Request, RequestError, TransferId, TransferStatus, TransferStatusInfo};
use ota_transfer::{
    AbortOutcome, ChunkOutcome, PackageMeta, PackageSink, Payload, Transfer, TransferError,
    TransferTable, validate_meta,
};
use tracing::{debug, info, warn};

use crate::config::{ChecksumPolicy, HandlerConfig};
use crate::connection::Sender;
use crate::report::ReportService;

/// Successful outcome of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Started(TransferStatusInfo),
    ChunkAck(ChunkAck),
    Finished(PackageRecord),
    Aborted(TransferAborted),
    Status(StatusResponse),
    Packages(PackageListResponse),
}

impl Reply {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::Started(_) => MessageType::TransferStarted,
            Self::ChunkAck(_) => MessageType::ChunkAck,
            Self::Finished(_) => MessageType::TransferFinished,
            Self::Aborted(_) => MessageType::TransferAborted,
            Self::Status(_) => MessageType::StatusResponse,
            Self::Packages(_) => MessageType::PackageList,
        }
    }

    /// Builds the response envelope for `req`.
    pub fn to_message(&self, req: &Message) -> Result<Message, serde_json::Error> {
        let msg_type = self.msg_type();
        match self {
            Self::Started(p) => req.reply(msg_type, Some(p)),
            Self::ChunkAck(p) => req.reply(msg_type, Some(p)),
            Self::Finished(p) => req.reply(msg_type, Some(p)),
            Self::Aborted(p) => req.reply(msg_type, Some(p)),
            Self::Status(p) => req.reply(msg_type, Some(p)),
            Self::Packages(p) => req.reply(msg_type, Some(p)),
        }
    }
}

enum Verification {
    Verified { checksum: String },
    Mismatch { expected: String, actual: String },
}

/// Validates and applies coordinator requests.
///
/// Every request first passes [`CredentialStore::authorize`]; a failure there
/// is reported as `unauthorized` before any transfer state is read or
/// written. State transitions are pushed to the coordinator as
/// `status_event` messages through the events sender.
pub struct TransferHandler {
    credentials: Arc<CredentialStore>,
    table: TransferTable,
    reports: Arc<ReportService>,
    sink: Option<PackageSink>,
    config: HandlerConfig,
    events: Sender,
}

impl TransferHandler {
    pub fn new(
        credentials: Arc<CredentialStore>,
        reports: Arc<ReportService>,
        config: HandlerConfig,
        events: Sender,
    ) -> Self {
        let sink = config.package_dir.clone().map(PackageSink::new);
        Self {
            credentials,
            table: TransferTable::new(),
            reports,
            sink,
            config,
            events,
        }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn table(&self) -> &TransferTable {
        &self.table
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Processes one inbound envelope and sends its acknowledgment.
    pub async fn handle_message(&self, sender: &Sender, msg: Message) {
        let reply = match self.process(&msg).await {
            Ok(reply) => reply.to_message(&msg).unwrap_or_else(|e| {
                warn!(msg_id = %msg.id, "failed to encode reply: {e}");
                msg.reply_error(ota_protocol::ErrorKind::Internal, "failed to encode reply")
            }),
            Err(e) => {
                debug!(msg_id = %msg.id, kind = %e.kind(), "request failed: {e}");
                msg.reply_error(e.kind(), e.to_string())
            }
        };
        let _ = sender.send_msg(reply).await;
    }

    async fn process(&self, msg: &Message) -> Result<Reply, TransferError> {
        self.authorize().await?;
        let req = Request::from_message(msg).map_err(request_error)?;
        self.dispatch(req).await
    }

    /// Authorizes and applies a typed request.
    pub async fn handle(&self, req: Request) -> Result<Reply, TransferError> {
        self.authorize().await?;
        self.dispatch(req).await
    }

    async fn authorize(&self) -> Result<(), TransferError> {
        self.credentials.authorize().await.map(|_| ()).map_err(|e| {
            warn!("request rejected: {e}");
            TransferError::Unauthorized(e.to_string())
        })
    }

    async fn dispatch(&self, req: Request) -> Result<Reply, TransferError> {
        debug!(kind = req.kind(), transfer_id = ?req.transfer_id(), "handling request");
        match req {
            Request::Start(r) => self.start(r).await.map(Reply::Started),
            Request::Chunk(r) => self.chunk(r).await.map(Reply::ChunkAck),
            Request::Finish(r) => self.finish(&r.transfer_id).await.map(Reply::Finished),
            Request::Abort(r) => self.abort(&r.transfer_id).await.map(Reply::Aborted),
            Request::Notify(r) => self.notify(r.transfer_id.as_ref()).await.map(Reply::Status),
            Request::Report => Ok(Reply::Packages(PackageListResponse {
                packages: self.reports.list().await,
            })),
        }
    }

    async fn start(&self, req: StartTransferRequest) -> Result<TransferStatusInfo, TransferError> {
        if req.transfer_id.is_empty() {
            return Err(TransferError::BadRequest("transferId must not be empty".into()));
        }
        if req.expected_size == 0 {
            return Err(TransferError::BadRequest("expectedSize must be positive".into()));
        }
        if req.expected_size > self.config.max_transfer_size {
            return Err(TransferError::LimitExceeded(format!(
                "expectedSize {} exceeds limit {}",
                req.expected_size, self.config.max_transfer_size
            )));
        }

        let meta = PackageMeta {
            name: req.name,
            version: req.version,
            vendor: req.vendor,
            checksum: req.checksum,
        };
        validate_meta(&meta)?;

        let info = self
            .table
            .start(req.transfer_id.clone(), meta, req.expected_size)
            .await?;
        info!(
            transfer_id = %req.transfer_id,
            expected_size = req.expected_size,
            name = %info.name,
            version = %info.version,
            "transfer started"
        );
        self.emit(&req.transfer_id, TransferStatus::InProgress, "").await;
        Ok(info)
    }

    async fn chunk(&self, req: TransferChunkRequest) -> Result<ChunkAck, TransferError> {
        let handle = self.table.get(&req.transfer_id).await?;
        if req.data.len() > self.config.max_chunk_size {
            return Err(TransferError::LimitExceeded(format!(
                "chunk of {} bytes exceeds limit {}",
                req.data.len(),
                self.config.max_chunk_size
            )));
        }

        let mut transfer = handle.lock().await;
        let outcome = transfer.insert_chunk(req.index, &req.data)?;
        if outcome == ChunkOutcome::Duplicate {
            debug!(transfer_id = %req.transfer_id, index = req.index, "duplicate chunk ignored");
        }
        Ok(ChunkAck {
            transfer_id: req.transfer_id,
            index: req.index,
            received_bytes: transfer.received_bytes(),
            expected_size: transfer.expected_size(),
        })
    }

    /// Verifies and commits a complete transfer.
    ///
    /// The transfer's lock is held only to claim the payload and to commit,
    /// never while hashing or writing, so notify, abort and the idle reaper
    /// stay responsive. An abort that lands in between wins.
    async fn finish(&self, id: &TransferId) -> Result<PackageRecord, TransferError> {
        let handle = self.table.get(id).await?;

        let (payload, meta) = {
            let mut transfer = handle.lock().await;
            let payload = transfer.begin_verification()?;
            let meta = transfer.meta().clone();
            if meta.checksum.is_none() && self.config.checksum_policy == ChecksumPolicy::Require {
                let reason = "checksum required but none was supplied";
                self.abort_locked(&mut transfer, reason).await;
                return Err(TransferError::VerificationFailed(reason.into()));
            }
            (payload, meta)
        };

        let verification = self.verify(payload.clone(), meta.checksum.clone()).await;

        let checksum = {
            let mut transfer = handle.lock().await;
            if transfer.status() != TransferStatus::InProgress {
                debug!(transfer_id = %id, "transfer aborted during verification");
                return Err(TransferError::UnknownTransfer(id.clone()));
            }
            match verification {
                Ok(Verification::Verified { checksum }) => checksum,
                Ok(Verification::Mismatch { expected, actual }) => {
                    warn!(transfer_id = %id, %expected, %actual, "checksum mismatch");
                    self.abort_locked(&mut transfer, "checksum mismatch").await;
                    return Err(TransferError::VerificationFailed(format!(
                        "checksum mismatch: expected {expected}, got {actual}"
                    )));
                }
                Err(e) => {
                    transfer.end_verification();
                    return Err(e);
                }
            }
        };

        let stored = match &self.sink {
            Some(sink) => match self.store(sink.clone(), meta.clone(), payload).await {
                Ok(path) => Some(path),
                Err(e) => {
                    let reason = format!("failed to store package: {e}");
                    let mut transfer = handle.lock().await;
                    if transfer.status() == TransferStatus::InProgress {
                        self.abort_locked(&mut transfer, &reason).await;
                    }
                    return Err(TransferError::Internal(reason));
                }
            },
            None => None,
        };

        let mut transfer = handle.lock().await;
        if transfer.status() != TransferStatus::InProgress {
            // Aborted while the package was being written.
            if let Some(path) = stored {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(transfer_id = %id, path = %path.display(), "failed to remove package: {e}");
                }
            }
            return Err(TransferError::UnknownTransfer(id.clone()));
        }

        let record = PackageRecord {
            transfer_id: id.clone(),
            name: meta.name,
            version: meta.version,
            vendor: meta.vendor,
            size: transfer.expected_size(),
            checksum,
            completed_at: Utc::now(),
        };
        transfer.finish();
        self.table.retire(id, TransferStatus::Finished).await;
        drop(transfer);

        if let Err(e) = self.reports.record(record.clone()).await {
            warn!(transfer_id = %id, "failed to persist package manifest: {e}");
        }
        info!(
            transfer_id = %id,
            size = record.size,
            checksum = %record.checksum,
            "transfer finished"
        );
        self.emit(id, TransferStatus::Finished, "").await;
        Ok(record)
    }

    /// Hashes the payload off the runtime, bounded by `verify_timeout`.
    ///
    /// On timeout the transfer is left in progress so the coordinator can
    /// retry the finish.
    async fn verify(
        &self,
        payload: Payload,
        expected: Option<String>,
    ) -> Result<Verification, TransferError> {
        let task = tokio::task::spawn_blocking(move || {
            let actual = payload.checksum();
            match expected {
                Some(expected) if !actual.eq_ignore_ascii_case(&expected) => {
                    Verification::Mismatch { expected, actual }
                }
                _ => Verification::Verified { checksum: actual },
            }
        });

        match tokio::time::timeout(self.config.verify_timeout, task).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(TransferError::Internal(format!("verification task failed: {e}"))),
            Err(_) => Err(TransferError::Timeout(format!(
                "verification exceeded {}s",
                self.config.verify_timeout.as_secs()
            ))),
        }
    }

    async fn store(
        &self,
        sink: PackageSink,
        meta: PackageMeta,
        payload: Payload,
    ) -> Result<PathBuf, String> {
        tokio::task::spawn_blocking(move || sink.store(&meta, &payload))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())
    }

    async fn abort(&self, id: &TransferId) -> Result<TransferAborted, TransferError> {
        let outcome = self.table.abort(id).await?;
        let already_aborted = outcome == AbortOutcome::AlreadyAborted;
        if !already_aborted {
            info!(transfer_id = %id, "transfer aborted by coordinator");
            self.emit(id, TransferStatus::Aborted, "aborted by coordinator").await;
        }
        Ok(TransferAborted {
            transfer_id: id.clone(),
            already_aborted,
        })
    }

    async fn notify(&self, id: Option<&TransferId>) -> Result<StatusResponse, TransferError> {
        let transfers = match id {
            Some(id) => vec![self.table.status(id).await?],
            None => self.table.snapshot().await,
        };
        Ok(StatusResponse { transfers })
    }

    /// Aborts transfers idle longer than `idle_timeout` and announces each one.
    pub async fn expire_idle(&self) -> Vec<TransferId> {
        if self.config.idle_timeout.is_zero() {
            return Vec::new();
        }
        let expired = self.table.abort_idle(self.config.idle_timeout).await;
        for id in &expired {
            info!(transfer_id = %id, "transfer aborted after idle timeout");
            self.emit(id, TransferStatus::Aborted, "idle timeout").await;
        }
        expired
    }

    /// Aborts a transfer whose lock the caller holds, and announces it.
    async fn abort_locked(&self, transfer: &mut Transfer, reason: &str) {
        transfer.abort();
        let id = transfer.id().clone();
        self.table.retire(&id, TransferStatus::Aborted).await;
        warn!(transfer_id = %id, reason, "transfer aborted");
        self.emit(&id, TransferStatus::Aborted, reason).await;
    }

    async fn emit(&self, id: &TransferId, status: TransferStatus, reason: &str) {
        let event = StatusEvent {
            transfer_id: id.clone(),
            status,
            reason: reason.to_string(),
        };
        let _ = self.events.send_event(&event).await;
    }
}

fn request_error(e: RequestError) -> TransferError {
    match e {
        RequestError::Unsupported(t) => {
            TransferError::NotImplemented(format!("unsupported message type: {t:?}"))
        }
        other => TransferError::BadRequest(other.to_string()),
    }
}
