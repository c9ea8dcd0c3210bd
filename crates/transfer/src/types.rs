use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ota_protocol::{TransferId, TransferStatus, TransferStatusInfo};
use tokio::time::Instant;

use crate::TransferError;
use crate::chunked::Payload;

/// Package metadata declared when a transfer starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMeta {
    pub name: String,
    pub version: String,
    pub vendor: String,
    /// Expected SHA-256 hex digest of the whole package, if the coordinator sent one.
    pub checksum: Option<String>,
}

/// Result of storing a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Stored,
    /// The same bytes were already stored at this index.
    Duplicate,
}

/// An in-flight package delivery.
///
/// Not thread-safe by itself; the [`TransferTable`](crate::TransferTable)
/// wraps each transfer in its own mutex.
#[derive(Debug)]
pub struct Transfer {
    id: TransferId,
    meta: PackageMeta,
    expected_size: u64,
    chunks: BTreeMap<u64, Arc<[u8]>>,
    received_bytes: u64,
    status: TransferStatus,
    /// A finish is hashing or storing the payload outside the lock.
    verifying: bool,
    last_activity: Instant,
}

impl Transfer {
    /// Creates a pending transfer.
    pub fn new(id: TransferId, meta: PackageMeta, expected_size: u64) -> Self {
        Self {
            id,
            meta,
            expected_size,
            chunks: BTreeMap::new(),
            received_bytes: 0,
            status: TransferStatus::Pending,
            verifying: false,
            last_activity: Instant::now(),
        }
    }

    /// Moves a pending transfer to in-progress.
    pub fn begin(&mut self) {
        if self.status == TransferStatus::Pending {
            self.status = TransferStatus::InProgress;
            self.touch();
        }
    }

    /// Stores chunk `index`.
    ///
    /// Indices are bounded by `expected_size` since every chunk carries at
    /// least one byte. Re-sending identical bytes is a no-op; different bytes
    /// at a stored index are rejected.
    pub fn insert_chunk(&mut self, index: u64, data: &[u8]) -> Result<ChunkOutcome, TransferError> {
        match self.status {
            TransferStatus::InProgress => {}
            TransferStatus::Pending => {
                return Err(TransferError::BadRequest(format!(
                    "transfer {} has not started",
                    self.id
                )));
            }
            // Terminal transfers are retired; a racing chunk sees them as gone.
            TransferStatus::Finished | TransferStatus::Aborted => {
                return Err(TransferError::UnknownTransfer(self.id.clone()));
            }
        }

        if data.is_empty() {
            return Err(TransferError::IntegrityViolation(format!(
                "chunk {index} is empty"
            )));
        }
        if index >= self.expected_size {
            return Err(TransferError::IntegrityViolation(format!(
                "chunk index {index} out of bounds for {} byte transfer",
                self.expected_size
            )));
        }

        if let Some(existing) = self.chunks.get(&index) {
            if existing.as_ref() == data {
                self.touch();
                return Ok(ChunkOutcome::Duplicate);
            }
            return Err(TransferError::IntegrityViolation(format!(
                "chunk {index} resent with different bytes"
            )));
        }

        let len = data.len() as u64;
        let total = self.received_bytes.saturating_add(len);
        if total > self.expected_size {
            return Err(TransferError::IntegrityViolation(format!(
                "chunk {index} overflows declared size: {total} > {}",
                self.expected_size
            )));
        }

        self.chunks.insert(index, Arc::from(data));
        self.received_bytes = total;
        self.touch();
        Ok(ChunkOutcome::Stored)
    }

    /// `true` when indices `0..n` are all present and cover `expected_size` exactly.
    pub fn is_complete(&self) -> bool {
        let contiguous = match self.chunks.last_key_value() {
            Some((&last, _)) => last + 1 == self.chunks.len() as u64,
            None => true,
        };
        contiguous && self.received_bytes == self.expected_size
    }

    /// Returns the chunks in index order, or `IncompleteTransfer`.
    pub fn payload(&self) -> Result<Payload, TransferError> {
        if !self.is_complete() {
            return Err(TransferError::IncompleteTransfer {
                id: self.id.clone(),
                received: self.received_bytes,
                expected: self.expected_size,
            });
        }
        Ok(Payload::new(self.chunks.values().cloned().collect()))
    }

    /// Claims the complete payload for verification.
    ///
    /// The caller may drop the transfer's lock while it hashes and stores the
    /// payload, then re-lock to commit with [`finish`](Self::finish), abort,
    /// or give up with [`end_verification`](Self::end_verification). A second
    /// finish while one is verifying is rejected.
    pub fn begin_verification(&mut self) -> Result<Payload, TransferError> {
        match self.status {
            TransferStatus::InProgress => {}
            TransferStatus::Pending => {
                return Err(TransferError::BadRequest(format!(
                    "transfer {} has not started",
                    self.id
                )));
            }
            TransferStatus::Finished | TransferStatus::Aborted => {
                return Err(TransferError::UnknownTransfer(self.id.clone()));
            }
        }
        if self.verifying {
            return Err(TransferError::BadRequest(format!(
                "transfer {} is already finishing",
                self.id
            )));
        }
        let payload = self.payload()?;
        self.verifying = true;
        self.touch();
        Ok(payload)
    }

    /// Releases the claim taken by [`begin_verification`](Self::begin_verification).
    pub fn end_verification(&mut self) {
        self.verifying = false;
        self.touch();
    }

    pub fn is_verifying(&self) -> bool {
        self.verifying
    }

    /// Marks the transfer finished and releases its buffers.
    pub fn finish(&mut self) {
        self.verifying = false;
        self.status = TransferStatus::Finished;
        self.chunks.clear();
        self.touch();
    }

    /// Marks the transfer aborted and releases its buffers.
    ///
    /// Returns `true` if it was already aborted.
    pub fn abort(&mut self) -> bool {
        let already = self.status == TransferStatus::Aborted;
        self.status = TransferStatus::Aborted;
        self.verifying = false;
        self.chunks.clear();
        self.touch();
        already
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time since the last message touched this transfer.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn id(&self) -> &TransferId {
        &self.id
    }

    pub fn meta(&self) -> &PackageMeta {
        &self.meta
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    pub fn received_chunks(&self) -> u64 {
        self.chunks.len() as u64
    }

    /// Returns current progress as a protocol-compatible struct.
    pub fn status_info(&self) -> TransferStatusInfo {
        TransferStatusInfo {
            transfer_id: self.id.clone(),
            status: self.status,
            name: self.meta.name.clone(),
            version: self.meta.version.clone(),
            vendor: self.meta.vendor.clone(),
            expected_size: self.expected_size,
            received_bytes: self.received_bytes,
            received_chunks: self.received_chunks(),
        }
    }
}
