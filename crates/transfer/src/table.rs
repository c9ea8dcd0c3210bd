//! Keyed table of active transfers.
//!
//! The map lock is only held to look up, insert or retire an entry. Message
//! processing locks the individual transfer, so a slow transfer never stalls
//! operations on another id.
//!
//! Lock order is transfer, then table: code holding a transfer lock may call
//! [`TransferTable::retire`], but no code locks a transfer while holding the
//! map lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ota_protocol::{TransferId, TransferStatus, TransferStatusInfo};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use crate::TransferError;
use crate::types::{PackageMeta, Transfer};

/// Shared handle to one transfer.
pub type TransferHandle = Arc<Mutex<Transfer>>;

/// Result of a successful abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    Aborted,
    AlreadyAborted,
}

#[derive(Default)]
pub struct TransferTable {
    active: RwLock<HashMap<TransferId, TransferHandle>>,
    /// Terminal state of every retired id. Ids are never reused.
    retired: RwLock<HashMap<TransferId, TransferStatus>>,
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transfer and moves it straight to `InProgress`.
    pub async fn start(
        &self,
        id: TransferId,
        meta: PackageMeta,
        expected_size: u64,
    ) -> Result<TransferStatusInfo, TransferError> {
        let mut active = self.active.write().await;
        if active.contains_key(&id) || self.retired.read().await.contains_key(&id) {
            return Err(TransferError::DuplicateTransfer(id));
        }

        let mut transfer = Transfer::new(id.clone(), meta, expected_size);
        transfer.begin();
        let info = transfer.status_info();
        active.insert(id.clone(), Arc::new(Mutex::new(transfer)));
        debug!(transfer_id = %id, expected_size, "transfer registered");
        Ok(info)
    }

    /// Looks up an active transfer.
    pub async fn get(&self, id: &TransferId) -> Result<TransferHandle, TransferError> {
        self.active
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| TransferError::UnknownTransfer(id.clone()))
    }

    /// Moves `id` from the active map to the tombstones.
    ///
    /// Call with the transfer's lock held, after setting its terminal status.
    pub async fn retire(&self, id: &TransferId, status: TransferStatus) {
        let mut active = self.active.write().await;
        self.retired.write().await.insert(id.clone(), status);
        active.remove(id);
        debug!(transfer_id = %id, ?status, "transfer retired");
    }

    /// Terminal status of a retired id.
    pub async fn retired_status(&self, id: &TransferId) -> Option<TransferStatus> {
        self.retired.read().await.get(id).copied()
    }

    /// Aborts an active transfer, or acknowledges a repeated abort.
    ///
    /// Finished and never-seen ids yield `UnknownTransfer`.
    pub async fn abort(&self, id: &TransferId) -> Result<AbortOutcome, TransferError> {
        match self.get(id).await {
            Ok(handle) => {
                let mut transfer = handle.lock().await;
                match transfer.status() {
                    TransferStatus::Finished => Err(TransferError::UnknownTransfer(id.clone())),
                    TransferStatus::Aborted => Ok(AbortOutcome::AlreadyAborted),
                    TransferStatus::Pending | TransferStatus::InProgress => {
                        transfer.abort();
                        self.retire(id, TransferStatus::Aborted).await;
                        Ok(AbortOutcome::Aborted)
                    }
                }
            }
            Err(err) => match self.retired_status(id).await {
                Some(TransferStatus::Aborted) => Ok(AbortOutcome::AlreadyAborted),
                _ => Err(err),
            },
        }
    }

    /// Status of one active transfer.
    pub async fn status(&self, id: &TransferId) -> Result<TransferStatusInfo, TransferError> {
        let handle = self.get(id).await?;
        let transfer = handle.lock().await;
        if transfer.status().is_terminal() {
            return Err(TransferError::UnknownTransfer(id.clone()));
        }
        Ok(transfer.status_info())
    }

    /// Status of every active transfer, ordered by id.
    pub async fn snapshot(&self) -> Vec<TransferStatusInfo> {
        let mut infos = Vec::new();
        for handle in self.handles().await {
            let transfer = handle.lock().await;
            if !transfer.status().is_terminal() {
                infos.push(transfer.status_info());
            }
        }
        infos.sort_by(|a, b| a.transfer_id.cmp(&b.transfer_id));
        infos
    }

    /// Aborts every in-progress transfer idle for at least `idle_timeout`.
    /// Transfers with a finish under way are left alone.
    ///
    /// Returns the ids that were aborted.
    pub async fn abort_idle(&self, idle_timeout: Duration) -> Vec<TransferId> {
        let now = Instant::now();
        let mut expired = Vec::new();
        for handle in self.handles().await {
            let mut transfer = handle.lock().await;
            if transfer.status() == TransferStatus::InProgress
                && !transfer.is_verifying()
                && transfer.idle_for(now) >= idle_timeout
            {
                transfer.abort();
                let id = transfer.id().clone();
                self.retire(&id, TransferStatus::Aborted).await;
                expired.push(id);
            }
        }
        expired
    }

    /// Number of active transfers.
    pub async fn len(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.active.read().await.is_empty()
    }

    /// Clones the handles so the map lock is released before any transfer is locked.
    async fn handles(&self) -> Vec<TransferHandle> {
        self.active.read().await.values().cloned().collect()
    }
}
