//! Outbound half of the coordinator channel.

use ota_protocol::constants::MessageType;
use ota_protocol::envelope::Message;
use ota_protocol::messages::StatusEvent;
use tokio::sync::mpsc;

/// Handle for sending messages to the coordinator.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`. Sends wait for buffer space
/// instead of dropping, so acknowledgments are never lost to a full buffer.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<Message>,
}

impl Sender {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Creates a sender and the receiver a transport drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Sends a protocol [`Message`].
    ///
    /// Returns `Err` only if the channel is closed (coordinator gone).
    pub async fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        self.tx.send(msg).await.map_err(|e| {
            tracing::warn!(msg_type = ?e.0.msg_type, "outbound channel closed, dropping message");
            SendError
        })
    }

    /// Pushes a spontaneous `status_event` with a fresh message id.
    pub async fn send_event(&self, event: &StatusEvent) -> Result<(), SendError> {
        let msg = Message::new(
            uuid::Uuid::new_v4().to_string(),
            MessageType::StatusEvent,
            Some(event),
        )
        .map_err(|e| {
            tracing::error!("failed to encode status event: {e}");
            SendError
        })?;
        self.send_msg(msg).await
    }
}

/// Error returned when the outbound channel is closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: connection closed")]
pub struct SendError;
