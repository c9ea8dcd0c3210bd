//! Wire protocol shared by the update coordinator and the transfer agent.
//!
//! Every frame is a JSON [`Message`] envelope. Inbound envelopes are turned
//! into the closed [`Request`] sum type before they reach the handler.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod request;
pub mod types;

// Re-export primary types for convenience.
pub use constants::{ErrorKind, MessageType};
pub use envelope::{ErrorBody, Message};
pub use request::{Request, RequestError};
pub use types::{PackageRecord, TransferId, TransferStatus, TransferStatusInfo};
