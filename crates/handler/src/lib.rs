//! Client side of the OTA transfer protocol.
//!
//! [`TransferHandler`] gates every coordinator request on a valid access
//! token, drives each transfer through its state machine and pushes status
//! events. [`Dispatcher`] feeds it from an inbound message channel, keeping
//! per-transfer order while letting different transfers proceed in parallel.

mod config;
mod connection;
mod dispatch;
mod handler;
mod reaper;
mod report;

#[cfg(test)]
mod testing;

pub use config::{ChecksumPolicy, HandlerConfig};
pub use connection::{SendError, Sender};
pub use dispatch::Dispatcher;
pub use handler::{Reply, TransferHandler};
pub use reaper::spawn_reaper;
pub use report::{ManifestError, ReportService};

/// Outbound buffer capacity.
///
/// Every chunk produces an acknowledgment, and transitions add status events
/// on top. 2048 gives comfortable headroom before senders have to wait.
pub const SEND_BUFFER_SIZE: usize = 2048;
