//! Routes inbound envelopes to per-transfer lanes.
//!
//! Messages naming the same transfer id are handled one at a time, in arrival
//! order, by that id's lane. Different ids run concurrently, and id-less
//! requests (`notify` for all transfers, `get_all_packages`) get a task of
//! their own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ota_protocol::TransferId;
use ota_protocol::envelope::Message;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::Sender;
use crate::handler::TransferHandler;

/// A lane with nothing to do for this long shuts down.
const LANE_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Finished lanes are swept from the map every this many messages.
const SWEEP_INTERVAL: usize = 256;

/// Just enough of any payload to route it.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteKey {
    #[serde(default)]
    transfer_id: Option<TransferId>,
}

struct Lane {
    // Unbounded so a slow transfer never holds up routing for other ids.
    tx: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

pub struct Dispatcher {
    handler: Arc<TransferHandler>,
    sender: Sender,
    lanes: HashMap<TransferId, Lane>,
    lane_idle: Duration,
    routed: usize,
}

impl Dispatcher {
    pub fn new(handler: Arc<TransferHandler>, sender: Sender) -> Self {
        Self {
            handler,
            sender,
            lanes: HashMap::new(),
            lane_idle: LANE_IDLE_TIMEOUT,
            routed: 0,
        }
    }

    pub fn with_lane_idle_timeout(mut self, idle: Duration) -> Self {
        self.lane_idle = idle;
        self
    }

    /// Routes messages until `inbound` closes or `cancel` fires, then waits
    /// for every lane to drain.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Message>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("dispatcher cancelled");
                    break;
                }
                msg = inbound.recv() => match msg {
                    Some(msg) => self.route(msg),
                    None => {
                        debug!("inbound channel closed");
                        break;
                    }
                },
            }
        }

        for (_, lane) in self.lanes.drain() {
            drop(lane.tx);
            let _ = lane.task.await;
        }
    }

    fn route(&mut self, msg: Message) {
        self.routed += 1;
        if self.routed % SWEEP_INTERVAL == 0 {
            self.lanes.retain(|_, lane| !lane.task.is_finished());
        }

        let key = msg
            .parse_payload::<RouteKey>()
            .ok()
            .flatten()
            .and_then(|k| k.transfer_id);

        match key {
            Some(id) => self.send_to_lane(id, msg),
            None => {
                let handler = Arc::clone(&self.handler);
                let sender = self.sender.clone();
                tokio::spawn(async move { handler.handle_message(&sender, msg).await });
            }
        }
    }

    fn send_to_lane(&mut self, id: TransferId, msg: Message) {
        let msg = match self.lanes.get(&id) {
            Some(lane) => match lane.tx.send(msg) {
                Ok(()) => return,
                // The lane closed itself while idle.
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };

        // A replaced lane may still be draining; the new one waits for it.
        let previous = self.lanes.remove(&id).map(|lane| lane.task);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(msg);
        let task = tokio::spawn(run_lane(
            id.clone(),
            Arc::clone(&self.handler),
            self.sender.clone(),
            rx,
            previous,
            self.lane_idle,
        ));
        self.lanes.insert(id, Lane { tx, task });
    }
}

async fn run_lane(
    id: TransferId,
    handler: Arc<TransferHandler>,
    sender: Sender,
    mut rx: mpsc::UnboundedReceiver<Message>,
    previous: Option<JoinHandle<()>>,
    idle: Duration,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }
    debug!(transfer_id = %id, "lane opened");

    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(msg)) => handler.handle_message(&sender, msg).await,
            Ok(None) => break,
            Err(_) => {
                // Refuse new sends, then finish whatever raced the close.
                rx.close();
                while let Ok(msg) = rx.try_recv() {
                    handler.handle_message(&sender, msg).await;
                }
                break;
            }
        }
    }
    debug!(transfer_id = %id, "lane closed");
}
