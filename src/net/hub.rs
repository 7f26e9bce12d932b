//! Connection hub
//!
//! Maps live connection ids to their outbound queues. Sessions reach players
//! only through this hub, via the `Outbound` capability. Queues are bounded:
//! a connection that falls too far behind is evicted, which closes its
//! writer and with it the connection.

use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tracing::{debug, warn};

use crate::game::constants::net;
use crate::game::state::PlayerId;
use crate::lobby::outbound::Outbound;
use crate::metrics::Metrics;
use crate::net::protocol::ServerMessage;

pub struct ConnectionHub {
    connections: RwLock<HashMap<PlayerId, Sender<ServerMessage>>>,
    queue_capacity: usize,
    metrics: Option<Arc<Metrics>>,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            queue_capacity: net::OUTBOUND_QUEUE_CAPACITY,
            metrics: None,
        }
    }
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::default()
        }
    }

    /// Messages each connection may have queued before it is evicted
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Open a queue for a connection. A second registration replaces the first.
    pub fn register(&self, player_id: PlayerId) -> Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.connections.write().insert(player_id, tx);
        rx
    }

    /// Close a connection's queue; its writer task then drains and exits
    pub fn unregister(&self, player_id: PlayerId) -> bool {
        self.connections.write().remove(&player_id).is_some()
    }

    pub fn is_connected(&self, player_id: PlayerId) -> bool {
        self.connections.read().contains_key(&player_id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

impl Outbound for ConnectionHub {
    fn send(&self, to: PlayerId, message: ServerMessage) -> bool {
        let result = match self.connections.read().get(&to) {
            Some(tx) => tx.try_send(message),
            None => {
                debug!("Dropping message for disconnected player {}", to);
                return false;
            }
        };

        match result {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
                }
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue for {} is full ({} messages), evicting connection",
                    to, self.queue_capacity
                );
                self.connections.write().remove(&to);
                if let Some(metrics) = &self.metrics {
                    metrics.messages_dropped.fetch_add(1, Ordering::Relaxed);
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Dropping message for closed connection {}", to);
                false
            }
        }
    }
}
