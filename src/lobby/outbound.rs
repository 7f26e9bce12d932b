//! Outbound capability injected into sessions
//!
//! Sessions never look up a transport. They hold an `Outbound` handed to them
//! at construction and address members by player id.

use smallvec::SmallVec;
use std::sync::Arc;

use crate::game::state::PlayerId;
use crate::net::protocol::{ServerMessage, SessionEvent};

/// Inline storage covers typical session sizes without allocating
pub type Recipients = SmallVec<[PlayerId; 8]>;

pub trait Outbound: Send + Sync {
    /// Queue a message for one connection. Returns false if it is gone.
    fn send(&self, to: PlayerId, message: ServerMessage) -> bool;
}

/// Session-scoped sender over an `Outbound`
#[derive(Clone)]
pub struct Broadcaster {
    outbound: Arc<dyn Outbound>,
}

impl Broadcaster {
    pub fn new(outbound: Arc<dyn Outbound>) -> Self {
        Self { outbound }
    }

    pub fn to(&self, player_id: PlayerId, event: SessionEvent) {
        self.outbound.send(player_id, ServerMessage::Event(event));
    }

    pub fn to_all(&self, recipients: &[PlayerId], event: SessionEvent) {
        self.to_all_except(recipients, None, event);
    }

    /// Send to every recipient but `skip`
    pub fn to_all_except(&self, recipients: &[PlayerId], skip: Option<PlayerId>, event: SessionEvent) {
        for id in recipients.iter().filter(|id| Some(**id) != skip) {
            self.outbound.send(*id, ServerMessage::Event(event.clone()));
        }
    }
}
