//! Respawn scheduling
//!
//! Timers live inside the session that owns them, so dropping or clearing the
//! session drops every pending respawn with it.

use rand::Rng;

use crate::game::constants::{arena, spawn};
use crate::game::state::PlayerId;
use crate::util::vec3::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
struct RespawnTimer {
    player_id: PlayerId,
    /// Session time (seconds) at which the player comes back
    due_at: f64,
}

/// Pending respawns of one session
#[derive(Debug, Default)]
pub struct RespawnQueue {
    timers: Vec<RespawnTimer>,
}

impl RespawnQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a respawn `RESPAWN_DELAY` seconds after `now`.
    /// A player has at most one pending respawn; rescheduling replaces it.
    pub fn schedule(&mut self, player_id: PlayerId, now: f64) -> f64 {
        self.cancel(player_id);
        let due_at = now + f64::from(spawn::RESPAWN_DELAY);
        self.timers.push(RespawnTimer { player_id, due_at });
        due_at
    }

    pub fn cancel(&mut self, player_id: PlayerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.player_id != player_id);
        before != self.timers.len()
    }

    /// Remove and return every timer due at `now`, earliest first
    pub fn take_due(&mut self, now: f64) -> Vec<PlayerId> {
        let mut due: Vec<RespawnTimer> = Vec::new();
        self.timers.retain(|t| {
            if t.due_at <= now {
                due.push(*t);
                false
            } else {
                true
            }
        });
        due.sort_by(|a, b| a.due_at.total_cmp(&b.due_at));
        due.into_iter().map(|t| t.player_id).collect()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

/// Random ground-level position inside the spawn square
pub fn random_spawn_position<R: Rng + ?Sized>(rng: &mut R) -> Vec3 {
    let h = arena::SPAWN_HALF_EXTENT;
    Vec3::new(rng.gen_range(-h..=h), 0.0, rng.gen_range(-h..=h))
}
