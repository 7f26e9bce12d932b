//! Game session
//!
//! One match: its players, projectiles, respawn timers and status. All state
//! is mutated through `&mut self`; the registry wraps each session in its own
//! async mutex so the tick loop and inbound messages never race.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::game::constants::{net, physics, weapon};
use crate::game::match_result::Participant;
use crate::game::players::{PlayerError, PlayerManager};
use crate::game::state::{Account, Player, PlayerId, ProjectileId, SessionId, SessionStatus};
use crate::game::systems::projectile::{CombatEvent, ProjectileSystem};
use crate::game::systems::respawn::{random_spawn_position, RespawnQueue};
use crate::lobby::outbound::{Broadcaster, Outbound, Recipients};
use crate::metrics::Metrics;
use crate::net::protocol::{PlayerSnapshot, SessionEvent, SessionSnapshot};
use crate::util::vec3::Vec3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session already started")]
    AlreadyStarted,
    #[error("Session is full ({0} players)")]
    SessionFull(usize),
    #[error("Account {0} already joined this session")]
    AccountInUse(Account),
    #[error("Player {0} is not in this session")]
    PlayerNotFound(PlayerId),
    #[error("Session is not active")]
    NotActive,
    #[error("Session is closed")]
    SessionClosed,
    #[error("Player is dead")]
    PlayerDead,
    #[error("Weapon cooling down: {0} ticks remaining")]
    FireCooldown(u64),
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("Cannot move session from {from:?} to {to:?}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },
}

/// What one tick did, for metrics and tests
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub hits: u32,
    pub kills: u32,
    pub expired: u32,
    pub respawns: u32,
    pub relays_flushed: u32,
}

pub struct GameSession {
    id: SessionId,
    status: SessionStatus,
    players: PlayerManager,
    projectiles: ProjectileSystem,
    respawns: RespawnQueue,

    // Simulated time is derived from this; never accumulated
    tick: u64,

    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,

    max_players: usize,
    relay_interval: Duration,
    broadcaster: Broadcaster,
    metrics: Option<Arc<Metrics>>,
}

impl GameSession {
    pub fn new(id: SessionId, max_players: usize, outbound: Arc<dyn Outbound>) -> Self {
        Self {
            id,
            status: SessionStatus::Created,
            players: PlayerManager::new(),
            projectiles: ProjectileSystem::new(),
            respawns: RespawnQueue::new(),
            tick: 0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            max_players: max_players.max(1),
            relay_interval: Duration::from_millis(net::MOVE_RELAY_INTERVAL_MS),
            broadcaster: Broadcaster::new(outbound),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Simulated seconds since the session became Active
    pub fn sim_time(&self) -> f64 {
        self.tick as f64 / f64::from(physics::TICK_RATE)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn players(&self) -> &PlayerManager {
        &self.players
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&Player> {
        self.players.get_player(player_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn projectile_count(&self) -> usize {
        self.projectiles.len()
    }

    pub fn pending_respawns(&self) -> usize {
        self.respawns.len()
    }

    /// Member ids in join order
    pub fn members(&self) -> Recipients {
        self.players.ids().iter().copied().collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            status: self.status,
            tick: self.tick,
            created_at: self.created_at,
            started_at: self.started_at,
            players: self.players.iter().map(PlayerSnapshot::from_player).collect(),
        }
    }

    /// Send an event to every member
    pub fn broadcast(&self, event: SessionEvent) {
        self.broadcaster.to_all(self.players.ids(), event);
    }

    fn transition(&mut self, next: SessionStatus) -> Result<(), SessionError> {
        if !self.status.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        info!("Session {} {} -> {}", self.id, self.status.as_str(), next.as_str());
        self.status = next;
        Ok(())
    }

    /// Seat a player. Joining again from the same connection is a no-op.
    pub fn add_player(&mut self, player_id: PlayerId, account: Account) -> Result<SessionSnapshot, SessionError> {
        if self.status.is_terminal() {
            return Err(SessionError::SessionClosed);
        }
        if self.status != SessionStatus::Created {
            return Err(SessionError::AlreadyStarted);
        }
        if let Some(existing) = self.players.get_player(player_id) {
            if existing.account == account {
                return Ok(self.snapshot());
            }
            return Err(SessionError::InvalidInput("connection already joined with another account"));
        }
        if self.players.len() >= self.max_players {
            return Err(SessionError::SessionFull(self.max_players));
        }

        let spawn = random_spawn_position(&mut rand::thread_rng());
        let player = match self.players.add_player(player_id, account) {
            Ok(player) => player,
            Err(PlayerError::AccountInUse { account, .. }) => return Err(SessionError::AccountInUse(account)),
            Err(PlayerError::AlreadyRegistered(_)) => return Ok(self.snapshot()),
        };
        let account = player.account.clone();
        if let Some(player) = self.players.get_player_mut(player_id) {
            player.position = spawn;
        }

        info!("Player {} ({}) joined session {}", player_id, account, self.id);
        if let Some(metrics) = &self.metrics {
            metrics.player_joined();
        }

        if let Some(player) = self.players.get_player(player_id) {
            let joined = SessionEvent::PlayerJoined {
                session_id: self.id,
                player: PlayerSnapshot::from_player(player),
            };
            self.broadcaster.to_all_except(self.players.ids(), Some(player_id), joined);
        }

        Ok(self.snapshot())
    }

    /// Mark a player ready. Returns true if this started the session.
    pub fn mark_ready(&mut self, player_id: PlayerId) -> Result<bool, SessionError> {
        if self.status != SessionStatus::Created {
            return Err(SessionError::AlreadyStarted);
        }
        let player = self
            .players
            .get_player_mut(player_id)
            .ok_or(SessionError::PlayerNotFound(player_id))?;
        player.ready = true;

        self.broadcast(SessionEvent::PlayerReady {
            session_id: self.id,
            player_id,
        });

        if !self.players.all_ready() {
            debug!(
                "Session {}: {}/{} ready",
                self.id,
                self.players.ready_count(),
                self.players.len()
            );
            return Ok(false);
        }

        self.start()?;
        Ok(true)
    }

    fn start(&mut self) -> Result<(), SessionError> {
        self.transition(SessionStatus::Active)?;
        self.started_at = Some(Utc::now());
        self.tick = 0;

        let players = self.players.iter().map(PlayerSnapshot::from_player).collect();
        self.broadcast(SessionEvent::SessionStarted {
            session_id: self.id,
            players,
        });
        Ok(())
    }

    /// Apply a movement update now; relay it to others at a bounded rate
    pub fn update_position(
        &mut self,
        player_id: PlayerId,
        position: Vec3,
        rotation: Vec3,
        now: Instant,
    ) -> Result<(), SessionError> {
        if self.status.is_terminal() {
            return Err(SessionError::SessionClosed);
        }
        if !position.is_finite() || !rotation.is_finite() {
            return Err(SessionError::InvalidInput("non-finite position or rotation"));
        }

        let interval = self.relay_interval;
        let player = self
            .players
            .get_player_mut(player_id)
            .ok_or(SessionError::PlayerNotFound(player_id))?;
        player.position = position;
        player.rotation = rotation;

        let due = player
            .relay
            .last_sent
            .map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if !due {
            player.relay.pending = true;
            return Ok(());
        }
        player.relay.last_sent = Some(now);
        player.relay.pending = false;

        self.broadcaster.to_all_except(
            self.players.ids(),
            Some(player_id),
            SessionEvent::PlayerMoved {
                player_id,
                position,
                rotation,
            },
        );
        Ok(())
    }

    /// Fire from the player's muzzle along `direction`.
    ///
    /// Each player may fire once every `FIRE_COOLDOWN_TICKS` ticks.
    pub fn fire_weapon(&mut self, player_id: PlayerId, direction: Vec3) -> Result<ProjectileId, SessionError> {
        if self.status != SessionStatus::Active {
            return Err(SessionError::NotActive);
        }
        let direction = direction
            .try_normalize()
            .ok_or(SessionError::InvalidInput("direction must be finite and non-zero"))?;
        let (tick, now) = (self.tick, self.sim_time());
        let shooter = self
            .players
            .get_player_mut(player_id)
            .ok_or(SessionError::PlayerNotFound(player_id))?;
        if !shooter.is_alive() {
            return Err(SessionError::PlayerDead);
        }
        if let Some(last) = shooter.last_fire_tick {
            let elapsed = tick.saturating_sub(last);
            if elapsed < weapon::FIRE_COOLDOWN_TICKS {
                return Err(SessionError::FireCooldown(weapon::FIRE_COOLDOWN_TICKS - elapsed));
            }
        }
        shooter.last_fire_tick = Some(tick);

        let projectile_id = self.projectiles.fire(shooter, direction, now);
        if let Some(metrics) = &self.metrics {
            metrics.projectiles_fired.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }

        if let Some(projectile) = self.projectiles.iter().find(|p| p.id == projectile_id) {
            self.broadcaster.to_all(
                self.players.ids(),
                SessionEvent::ProjectileFired {
                    projectile_id,
                    owner_id: player_id,
                    position: projectile.position,
                    direction,
                },
            );
        }
        Ok(projectile_id)
    }

    /// Raise a player's score to the reported value. Never lowers it.
    pub fn record_score(&mut self, player_id: PlayerId, score: u64) -> Result<u64, SessionError> {
        if self.status.is_terminal() {
            return Err(SessionError::SessionClosed);
        }
        let player = self
            .players
            .get_player_mut(player_id)
            .ok_or(SessionError::PlayerNotFound(player_id))?;
        let score = player.raise_score(score);

        self.broadcast(SessionEvent::ScoreUpdated { player_id, score });
        Ok(score)
    }

    /// One fixed step. Does nothing unless Active with players.
    pub fn tick(&mut self, now: Instant) -> TickSummary {
        let mut summary = TickSummary::default();
        if self.status != SessionStatus::Active || self.players.is_empty() {
            return summary;
        }

        self.tick += 1;
        let now_secs = self.sim_time();

        let events = self.projectiles.step(&mut self.players, physics::DT, now_secs);
        for event in events {
            self.apply_combat_event(event, &mut summary);
        }

        for player_id in self.respawns.take_due(now_secs) {
            if self.respawn(player_id) {
                summary.respawns += 1;
            }
        }

        summary.relays_flushed = self.flush_relays(now);

        if let Some(metrics) = &self.metrics {
            use std::sync::atomic::Ordering;
            metrics.hits.fetch_add(summary.hits as u64, Ordering::Relaxed);
            metrics.kills.fetch_add(summary.kills as u64, Ordering::Relaxed);
            metrics.projectiles_expired.fetch_add(summary.expired as u64, Ordering::Relaxed);
        }

        summary
    }

    fn apply_combat_event(&mut self, event: CombatEvent, summary: &mut TickSummary) {
        match event {
            CombatEvent::Hit {
                projectile_id,
                shooter_id,
                target_id,
                damage,
                health,
            } => {
                summary.hits += 1;
                self.broadcaster.to(
                    target_id,
                    SessionEvent::PlayerHit {
                        projectile_id,
                        shooter_id,
                        damage,
                        health,
                    },
                );
                // The shooter may have left while the projectile was in flight
                if self.players.get_player(shooter_id).is_some() {
                    self.broadcaster.to(
                        shooter_id,
                        SessionEvent::HitConfirmed {
                            projectile_id,
                            target_id,
                            damage,
                            target_health: health,
                        },
                    );
                }
            }
            CombatEvent::Killed {
                killer_id,
                victim_id,
                killer_score,
            } => {
                summary.kills += 1;
                debug!("Player {} killed {} in session {}", killer_id, victim_id, self.id);
                self.respawns.schedule(victim_id, self.sim_time());
                self.broadcast(SessionEvent::PlayerKilled {
                    killer_id,
                    victim_id,
                    killer_score: killer_score.unwrap_or(0),
                });
                if let Some(score) = killer_score {
                    self.broadcast(SessionEvent::ScoreUpdated {
                        player_id: killer_id,
                        score,
                    });
                }
            }
            CombatEvent::Expired { .. } => summary.expired += 1,
        }
    }

    fn respawn(&mut self, player_id: PlayerId) -> bool {
        let position = random_spawn_position(&mut rand::thread_rng());
        let Some(player) = self.players.get_player_mut(player_id) else {
            return false;
        };
        player.respawn_at(position);
        let health = player.health;

        self.broadcaster.to(player_id, SessionEvent::Respawned { position, health });
        self.broadcaster.to_all_except(
            self.players.ids(),
            Some(player_id),
            SessionEvent::PlayerRespawned { player_id, position },
        );
        true
    }

    /// Relay movement updates that were held back by the rate limit
    fn flush_relays(&mut self, now: Instant) -> u32 {
        let interval = self.relay_interval;
        let mut moved: Vec<(PlayerId, Vec3, Vec3)> = Vec::new();

        for player in self.players.iter_mut() {
            let due = player
                .relay
                .last_sent
                .map_or(true, |last| now.saturating_duration_since(last) >= interval);
            if player.relay.pending && due {
                player.relay.pending = false;
                player.relay.last_sent = Some(now);
                moved.push((player.id, player.position, player.rotation));
            }
        }

        for (player_id, position, rotation) in &moved {
            self.broadcaster.to_all_except(
                self.players.ids(),
                Some(*player_id),
                SessionEvent::PlayerMoved {
                    player_id: *player_id,
                    position: *position,
                    rotation: *rotation,
                },
            );
        }
        moved.len() as u32
    }

    /// Unseat a player and tell the others. Their pending respawn is
    /// cancelled; projectiles they fired keep flying until they hit or expire.
    pub fn remove_player(&mut self, player_id: PlayerId) -> Option<Player> {
        let player = self.players.remove_player(player_id)?;
        self.respawns.cancel(player_id);

        info!("Player {} left session {}", player_id, self.id);
        if let Some(metrics) = &self.metrics {
            metrics.players_left(1);
        }

        if !self.players.is_empty() {
            self.broadcast(SessionEvent::PlayerLeft {
                session_id: self.id,
                player_id,
            });
        }
        Some(player)
    }

    /// Close the match and capture every participant for settlement
    pub fn complete(&mut self) -> Result<Vec<Participant>, SessionError> {
        self.transition(SessionStatus::Completed)?;
        self.ended_at = Some(Utc::now());
        self.clear_simulation();

        Ok(self
            .players
            .iter()
            .map(|p| Participant {
                player_id: p.id,
                account: p.account.clone(),
                score: p.score,
                kills: p.kills,
                deaths: p.deaths,
            })
            .collect())
    }

    /// Give up on the match. Anything already terminal stays as it is.
    pub fn abandon(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        // Created and Active may both move to Abandoned
        let _ = self.transition(SessionStatus::Abandoned);
        self.ended_at = Some(Utc::now());
        self.clear_simulation();
        if let Some(metrics) = &self.metrics {
            metrics.players_left(self.players.len() as u64);
        }
        true
    }

    /// Detach members from gauges once a completed session leaves the registry
    pub fn release_members(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.players_left(self.players.len() as u64);
        }
    }

    fn clear_simulation(&mut self) {
        self.projectiles.clear();
        self.respawns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::{player, spawn, weapon};
    use crate::net::hub::ConnectionHub;
    use crate::net::protocol::ServerMessage;
    use tokio::sync::mpsc::Receiver;
    use uuid::Uuid;

    struct Fixture {
        session: GameSession,
        hub: Arc<ConnectionHub>,
    }

    impl Fixture {
        fn new() -> Self {
            let hub = Arc::new(ConnectionHub::new());
            let session = GameSession::new(Uuid::new_v4(), 4, hub.clone());
            Self { session, hub }
        }

        fn join(&mut self, account: &str) -> (PlayerId, Receiver<ServerMessage>) {
            let id = Uuid::new_v4();
            let rx = self.hub.register(id);
            self.session.add_player(id, Account::parse(account).unwrap()).unwrap();
            (id, rx)
        }

        fn place(&mut self, id: PlayerId, position: Vec3) {
            self.session.players.get_player_mut(id).unwrap().position = position;
        }
    }

    fn events(rx: &mut Receiver<ServerMessage>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ServerMessage::Event(event) = msg {
                out.push(event);
            }
        }
        out
    }

    fn start(f: &mut Fixture, ids: &[PlayerId]) {
        for id in ids {
            f.session.mark_ready(*id).unwrap();
        }
        assert_eq!(f.session.status(), SessionStatus::Active);
    }

    #[test]
    fn test_join_broadcasts_to_others_only() {
        let mut f = Fixture::new();
        let (a, mut rx_a) = f.join("0xa");
        let (b, mut rx_b) = f.join("0xb");

        let a_events = events(&mut rx_a);
        assert!(matches!(&a_events[..], [SessionEvent::PlayerJoined { player, .. }] if player.id == b));
        assert!(events(&mut rx_b).is_empty());
        assert_eq!(f.session.members().as_slice(), &[a, b]);
    }

    #[test]
    fn test_rejoin_same_connection_is_idempotent() {
        let mut f = Fixture::new();
        let (a, _rx) = f.join("0xa");
        let snapshot = f.session.add_player(a, Account::parse("0xA").unwrap()).unwrap();
        assert_eq!(snapshot.players.len(), 1);
    }

    #[test]
    fn test_join_rejections() {
        let mut f = Fixture::new();
        f.join("0xa");

        let dup = f.session.add_player(Uuid::new_v4(), Account::parse("0xa").unwrap());
        assert!(matches!(dup, Err(SessionError::AccountInUse(_))));

        f.join("0xb");
        f.join("0xc");
        f.join("0xd");
        let full = f.session.add_player(Uuid::new_v4(), Account::parse("0xe").unwrap());
        assert_eq!(full, Err(SessionError::SessionFull(4)));
    }

    #[test]
    fn test_all_ready_starts_session() {
        let mut f = Fixture::new();
        let (a, mut rx_a) = f.join("0xa");
        let (b, _rx_b) = f.join("0xb");

        assert_eq!(f.session.mark_ready(a), Ok(false));
        assert_eq!(f.session.status(), SessionStatus::Created);
        assert_eq!(f.session.mark_ready(b), Ok(true));
        assert_eq!(f.session.status(), SessionStatus::Active);
        assert!(f.session.started_at().is_some());

        assert!(events(&mut rx_a)
            .iter()
            .any(|e| matches!(e, SessionEvent::SessionStarted { players, .. } if players.len() == 2)));

        // No joins or readies once started
        assert_eq!(
            f.session.add_player(Uuid::new_v4(), Account::parse("0xc").unwrap()),
            Err(SessionError::AlreadyStarted)
        );
        assert_eq!(f.session.mark_ready(a), Err(SessionError::AlreadyStarted));
    }

    #[test]
    fn test_ready_unknown_player() {
        let mut f = Fixture::new();
        let unknown = Uuid::new_v4();
        assert_eq!(f.session.mark_ready(unknown), Err(SessionError::PlayerNotFound(unknown)));
    }

    #[test]
    fn test_tick_idle_until_active() {
        let mut f = Fixture::new();
        f.join("0xa");
        f.session.tick(Instant::now());
        assert_eq!(f.session.tick_count(), 0);
    }

    #[test]
    fn test_fire_requires_active_and_valid_direction() {
        let mut f = Fixture::new();
        let (a, _rx) = f.join("0xa");
        assert_eq!(f.session.fire_weapon(a, Vec3::FORWARD), Err(SessionError::NotActive));

        start(&mut f, &[a]);
        assert!(matches!(
            f.session.fire_weapon(a, Vec3::ZERO),
            Err(SessionError::InvalidInput(_))
        ));
        assert!(matches!(
            f.session.fire_weapon(a, Vec3::new(f32::NAN, 0.0, 0.0)),
            Err(SessionError::InvalidInput(_))
        ));
        assert!(f.session.fire_weapon(a, Vec3::new(0.0, 0.0, -5.0)).is_ok());
        assert_eq!(f.session.projectile_count(), 1);
    }

    #[test]
    fn test_hit_notifies_target_and_shooter() {
        let mut f = Fixture::new();
        let (a, mut rx_a) = f.join("0xa");
        let (b, mut rx_b) = f.join("0xb");
        start(&mut f, &[a, b]);
        // Shooter muzzle at y=1.5, target body centre at y=1.0, 0.6 apart on x
        f.place(a, Vec3::new(0.0, -0.5, 0.0));
        f.place(b, Vec3::new(0.6, 0.0, 0.0));
        events(&mut rx_a);
        events(&mut rx_b);

        f.session.fire_weapon(a, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let summary = f.session.tick(Instant::now());

        assert_eq!(summary.hits, 1);
        assert_eq!(f.session.projectile_count(), 0);
        assert_eq!(
            f.session.player(b).unwrap().health,
            player::MAX_HEALTH - weapon::DAMAGE
        );
        assert!(events(&mut rx_b)
            .iter()
            .any(|e| matches!(e, SessionEvent::PlayerHit { shooter_id, .. } if *shooter_id == a)));
        assert!(events(&mut rx_a)
            .iter()
            .any(|e| matches!(e, SessionEvent::HitConfirmed { target_id, .. } if *target_id == b)));
    }

    #[test]
    fn test_kill_then_respawn_after_delay() {
        let mut f = Fixture::new();
        let (a, mut rx_a) = f.join("0xa");
        let (b, mut rx_b) = f.join("0xb");
        start(&mut f, &[a, b]);
        f.place(a, Vec3::new(0.0, -0.5, 0.0));
        f.place(b, Vec3::new(0.6, 0.0, 0.0));
        f.session.players.get_player_mut(b).unwrap().health = weapon::DAMAGE;
        events(&mut rx_a);
        events(&mut rx_b);

        f.session.fire_weapon(a, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let summary = f.session.tick(Instant::now());
        assert_eq!(summary.kills, 1);

        let killer = f.session.player(a).unwrap();
        assert_eq!((killer.score, killer.kills), (player::KILL_AWARD, 1));
        let victim = f.session.player(b).unwrap();
        assert_eq!((victim.health, victim.deaths), (0, 1));
        assert_eq!(f.session.pending_respawns(), 1);
        assert!(events(&mut rx_a)
            .iter()
            .any(|e| matches!(e, SessionEvent::PlayerKilled { victim_id, killer_score: 10, .. } if *victim_id == b)));

        // Dead players cannot fire
        assert_eq!(f.session.fire_weapon(b, Vec3::FORWARD), Err(SessionError::PlayerDead));

        let ticks_to_respawn = (spawn::RESPAWN_DELAY / physics::DT).ceil() as usize + 1;
        let mut respawns = 0;
        for _ in 0..ticks_to_respawn {
            respawns += f.session.tick(Instant::now()).respawns;
        }
        assert_eq!(respawns, 1);
        assert_eq!(f.session.player(b).unwrap().health, player::MAX_HEALTH);
        assert!(events(&mut rx_b)
            .iter()
            .any(|e| matches!(e, SessionEvent::Respawned { health, .. } if *health == player::MAX_HEALTH)));
        assert!(events(&mut rx_a)
            .iter()
            .any(|e| matches!(e, SessionEvent::PlayerRespawned { player_id, .. } if *player_id == b)));
    }

    #[test]
    fn test_health_stays_in_bounds_under_fire() {
        let mut f = Fixture::new();
        let (a, _rx_a) = f.join("0xa");
        let (b, _rx_b) = f.join("0xb");
        start(&mut f, &[a, b]);
        f.place(a, Vec3::new(0.0, -0.5, 0.0));
        f.place(b, Vec3::new(0.6, 0.0, 0.0));

        for _ in 0..600 {
            let _ = f.session.fire_weapon(a, Vec3::new(1.0, 0.0, 0.0));
            f.session.tick(Instant::now());
            for p in f.session.players().iter() {
                assert!(p.health <= player::MAX_HEALTH);
            }
        }
        assert!(f.session.player(b).unwrap().deaths >= 1);
    }

    #[test]
    fn test_movement_relay_rate_limited_and_flushed() {
        let mut f = Fixture::new();
        let (a, _rx_a) = f.join("0xa");
        let (b, mut rx_b) = f.join("0xb");
        start(&mut f, &[a, b]);
        events(&mut rx_b);

        let t0 = Instant::now();
        f.session.update_position(a, Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO, t0).unwrap();
        f.session
            .update_position(a, Vec3::new(2.0, 0.0, 0.0), Vec3::ZERO, t0 + Duration::from_millis(10))
            .unwrap();
        f.session
            .update_position(a, Vec3::new(3.0, 0.0, 0.0), Vec3::ZERO, t0 + Duration::from_millis(20))
            .unwrap();

        // Applied immediately even when not relayed
        assert_eq!(f.session.player(a).unwrap().position, Vec3::new(3.0, 0.0, 0.0));
        let relayed: Vec<_> = events(&mut rx_b)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::PlayerMoved { .. }))
            .collect();
        assert_eq!(relayed.len(), 1);

        // Too early: still held back
        assert_eq!(f.session.tick(t0 + Duration::from_millis(30)).relays_flushed, 0);
        // Interval elapsed: latest position goes out
        assert_eq!(f.session.tick(t0 + Duration::from_millis(60)).relays_flushed, 1);
        assert!(events(&mut rx_b).iter().any(|e| matches!(
            e,
            SessionEvent::PlayerMoved { position, .. } if *position == Vec3::new(3.0, 0.0, 0.0)
        )));
    }

    #[test]
    fn test_record_score_never_lowers() {
        let mut f = Fixture::new();
        let (a, _rx) = f.join("0xa");
        assert_eq!(f.session.record_score(a, 150), Ok(150));
        assert_eq!(f.session.record_score(a, 40), Ok(150));

        let unknown = Uuid::new_v4();
        assert_eq!(f.session.record_score(unknown, 1), Err(SessionError::PlayerNotFound(unknown)));
    }

    #[test]
    fn test_remove_player_cleans_up() {
        let mut f = Fixture::new();
        let (a, _rx_a) = f.join("0xa");
        let (b, mut rx_b) = f.join("0xb");
        start(&mut f, &[a, b]);
        f.session.fire_weapon(a, Vec3::FORWARD).unwrap();
        events(&mut rx_b);

        assert!(f.session.remove_player(a).is_some());
        assert_eq!(f.session.projectile_count(), 1);
        assert!(events(&mut rx_b)
            .iter()
            .any(|e| matches!(e, SessionEvent::PlayerLeft { player_id, .. } if *player_id == a)));
        assert!(f.session.remove_player(a).is_none());
    }

    #[test]
    fn test_projectile_outlives_its_shooter() {
        let mut f = Fixture::new();
        let (a, _rx_a) = f.join("0xa");
        let (b, mut rx_b) = f.join("0xb");
        start(&mut f, &[a, b]);
        f.place(a, Vec3::new(0.0, -0.5, 0.0));
        f.place(b, Vec3::new(5.0, 0.0, 0.0));

        f.session.fire_weapon(a, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        f.session.tick(Instant::now());
        f.session.remove_player(a).unwrap();
        assert_eq!(f.session.projectile_count(), 1);
        events(&mut rx_b);

        let mut hits = 0;
        for _ in 0..60 {
            hits += f.session.tick(Instant::now()).hits;
        }
        assert_eq!(hits, 1);
        assert_eq!(f.session.projectile_count(), 0);
        assert_eq!(
            f.session.player(b).unwrap().health,
            player::MAX_HEALTH - weapon::DAMAGE
        );
        assert!(events(&mut rx_b)
            .iter()
            .any(|e| matches!(e, SessionEvent::PlayerHit { shooter_id, .. } if *shooter_id == a)));
    }

    #[test]
    fn test_kill_by_departed_shooter_awards_nobody() {
        let mut f = Fixture::new();
        let (a, _rx_a) = f.join("0xa");
        let (b, mut rx_b) = f.join("0xb");
        start(&mut f, &[a, b]);
        f.place(a, Vec3::new(0.0, -0.5, 0.0));
        f.place(b, Vec3::new(5.0, 0.0, 0.0));
        f.session.players.get_player_mut(b).unwrap().health = weapon::DAMAGE;

        f.session.fire_weapon(a, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        f.session.remove_player(a).unwrap();
        events(&mut rx_b);

        let mut kills = 0;
        for _ in 0..60 {
            kills += f.session.tick(Instant::now()).kills;
        }
        assert_eq!(kills, 1);
        assert_eq!(f.session.player(b).unwrap().deaths, 1);
        assert_eq!(f.session.pending_respawns(), 1);

        let seen = events(&mut rx_b);
        assert!(seen.iter().any(|e| matches!(
            e,
            SessionEvent::PlayerKilled { killer_id, killer_score: 0, .. } if *killer_id == a
        )));
        assert!(!seen.iter().any(|e| matches!(e, SessionEvent::ScoreUpdated { .. })));
    }

    #[test]
    fn test_fire_cooldown() {
        let mut f = Fixture::new();
        let (a, _rx_a) = f.join("0xa");
        let (b, _rx_b) = f.join("0xb");
        start(&mut f, &[a, b]);
        // Side by side, both shooting down -z, nobody in the line of fire
        f.place(a, Vec3::new(-5.0, 0.0, 0.0));
        f.place(b, Vec3::new(5.0, 0.0, 0.0));

        f.session.fire_weapon(a, Vec3::FORWARD).unwrap();
        assert_eq!(
            f.session.fire_weapon(a, Vec3::FORWARD),
            Err(SessionError::FireCooldown(weapon::FIRE_COOLDOWN_TICKS))
        );
        // Cooldowns are per player
        assert!(f.session.fire_weapon(b, Vec3::FORWARD).is_ok());

        for _ in 0..weapon::FIRE_COOLDOWN_TICKS - 1 {
            f.session.tick(Instant::now());
        }
        assert_eq!(f.session.fire_weapon(a, Vec3::FORWARD), Err(SessionError::FireCooldown(1)));
        f.session.tick(Instant::now());
        assert!(f.session.fire_weapon(a, Vec3::FORWARD).is_ok());
        assert_eq!(f.session.projectile_count(), 3);
    }

    #[test]
    fn test_sim_time_keeps_advancing_in_long_sessions() {
        let mut f = Fixture::new();
        let (a, _rx_a) = f.join("0xa");
        let (b, _rx_b) = f.join("0xb");
        start(&mut f, &[a, b]);
        f.place(a, Vec3::new(0.0, -0.5, 0.0));
        f.place(b, Vec3::new(0.6, 0.0, 0.0));
        f.session.players.get_player_mut(b).unwrap().health = weapon::DAMAGE;

        // Roughly 18 years of ticks at 60 Hz
        f.session.tick = 1 << 35;
        let before = f.session.sim_time();
        f.session.tick(Instant::now());
        assert!(f.session.sim_time() > before);

        // Kill, then the respawn still comes due
        f.session.fire_weapon(a, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(f.session.tick(Instant::now()).kills, 1);
        let ticks_to_respawn = (spawn::RESPAWN_DELAY / physics::DT).ceil() as usize + 1;
        let mut respawns = 0;
        for _ in 0..ticks_to_respawn {
            respawns += f.session.tick(Instant::now()).respawns;
        }
        assert_eq!(respawns, 1);
        f.place(b, Vec3::new(5.0, 0.0, 5.0));

        // A miss still expires on time
        f.session.fire_weapon(a, Vec3::FORWARD).unwrap();
        let ticks_to_expire = (weapon::LIFETIME / physics::DT).ceil() as usize + 2;
        let mut expired = 0;
        for _ in 0..ticks_to_expire {
            expired += f.session.tick(Instant::now()).expired;
        }
        assert_eq!(expired, 1);
        assert_eq!(f.session.projectile_count(), 0);
    }

    #[test]
    fn test_complete_captures_participants_and_stops_simulation() {
        let mut f = Fixture::new();
        let (a, _rx_a) = f.join("0xa");
        let (b, _rx_b) = f.join("0xb");
        start(&mut f, &[a, b]);
        f.session.record_score(a, 150).unwrap();
        f.session.fire_weapon(a, Vec3::FORWARD).unwrap();

        let participants = f.session.complete().unwrap();
        assert_eq!(participants.len(), 2);
        assert_eq!(participants[0].player_id, a);
        assert_eq!(participants[0].score, 150);
        assert_eq!(f.session.projectile_count(), 0);
        assert_eq!(f.session.status(), SessionStatus::Completed);

        // Terminal: nothing moves any more
        assert_eq!(f.session.record_score(a, 500), Err(SessionError::SessionClosed));
        assert!(f.session.complete().is_err());
        assert!(!f.session.abandon());
        let before = f.session.tick_count();
        f.session.tick(Instant::now());
        assert_eq!(f.session.tick_count(), before);
    }

    #[test]
    fn test_abandon_from_created() {
        let mut f = Fixture::new();
        f.join("0xa");
        assert!(f.session.abandon());
        assert_eq!(f.session.status(), SessionStatus::Abandoned);
        assert!(f.session.ended_at().is_some());
    }
}
