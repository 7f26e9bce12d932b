//! Game state definitions
//!
//! Identities, players, projectiles and the session status machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

use crate::game::constants::{player, settlement};
use crate::util::vec3::Vec3;

/// Unique player identifier (one per live connection)
pub type PlayerId = Uuid;

/// Unique session identifier
pub type SessionId = Uuid;

/// Projectile identifier, unique within its session
pub type ProjectileId = u64;

/// External account identifier (wallet address), stored trimmed and lowercased
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Account(String);

impl Account {
    /// Validate and normalize a raw account string
    pub fn parse(raw: &str) -> Result<Self, AccountError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AccountError::Empty);
        }
        if trimmed.len() > player::MAX_ACCOUNT_LEN {
            return Err(AccountError::TooLong(trimmed.len()));
        }
        if trimmed.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(AccountError::InvalidCharacters);
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accounts that are never sent to the ledger
    pub fn is_noop(&self) -> bool {
        self.0 == settlement::NOOP_ACCOUNT
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("Account identifier is empty")]
    Empty,
    #[error("Account identifier too long: {0} characters")]
    TooLong(usize),
    #[error("Account identifier contains invalid characters")]
    InvalidCharacters,
}

/// Session lifecycle status. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Created,
    Active,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Created, Active) | (Created, Completed) | (Created, Abandoned)
                | (Active, Completed) | (Active, Abandoned)
        )
    }

    /// Completed or Abandoned
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }
}

/// Rate-limit bookkeeping for movement relays
#[derive(Debug, Clone, Default)]
pub struct MoveRelay {
    pub last_sent: Option<Instant>,
    /// An update was applied but not yet relayed
    pub pending: bool,
}

/// Player state inside a session
#[derive(Debug, Clone)]
pub struct Player {
    // Simulation fields
    pub position: Vec3,
    /// Pitch, yaw, roll in radians
    pub rotation: Vec3,
    pub health: u32,

    // Scoring
    pub score: u64,
    pub kills: u32,
    pub deaths: u32,
    pub ready: bool,

    pub relay: MoveRelay,
    /// Session tick of the last accepted shot
    pub last_fire_tick: Option<u64>,

    pub id: PlayerId,
    pub account: Account,
}

impl Player {
    pub fn new(id: PlayerId, account: Account) -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            health: player::MAX_HEALTH,
            score: 0,
            kills: 0,
            deaths: 0,
            ready: false,
            relay: MoveRelay::default(),
            last_fire_tick: None,
            id,
            account,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    /// Point used for spherical hit tests
    pub fn body_center(&self) -> Vec3 {
        self.position + Vec3::new(0.0, player::BODY_CENTER_HEIGHT, 0.0)
    }

    /// Subtract damage, flooring at zero. Returns the new health.
    pub fn apply_damage(&mut self, damage: u32) -> u32 {
        self.health = self.health.saturating_sub(damage).min(player::MAX_HEALTH);
        self.health
    }

    pub fn award_kill(&mut self) {
        self.score += player::KILL_AWARD;
        self.kills += 1;
    }

    pub fn record_death(&mut self) {
        self.deaths += 1;
    }

    /// Raise the score to a reported value; never lowers it
    pub fn raise_score(&mut self, reported: u64) -> u64 {
        self.score = self.score.max(reported);
        self.score
    }

    pub fn respawn_at(&mut self, position: Vec3) {
        self.health = player::MAX_HEALTH;
        self.position = position;
    }
}

/// Projectile in flight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Projectile {
    pub id: ProjectileId,
    pub owner_id: PlayerId,
    pub position: Vec3,
    /// Unit direction
    pub direction: Vec3,
    pub speed: f32,
    pub damage: u32,
    /// Session time (seconds) at which it was fired
    pub created_at: f64,
    /// Time-to-live in seconds
    pub ttl: f32,
}

impl Projectile {
    pub fn advance(&mut self, dt: f32) {
        self.position += self.direction * (self.speed * dt);
    }

    pub fn age(&self, now: f64) -> f64 {
        now - self.created_at
    }

    pub fn is_expired(&self, now: f64) -> bool {
        self.age(now) > f64::from(self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::weapon;

    fn account(s: &str) -> Account {
        Account::parse(s).unwrap()
    }

    #[test]
    fn test_account_normalized() {
        let a = account("  0xABCdef  ");
        assert_eq!(a.as_str(), "0xabcdef");
        assert_eq!(a, account("0xabcDEF"));
    }

    #[test]
    fn test_account_rejects_invalid() {
        assert_eq!(Account::parse("   "), Err(AccountError::Empty));
        assert_eq!(Account::parse("0x12 34"), Err(AccountError::InvalidCharacters));
        let long = "a".repeat(player::MAX_ACCOUNT_LEN + 1);
        assert!(matches!(Account::parse(&long), Err(AccountError::TooLong(_))));
    }

    #[test]
    fn test_noop_account() {
        assert!(account(settlement::NOOP_ACCOUNT).is_noop());
        assert!(!account("0x1111111111111111111111111111111111111111").is_noop());
    }

    #[test]
    fn test_status_moves_forward_only() {
        use SessionStatus::*;
        assert!(Created.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Abandoned));
        assert!(!Active.can_transition_to(Created));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Abandoned));
        assert!(!Abandoned.can_transition_to(Completed));
        assert!(Completed.is_terminal());
        assert!(!Active.is_terminal());
    }

    #[test]
    fn test_damage_floors_at_zero() {
        let mut p = Player::new(Uuid::new_v4(), account("0xa"));
        assert_eq!(p.apply_damage(30), 70);
        assert_eq!(p.apply_damage(500), 0);
        assert!(!p.is_alive());
    }

    #[test]
    fn test_kill_award() {
        let mut p = Player::new(Uuid::new_v4(), account("0xa"));
        p.award_kill();
        assert_eq!(p.score, 10);
        assert_eq!(p.kills, 1);
    }

    #[test]
    fn test_score_never_lowered() {
        let mut p = Player::new(Uuid::new_v4(), account("0xa"));
        assert_eq!(p.raise_score(150), 150);
        assert_eq!(p.raise_score(40), 150);
    }

    #[test]
    fn test_respawn_restores_health() {
        let mut p = Player::new(Uuid::new_v4(), account("0xa"));
        p.apply_damage(100);
        p.respawn_at(Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(p.health, player::MAX_HEALTH);
        assert_eq!(p.position, Vec3::new(1.0, 0.0, 2.0));
    }

    #[test]
    fn test_projectile_advance_and_expiry() {
        let mut proj = Projectile {
            id: 1,
            owner_id: Uuid::new_v4(),
            position: Vec3::ZERO,
            direction: Vec3::new(1.0, 0.0, 0.0),
            speed: 10.0,
            damage: weapon::DAMAGE,
            created_at: 2.0,
            ttl: weapon::LIFETIME,
        };
        proj.advance(0.5);
        assert!(proj.position.approx_eq(Vec3::new(5.0, 0.0, 0.0), 1e-5));
        let lifetime = f64::from(weapon::LIFETIME);
        assert!(!proj.is_expired(2.0 + lifetime));
        assert!(proj.is_expired(2.0 + lifetime + 0.01));
    }
}
