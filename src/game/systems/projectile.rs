//! Projectile system
//!
//! Fires projectiles, advances them each tick, resolves hits against players
//! and expires whatever outlives its TTL. Every projectile leaves the system
//! exactly once: through a hit or through expiry.

use std::cmp::Ordering;

use crate::game::constants::weapon;
use crate::game::players::PlayerManager;
use crate::game::state::{Player, PlayerId, Projectile, ProjectileId};
use crate::util::vec3::Vec3;

/// Outcome of one projectile step, in resolution order
#[derive(Debug, Clone, PartialEq)]
pub enum CombatEvent {
    /// A projectile struck a player
    Hit {
        projectile_id: ProjectileId,
        shooter_id: PlayerId,
        target_id: PlayerId,
        damage: u32,
        health: u32,
    },
    /// A hit brought the target to zero health
    Killed {
        killer_id: PlayerId,
        victim_id: PlayerId,
        /// Killer's score after the award (`None` if the shooter already left)
        killer_score: Option<u64>,
    },
    /// A projectile outlived its TTL without hitting anyone
    Expired { projectile_id: ProjectileId },
}

/// Live projectiles of one session
#[derive(Debug, Default)]
pub struct ProjectileSystem {
    projectiles: Vec<Projectile>,
    next_id: ProjectileId,
}

impl ProjectileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a projectile from the shooter's muzzle along a unit direction
    pub fn fire(&mut self, shooter: &Player, direction: Vec3, now: f64) -> ProjectileId {
        self.next_id += 1;
        let id = self.next_id;

        let muzzle = Vec3::new(shooter.position.x, shooter.position.y + weapon::MUZZLE_HEIGHT, shooter.position.z);
        self.projectiles.push(Projectile {
            id,
            owner_id: shooter.id,
            position: muzzle,
            direction,
            speed: weapon::PROJECTILE_SPEED,
            damage: weapon::DAMAGE,
            created_at: now,
            ttl: weapon::LIFETIME,
        });
        id
    }

    /// Insert a fully specified projectile (scripted shots, tests, benches)
    pub fn spawn(&mut self, mut projectile: Projectile) -> ProjectileId {
        self.next_id += 1;
        projectile.id = self.next_id;
        self.projectiles.push(projectile);
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.projectiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projectiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Projectile> {
        self.projectiles.iter()
    }

    pub fn clear(&mut self) {
        self.projectiles.clear();
    }

    /// Run one tick: advance, resolve hits, apply kills, expire.
    ///
    /// `now` is the session time after this tick's advance.
    pub fn step(&mut self, players: &mut PlayerManager, dt: f32, now: f64) -> Vec<CombatEvent> {
        let mut events = Vec::new();

        for projectile in &mut self.projectiles {
            projectile.advance(dt);
        }

        let mut removed = vec![false; self.projectiles.len()];

        for (index, projectile) in self.projectiles.iter().enumerate() {
            let Some(target_id) = find_target(projectile, players) else {
                continue;
            };
            removed[index] = true;

            let Some(target) = players.get_player_mut(target_id) else {
                continue;
            };
            let health = target.apply_damage(projectile.damage);
            events.push(CombatEvent::Hit {
                projectile_id: projectile.id,
                shooter_id: projectile.owner_id,
                target_id,
                damage: projectile.damage,
                health,
            });

            if health == 0 {
                target.record_death();
                let killer_score = players.get_player_mut(projectile.owner_id).map(|killer| {
                    killer.award_kill();
                    killer.score
                });
                events.push(CombatEvent::Killed {
                    killer_id: projectile.owner_id,
                    victim_id: target_id,
                    killer_score,
                });
            }
        }

        for (index, projectile) in self.projectiles.iter().enumerate() {
            if !removed[index] && projectile.is_expired(now) {
                removed[index] = true;
                events.push(CombatEvent::Expired {
                    projectile_id: projectile.id,
                });
            }
        }

        let mut flags = removed.into_iter();
        self.projectiles.retain(|_| !flags.next().unwrap_or(false));

        events
    }
}

/// Pick the player a projectile hits, if any.
///
/// Candidates are living players other than the owner whose body centre lies
/// within the hit radius. The nearest candidate wins; exact distance ties go
/// to the smaller player id.
pub fn find_target(projectile: &Projectile, players: &PlayerManager) -> Option<PlayerId> {
    let radius_sq = weapon::HIT_RADIUS * weapon::HIT_RADIUS;

    players
        .iter()
        .filter(|p| p.id != projectile.owner_id && p.is_alive())
        .filter_map(|p| {
            let dist_sq = p.body_center().distance_sq_to(projectile.position);
            (dist_sq < radius_sq).then_some((dist_sq, p.id))
        })
        .min_by(|(da, ida), (db, idb)| {
            da.partial_cmp(db)
                .unwrap_or(Ordering::Equal)
                .then_with(|| ida.cmp(idb))
        })
        .map(|(_, id)| id)
}
