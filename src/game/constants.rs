/// Simulation timing
pub mod physics {
    /// Server tick rate in Hz
    pub const TICK_RATE: u32 = 60;
    /// Delta time per tick in seconds
    pub const DT: f32 = 1.0 / 60.0;
    /// Tick duration in microseconds (16_666us at 60 Hz)
    pub const TICK_DURATION_US: u64 = 1_000_000 / TICK_RATE as u64;
}

/// Player vitals and scoring
pub mod player {
    /// Health on spawn and respawn
    pub const MAX_HEALTH: u32 = 100;
    /// Score awarded to the killer
    pub const KILL_AWARD: u64 = 10;
    /// Height of the body centre above the player's feet (hit test origin)
    pub const BODY_CENTER_HEIGHT: f32 = 1.0;
    /// Maximum accepted account identifier length
    pub const MAX_ACCOUNT_LEN: usize = 128;
}

/// Weapon/projectile constants
pub mod weapon {
    /// Projectile speed in units per second
    pub const PROJECTILE_SPEED: f32 = 30.0;
    /// Damage dealt per hit
    pub const DAMAGE: u32 = 20;
    /// Projectile lifetime in seconds
    pub const LIFETIME: f32 = 5.0;
    /// Spherical hit radius around a player's body centre
    pub const HIT_RADIUS: f32 = 1.0;
    /// Projectiles leave the weapon at this height above the shooter's feet
    pub const MUZZLE_HEIGHT: f32 = 1.5;
    /// Minimum ticks between two shots from one player (100ms at 60 Hz)
    pub const FIRE_COOLDOWN_TICKS: u64 = 6;
}

/// Arena bounds (players spawn on the ground plane, y = 0)
pub mod arena {
    /// Half-extent of the square spawn area on the x and z axes
    pub const SPAWN_HALF_EXTENT: f32 = 10.0;
}

/// Respawn constants
pub mod spawn {
    /// Delay before respawning after death (seconds)
    pub const RESPAWN_DELAY: f32 = 3.0;
}

/// Networking constants
pub mod net {
    /// Maximum reliable message size
    pub const MAX_MESSAGE_SIZE: usize = 65536;
    /// Minimum interval between relayed movement updates for one player (ms)
    pub const MOVE_RELAY_INTERVAL_MS: u64 = 50;
    /// Messages a connection may have queued before it is dropped as too slow
    pub const OUTBOUND_QUEUE_CAPACITY: usize = 1024;
}

/// Settlement constants
pub mod settlement {
    /// Default timeout for a single ledger verification (ms)
    pub const LEDGER_TIMEOUT_MS: u64 = 5_000;
    /// The zero address marks an account that is never settled
    pub const NOOP_ACCOUNT: &str = "0x0000000000000000000000000000000000000000";
    /// Finished session records kept by the store; older ones are pruned
    pub const MAX_RETAINED_SESSIONS: usize = 10_000;
}
