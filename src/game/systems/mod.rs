pub mod projectile;
pub mod respawn;
