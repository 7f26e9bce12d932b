//! Arena Match Server Library
//!
//! Session-based multiplayer arena server over WebTransport with reward
//! settlement against an external ledger.
//!
//! # Features
//!
//! - `ledger_http` - HTTP ledger verifier (enabled by default)

pub mod config;
pub mod game;
pub mod lobby;
pub mod metrics;
pub mod net;
pub mod settlement;
pub mod util;
