use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::game::constants::settlement::LEDGER_TIMEOUT_MS;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// WebTransport port
    pub port: u16,
    /// Maximum number of live sessions
    pub max_sessions: usize,
    /// Maximum players per session
    pub max_players_per_session: usize,
    /// Bound on each ledger verification
    pub ledger_timeout: Duration,
    /// Ledger base URL; the local score-ratio verifier is used when unset
    pub ledger_url: Option<String>,
    /// JSON store file; in-memory when unset
    pub store_path: Option<PathBuf>,
    /// Metrics HTTP port, 0 disables the endpoint
    pub metrics_port: u16,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4433,
            max_sessions: 100,
            max_players_per_session: 8,
            ledger_timeout: Duration::from_millis(LEDGER_TIMEOUT_MS),
            ledger_url: None,
            store_path: None,
            metrics_port: 9090,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

/// Parse `raw` and keep it if `accept` agrees, otherwise warn and keep `current`
fn parse_or_keep<T: FromStr + Copy>(key: &str, raw: Option<String>, current: T, accept: impl Fn(T) -> bool) -> T {
    let Some(raw) = raw else {
        return current;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) if accept(parsed) => parsed,
        Ok(_) => {
            tracing::warn!("{} value '{}' out of range, using default", key, raw);
            current
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            current
        }
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unknown or invalid values keep defaults
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let ledger_timeout_ms = parse_or_keep(
            "LEDGER_TIMEOUT_MS",
            var("LEDGER_TIMEOUT_MS"),
            defaults.ledger_timeout.as_millis() as u64,
            |ms| (1..=120_000).contains(&ms),
        );

        Self {
            bind_address: parse_or_keep("BIND_ADDRESS", var("BIND_ADDRESS"), defaults.bind_address, |_| true),
            port: parse_or_keep("PORT", var("PORT"), defaults.port, |p| p > 0),
            max_sessions: parse_or_keep("MAX_SESSIONS", var("MAX_SESSIONS"), defaults.max_sessions, |n| {
                (1..=10_000).contains(&n)
            }),
            max_players_per_session: parse_or_keep(
                "MAX_PLAYERS_PER_SESSION",
                var("MAX_PLAYERS_PER_SESSION"),
                defaults.max_players_per_session,
                |n| (1..=64).contains(&n),
            ),
            ledger_timeout: Duration::from_millis(ledger_timeout_ms),
            ledger_url: non_empty(var("LEDGER_URL")),
            store_path: non_empty(var("STORE_PATH")).map(PathBuf::from),
            metrics_port: parse_or_keep("METRICS_PORT", var("METRICS_PORT"), defaults.metrics_port, |_| true),
            tls_cert_path: non_empty(var("TLS_CERT_PATH")),
            tls_key_path: non_empty(var("TLS_KEY_PATH")),
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be at least 1".to_string());
        }
        if self.max_players_per_session == 0 {
            return Err("max_players_per_session must be at least 1".to_string());
        }
        if self.ledger_timeout.is_zero() {
            return Err("ledger_timeout must be positive".to_string());
        }
        if self.metrics_port != 0 && self.metrics_port == self.port {
            return Err("metrics_port must differ from port".to_string());
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string());
        }
        if let Some(url) = &self.ledger_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("ledger_url must be an http(s) URL, got '{url}'"));
            }
        }
        Ok(())
    }
}
