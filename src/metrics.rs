//! Prometheus-compatible metrics endpoint
//!
//! Exposes match server metrics in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, debug};

use crate::game::match_result::SettlementOutcome;
use crate::game::state::SessionStatus;

/// Metrics registry for the match server
#[derive(Debug)]
pub struct Metrics {
    // Sessions
    pub sessions_active: AtomicU64,
    pub sessions_created: AtomicU64,
    pub sessions_completed: AtomicU64,
    pub sessions_abandoned: AtomicU64,
    pub players_in_sessions: AtomicU64,

    // Combat
    pub projectiles_fired: AtomicU64,
    pub projectiles_expired: AtomicU64,
    pub hits: AtomicU64,
    pub kills: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Network stats
    pub connections_active: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub messages_rejected: AtomicU64,
    /// Messages lost when a slow connection was evicted
    pub messages_dropped: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,

    // Settlement
    pub settlements_verified: AtomicU64,
    pub settlements_rejected: AtomicU64,
    pub settlements_skipped: AtomicU64,
    pub settlements_failed: AtomicU64,
    pub store_failures: AtomicU64,

    // Server uptime
    start_time: Instant,

    // Rolling tick times across every session, for percentiles
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_active: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_abandoned: AtomicU64::new(0),
            players_in_sessions: AtomicU64::new(0),
            projectiles_fired: AtomicU64::new(0),
            projectiles_expired: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            kills: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_rejected: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            settlements_verified: AtomicU64::new(0),
            settlements_rejected: AtomicU64::new(0),
            settlements_skipped: AtomicU64::new(0),
            settlements_failed: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(1000)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);

        // Keep last 1000 samples
        while history.len() > 1000 {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    /// A session left the registry with its final status
    pub fn session_closed(&self, status: SessionStatus) {
        decrement(&self.sessions_active, 1);
        match status {
            SessionStatus::Completed => self.sessions_completed.fetch_add(1, Ordering::Relaxed),
            SessionStatus::Abandoned => self.sessions_abandoned.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    pub fn player_joined(&self) {
        self.players_in_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn players_left(&self, count: u64) {
        decrement(&self.players_in_sessions, count);
    }

    pub fn record_settlement(&self, outcome: &SettlementOutcome) {
        let counter = match outcome {
            SettlementOutcome::Verified(_) => &self.settlements_verified,
            SettlementOutcome::Rejected => &self.settlements_rejected,
            SettlementOutcome::Skipped => &self.settlements_skipped,
            SettlementOutcome::Failed(_) => &self.settlements_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Session metrics
        metric!("arena_sessions_active", "Sessions currently in the registry", "gauge",
            self.sessions_active.load(Ordering::Relaxed));
        metric!("arena_sessions_created_total", "Sessions created", "counter",
            self.sessions_created.load(Ordering::Relaxed));
        metric!("arena_sessions_completed_total", "Sessions ended normally", "counter",
            self.sessions_completed.load(Ordering::Relaxed));
        metric!("arena_sessions_abandoned_total", "Sessions abandoned by their last player", "counter",
            self.sessions_abandoned.load(Ordering::Relaxed));
        metric!("arena_players_in_sessions", "Players currently seated in a session", "gauge",
            self.players_in_sessions.load(Ordering::Relaxed));

        // Combat metrics
        metric!("arena_projectiles_fired_total", "Projectiles fired", "counter",
            self.projectiles_fired.load(Ordering::Relaxed));
        metric!("arena_projectiles_expired_total", "Projectiles expired without a hit", "counter",
            self.projectiles_expired.load(Ordering::Relaxed));
        metric!("arena_hits_total", "Projectile hits", "counter",
            self.hits.load(Ordering::Relaxed));
        metric!("arena_kills_total", "Kills", "counter",
            self.kills.load(Ordering::Relaxed));

        // Performance metrics
        metric!("arena_tick_time_microseconds", "Last tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("arena_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("arena_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("arena_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("arena_tick_count", "Total ticks processed across sessions", "counter",
            self.tick_count.load(Ordering::Relaxed));

        // Network metrics
        metric!("arena_connections_active", "Active WebTransport connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("arena_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("arena_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("arena_messages_rejected_total", "Requests answered with a failure", "counter",
            self.messages_rejected.load(Ordering::Relaxed));
        metric!("arena_messages_dropped_total", "Messages dropped on full outbound queues", "counter",
            self.messages_dropped.load(Ordering::Relaxed));
        metric!("arena_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("arena_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));

        // Settlement outcomes as one labelled counter
        output.push_str("# HELP arena_settlements_total Participant settlements by outcome\n# TYPE arena_settlements_total counter\n");
        for (outcome, counter) in [
            ("verified", &self.settlements_verified),
            ("rejected", &self.settlements_rejected),
            ("skipped", &self.settlements_skipped),
            ("failed", &self.settlements_failed),
        ] {
            output.push_str(&format!(
                "arena_settlements_total{{outcome=\"{}\"}} {}\n",
                outcome,
                counter.load(Ordering::Relaxed)
            ));
        }
        metric!("arena_store_failures_total", "Settlements whose stats write failed", "counter",
            self.store_failures.load(Ordering::Relaxed));

        metric!("arena_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        format!(r#"{{
  "sessions": {{
    "active": {},
    "created": {},
    "completed": {},
    "abandoned": {},
    "players": {}
  }},
  "combat": {{
    "projectiles_fired": {},
    "projectiles_expired": {},
    "hits": {},
    "kills": {}
  }},
  "performance": {{
    "tick_time_us": {},
    "tick_time_p95_us": {},
    "tick_time_p99_us": {},
    "tick_time_max_us": {},
    "tick_count": {}
  }},
  "network": {{
    "connections": {},
    "messages_sent": {},
    "messages_received": {},
    "messages_rejected": {},
    "messages_dropped": {},
    "bytes_sent": {},
    "bytes_received": {}
  }},
  "settlement": {{
    "verified": {},
    "rejected": {},
    "skipped": {},
    "failed": {},
    "store_failures": {}
  }},
  "uptime_seconds": {}
}}"#,
            self.sessions_active.load(Ordering::Relaxed),
            self.sessions_created.load(Ordering::Relaxed),
            self.sessions_completed.load(Ordering::Relaxed),
            self.sessions_abandoned.load(Ordering::Relaxed),
            self.players_in_sessions.load(Ordering::Relaxed),
            self.projectiles_fired.load(Ordering::Relaxed),
            self.projectiles_expired.load(Ordering::Relaxed),
            self.hits.load(Ordering::Relaxed),
            self.kills.load(Ordering::Relaxed),
            self.tick_time_us.load(Ordering::Relaxed),
            self.tick_time_p95_us.load(Ordering::Relaxed),
            self.tick_time_p99_us.load(Ordering::Relaxed),
            self.tick_time_max_us.load(Ordering::Relaxed),
            self.tick_count.load(Ordering::Relaxed),
            self.connections_active.load(Ordering::Relaxed),
            self.messages_sent.load(Ordering::Relaxed),
            self.messages_received.load(Ordering::Relaxed),
            self.messages_rejected.load(Ordering::Relaxed),
            self.messages_dropped.load(Ordering::Relaxed),
            self.bytes_sent.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
            self.settlements_verified.load(Ordering::Relaxed),
            self.settlements_rejected.load(Ordering::Relaxed),
            self.settlements_skipped.load(Ordering::Relaxed),
            self.settlements_failed.load(Ordering::Relaxed),
            self.store_failures.load(Ordering::Relaxed),
            self.uptime_seconds(),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Saturating decrement for gauges
fn decrement(gauge: &AtomicU64, by: u64) {
    let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(by)));
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = route(&metrics, &request);

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

/// Build the HTTP response for one request
fn route(metrics: &Metrics, request: &str) -> String {
    let (content_type, body) = if request.starts_with("GET /metrics/json") || request.starts_with("GET /json") {
        ("application/json", metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        ("text/plain; version=0.0.4", metrics.to_prometheus())
    } else if request.starts_with("GET /health") {
        ("text/plain", "OK".to_string())
    } else {
        return "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
    };

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}
