//! Session tick loop
//!
//! One background task per active session, owned by a `TickerHandle`. The
//! loop exits when told to stop, when the session leaves Active, or when the
//! handle is dropped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::game::constants::physics;
use crate::game::state::{SessionId, SessionStatus};
use crate::lobby::session::GameSession;
use crate::metrics::Metrics;

pub struct TickerHandle {
    session_id: SessionId,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl TickerHandle {
    /// Ask the loop to stop and wait for it to finish its current tick
    pub async fn stop(mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    debug!("Tick loop for session {} ended abnormally: {}", self.session_id, e);
                }
            }
        }
    }

    /// Stop without waiting
    pub fn cancel(&self) {
        let _ = self.stop.send(true);
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Spawn the fixed-rate loop for a session
pub fn start_tick_loop(session: Arc<Mutex<GameSession>>, session_id: SessionId, metrics: Option<Arc<Metrics>>) -> TickerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_micros(physics::TICK_DURATION_US));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Tick loop for session {} started at {} Hz", session_id, physics::TICK_RATE);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let started = std::time::Instant::now();
            let mut guard = session.lock().await;
            if guard.status() != SessionStatus::Active {
                break;
            }
            guard.tick(started);
            let tick = guard.tick_count();
            drop(guard);

            if let Some(metrics) = &metrics {
                metrics.record_tick_time(started.elapsed());
            }

            // Periodic status line every 30 seconds of play
            if tick % (physics::TICK_RATE as u64 * 30) == 0 {
                debug!("Session {} at tick {}", session_id, tick);
            }
        }

        info!("Tick loop for session {} stopped", session_id);
    });

    TickerHandle {
        session_id,
        stop: stop_tx,
        task: Some(task),
    }
}
