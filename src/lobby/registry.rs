//! Session registry
//!
//! Creates, looks up and retires sessions. The map lock guards only the
//! id -> session mapping and is never held across an await; everything inside
//! a session is serialized by that session's own mutex.

use chrono::Utc;
use hashbrown::HashMap;
use parking_lot::{Mutex as SyncMutex, RwLock};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::game::match_result::MatchResults;
use crate::game::state::{Account, PlayerId, ProjectileId, SessionId, SessionStatus};
use crate::lobby::outbound::Outbound;
use crate::lobby::session::{GameSession, SessionError};
use crate::lobby::ticker::{start_tick_loop, TickerHandle};
use crate::metrics::Metrics;
use crate::net::protocol::{SessionEvent, SessionSnapshot};
use crate::settlement::RewardSettlement;
use crate::util::vec3::Vec3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Session {0} not found")]
    NotFound(SessionId),
    #[error("Too many sessions (max {0})")]
    TooManySessions(usize),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Result of a ready signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyOutcome {
    /// This ready moved the session to Active
    pub started: bool,
    pub ready_count: usize,
    pub player_count: usize,
}

/// Result of removing a player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Others remain and were told
    Left { remaining: usize },
    /// The last player left; the session was abandoned and deleted
    SessionAbandoned,
    /// The session had already finished; only the seat was freed
    SessionFinished,
}

/// Session information for listing
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub player_count: usize,
    pub max_players: usize,
    pub created_at: chrono::DateTime<Utc>,
}

struct SessionEntry {
    session: Arc<Mutex<GameSession>>,
    ticker: SyncMutex<Option<TickerHandle>>,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
    outbound: Arc<dyn Outbound>,
    settlement: RewardSettlement,
    metrics: Option<Arc<Metrics>>,
    max_sessions: usize,
    max_players_per_session: usize,
}

impl SessionRegistry {
    pub fn new(
        outbound: Arc<dyn Outbound>,
        settlement: RewardSettlement,
        max_sessions: usize,
        max_players_per_session: usize,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            outbound,
            settlement,
            metrics: None,
            max_sessions,
            max_players_per_session,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.sessions.read().contains_key(&session_id)
    }

    fn entry(&self, session_id: SessionId) -> Result<Arc<SessionEntry>, RegistryError> {
        self.sessions
            .read()
            .get(&session_id)
            .cloned()
            .ok_or(RegistryError::NotFound(session_id))
    }

    #[cfg(test)]
    pub(crate) fn session_handle(&self, session_id: SessionId) -> Option<Arc<Mutex<GameSession>>> {
        self.entry(session_id).ok().map(|entry| entry.session.clone())
    }

    /// Unmap `entry` only if it is still the one registered under its id
    fn unmap(&self, session_id: SessionId, entry: &Arc<SessionEntry>) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(&session_id) {
            Some(current) if Arc::ptr_eq(current, entry) => sessions.remove(&session_id).is_some(),
            _ => false,
        }
    }

    fn record_abandoned(&self, session_id: SessionId) {
        if let Some(metrics) = &self.metrics {
            metrics.session_closed(SessionStatus::Abandoned);
        }
        self.store_write(
            "status update",
            self.settlement
                .store()
                .update_session_status(session_id, SessionStatus::Abandoned, Utc::now()),
        );
    }

    /// Store writes never fail the caller
    fn store_write<T>(&self, what: &str, result: Result<T, crate::settlement::store::StoreError>) -> bool {
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!("Store {} failed: {}", what, e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_store_failure();
                }
                false
            }
        }
    }

    pub fn create_session(&self) -> Result<SessionId, RegistryError> {
        let session_id = uuid::Uuid::new_v4();
        let mut session = GameSession::new(session_id, self.max_players_per_session, self.outbound.clone());
        if let Some(metrics) = &self.metrics {
            session = session.with_metrics(metrics.clone());
        }
        let created_at = session.created_at();

        {
            let mut sessions = self.sessions.write();
            if sessions.len() >= self.max_sessions {
                return Err(RegistryError::TooManySessions(self.max_sessions));
            }
            sessions.insert(
                session_id,
                Arc::new(SessionEntry {
                    session: Arc::new(Mutex::new(session)),
                    ticker: SyncMutex::new(None),
                }),
            );
        }

        info!("Created session {}", session_id);
        if let Some(metrics) = &self.metrics {
            metrics.session_created();
        }
        self.store_write(
            "create session",
            self.settlement.store().create_session_record(session_id, created_at),
        );
        Ok(session_id)
    }

    pub async fn join_session(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
        account: Account,
    ) -> Result<SessionSnapshot, RegistryError> {
        let entry = self.entry(session_id)?;
        let snapshot = entry.session.lock().await.add_player(player_id, account.clone())?;

        self.store_write(
            "add player",
            self.settlement.store().add_session_player(session_id, player_id, &account),
        );
        Ok(snapshot)
    }

    /// Mark a player ready; the tick loop starts once everyone is
    pub async fn mark_ready(&self, session_id: SessionId, player_id: PlayerId) -> Result<ReadyOutcome, RegistryError> {
        let entry = self.entry(session_id)?;
        let mut session = entry.session.lock().await;
        let started = session.mark_ready(player_id)?;
        let outcome = ReadyOutcome {
            started,
            ready_count: session.players().ready_count(),
            player_count: session.player_count(),
        };

        if started {
            // Installed under the session lock so a concurrent end sees it
            let handle = start_tick_loop(entry.session.clone(), session_id, self.metrics.clone());
            *entry.ticker.lock() = Some(handle);
        }
        drop(session);

        if started {
            self.store_write(
                "status update",
                self.settlement
                    .store()
                    .update_session_status(session_id, SessionStatus::Active, Utc::now()),
            );
        }
        Ok(outcome)
    }

    pub async fn update_position(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
        position: Vec3,
        rotation: Vec3,
    ) -> Result<(), RegistryError> {
        let entry = self.entry(session_id)?;
        let mut session = entry.session.lock().await;
        session.update_position(player_id, position, rotation, std::time::Instant::now())?;
        Ok(())
    }

    pub async fn fire_weapon(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
        direction: Vec3,
    ) -> Result<ProjectileId, RegistryError> {
        let entry = self.entry(session_id)?;
        let mut session = entry.session.lock().await;
        Ok(session.fire_weapon(player_id, direction)?)
    }

    /// Record a reported score; returns the player's score afterwards
    pub async fn record_score(&self, session_id: SessionId, player_id: PlayerId, score: u64) -> Result<u64, RegistryError> {
        let entry = self.entry(session_id)?;
        let mut session = entry.session.lock().await;
        Ok(session.record_score(player_id, score)?)
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<SessionSnapshot, RegistryError> {
        let entry = self.entry(session_id)?;
        let session = entry.session.lock().await;
        Ok(session.snapshot())
    }

    /// Get list of live sessions (for a session browser)
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let entries: Vec<Arc<SessionEntry>> = self.sessions.read().values().cloned().collect();

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let session = entry.session.lock().await;
            out.push(SessionSummary {
                session_id: session.id(),
                status: session.status(),
                player_count: session.player_count(),
                max_players: self.max_players_per_session,
                created_at: session.created_at(),
            });
        }
        out.sort_by_key(|s| s.created_at);
        out
    }

    /// End a match: retire it, stop ticking, settle every participant,
    /// broadcast the results and return them.
    pub async fn end_session(&self, session_id: SessionId) -> Result<MatchResults, RegistryError> {
        let entry = self
            .sessions
            .write()
            .remove(&session_id)
            .ok_or(RegistryError::NotFound(session_id))?;

        // Stop ticking before settlement touches the ledger
        let ticker = entry.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.stop().await;
        }

        let (participants, started_at, ended_at) = {
            let mut session = entry.session.lock().await;
            let participants = session.complete()?;
            (participants, session.started_at(), session.ended_at().unwrap_or_else(Utc::now))
        };
        info!(
            "Session {} completed with {} participants, settling",
            session_id,
            participants.len()
        );

        self.store_write(
            "status update",
            self.settlement
                .store()
                .update_session_status(session_id, SessionStatus::Completed, ended_at),
        );

        let report = self.settlement.settle(session_id, participants).await;

        let mut results = MatchResults {
            session_id,
            started_at,
            ended_at,
            duration_secs: started_at
                .map(|s| (ended_at - s).num_seconds().max(0) as u64)
                .unwrap_or(0),
            results: report.results,
            stats_persisted: report.stats_persisted,
        };
        if !self.store_write("match results", self.settlement.store().record_match_results(&results)) {
            results.stats_persisted = false;
        }
        if let Some(top) = results.top_scorer() {
            info!(
                "Session {} top scorer {} with {} ({} kills)",
                session_id, top.account, top.score, top.kills
            );
        }

        {
            let session = entry.session.lock().await;
            session.broadcast(SessionEvent::SessionEnded(results.clone()));
            session.release_members();
        }
        if let Some(metrics) = &self.metrics {
            metrics.session_closed(SessionStatus::Completed);
        }

        Ok(results)
    }

    /// Remove a player. The last player leaving an unfinished session
    /// abandons and deletes it.
    pub async fn remove_player(&self, session_id: SessionId, player_id: PlayerId) -> Result<RemoveOutcome, RegistryError> {
        let entry = self.entry(session_id)?;
        let mut session = entry.session.lock().await;
        session
            .remove_player(player_id)
            .ok_or(SessionError::PlayerNotFound(player_id))?;

        if session.status() == SessionStatus::Completed {
            return Ok(RemoveOutcome::SessionFinished);
        }
        if !session.is_empty() {
            return Ok(RemoveOutcome::Left {
                remaining: session.player_count(),
            });
        }

        // Only the caller that unmaps this exact entry retires it
        let unmapped = self.unmap(session_id, &entry);
        session.abandon();
        if let Some(ticker) = entry.ticker.lock().take() {
            ticker.cancel();
        }
        drop(session);

        if unmapped {
            info!("Session {} abandoned by its last player", session_id);
            self.record_abandoned(session_id);
        }
        Ok(RemoveOutcome::SessionAbandoned)
    }

    /// Retire a session that is still waiting and has nobody in it.
    /// Returns true if it was removed.
    pub async fn discard_if_empty(&self, session_id: SessionId) -> bool {
        let Ok(entry) = self.entry(session_id) else {
            return false;
        };
        let mut session = entry.session.lock().await;
        if session.status() != SessionStatus::Created || !session.is_empty() {
            return false;
        }
        if !self.unmap(session_id, &entry) {
            return false;
        }
        session.abandon();
        drop(session);

        info!("Session {} discarded, nobody joined", session_id);
        self.record_abandoned(session_id);
        true
    }

    /// Drain every live session on process shutdown
    pub async fn shutdown(&self) -> usize {
        let entries: Vec<(SessionId, Arc<SessionEntry>)> = self.sessions.write().drain().collect();
        let count = entries.len();

        for (session_id, entry) in entries {
            let ticker = entry.ticker.lock().take();
            if let Some(ticker) = ticker {
                ticker.stop().await;
            }

            let abandoned = entry.session.lock().await.abandon();
            if abandoned {
                self.record_abandoned(session_id);
            }
        }

        if count > 0 {
            info!("Shut down {} live sessions", count);
        }
        count
    }
}
