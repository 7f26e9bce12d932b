//! Persistent store contract
//!
//! Session records and per-account aggregate stats. Every write is an upsert:
//! writing a record that does not exist yet creates it. Only the most recent
//! finished session records are retained; player stats are kept forever.

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::game::constants::settlement::MAX_RETAINED_SESSIONS;
use crate::game::match_result::{MatchResults, SettlementResult};
use crate::game::state::{Account, PlayerId, SessionId, SessionStatus};
use crate::settlement::amount::TokenAmount;

/// Stored view of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub players: Vec<(PlayerId, Account)>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub results: Vec<SettlementResult>,
}

impl SessionRecord {
    fn new(session_id: SessionId, created_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            status: SessionStatus::Created,
            players: Vec::new(),
            created_at,
            started_at: None,
            ended_at: None,
            results: Vec::new(),
        }
    }
}

/// Lifetime aggregates for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub account: Account,
    pub games_played: u64,
    pub total_score: u64,
    pub total_rewards: TokenAmount,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(String),
    #[error("Store data could not be (de)serialized: {0}")]
    Serialization(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub trait MatchStore: Send + Sync {
    fn create_session_record(&self, session_id: SessionId, created_at: DateTime<Utc>) -> Result<(), StoreError>;

    fn add_session_player(&self, session_id: SessionId, player_id: PlayerId, account: &Account) -> Result<(), StoreError>;

    fn update_session_status(&self, session_id: SessionId, status: SessionStatus, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Add one finished game to an account's aggregates
    fn upsert_player_stats(&self, account: &Account, score: u64, reward: TokenAmount) -> Result<PlayerStats, StoreError>;

    fn record_match_results(&self, results: &MatchResults) -> Result<(), StoreError>;

    fn session_record(&self, session_id: SessionId) -> Result<Option<SessionRecord>, StoreError>;

    fn player_stats(&self, account: &Account) -> Result<Option<PlayerStats>, StoreError>;
}

/// Store contents shared by the in-memory and file backends
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreData {
    /// Version for format compatibility
    version: u32,
    sessions: HashMap<SessionId, SessionRecord>,
    players: HashMap<Account, PlayerStats>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            version: 1,
            sessions: HashMap::new(),
            players: HashMap::new(),
        }
    }
}

impl StoreData {
    fn session_mut(&mut self, session_id: SessionId) -> &mut SessionRecord {
        self.sessions
            .entry(session_id)
            .or_insert_with(|| SessionRecord::new(session_id, Utc::now()))
    }

    fn create_session(&mut self, session_id: SessionId, created_at: DateTime<Utc>) {
        self.session_mut(session_id).created_at = created_at;
    }

    fn add_player(&mut self, session_id: SessionId, player_id: PlayerId, account: &Account) {
        let record = self.session_mut(session_id);
        if !record.players.iter().any(|(_, a)| a == account) {
            record.players.push((player_id, account.clone()));
        }
    }

    fn update_status(&mut self, session_id: SessionId, status: SessionStatus, at: DateTime<Utc>) {
        let record = self.session_mut(session_id);
        record.status = status;
        match status {
            SessionStatus::Active => record.started_at = Some(at),
            SessionStatus::Completed | SessionStatus::Abandoned => record.ended_at = Some(at),
            SessionStatus::Created => {}
        }
    }

    fn upsert_stats(&mut self, account: &Account, score: u64, reward: TokenAmount) -> PlayerStats {
        let now = Utc::now();
        let stats = self.players.entry(account.clone()).or_insert_with(|| PlayerStats {
            account: account.clone(),
            games_played: 0,
            total_score: 0,
            total_rewards: TokenAmount::ZERO,
            last_active: now,
        });
        stats.games_played += 1;
        stats.total_score = stats.total_score.saturating_add(score);
        stats.total_rewards = stats.total_rewards.saturating_add(reward);
        stats.last_active = now;
        stats.clone()
    }

    fn record_results(&mut self, results: &MatchResults) {
        let record = self.session_mut(results.session_id);
        record.status = SessionStatus::Completed;
        record.started_at = results.started_at.or(record.started_at);
        record.ended_at = Some(results.ended_at);
        record.results = results.results.clone();
    }

    /// Drop the oldest finished session records beyond `retain`.
    /// Live sessions are never pruned. Returns how many were dropped.
    fn prune_finished(&mut self, retain: usize) -> usize {
        let mut finished: Vec<(DateTime<Utc>, SessionId)> = self
            .sessions
            .values()
            .filter(|r| r.status.is_terminal())
            .map(|r| (r.ended_at.unwrap_or(r.created_at), r.session_id))
            .collect();
        if finished.len() <= retain {
            return 0;
        }

        finished.sort_unstable();
        let excess = finished.len() - retain;
        for (_, session_id) in &finished[..excess] {
            self.sessions.remove(session_id);
        }
        excess
    }
}

/// Process-local store, lost on restart
#[derive(Debug)]
pub struct InMemoryStore {
    data: Mutex<StoreData>,
    retain_sessions: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            data: Mutex::new(StoreData::default()),
            retain_sessions: MAX_RETAINED_SESSIONS,
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` finished session records
    pub fn with_session_retention(mut self, limit: usize) -> Self {
        self.retain_sessions = limit;
        self
    }

    pub fn session_count(&self) -> usize {
        self.data.lock().sessions.len()
    }

    fn update<T>(&self, change: impl FnOnce(&mut StoreData) -> T) -> T {
        let mut data = self.data.lock();
        let out = change(&mut data);
        data.prune_finished(self.retain_sessions);
        out
    }
}

impl MatchStore for InMemoryStore {
    fn create_session_record(&self, session_id: SessionId, created_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(|d| d.create_session(session_id, created_at));
        Ok(())
    }

    fn add_session_player(&self, session_id: SessionId, player_id: PlayerId, account: &Account) -> Result<(), StoreError> {
        self.update(|d| d.add_player(session_id, player_id, account));
        Ok(())
    }

    fn update_session_status(&self, session_id: SessionId, status: SessionStatus, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(|d| d.update_status(session_id, status, at));
        Ok(())
    }

    fn upsert_player_stats(&self, account: &Account, score: u64, reward: TokenAmount) -> Result<PlayerStats, StoreError> {
        Ok(self.update(|d| d.upsert_stats(account, score, reward)))
    }

    fn record_match_results(&self, results: &MatchResults) -> Result<(), StoreError> {
        self.update(|d| d.record_results(results));
        Ok(())
    }

    fn session_record(&self, session_id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.data.lock().sessions.get(&session_id).cloned())
    }

    fn player_stats(&self, account: &Account) -> Result<Option<PlayerStats>, StoreError> {
        Ok(self.data.lock().players.get(account).cloned())
    }
}

/// JSON file store.
///
/// Changes apply in memory under the lock and return at once. A dedicated
/// writer thread rewrites the file afterwards, so callers on the async
/// runtime never touch the disk. Bursts of changes coalesce into one write.
pub struct JsonFileStore {
    path: PathBuf,
    data: Arc<Mutex<StoreData>>,
    retain_sessions: usize,
    dirty: Option<mpsc::Sender<()>>,
    writer: Option<JoinHandle<()>>,
}

impl JsonFileStore {
    /// Refuse to load files larger than this
    const MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

    /// Open the store, starting empty if the file does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_retention(path, MAX_RETAINED_SESSIONS)
    }

    /// Open the store keeping at most `retain_sessions` finished session records
    pub fn open_with_retention(path: impl AsRef<Path>, retain_sessions: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let mut data = if path.exists() {
            let metadata = fs::metadata(&path).map_err(|e| StoreError::Io(e.to_string()))?;
            if metadata.len() > Self::MAX_FILE_SIZE {
                return Err(StoreError::Unavailable(format!(
                    "store file too large ({} bytes > {} limit)",
                    metadata.len(),
                    Self::MAX_FILE_SIZE
                )));
            }

            let contents = fs::read_to_string(&path).map_err(|e| StoreError::Io(e.to_string()))?;
            let data: StoreData =
                serde_json::from_str(&contents).map_err(|e| StoreError::Serialization(e.to_string()))?;
            info!(
                "Loaded {} sessions and {} player records from {}",
                data.sessions.len(),
                data.players.len(),
                path.display()
            );
            data
        } else {
            debug!("No existing store file at {}", path.display());
            StoreData::default()
        };

        let pruned = data.prune_finished(retain_sessions);
        if pruned > 0 {
            info!("Pruned {} old session records on load", pruned);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }

        let data = Arc::new(Mutex::new(data));
        // One pending notification is enough: the writer always saves the latest state
        let (dirty, pending) = mpsc::channel(1);
        let writer = {
            let data = Arc::clone(&data);
            let path = path.clone();
            std::thread::Builder::new()
                .name("store-writer".into())
                .spawn(move || run_writer(path, data, pending))
                .map_err(|e| StoreError::Io(e.to_string()))?
        };

        Ok(Self {
            path,
            data,
            retain_sessions,
            dirty: Some(dirty),
            writer: Some(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply a change in memory and schedule a background save
    fn write<T>(&self, change: impl FnOnce(&mut StoreData) -> T) -> Result<T, StoreError> {
        let out = {
            let mut data = self.data.lock();
            let out = change(&mut data);
            data.prune_finished(self.retain_sessions);
            out
        };

        let Some(dirty) = &self.dirty else {
            return Err(StoreError::Unavailable("store is closed".into()));
        };
        match dirty.try_send(()) {
            // A save is already queued and will include this change
            Ok(()) | Err(TrySendError::Full(())) => Ok(out),
            Err(TrySendError::Closed(())) => Err(StoreError::Unavailable("store writer stopped".into())),
        }
    }
}

impl Drop for JsonFileStore {
    /// Flush the last queued save before going away
    fn drop(&mut self) {
        self.dirty.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                warn!("Store writer for {} panicked", self.path.display());
            }
        }
    }
}

/// Save the latest snapshot once per notification until the store closes
fn run_writer(path: PathBuf, data: Arc<Mutex<StoreData>>, mut pending: mpsc::Receiver<()>) {
    while pending.blocking_recv().is_some() {
        let contents = {
            let data = data.lock();
            serde_json::to_string_pretty(&*data)
        };
        let result = contents
            .map_err(|e| StoreError::Serialization(e.to_string()))
            .and_then(|contents| save_atomically(&path, &contents));
        if let Err(e) = result {
            warn!("Failed to save store to {}: {}", path.display(), e);
        }
    }
    debug!("Store writer for {} stopped", path.display());
}

fn save_atomically(path: &Path, contents: &str) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).map_err(|e| StoreError::Io(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::Io(e.to_string()))
}
