//! Post-match reward settlement
//!
//! Every participant is verified against the ledger independently and
//! concurrently, each call under its own timeout. A failed participant is
//! recorded inline and never blocks the rest of the batch.

pub mod amount;
pub mod ledger;
pub mod store;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::game::match_result::{Participant, SettlementOutcome, SettlementResult};
use crate::game::state::SessionId;
use crate::metrics::Metrics;
use ledger::{LedgerError, LedgerVerifier};
use store::MatchStore;

/// Settlement pipeline shared by every session
#[derive(Clone)]
pub struct RewardSettlement {
    ledger: Arc<dyn LedgerVerifier>,
    store: Arc<dyn MatchStore>,
    timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

/// Per-participant outcomes plus whether aggregates reached the store
#[derive(Debug, Clone)]
pub struct SettlementReport {
    pub results: Vec<SettlementResult>,
    pub stats_persisted: bool,
}

impl RewardSettlement {
    pub fn new(ledger: Arc<dyn LedgerVerifier>, store: Arc<dyn MatchStore>, timeout: Duration) -> Self {
        Self {
            ledger,
            store,
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Verify every participant and persist aggregate stats for the verified
    /// ones. Results come back in the order participants were given.
    pub async fn settle(&self, session_id: SessionId, participants: Vec<Participant>) -> SettlementReport {
        let total = participants.len();
        debug!(
            "Settling {} participants of session {} ({:?} per ledger call)",
            total,
            session_id,
            self.timeout()
        );
        let mut outcomes: Vec<Option<SettlementOutcome>> = vec![None; total];
        let mut calls = JoinSet::new();

        for (index, participant) in participants.iter().enumerate() {
            if participant.account.is_noop() {
                outcomes[index] = Some(SettlementOutcome::Skipped);
                continue;
            }

            let ledger = Arc::clone(&self.ledger);
            let account = participant.account.clone();
            let score = participant.score;
            let timeout = self.timeout;

            calls.spawn(async move {
                let result = match tokio::time::timeout(timeout, ledger.verify(&account, session_id, score)).await {
                    Ok(result) => result,
                    Err(_) => Err(LedgerError::Timeout),
                };
                (index, result)
            });
        }

        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((index, Ok(verification))) if verification.verified => {
                    outcomes[index] = Some(SettlementOutcome::Verified(verification.reward));
                }
                Ok((index, Ok(_))) => {
                    debug!("Ledger rejected {} in session {}", participants[index].account, session_id);
                    outcomes[index] = Some(SettlementOutcome::Rejected);
                }
                Ok((index, Err(e))) => {
                    warn!(
                        "Settlement failed for {} in session {}: {}",
                        participants[index].account, session_id, e
                    );
                    outcomes[index] = Some(SettlementOutcome::Failed(e.to_string()));
                }
                Err(e) => {
                    // The slot stays empty and is marked failed below
                    warn!("Settlement task for session {} aborted: {}", session_id, e);
                }
            }
        }

        let results: Vec<SettlementResult> = participants
            .into_iter()
            .zip(outcomes)
            .map(|(participant, outcome)| {
                let outcome = outcome.unwrap_or_else(|| SettlementOutcome::Failed("settlement task aborted".to_string()));
                participant.settle(outcome)
            })
            .collect();

        let mut stats_persisted = true;
        for result in results.iter().filter(|r| r.outcome.is_verified()) {
            if let Err(e) = self
                .store
                .upsert_player_stats(&result.account, result.score, result.outcome.reward())
            {
                warn!("Failed to persist stats for {}: {}", result.account, e);
                stats_persisted = false;
            }
        }

        self.record_metrics(&results, stats_persisted);

        let verified = results.iter().filter(|r| r.outcome.is_verified()).count();
        let failed = results.iter().filter(|r| r.outcome.is_error()).count();
        info!(
            "Session {} settled: {} participants, {} verified, {} failed",
            session_id, total, verified, failed
        );

        SettlementReport {
            results,
            stats_persisted,
        }
    }

    fn record_metrics(&self, results: &[SettlementResult], stats_persisted: bool) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        for result in results {
            metrics.record_settlement(&result.outcome);
        }
        if !stats_persisted {
            metrics.record_store_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::match_result::MatchResults;
    use crate::game::state::{Account, PlayerId, SessionStatus};
    use amount::TokenAmount;
    use chrono::{DateTime, Utc};
    use ledger::{LedgerFuture, ScoreRatioLedger, Verification};
    use store::{InMemoryStore, PlayerStats, SessionRecord, StoreError};
    use uuid::Uuid;

    /// Ledger whose answer depends on the account
    struct ScriptedLedger;

    impl LedgerVerifier for ScriptedLedger {
        fn verify<'a>(&'a self, account: &'a Account, _session_id: SessionId, score: u64) -> LedgerFuture<'a> {
            Box::pin(async move {
                match account.as_str() {
                    "0xslow" => {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(Verification { verified: true, reward: TokenAmount::ZERO })
                    }
                    "0xdown" => Err(LedgerError::Transport("connection refused".into())),
                    "0xrejected" => Ok(Verification { verified: false, reward: TokenAmount::ZERO }),
                    _ => Ok(Verification {
                        verified: true,
                        reward: ScoreRatioLedger::default().reward_for(score),
                    }),
                }
            })
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Store that refuses every write
    struct BrokenStore;

    impl MatchStore for BrokenStore {
        fn create_session_record(&self, _: SessionId, _: DateTime<Utc>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn add_session_player(&self, _: SessionId, _: PlayerId, _: &Account) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn update_session_status(&self, _: SessionId, _: SessionStatus, _: DateTime<Utc>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn upsert_player_stats(&self, _: &Account, _: u64, _: TokenAmount) -> Result<PlayerStats, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn record_match_results(&self, _: &MatchResults) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn session_record(&self, _: SessionId) -> Result<Option<SessionRecord>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn player_stats(&self, _: &Account) -> Result<Option<PlayerStats>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    fn participant(account: &str, score: u64) -> Participant {
        Participant {
            player_id: Uuid::new_v4(),
            account: Account::parse(account).unwrap(),
            score,
            kills: 0,
            deaths: 0,
        }
    }

    fn settlement(store: Arc<dyn MatchStore>) -> RewardSettlement {
        RewardSettlement::new(Arc::new(ScriptedLedger), store, Duration::from_millis(200))
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_isolated() {
        let store = Arc::new(InMemoryStore::new());
        let report = settlement(store.clone())
            .settle(
                Uuid::new_v4(),
                vec![participant("0xacct1", 150), participant("0xdown", 40), participant("0xacct3", 300)],
            )
            .await;

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.results.iter().filter(|r| r.outcome.is_error()).count(), 1);
        assert!(report.results[1].outcome.is_error());
        assert!(report.stats_persisted);

        let acct1 = store.player_stats(&Account::parse("0xacct1").unwrap()).unwrap().unwrap();
        assert_eq!(acct1.total_rewards, TokenAmount::parse("1.5").unwrap());
        assert!(store.player_stats(&Account::parse("0xacct3").unwrap()).unwrap().is_some());
        assert!(store.player_stats(&Account::parse("0xdown").unwrap()).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_failed() {
        let store = Arc::new(InMemoryStore::new());
        let report = settlement(store)
            .settle(Uuid::new_v4(), vec![participant("0xacct1", 150), participant("0xslow", 40)])
            .await;

        assert_eq!(
            report.results[0].outcome,
            SettlementOutcome::Verified(TokenAmount::parse("1.5").unwrap())
        );
        assert_eq!(
            report.results[1].outcome,
            SettlementOutcome::Failed(LedgerError::Timeout.to_string())
        );
    }

    #[tokio::test]
    async fn test_noop_account_skipped_and_rejection_recorded() {
        let store = Arc::new(InMemoryStore::new());
        let report = settlement(store.clone())
            .settle(
                Uuid::new_v4(),
                vec![
                    participant(crate::game::constants::settlement::NOOP_ACCOUNT, 90),
                    participant("0xrejected", 10),
                ],
            )
            .await;

        assert_eq!(report.results[0].outcome, SettlementOutcome::Skipped);
        assert_eq!(report.results[1].outcome, SettlementOutcome::Rejected);
        assert!(store.player_stats(&Account::parse("0xrejected").unwrap()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_not_fatal() {
        let report = settlement(Arc::new(BrokenStore))
            .settle(Uuid::new_v4(), vec![participant("0xacct1", 100)])
            .await;

        assert!(report.results[0].outcome.is_verified());
        assert!(!report.stats_persisted);
    }

    #[tokio::test]
    async fn test_empty_participants() {
        let report = settlement(Arc::new(InMemoryStore::new()))
            .settle(Uuid::new_v4(), Vec::new())
            .await;
        assert!(report.results.is_empty());
        assert!(report.stats_persisted);
    }
}
