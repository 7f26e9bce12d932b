//! Match result and settlement records
//!
//! Built once when a session ends and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::state::{Account, PlayerId, SessionId};
use crate::settlement::amount::TokenAmount;

/// How one participant's reward was settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementOutcome {
    /// The ledger verified the score and granted a reward
    Verified(TokenAmount),
    /// The ledger answered but refused to verify
    Rejected,
    /// The account is never settled
    Skipped,
    /// The call failed (timeout, network, malformed answer)
    Failed(String),
}

impl SettlementOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, SettlementOutcome::Verified(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SettlementOutcome::Failed(_))
    }

    /// Reward granted, zero for anything but `Verified`
    pub fn reward(&self) -> TokenAmount {
        match self {
            SettlementOutcome::Verified(amount) => *amount,
            _ => TokenAmount::ZERO,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementOutcome::Verified(_) => "verified",
            SettlementOutcome::Rejected => "rejected",
            SettlementOutcome::Skipped => "skipped",
            SettlementOutcome::Failed(_) => "failed",
        }
    }
}

/// Per-player settlement record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub player_id: PlayerId,
    pub account: Account,
    pub score: u64,
    pub kills: u32,
    pub deaths: u32,
    pub outcome: SettlementOutcome,
}

/// Participant as captured at the moment the session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub player_id: PlayerId,
    pub account: Account,
    pub score: u64,
    pub kills: u32,
    pub deaths: u32,
}

impl Participant {
    pub fn settle(self, outcome: SettlementOutcome) -> SettlementResult {
        SettlementResult {
            player_id: self.player_id,
            account: self.account,
            score: self.score,
            kills: self.kills,
            deaths: self.deaths,
            outcome,
        }
    }
}

/// Final results of a completed session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResults {
    pub session_id: SessionId,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    /// Wall-clock seconds from start to end; 0 if it never started
    pub duration_secs: u64,
    /// Results in join order
    pub results: Vec<SettlementResult>,
    /// Whether the store accepted the aggregate stats and match record
    pub stats_persisted: bool,
}

impl MatchResults {
    pub fn result_for(&self, account: &Account) -> Option<&SettlementResult> {
        self.results.iter().find(|r| &r.account == account)
    }

    pub fn verified_count(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_verified()).count()
    }

    pub fn error_count(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_error()).count()
    }

    /// Sum of every verified reward
    pub fn total_rewards(&self) -> TokenAmount {
        self.results
            .iter()
            .fold(TokenAmount::ZERO, |acc, r| acc.saturating_add(r.outcome.reward()))
    }

    /// Highest score, ties broken by join order
    pub fn top_scorer(&self) -> Option<&SettlementResult> {
        self.results
            .iter()
            .reduce(|best, r| if r.score > best.score { r } else { best })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn result(account: &str, score: u64, outcome: SettlementOutcome) -> SettlementResult {
        Participant {
            player_id: Uuid::new_v4(),
            account: Account::parse(account).unwrap(),
            score,
            kills: 0,
            deaths: 0,
        }
        .settle(outcome)
    }

    fn results(list: Vec<SettlementResult>) -> MatchResults {
        MatchResults {
            session_id: Uuid::new_v4(),
            started_at: None,
            ended_at: Utc::now(),
            duration_secs: 0,
            results: list,
            stats_persisted: true,
        }
    }

    #[test]
    fn test_outcome_reward() {
        let amount = TokenAmount::from_whole(3);
        assert_eq!(SettlementOutcome::Verified(amount).reward(), amount);
        assert_eq!(SettlementOutcome::Rejected.reward(), TokenAmount::ZERO);
        assert_eq!(SettlementOutcome::Failed("timeout".into()).reward(), TokenAmount::ZERO);
        assert!(SettlementOutcome::Failed("x".into()).is_error());
        assert!(!SettlementOutcome::Skipped.is_error());
    }

    #[test]
    fn test_counts_and_totals() {
        let m = results(vec![
            result("0xa", 150, SettlementOutcome::Verified(TokenAmount::parse("1.5").unwrap())),
            result("0xb", 40, SettlementOutcome::Failed("timeout".into())),
            result("0xc", 200, SettlementOutcome::Verified(TokenAmount::from_whole(2))),
        ]);

        assert_eq!(m.verified_count(), 2);
        assert_eq!(m.error_count(), 1);
        assert_eq!(m.total_rewards(), TokenAmount::parse("3.5").unwrap());
        assert_eq!(m.top_scorer().map(|r| r.score), Some(200));
        assert_eq!(
            m.result_for(&Account::parse("0xB").unwrap()).map(|r| r.score),
            Some(40)
        );
    }

    #[test]
    fn test_top_scorer_tie_keeps_first() {
        let m = results(vec![
            result("0xa", 50, SettlementOutcome::Skipped),
            result("0xb", 50, SettlementOutcome::Skipped),
        ]);
        assert_eq!(m.top_scorer().map(|r| r.account.as_str()), Some("0xa"));
        assert!(results(vec![]).top_scorer().is_none());
    }
}
