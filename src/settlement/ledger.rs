//! External ledger verification
//!
//! The ledger is untrusted and may be slow or down. Implementations only
//! report what the ledger answered; timeouts are applied by the caller.

use std::future::Future;
use std::pin::Pin;

use crate::game::state::{Account, SessionId};
use crate::settlement::amount::TokenAmount;

/// Ledger answer for one participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub verified: bool,
    pub reward: TokenAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger unreachable: {0}")]
    Transport(String),
    #[error("Ledger returned status {0}")]
    Status(u16),
    #[error("Malformed ledger response: {0}")]
    Malformed(String),
    #[error("Ledger call timed out")]
    Timeout,
}

pub type LedgerFuture<'a> = Pin<Box<dyn Future<Output = Result<Verification, LedgerError>> + Send + 'a>>;

/// Verifies a participant's score and computes the reward
pub trait LedgerVerifier: Send + Sync {
    fn verify<'a>(&'a self, account: &'a Account, session_id: SessionId, score: u64) -> LedgerFuture<'a>;

    fn name(&self) -> &'static str;
}

/// Local verifier granting one token per `points_per_token` score.
/// Used in development when no ledger endpoint is configured.
#[derive(Debug, Clone)]
pub struct ScoreRatioLedger {
    points_per_token: u64,
}

impl ScoreRatioLedger {
    pub fn new(points_per_token: u64) -> Self {
        Self {
            points_per_token: points_per_token.max(1),
        }
    }

    pub fn reward_for(&self, score: u64) -> TokenAmount {
        let one = TokenAmount::from_whole(1).base_units();
        TokenAmount::from_base_units(score as u128 * one / self.points_per_token as u128)
    }
}

impl Default for ScoreRatioLedger {
    fn default() -> Self {
        Self::new(100)
    }
}

impl LedgerVerifier for ScoreRatioLedger {
    fn verify<'a>(&'a self, _account: &'a Account, _session_id: SessionId, score: u64) -> LedgerFuture<'a> {
        let reward = self.reward_for(score);
        Box::pin(async move {
            Ok(Verification {
                verified: true,
                reward,
            })
        })
    }

    fn name(&self) -> &'static str {
        "score-ratio"
    }
}

#[cfg(feature = "ledger_http")]
pub use http::HttpLedgerVerifier;

#[cfg(feature = "ledger_http")]
mod http {
    use reqwest::Client;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use tracing::{debug, warn};

    use super::*;

    /// JSON-over-HTTP ledger gateway
    ///
    /// `POST {base_url}/verify` with `{account, sessionId, score}`, answered by
    /// `{verified, rewardAmount}` where the amount is a decimal string.
    pub struct HttpLedgerVerifier {
        client: Client,
        endpoint: String,
    }

    impl HttpLedgerVerifier {
        pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| LedgerError::Transport(e.to_string()))?;

            Ok(Self {
                client,
                endpoint: format!("{}/verify", base_url.trim_end_matches('/')),
            })
        }

        pub fn endpoint(&self) -> &str {
            &self.endpoint
        }

        async fn request(&self, account: &Account, session_id: SessionId, score: u64) -> Result<Verification, LedgerError> {
            let body = VerifyRequest {
                account: account.as_str(),
                session_id: session_id.to_string(),
                score,
            };

            debug!("Verifying {} for session {} with ledger", account, session_id);

            let response = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        LedgerError::Timeout
                    } else {
                        LedgerError::Transport(e.to_string())
                    }
                })?;

            if !response.status().is_success() {
                let status = response.status();
                warn!("Ledger error for {}: {}", account, status);
                return Err(LedgerError::Status(status.as_u16()));
            }

            let text = response
                .text()
                .await
                .map_err(|e| LedgerError::Transport(e.to_string()))?;

            parse_response(&text)
        }
    }

    impl LedgerVerifier for HttpLedgerVerifier {
        fn verify<'a>(&'a self, account: &'a Account, session_id: SessionId, score: u64) -> LedgerFuture<'a> {
            Box::pin(self.request(account, session_id, score))
        }

        fn name(&self) -> &'static str {
            "http"
        }
    }

    pub(super) fn parse_response(text: &str) -> Result<Verification, LedgerError> {
        let parsed: VerifyResponse =
            serde_json::from_str(text).map_err(|e| LedgerError::Malformed(e.to_string()))?;

        let reward = match parsed.reward_amount.as_deref() {
            Some(raw) => TokenAmount::parse(raw).map_err(|e| LedgerError::Malformed(e.to_string()))?,
            None if parsed.verified => {
                return Err(LedgerError::Malformed("verified without rewardAmount".to_string()))
            }
            None => TokenAmount::ZERO,
        };

        Ok(Verification {
            verified: parsed.verified,
            reward,
        })
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct VerifyRequest<'a> {
        account: &'a str,
        session_id: String,
        score: u64,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct VerifyResponse {
        verified: bool,
        reward_amount: Option<String>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_score_ratio_rewards() {
        let ledger = ScoreRatioLedger::default();
        let account = Account::parse("0xabc").unwrap();

        let v = ledger.verify(&account, Uuid::new_v4(), 150).await.unwrap();
        assert!(v.verified);
        assert_eq!(v.reward, TokenAmount::parse("1.5").unwrap());

        let v = ledger.verify(&account, Uuid::new_v4(), 0).await.unwrap();
        assert!(v.reward.is_zero());
    }

    #[test]
    fn test_score_ratio_zero_divisor_clamped() {
        let ledger = ScoreRatioLedger::new(0);
        assert_eq!(ledger.reward_for(3), TokenAmount::from_whole(3));
    }

    #[cfg(feature = "ledger_http")]
    #[test]
    fn test_parse_http_response() {
        let v = http::parse_response(r#"{"verified": true, "rewardAmount": "0.4"}"#).unwrap();
        assert_eq!(v.reward, TokenAmount::parse("0.4").unwrap());

        let v = http::parse_response(r#"{"verified": false}"#).unwrap();
        assert!(!v.verified);

        assert!(matches!(
            http::parse_response(r#"{"verified": true}"#),
            Err(LedgerError::Malformed(_))
        ));
        assert!(matches!(
            http::parse_response(r#"{"verified": true, "rewardAmount": "lots"}"#),
            Err(LedgerError::Malformed(_))
        ));
        assert!(matches!(http::parse_response("not json"), Err(LedgerError::Malformed(_))));
    }

    #[cfg(feature = "ledger_http")]
    #[test]
    fn test_http_endpoint_normalized() {
        let ledger = HttpLedgerVerifier::new("http://localhost:8545/", std::time::Duration::from_secs(1)).unwrap();
        assert_eq!(ledger.endpoint(), "http://localhost:8545/verify");
    }
}
