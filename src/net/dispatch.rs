//! Message dispatch
//!
//! `Dispatcher::handle` is the one entry point from the transport into the
//! session layer. It checks which session a connection belongs to, routes the
//! message, and turns every domain error into a structured `Failure`. It also
//! remembers which sessions each connection created, so sessions nobody ever
//! joined are discarded when their creator goes away.

use hashbrown::HashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

use crate::game::state::{Account, PlayerId, SessionId};
use crate::lobby::registry::{RegistryError, RemoveOutcome, SessionRegistry};
use crate::lobby::session::SessionError;
use crate::metrics::Metrics;
use crate::net::protocol::{ClientMessage, ErrorCode, Failure, ReplyPayload, ServerMessage};

impl From<&RegistryError> for Failure {
    fn from(err: &RegistryError) -> Self {
        let code = match err {
            RegistryError::NotFound(_) => ErrorCode::NotFound,
            RegistryError::TooManySessions(_) => ErrorCode::TooManySessions,
            RegistryError::Session(e) => match e {
                SessionError::AlreadyStarted => ErrorCode::AlreadyStarted,
                SessionError::SessionFull(_) => ErrorCode::SessionFull,
                SessionError::AccountInUse(_) => ErrorCode::AccountInUse,
                SessionError::PlayerNotFound(_) => ErrorCode::PlayerNotFound,
                SessionError::SessionClosed => ErrorCode::SessionClosed,
                SessionError::InvalidInput(_) => ErrorCode::BadRequest,
                SessionError::FireCooldown(_) => ErrorCode::RateLimited,
                SessionError::NotActive | SessionError::PlayerDead | SessionError::InvalidTransition { .. } => {
                    ErrorCode::InvalidState
                }
            },
        };
        Failure::new(code, err.to_string())
    }
}

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    /// Which session each connection has joined
    memberships: RwLock<HashMap<PlayerId, SessionId>>,
    /// Sessions each connection created
    created: RwLock<HashMap<PlayerId, SmallVec<[SessionId; 2]>>>,
    metrics: Option<Arc<Metrics>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            memberships: RwLock::new(HashMap::new()),
            created: RwLock::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn session_of(&self, connection: PlayerId) -> Option<SessionId> {
        self.memberships.read().get(&connection).copied()
    }

    fn member_of(&self, connection: PlayerId, session_id: SessionId) -> Result<(), Failure> {
        match self.session_of(connection) {
            Some(current) if current == session_id => Ok(()),
            _ => Err(Failure::new(
                ErrorCode::NotInSession,
                format!("Not a member of session {session_id}"),
            )),
        }
    }

    fn current_session(&self, connection: PlayerId) -> Result<SessionId, Failure> {
        self.session_of(connection)
            .ok_or_else(|| Failure::new(ErrorCode::NotInSession, "Join a session first"))
    }

    fn count_rejection(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.messages_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Handle one inbound message. Returns the message to send straight back
    /// to the sender, if any; session broadcasts go out through the hub.
    pub async fn handle(&self, connection: PlayerId, message: ClientMessage) -> Option<ServerMessage> {
        match message.request_id() {
            Some(request_id) => debug!("{} #{} from {}", message.kind(), request_id, connection),
            None => debug!("{} from {}", message.kind(), connection),
        }

        let reply = match message {
            ClientMessage::Ping { timestamp } => {
                return Some(ServerMessage::Pong {
                    client_timestamp: timestamp,
                    server_timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
                });
            }

            ClientMessage::UpdatePosition { position, rotation } => {
                let result = match self.current_session(connection) {
                    Ok(session_id) => self
                        .registry
                        .update_position(session_id, connection, position, rotation)
                        .await
                        .map_err(|e| Failure::from(&e)),
                    Err(f) => Err(f),
                };
                return self.fire_and_forget(result);
            }

            ClientMessage::FireWeapon { direction } => {
                let result = match self.current_session(connection) {
                    Ok(session_id) => self
                        .registry
                        .fire_weapon(session_id, connection, direction)
                        .await
                        .map(|_| ())
                        .map_err(|e| Failure::from(&e)),
                    Err(f) => Err(f),
                };
                return self.fire_and_forget(result);
            }

            ClientMessage::CreateSession { request_id } => (request_id, self.create(connection)),

            ClientMessage::JoinSession {
                request_id,
                session_id,
                account,
            } => (request_id, self.join(connection, session_id, &account).await),

            ClientMessage::PlayerReady { request_id, session_id } => {
                let result = match self.member_of(connection, session_id) {
                    Ok(()) => self
                        .registry
                        .mark_ready(session_id, connection)
                        .await
                        .map(|outcome| ReplyPayload::Ready {
                            started: outcome.started,
                        })
                        .map_err(|e| Failure::from(&e)),
                    Err(f) => Err(f),
                };
                (request_id, result)
            }

            ClientMessage::RecordScore {
                request_id,
                session_id,
                score,
            } => {
                let result = match self.member_of(connection, session_id) {
                    Ok(()) => self
                        .registry
                        .record_score(session_id, connection, score)
                        .await
                        .map(|score| ReplyPayload::ScoreRecorded { score })
                        .map_err(|e| Failure::from(&e)),
                    Err(f) => Err(f),
                };
                (request_id, result)
            }

            ClientMessage::EndSession { request_id, session_id } => (request_id, self.end(connection, session_id).await),

            ClientMessage::GetSession { request_id, session_id } => (
                request_id,
                self.registry
                    .get_session(session_id)
                    .await
                    .map(ReplyPayload::Session)
                    .map_err(|e| Failure::from(&e)),
            ),
        };

        let (request_id, result) = reply;
        Some(match result {
            Ok(payload) => ServerMessage::ok(request_id, payload),
            Err(failure) => {
                debug!("Request {} from {} failed: {}", request_id, connection, failure.message);
                self.count_rejection();
                ServerMessage::err(request_id, failure)
            }
        })
    }

    fn fire_and_forget(&self, result: Result<(), Failure>) -> Option<ServerMessage> {
        match result {
            Ok(()) => None,
            Err(failure) => {
                self.count_rejection();
                Some(ServerMessage::Rejected(failure))
            }
        }
    }

    fn create(&self, connection: PlayerId) -> Result<ReplyPayload, Failure> {
        let session_id = self.registry.create_session().map_err(|e| Failure::from(&e))?;
        self.created.write().entry(connection).or_default().push(session_id);
        Ok(ReplyPayload::SessionCreated { session_id })
    }

    async fn join(&self, connection: PlayerId, session_id: SessionId, account: &str) -> Result<ReplyPayload, Failure> {
        let account = Account::parse(account).map_err(|e| Failure::new(ErrorCode::BadRequest, e.to_string()))?;

        // Claim the membership first so a concurrent end clears it along with the rest
        let claimed = {
            let mut memberships = self.memberships.write();
            match memberships.get(&connection) {
                Some(current) if *current != session_id => {
                    return Err(Failure::new(
                        ErrorCode::AlreadyInSession,
                        format!("Already in session {current}"),
                    ));
                }
                Some(_) => false,
                None => {
                    memberships.insert(connection, session_id);
                    true
                }
            }
        };

        match self.registry.join_session(session_id, connection, account).await {
            Ok(snapshot) => Ok(ReplyPayload::Joined(snapshot)),
            Err(e) => {
                if claimed {
                    let mut memberships = self.memberships.write();
                    if memberships.get(&connection) == Some(&session_id) {
                        memberships.remove(&connection);
                    }
                }
                Err(Failure::from(&e))
            }
        }
    }

    async fn end(&self, connection: PlayerId, session_id: SessionId) -> Result<ReplyPayload, Failure> {
        self.member_of(connection, session_id)?;

        let results = self
            .registry
            .end_session(session_id)
            .await
            .map_err(|e| Failure::from(&e))?;
        self.memberships.write().retain(|_, s| *s != session_id);
        Ok(ReplyPayload::SessionEnded(results))
    }

    /// Implicit cleanup when a connection goes away: leave the joined
    /// session, then discard any session it created that nobody joined.
    pub async fn disconnect(&self, connection: PlayerId) {
        let membership = self.memberships.write().remove(&connection);
        if let Some(session_id) = membership {
            match self.registry.remove_player(session_id, connection).await {
                Ok(RemoveOutcome::SessionAbandoned) => {
                    info!("Connection {} was the last in session {}", connection, session_id);
                }
                Ok(_) => {}
                // The session already ended or went away
                Err(e) => debug!("Disconnect cleanup for {}: {}", connection, e),
            }
        }

        let created = self.created.write().remove(&connection).unwrap_or_default();
        for session_id in created {
            if self.registry.discard_if_empty(session_id).await {
                debug!("Discarded unjoined session {} of {}", session_id, connection);
            }
        }
    }
}
