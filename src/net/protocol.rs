use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::match_result::MatchResults;
use crate::game::state::{Player, PlayerId, ProjectileId, SessionId, SessionStatus};
use crate::util::vec3::Vec3;

/// Client-chosen correlation id echoed in the reply
pub type RequestId = u32;

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Open a new session
    CreateSession { request_id: RequestId },
    /// Join a session that has not started yet
    JoinSession {
        request_id: RequestId,
        session_id: SessionId,
        account: String,
    },
    /// Signal readiness; the session starts when everyone is ready
    PlayerReady {
        request_id: RequestId,
        session_id: SessionId,
    },
    /// Latest position and rotation (fire-and-forget)
    UpdatePosition { position: Vec3, rotation: Vec3 },
    /// Fire along a direction (fire-and-forget)
    FireWeapon { direction: Vec3 },
    /// Report the client's score
    RecordScore {
        request_id: RequestId,
        session_id: SessionId,
        score: u64,
    },
    /// End the match and settle rewards
    EndSession {
        request_id: RequestId,
        session_id: SessionId,
    },
    /// Fetch a session snapshot
    GetSession {
        request_id: RequestId,
        session_id: SessionId,
    },
    /// Ping for latency measurement
    Ping { timestamp: u64 },
}

impl ClientMessage {
    /// Correlation id for request/response messages
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            ClientMessage::CreateSession { request_id }
            | ClientMessage::JoinSession { request_id, .. }
            | ClientMessage::PlayerReady { request_id, .. }
            | ClientMessage::RecordScore { request_id, .. }
            | ClientMessage::EndSession { request_id, .. }
            | ClientMessage::GetSession { request_id, .. } => Some(*request_id),
            ClientMessage::UpdatePosition { .. }
            | ClientMessage::FireWeapon { .. }
            | ClientMessage::Ping { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::CreateSession { .. } => "createSession",
            ClientMessage::JoinSession { .. } => "joinSession",
            ClientMessage::PlayerReady { .. } => "playerReady",
            ClientMessage::UpdatePosition { .. } => "updatePosition",
            ClientMessage::FireWeapon { .. } => "fireWeapon",
            ClientMessage::RecordScore { .. } => "recordScore",
            ClientMessage::EndSession { .. } => "endSession",
            ClientMessage::GetSession { .. } => "getSession",
            ClientMessage::Ping { .. } => "ping",
        }
    }
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Sent once per connection with the id the server assigned it
    Welcome { player_id: PlayerId },
    /// Answer to a request message
    Reply {
        request_id: RequestId,
        result: Result<ReplyPayload, Failure>,
    },
    /// A fire-and-forget message could not be applied
    Rejected(Failure),
    /// Session broadcast
    Event(SessionEvent),
    /// Pong response with server timestamp
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
}

impl ServerMessage {
    pub fn ok(request_id: RequestId, payload: ReplyPayload) -> Self {
        ServerMessage::Reply {
            request_id,
            result: Ok(payload),
        }
    }

    pub fn err(request_id: RequestId, failure: Failure) -> Self {
        ServerMessage::Reply {
            request_id,
            result: Err(failure),
        }
    }
}

/// Successful reply bodies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplyPayload {
    SessionCreated { session_id: SessionId },
    Joined(SessionSnapshot),
    /// `started` is true when this ready made the session Active
    Ready { started: bool },
    ScoreRecorded { score: u64 },
    SessionEnded(MatchResults),
    Session(SessionSnapshot),
}

/// Structured failure, never a raw error string alone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub code: ErrorCode,
    pub message: String,
}

impl Failure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Stable failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    AlreadyStarted,
    SessionFull,
    TooManySessions,
    AccountInUse,
    PlayerNotFound,
    NotInSession,
    AlreadyInSession,
    SessionClosed,
    InvalidState,
    Internal,
    /// Sent faster than the server accepts, e.g. firing during the cooldown
    RateLimited,
}

/// Events fanned out to session members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    PlayerJoined {
        session_id: SessionId,
        player: PlayerSnapshot,
    },
    PlayerReady {
        session_id: SessionId,
        player_id: PlayerId,
    },
    SessionStarted {
        session_id: SessionId,
        players: Vec<PlayerSnapshot>,
    },
    PlayerMoved {
        player_id: PlayerId,
        position: Vec3,
        rotation: Vec3,
    },
    ProjectileFired {
        projectile_id: ProjectileId,
        owner_id: PlayerId,
        position: Vec3,
        direction: Vec3,
    },
    /// To the target
    PlayerHit {
        projectile_id: ProjectileId,
        shooter_id: PlayerId,
        damage: u32,
        health: u32,
    },
    /// To the shooter
    HitConfirmed {
        projectile_id: ProjectileId,
        target_id: PlayerId,
        damage: u32,
        target_health: u32,
    },
    PlayerKilled {
        killer_id: PlayerId,
        victim_id: PlayerId,
        killer_score: u64,
    },
    /// To the respawned player only
    Respawned { position: Vec3, health: u32 },
    /// To everyone else
    PlayerRespawned { player_id: PlayerId, position: Vec3 },
    ScoreUpdated { player_id: PlayerId, score: u64 },
    SessionEnded(MatchResults),
    PlayerLeft {
        session_id: SessionId,
        player_id: PlayerId,
    },
}

/// Player as seen by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub account: String,
    pub position: Vec3,
    pub rotation: Vec3,
    pub health: u32,
    pub score: u64,
    pub kills: u32,
    pub deaths: u32,
    pub ready: bool,
}

impl PlayerSnapshot {
    pub fn from_player(player: &Player) -> Self {
        Self {
            id: player.id,
            account: player.account.as_str().to_string(),
            position: player.position,
            rotation: player.rotation,
            health: player.health,
            score: player.score,
            kills: player.kills,
            deaths: player.deaths,
            ready: player.ready,
        }
    }
}

/// Session state for join replies and lookups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub tick: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Join order
    pub players: Vec<PlayerSnapshot>,
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers (compatible with the browser client)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
