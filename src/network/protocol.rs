//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON text frames, tagged by `"type"`.
//!
//! Snapshots are filtered per recipient at serialization time: unrevealed
//! tiles carry no affiliation unless the recipient is a spymaster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::{ChatError, ChatMessage};
use crate::game::command::Command;
use crate::game::engine::{GameError, MoveRejection};
use crate::game::state::{
    Affiliation, Player, PlayerId, Remaining, Session, SessionId, SessionStatus, Team,
};

/// Correlates a reply with its request.
pub type RequestId = u64;

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// A tile as seen by one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileView {
    /// Board position.
    pub position: usize,
    /// Word on the tile.
    pub word: String,
    /// Hidden for unrevealed tiles unless the recipient is a spymaster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<Affiliation>,
    /// Face up.
    pub revealed: bool,
}

/// Versioned, recipient-filtered copy of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session identifier.
    pub id: SessionId,
    /// Commit version this snapshot reflects.
    pub version: u64,
    /// Active or finished.
    pub status: SessionStatus,
    /// Team to act.
    pub current_turn: Team,
    /// Hidden team tiles per team.
    pub remaining: Remaining,
    /// Winner once finished.
    pub winner: Option<Team>,
    /// Players in id order.
    pub players: Vec<Player>,
    /// Board in position order.
    pub tiles: Vec<TileView>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last commit time.
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Serialize a session for `viewer`. Spymasters see every affiliation;
    /// anyone else (including anonymous pollers) sees revealed ones only.
    pub fn for_viewer(session: &Session, viewer: Option<&PlayerId>) -> Self {
        let full = viewer.is_some_and(|id| session.is_spymaster(id));
        Self::build(session, full)
    }

    /// Snapshot with all affiliations visible.
    pub fn full(session: &Session) -> Self {
        Self::build(session, true)
    }

    fn build(session: &Session, full: bool) -> Self {
        let tiles = session
            .tiles
            .iter()
            .map(|tile| TileView {
                position: tile.position,
                word: tile.word.clone(),
                affiliation: (full || tile.revealed).then_some(tile.affiliation),
                revealed: tile.revealed,
            })
            .collect();

        Self {
            id: session.id.clone(),
            version: session.version,
            status: session.status,
            current_turn: session.current_turn,
            remaining: session.remaining,
            winner: session.winner,
            players: session.players.values().cloned().collect(),
            tiles,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }

    /// Look up a player.
    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.id == id)
    }

    /// Check if the game is over.
    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with the server.
    Auth {
        /// JWT from the identity provider.
        token: String,
    },

    /// Deal a new session with the caller as its first player.
    CreateSession {
        /// Correlation id.
        request_id: RequestId,
        /// Creating player.
        creator_id: PlayerId,
        /// Creator's display name.
        display_name: String,
    },

    /// Upsert a player onto a team.
    JoinTeam {
        /// Correlation id.
        request_id: RequestId,
        /// Target session.
        session_id: SessionId,
        /// Acting player.
        player_id: PlayerId,
        /// Display name.
        display_name: String,
        /// Team, or `None` to observe.
        team: Option<Team>,
    },

    /// Become spymaster of one's team.
    SetSpymaster {
        /// Correlation id.
        request_id: RequestId,
        /// Target session.
        session_id: SessionId,
        /// Acting player.
        player_id: PlayerId,
    },

    /// Reveal a tile.
    RevealTile {
        /// Correlation id.
        request_id: RequestId,
        /// Target session.
        session_id: SessionId,
        /// Acting player.
        player_id: PlayerId,
        /// Board position.
        position: usize,
    },

    /// Pass the turn.
    EndTurn {
        /// Correlation id.
        request_id: RequestId,
        /// Target session.
        session_id: SessionId,
        /// Acting player.
        player_id: PlayerId,
    },

    /// Pull the current state (polling fallback).
    GetSnapshot {
        /// Correlation id.
        request_id: RequestId,
        /// Target session.
        session_id: SessionId,
        /// Viewer, for affiliation filtering.
        #[serde(default)]
        player_id: Option<PlayerId>,
    },

    /// Open the push channel for a session on this connection.
    Subscribe {
        /// Target session.
        session_id: SessionId,
        /// Client instance id, unique per browser tab.
        client_id: String,
        /// Viewer, for affiliation filtering.
        #[serde(default)]
        player_id: Option<PlayerId>,
    },

    /// Close the push channel.
    Unsubscribe {
        /// Target session.
        session_id: SessionId,
        /// Client instance id.
        client_id: String,
    },

    /// Post to a chat channel.
    SendChat {
        /// Correlation id.
        request_id: RequestId,
        /// Target session.
        session_id: SessionId,
        /// Sender.
        player_id: PlayerId,
        /// Team channel, or `None` for session-wide.
        team: Option<Team>,
        /// Message text.
        content: String,
    },

    /// Read a chat channel.
    ListChat {
        /// Correlation id.
        request_id: RequestId,
        /// Target session.
        session_id: SessionId,
        /// Reader.
        player_id: PlayerId,
        /// Team channel, or `None` for session-wide.
        team: Option<Team>,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client clock, echoed back.
        timestamp: u64,
    },
}

impl ClientMessage {
    /// Correlation id, for request/reply messages.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            ClientMessage::CreateSession { request_id, .. }
            | ClientMessage::JoinTeam { request_id, .. }
            | ClientMessage::SetSpymaster { request_id, .. }
            | ClientMessage::RevealTile { request_id, .. }
            | ClientMessage::EndTurn { request_id, .. }
            | ClientMessage::GetSnapshot { request_id, .. }
            | ClientMessage::SendChat { request_id, .. }
            | ClientMessage::ListChat { request_id, .. } => Some(*request_id),
            ClientMessage::Auth { .. }
            | ClientMessage::Subscribe { .. }
            | ClientMessage::Unsubscribe { .. }
            | ClientMessage::Ping { .. } => None,
        }
    }

    /// The player this message claims to act for.
    pub fn acting_player(&self) -> Option<&PlayerId> {
        match self {
            ClientMessage::CreateSession { creator_id, .. } => Some(creator_id),
            ClientMessage::JoinTeam { player_id, .. }
            | ClientMessage::SetSpymaster { player_id, .. }
            | ClientMessage::RevealTile { player_id, .. }
            | ClientMessage::EndTurn { player_id, .. }
            | ClientMessage::SendChat { player_id, .. }
            | ClientMessage::ListChat { player_id, .. } => Some(player_id),
            ClientMessage::GetSnapshot { player_id, .. }
            | ClientMessage::Subscribe { player_id, .. } => player_id.as_ref(),
            ClientMessage::Auth { .. }
            | ClientMessage::Unsubscribe { .. }
            | ClientMessage::Ping { .. } => None,
        }
    }

    /// Split a game command message into its session and engine command.
    pub fn into_command(self) -> Option<(SessionId, Command)> {
        match self {
            ClientMessage::JoinTeam { session_id, player_id, display_name, team, .. } => {
                Some((session_id, Command::JoinTeam { player_id, display_name, team }))
            }
            ClientMessage::SetSpymaster { session_id, player_id, .. } => {
                Some((session_id, Command::SetSpymaster { player_id }))
            }
            ClientMessage::RevealTile { session_id, player_id, position, .. } => {
                Some((session_id, Command::RevealTile { player_id, position }))
            }
            ClientMessage::EndTurn { session_id, player_id, .. } => {
                Some((session_id, Command::EndTurn { player_id }))
            }
            _ => None,
        }
    }

    /// Build the wire message for an engine command.
    pub fn from_command(request_id: RequestId, session_id: SessionId, command: Command) -> Self {
        match command {
            Command::JoinTeam { player_id, display_name, team } => {
                ClientMessage::JoinTeam { request_id, session_id, player_id, display_name, team }
            }
            Command::SetSpymaster { player_id } => {
                ClientMessage::SetSpymaster { request_id, session_id, player_id }
            }
            Command::RevealTile { player_id, position } => {
                ClientMessage::RevealTile { request_id, session_id, player_id, position }
            }
            Command::EndTurn { player_id } => {
                ClientMessage::EndTurn { request_id, session_id, player_id }
            }
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Response to a session command or snapshot pull.
    Reply {
        /// Correlation id.
        request_id: RequestId,
        /// State after the command, filtered for the caller.
        snapshot: SessionSnapshot,
    },

    /// Push channel delivery.
    Snapshot {
        /// Current state, filtered for the subscriber.
        snapshot: SessionSnapshot,
    },

    /// Response to `list_chat`.
    ChatMessages {
        /// Correlation id.
        request_id: RequestId,
        /// Oldest first.
        messages: Vec<ChatMessage>,
    },

    /// Response to `send_chat`.
    ChatSent {
        /// Correlation id.
        request_id: RequestId,
        /// Stored message.
        message: ChatMessage,
    },

    /// Request failed.
    Error(ServerError),

    /// Pong response.
    Pong {
        /// Echoed client clock.
        timestamp: u64,
        /// Server clock (Unix millis).
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Player id bound to this connection.
    pub player_id: Option<PlayerId>,
    /// Name from the identity provider.
    pub display_name: Option<String>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Request that failed, if any.
    #[serde(default)]
    pub request_id: Option<RequestId>,
    /// Error code.
    pub code: ErrorCode,
    /// Detail for `invalid_move`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<MoveRejection>,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Create an error without a correlation id.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            request_id: None,
            code,
            reason: None,
            message: message.into(),
        }
    }

    /// Attach a correlation id.
    pub fn with_request(mut self, request_id: Option<RequestId>) -> Self {
        self.request_id = request_id;
        self
    }
}

impl From<&GameError> for ServerError {
    fn from(err: &GameError) -> Self {
        let mut error = ServerError::new(ErrorCode::from(err), err.to_string());
        if let GameError::InvalidMove(reason) = err {
            error.reason = Some(*reason);
        }
        error
    }
}

impl From<&ChatError> for ServerError {
    fn from(err: &ChatError) -> Self {
        let code = match err {
            ChatError::NotMember(_) => ErrorCode::NotFound,
            ChatError::WrongTeam(_) => ErrorCode::Forbidden,
            ChatError::Empty | ChatError::TooLong { .. } => ErrorCode::InvalidInput,
        };
        ServerError::new(code, err.to_string())
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unknown session or player.
    NotFound,
    /// Session already has a winner.
    SessionFinished,
    /// Command needs team membership.
    NoTeam,
    /// Turn, role or tile precondition failed; see `reason`.
    InvalidMove,
    /// Not authenticated, or acting for someone else.
    NotAuthenticated,
    /// Not allowed to access this resource.
    Forbidden,
    /// Malformed message.
    InvalidInput,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl From<&GameError> for ErrorCode {
    fn from(err: &GameError) -> Self {
        match err {
            GameError::PlayerNotFound(_) => ErrorCode::NotFound,
            GameError::SessionFinished => ErrorCode::SessionFinished,
            GameError::NoTeam => ErrorCode::NoTeam,
            GameError::InvalidMove(_) => ErrorCode::InvalidMove,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{sample_session, Role};

    fn with_players() -> Session {
        let mut session = sample_session("proto");
        for (id, team, role) in [
            ("op", Some(Team::TeamA), Role::Operative),
            ("spy", Some(Team::TeamB), Role::Spymaster),
            ("obs", None, Role::Operative),
        ] {
            session.players.insert(PlayerId::new(id), Player {
                id: PlayerId::new(id),
                display_name: id.into(),
                team,
                role,
            });
        }
        session.tiles[3].revealed = true;
        session.remaining = Remaining::count(&session.tiles);
        session
    }

    #[test]
    fn test_operative_sees_only_revealed_affiliations() {
        let session = with_players();
        let snap = SessionSnapshot::for_viewer(&session, Some(&PlayerId::new("op")));

        assert_eq!(snap.tiles[3].affiliation, Some(Affiliation::TeamA));
        assert!(snap.tiles.iter().filter(|t| !t.revealed).all(|t| t.affiliation.is_none()));
        assert_eq!(snap.players.len(), 3);
    }

    #[test]
    fn test_spymaster_sees_everything() {
        let session = with_players();
        let snap = SessionSnapshot::for_viewer(&session, Some(&PlayerId::new("spy")));
        assert!(snap.tiles.iter().all(|t| t.affiliation.is_some()));
        assert_eq!(snap.tiles[24].affiliation, Some(Affiliation::Assassin));
    }

    #[test]
    fn test_anonymous_and_unknown_viewers_are_filtered() {
        let session = with_players();
        for viewer in [None, Some(PlayerId::new("obs")), Some(PlayerId::new("stranger"))] {
            let snap = SessionSnapshot::for_viewer(&session, viewer.as_ref());
            assert_eq!(snap.tiles.iter().filter(|t| t.affiliation.is_some()).count(), 1);
        }
    }

    #[test]
    fn test_hidden_affiliation_absent_from_json() {
        let session = with_players();
        let snap = SessionSnapshot::for_viewer(&session, None);
        let json = serde_json::to_value(&snap).unwrap();

        let tiles = json["tiles"].as_array().unwrap();
        assert!(tiles[0].get("affiliation").is_none());
        assert_eq!(tiles[3]["affiliation"], "team_a");
        assert!(!json.to_string().contains("assassin"));
    }

    #[test]
    fn test_client_message_wire_shape() {
        let msg = ClientMessage::RevealTile {
            request_id: 7,
            session_id: "abc".into(),
            player_id: PlayerId::new("p1"),
            position: 12,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "reveal_tile");
        assert_eq!(json["position"], 12);
        assert_eq!(json["player_id"], "p1");

        let parsed = ClientMessage::from_json(r#"{"type":"get_snapshot","request_id":1,"session_id":"abc"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::GetSnapshot {
            request_id: 1,
            session_id: "abc".into(),
            player_id: None,
        });
    }

    #[test]
    fn test_command_conversion_roundtrip() {
        let command = Command::JoinTeam {
            player_id: PlayerId::new("p"),
            display_name: "Pat".into(),
            team: None,
        };
        let msg = ClientMessage::from_command(9, "s".into(), command.clone());
        assert_eq!(msg.request_id(), Some(9));
        assert_eq!(msg.acting_player(), Some(&PlayerId::new("p")));
        assert_eq!(msg.into_command(), Some(("s".to_string(), command)));

        let ping = ClientMessage::Ping { timestamp: 1 };
        assert_eq!(ping.request_id(), None);
        assert_eq!(ping.into_command(), None);
    }

    #[test]
    fn test_invalid_move_error_carries_reason() {
        let err = GameError::InvalidMove(MoveRejection::SpymasterForbidden);
        let error = ServerError::from(&err).with_request(Some(4));
        let json = ServerMessage::Error(error).to_json().unwrap();

        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""code":"invalid_move""#));
        assert!(json.contains(r#""reason":"spymaster_forbidden""#));
        assert!(json.contains(r#""request_id":4"#));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::from(&GameError::SessionFinished), ErrorCode::SessionFinished);
        assert_eq!(ErrorCode::from(&GameError::NoTeam), ErrorCode::NoTeam);
        assert_eq!(
            ErrorCode::from(&GameError::PlayerNotFound(PlayerId::new("x"))),
            ErrorCode::NotFound
        );
        let error = ServerError::from(&ChatError::WrongTeam(Team::TeamA));
        assert_eq!(error.code, ErrorCode::Forbidden);
    }

    #[test]
    fn test_server_snapshot_roundtrip() {
        let session = with_players();
        let msg = ServerMessage::Snapshot { snapshot: SessionSnapshot::full(&session) };
        let parsed = ServerMessage::from_json(&msg.to_json().unwrap()).unwrap();

        if let ServerMessage::Snapshot { snapshot } = parsed {
            assert_eq!(snapshot, SessionSnapshot::full(&session));
        } else {
            panic!("Wrong message type");
        }
    }
}
