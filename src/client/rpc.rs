//! Request connections.
//!
//! One WebSocket per request: connect, authenticate if a token is set, send,
//! read until the matching reply, close. The polling fallback uses the same
//! path for `get_snapshot`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::chat::ChatMessage;
use crate::client::{ClientError, SyncConfig};
use crate::game::command::Command;
use crate::game::state::{PlayerId, SessionId, Team};
use crate::network::protocol::{ClientMessage, RequestId, ServerMessage, SessionSnapshot};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// FRAMING
// =============================================================================

/// Connect and, if `token` is set, authenticate.
pub(crate) async fn open(url: &str, token: Option<&str>) -> Result<WsStream, ClientError> {
    let (mut ws, _) = connect_async(url).await?;

    if let Some(token) = token {
        send(&mut ws, &ClientMessage::Auth { token: token.to_string() }).await?;
        match recv(&mut ws).await? {
            ServerMessage::AuthResult(result) if result.success => {}
            ServerMessage::AuthResult(result) => {
                return Err(ClientError::Auth(result.error.unwrap_or_else(|| "rejected".to_string())));
            }
            _ => return Err(ClientError::UnexpectedReply("expected auth_result")),
        }
    }

    Ok(ws)
}

pub(crate) async fn send(ws: &mut WsStream, msg: &ClientMessage) -> Result<(), ClientError> {
    ws.send(Message::Text(msg.to_json()?)).await?;
    Ok(())
}

/// Next server message. Unparseable frames are skipped.
pub(crate) async fn recv(ws: &mut WsStream) -> Result<ServerMessage, ClientError> {
    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Text(text) => match ServerMessage::from_json(&text) {
                Ok(msg) => return Ok(msg),
                Err(e) => warn!("Failed to parse server message: {}", e),
            },
            Message::Close(_) => return Err(ClientError::Closed),
            _ => {}
        }
    }
    Err(ClientError::Closed)
}

/// Correlation id of a reply, if it carries one.
fn reply_id(msg: &ServerMessage) -> Option<RequestId> {
    match msg {
        ServerMessage::Reply { request_id, .. }
        | ServerMessage::ChatMessages { request_id, .. }
        | ServerMessage::ChatSent { request_id, .. } => Some(*request_id),
        ServerMessage::Error(error) => error.request_id,
        _ => None,
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Issues requests against the command/query surface.
#[derive(Debug)]
pub struct RpcClient {
    url: String,
    token: Option<String>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create from client settings.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            url: config.server_url.clone(),
            token: config.token.clone(),
            timeout: config.request_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a correlation id.
    pub fn next_request_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send one request and wait for its reply.
    ///
    /// Server-side failures come back as [`ClientError::Server`].
    pub async fn call(&self, request: ClientMessage) -> Result<ServerMessage, ClientError> {
        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    async fn exchange(&self, request: ClientMessage) -> Result<ServerMessage, ClientError> {
        let request_id = request.request_id();
        let mut ws = open(&self.url, self.token.as_deref()).await?;
        send(&mut ws, &request).await?;

        let reply = loop {
            let msg = recv(&mut ws).await?;
            match msg {
                // An error without an id on a one-shot connection is ours too
                ServerMessage::Error(error) if error.request_id.is_none() || error.request_id == request_id => {
                    break Err(ClientError::Server(error));
                }
                ServerMessage::Shutdown { reason } => {
                    debug!("Server shutting down mid-request: {}", reason);
                    break Err(ClientError::Closed);
                }
                msg if request_id.is_some() && reply_id(&msg) == request_id => break Ok(msg),
                _ => {}
            }
        };

        let _ = ws.close(None).await;
        reply
    }

    /// Deal a new session; the creator joins the starting team.
    pub async fn create_session(&self, creator_id: PlayerId, display_name: &str) -> Result<SessionSnapshot, ClientError> {
        let request = ClientMessage::CreateSession {
            request_id: self.next_request_id(),
            creator_id,
            display_name: display_name.to_string(),
        };
        expect_snapshot(self.call(request).await?)
    }

    /// Execute a game command. Returns the post-state filtered for the actor.
    pub async fn command(&self, session_id: &SessionId, command: Command) -> Result<SessionSnapshot, ClientError> {
        let request = ClientMessage::from_command(self.next_request_id(), session_id.clone(), command);
        expect_snapshot(self.call(request).await?)
    }

    /// Pull the current committed state.
    pub async fn get_snapshot(&self, session_id: &SessionId, viewer: Option<&PlayerId>) -> Result<SessionSnapshot, ClientError> {
        let request = ClientMessage::GetSnapshot {
            request_id: self.next_request_id(),
            session_id: session_id.clone(),
            player_id: viewer.cloned(),
        };
        expect_snapshot(self.call(request).await?)
    }

    /// Post to a chat channel.
    pub async fn send_chat(
        &self,
        session_id: &SessionId,
        player_id: PlayerId,
        team: Option<Team>,
        content: &str,
    ) -> Result<ChatMessage, ClientError> {
        let request = ClientMessage::SendChat {
            request_id: self.next_request_id(),
            session_id: session_id.clone(),
            player_id,
            team,
            content: content.to_string(),
        };
        match self.call(request).await? {
            ServerMessage::ChatSent { message, .. } => Ok(message),
            _ => Err(ClientError::UnexpectedReply("expected chat_sent")),
        }
    }

    /// Read a chat channel, oldest first.
    pub async fn list_chat(
        &self,
        session_id: &SessionId,
        player_id: PlayerId,
        team: Option<Team>,
    ) -> Result<Vec<ChatMessage>, ClientError> {
        let request = ClientMessage::ListChat {
            request_id: self.next_request_id(),
            session_id: session_id.clone(),
            player_id,
            team,
        };
        match self.call(request).await? {
            ServerMessage::ChatMessages { messages, .. } => Ok(messages),
            _ => Err(ClientError::UnexpectedReply("expected chat_messages")),
        }
    }
}

fn expect_snapshot(msg: ServerMessage) -> Result<SessionSnapshot, ClientError> {
    match msg {
        ServerMessage::Reply { snapshot, .. } => Ok(snapshot),
        _ => Err(ClientError::UnexpectedReply("expected reply")),
    }
}
