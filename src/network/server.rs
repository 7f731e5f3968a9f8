//! WebSocket Game Server
//!
//! Binds the session store, gateway and chat to one WebSocket endpoint.
//! Every text frame is a JSON [`ClientMessage`]; every reply a [`ServerMessage`].
//!
//! A connection is used either for request/reply (commands, polling pulls,
//! chat) or as a push channel after `subscribe`. When the gateway drops a
//! push subscriber, the connection is closed so the client falls back.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::chat::{self, ChatService};
use crate::config::ServerConfig;
use crate::game::state::{PlayerId, SessionId};
use crate::game::command::Command;
use crate::network::auth::{authenticate, Identity};
use crate::network::gateway::{ClientId, Gateway, SubscriptionToken};
use crate::network::protocol::{
    AuthResult, ClientMessage, ErrorCode, ServerError, ServerMessage, SessionSnapshot,
};
use crate::network::session::SessionStore;

/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_LEN: usize = 32;

/// How long a closing connection may take to flush queued messages.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Connected client state.
struct ConnectedClient {
    /// Player identity (after auth).
    player_id: Option<PlayerId>,
    /// Open push subscription, if any.
    subscription: Option<(SessionId, ClientId)>,
    /// Connection time.
    connected_at: Instant,
}

/// A push registration held by one connection.
#[derive(Debug)]
struct PushSubscription {
    session_id: SessionId,
    client_id: ClientId,
    token: SubscriptionToken,
}

/// Per-connection state owned by the connection task.
struct Connection {
    addr: SocketAddr,
    identity: Option<Identity>,
    subscription: Option<PushSubscription>,
    push_rx: Option<mpsc::Receiver<ServerMessage>>,
}

/// Shared handles passed to every connection task.
#[derive(Clone)]
struct Context {
    config: ServerConfig,
    store: Arc<SessionStore>,
    chat: Arc<ChatService>,
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
}

/// The game server.
pub struct GameServer {
    ctx: Context,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server with a fresh store and chat.
    pub fn new(config: ServerConfig) -> Self {
        let store = SessionStore::new(config.store_config(), Arc::new(Gateway::new()));
        Self::with_store(config, Arc::new(store))
    }

    /// Create a server around an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<SessionStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            ctx: Context {
                config,
                store,
                chat: Arc::new(ChatService::new()),
                clients: Arc::new(RwLock::new(BTreeMap::new())),
            },
            shutdown_tx,
        }
    }

    /// The session store behind this server.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.ctx.store
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.ctx.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Codenames server listening on {}", listener.local_addr()?);
        if !self.ctx.config.auth.is_configured() {
            warn!("Authentication not configured; trusting self-declared player ids");
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.ctx.clients.read().await.len();
                            if clients_count >= self.ctx.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ctx = self.ctx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(ctx.config.channel_capacity);

            ctx.clients.write().await.insert(addr, ConnectedClient {
                player_id: None,
                subscription: None,
                connected_at: Instant::now(),
            });

            // Message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let mut conn = Connection {
                addr,
                identity: None,
                subscription: None,
                push_rx: None,
            };

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error(ServerError::new(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        ))).await;
                                        continue;
                                    }
                                };
                                ctx.handle_client_message(&mut conn, client_msg, &msg_tx).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    push = next_push(&mut conn.push_rx) => {
                        match push {
                            Some(msg) => {
                                if msg_tx.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                info!("Push channel for {} dropped by gateway, closing", addr);
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            ctx.release_subscription(&mut conn).await;
            ctx.clients.write().await.remove(&addr);

            drop(msg_tx);
            if tokio::time::timeout(FLUSH_TIMEOUT, sender_task).await.is_err() {
                debug!("Sender for {} did not flush in time", addr);
            }

            debug!("Client {} cleaned up", addr);
        });
    }

    /// Signal every connection and the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.ctx.clients.read().await.len()
    }

    /// Get live session count.
    pub async fn session_count(&self) -> usize {
        self.ctx.store.session_count().await
    }

    /// Snapshot of connection counters.
    pub async fn connection_stats(&self) -> ConnectionStats {
        let clients = self.ctx.clients.read().await;
        ConnectionStats {
            connections: clients.len(),
            authenticated: clients.values().filter(|c| c.player_id.is_some()).count(),
            subscribed: clients.values().filter(|c| c.subscription.is_some()).count(),
            oldest: clients.values().map(|c| c.connected_at.elapsed()).max(),
        }
    }
}

/// Connection counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Open connections.
    pub connections: usize,
    /// Connections bound to an identity.
    pub authenticated: usize,
    /// Connections with a push subscription.
    pub subscribed: usize,
    /// Age of the longest-lived connection.
    pub oldest: Option<Duration>,
}

/// Next message from the push subscription, or pending forever without one.
async fn next_push(rx: &mut Option<mpsc::Receiver<ServerMessage>>) -> Option<ServerMessage> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Trim and validate a display name.
fn normalize_display_name(name: &str) -> Result<String, ServerError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServerError::new(ErrorCode::InvalidInput, "Display name is required"));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(ServerError::new(
            ErrorCode::InvalidInput,
            format!("Display name longer than {} characters", MAX_DISPLAY_NAME_LEN),
        ));
    }
    Ok(name.to_string())
}

impl Context {
    /// Handle a client message.
    async fn handle_client_message(
        &self,
        conn: &mut Connection,
        msg: ClientMessage,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let request_id = msg.request_id();
        let result = match msg {
            ClientMessage::Auth { token } => {
                self.handle_auth(conn, &token, sender).await;
                Ok(())
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender.send(ServerMessage::Pong {
                    timestamp,
                    server_time: Utc::now().timestamp_millis().max(0) as u64,
                }).await;
                Ok(())
            }
            other => match self.check_identity(conn, &other) {
                Ok(()) => self.handle_request(conn, other, sender).await,
                Err(e) => Err(e),
            },
        };

        if let Err(error) = result {
            debug!("Request from {} failed: {:?} {}", conn.addr, error.code, error.message);
            let _ = sender.send(ServerMessage::Error(error.with_request(request_id))).await;
        }
    }

    /// Handle authentication.
    async fn handle_auth(&self, conn: &mut Connection, token: &str, sender: &mpsc::Sender<ServerMessage>) {
        let result = match authenticate(token, &self.config.auth) {
            Ok(identity) => {
                debug!("Client {} authenticated as {}", conn.addr, identity.player_id);
                if let Some(client) = self.clients.write().await.get_mut(&conn.addr) {
                    client.player_id = Some(identity.player_id.clone());
                }
                let result = AuthResult {
                    success: true,
                    player_id: Some(identity.player_id.clone()),
                    display_name: identity.display_name.clone(),
                    error: None,
                    server_version: self.config.version.clone(),
                };
                conn.identity = Some(identity);
                result
            }
            Err(e) => {
                debug!("Client {} failed auth: {}", conn.addr, e);
                AuthResult {
                    success: false,
                    player_id: None,
                    display_name: None,
                    error: Some(e.to_string()),
                    server_version: self.config.version.clone(),
                }
            }
        };

        let _ = sender.send(ServerMessage::AuthResult(result)).await;
    }

    /// With auth configured, a connection may only act as its own identity.
    fn check_identity(&self, conn: &Connection, msg: &ClientMessage) -> Result<(), ServerError> {
        if !self.config.auth.is_configured() {
            return Ok(());
        }
        let identity = conn
            .identity
            .as_ref()
            .ok_or_else(|| ServerError::new(ErrorCode::NotAuthenticated, "Must authenticate first"))?;

        match msg.acting_player() {
            Some(player_id) if player_id != &identity.player_id => Err(ServerError::new(
                ErrorCode::NotAuthenticated,
                "Cannot act for another player",
            )),
            _ => Ok(()),
        }
    }

    /// Route an identity-checked request.
    async fn handle_request(
        &self,
        conn: &mut Connection,
        msg: ClientMessage,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), ServerError> {
        match msg {
            ClientMessage::CreateSession { request_id, creator_id, display_name } => {
                let display_name = self.display_name_for(conn, &display_name)?;
                let session = self
                    .store
                    .create_session(creator_id.clone(), &display_name)
                    .await
                    .map_err(|e| ServerError::from(&e))?;
                let snapshot = SessionSnapshot::for_viewer(&session, Some(&creator_id));
                let _ = sender.send(ServerMessage::Reply { request_id, snapshot }).await;
            }

            ClientMessage::GetSnapshot { request_id, session_id, player_id } => {
                let session = self
                    .store
                    .get_snapshot(&session_id)
                    .await
                    .map_err(|e| ServerError::from(&e))?;
                let snapshot = SessionSnapshot::for_viewer(&session, player_id.as_ref());
                let _ = sender.send(ServerMessage::Reply { request_id, snapshot }).await;
            }

            ClientMessage::Subscribe { session_id, client_id, player_id } => {
                self.handle_subscribe(conn, session_id, client_id, player_id).await?;
            }

            ClientMessage::Unsubscribe { session_id, client_id } => {
                // Only this connection's own registration; idempotent otherwise
                let owned = conn
                    .subscription
                    .as_ref()
                    .is_some_and(|s| s.session_id == session_id && s.client_id == client_id);
                if owned {
                    self.release_subscription(conn).await;
                    self.set_client_subscription(conn.addr, None).await;
                }
            }

            ClientMessage::SendChat { request_id, session_id, player_id, team, content } => {
                let session = self
                    .store
                    .get_snapshot(&session_id)
                    .await
                    .map_err(|e| ServerError::from(&e))?;
                let player = session.player(&player_id);
                chat::authorize(player, &player_id, team).map_err(|e| ServerError::from(&e))?;
                let Some(player) = player else {
                    return Err(ServerError::new(ErrorCode::NotFound, "Player not found"));
                };
                let message = self
                    .chat
                    .send(&session_id, team, &content, player)
                    .await
                    .map_err(|e| ServerError::from(&e))?;
                let _ = sender.send(ServerMessage::ChatSent { request_id, message }).await;
            }

            ClientMessage::ListChat { request_id, session_id, player_id, team } => {
                let session = self
                    .store
                    .get_snapshot(&session_id)
                    .await
                    .map_err(|e| ServerError::from(&e))?;
                chat::authorize(session.player(&player_id), &player_id, team)
                    .map_err(|e| ServerError::from(&e))?;
                let messages = self.chat.list(&session_id, team).await;
                let _ = sender.send(ServerMessage::ChatMessages { request_id, messages }).await;
            }

            other => {
                let Some(request_id) = other.request_id() else {
                    return Err(ServerError::new(ErrorCode::InvalidInput, "Unsupported message"));
                };
                let viewer = other.acting_player().cloned();
                let Some((session_id, mut command)) = other.into_command() else {
                    return Err(ServerError::new(ErrorCode::InvalidInput, "Unsupported message"));
                };
                if let Command::JoinTeam { display_name, .. } = &mut command {
                    *display_name = self.display_name_for(conn, display_name)?;
                }

                let session = self
                    .store
                    .execute(&session_id, command)
                    .await
                    .map_err(|e| ServerError::from(&e))?;
                let snapshot = SessionSnapshot::for_viewer(&session, viewer.as_ref());
                let _ = sender.send(ServerMessage::Reply { request_id, snapshot }).await;
            }
        }

        Ok(())
    }

    /// Open (or replace) this connection's push subscription.
    async fn handle_subscribe(
        &self,
        conn: &mut Connection,
        session_id: SessionId,
        client_id: ClientId,
        player_id: Option<PlayerId>,
    ) -> Result<(), ServerError> {
        self.release_subscription(conn).await;

        let (push_tx, push_rx) = mpsc::channel(self.config.channel_capacity);
        let token = self
            .store
            .subscribe(&session_id, client_id.clone(), player_id, push_tx)
            .await
            .map_err(|e| ServerError::from(&e))?
            .ok_or_else(|| ServerError::new(ErrorCode::ServerOverloaded, "Could not open push channel"))?;

        info!("Client {} subscribed to session {} as {}", conn.addr, session_id, client_id);
        self.set_client_subscription(conn.addr, Some((session_id.clone(), client_id.clone())))
            .await;
        conn.subscription = Some(PushSubscription { session_id, client_id, token });
        conn.push_rx = Some(push_rx);
        Ok(())
    }

    /// Drop this connection's push registration. A newer connection that
    /// re-registered the same client id keeps its channel.
    async fn release_subscription(&self, conn: &mut Connection) {
        if let Some(sub) = conn.subscription.take() {
            self.store.unsubscribe(&sub.session_id, &sub.client_id, sub.token).await;
        }
        conn.push_rx = None;
    }

    async fn set_client_subscription(&self, addr: SocketAddr, subscription: Option<(SessionId, ClientId)>) {
        if let Some(client) = self.clients.write().await.get_mut(&addr) {
            client.subscription = subscription;
        }
    }

    /// Requested name, or the identity provider's when blank.
    fn display_name_for(&self, conn: &Connection, requested: &str) -> Result<String, ServerError> {
        if requested.trim().is_empty() {
            if let Some(name) = conn.identity.as_ref().and_then(|i| i.display_name.as_deref()) {
                return normalize_display_name(name);
            }
        }
        normalize_display_name(requested)
    }
}
