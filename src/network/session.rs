//! Session Store
//!
//! Owns every live session and is the single serialization point for
//! mutations. Each session has its own writer lock, so commands on one
//! session run strictly one at a time while different sessions proceed in
//! parallel.
//!
//! ## Commit protocol
//!
//! 1. Take the session's writer lock (queues behind in-flight commands).
//! 2. Run the engine against the committed state, outside any read lock.
//! 3. Swap the committed state and broadcast while holding its write lock,
//!    so a concurrent `subscribe` sees either the old state followed by the
//!    push, or the new state and no push. Never a gap.
//!
//! Lock order is always `committed` then gateway.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::rng::DeterministicRng;
use crate::game::board::{deal_session, BoardError, BoardScheme, WORDS};
use crate::game::command::Command;
use crate::game::engine::{self, GameError, Transition};
use crate::game::state::{short_id, Player, PlayerId, Role, Session, SessionId, Team};
use crate::network::gateway::{ClientId, Gateway, SubscriptionToken};
use crate::network::protocol::{ErrorCode, ServerError, ServerMessage};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Master seed for board dealing. Random when `None`.
    pub master_seed: Option<u64>,
    /// Tile distribution.
    pub scheme: BoardScheme,
    /// Word pool.
    pub words: &'static [&'static str],
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            master_seed: None,
            scheme: BoardScheme::STANDARD,
            words: WORDS,
        }
    }
}

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No session with that id.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// The engine rejected the command.
    #[error(transparent)]
    Game(#[from] GameError),

    /// Board could not be dealt.
    #[error(transparent)]
    Board(#[from] BoardError),
}

impl From<&StoreError> for ServerError {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::SessionNotFound(_) => ServerError::new(ErrorCode::NotFound, err.to_string()),
            StoreError::Game(game) => ServerError::from(game),
            StoreError::Board(_) => ServerError::new(ErrorCode::InternalError, err.to_string()),
        }
    }
}

struct SessionSlot {
    /// Serializes command execution.
    writer: Mutex<()>,
    /// Last committed state.
    committed: RwLock<Arc<Session>>,
}

/// All sessions of this process.
pub struct SessionStore {
    sessions: RwLock<BTreeMap<SessionId, Arc<SessionSlot>>>,
    gateway: Arc<Gateway>,
    master_seed: u64,
    scheme: BoardScheme,
    words: &'static [&'static str],
}

impl SessionStore {
    /// Create a store broadcasting through `gateway`.
    pub fn new(config: StoreConfig, gateway: Arc<Gateway>) -> Self {
        let master_seed = config
            .master_seed
            .unwrap_or_else(|| Uuid::new_v4().as_u64_pair().0);

        Self {
            sessions: RwLock::new(BTreeMap::new()),
            gateway,
            master_seed,
            scheme: config.scheme,
            words: config.words,
        }
    }

    /// The gateway commits are broadcast through.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    async fn slot(&self, id: &SessionId) -> Result<Arc<SessionSlot>, StoreError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound(id.clone()))
    }

    /// Deal a new session. The creator joins the starting team as an
    /// operative; the session is still at version 0.
    pub async fn create_session(&self, creator_id: PlayerId, display_name: &str) -> Result<Arc<Session>, StoreError> {
        let id = Uuid::new_v4().to_string();
        let mut rng = DeterministicRng::for_session(self.master_seed, &id);
        let mut session = deal_session(id.clone(), &self.scheme, self.words, &mut rng)?;

        let team: Team = session.current_turn;
        session.players.insert(creator_id.clone(), Player {
            id: creator_id.clone(),
            display_name: display_name.to_string(),
            team: Some(team),
            role: Role::Operative,
        });
        debug_assert!(session.check_invariants().is_ok());

        let session = Arc::new(session);
        let slot = Arc::new(SessionSlot {
            writer: Mutex::new(()),
            committed: RwLock::new(Arc::clone(&session)),
        });
        self.sessions.write().await.insert(id.clone(), slot);

        info!("Session {} created by {} ({} starts)", short_id(&id), creator_id, team);
        Ok(session)
    }

    /// Run a command through the engine and commit the result.
    ///
    /// Returns the committed state (unchanged on a no-op). Rejections are
    /// returned to the caller only and never broadcast.
    pub async fn execute(&self, session_id: &SessionId, command: Command) -> Result<Arc<Session>, StoreError> {
        let slot = self.slot(session_id).await?;
        let _writer = slot.writer.lock().await;

        let current = Arc::clone(&*slot.committed.read().await);
        let Transition { session: mut next, events } = match engine::apply(&current, &command) {
            Ok(transition) => transition,
            Err(e) => {
                debug!(
                    "Session {} rejected {} from {}: {}",
                    short_id(session_id),
                    command.kind(),
                    command.player_id(),
                    e
                );
                return Err(e.into());
            }
        };

        if events.is_empty() {
            return Ok(current);
        }

        next.updated_at = Utc::now();
        debug_assert!(next.check_invariants().is_ok(), "{:?}", next.check_invariants());
        let next = Arc::new(next);

        let mut committed = slot.committed.write().await;
        *committed = Arc::clone(&next);
        let pushed = self.gateway.broadcast(&next).await;
        drop(committed);

        info!(
            "Session {} v{} {} by {} ({} pushed)",
            short_id(session_id),
            next.version,
            command.kind(),
            command.player_id(),
            pushed
        );
        for event in &events {
            debug!("Session {} event: {:?}", short_id(session_id), event);
        }

        Ok(next)
    }

    /// Upsert a player onto a team (`None` = observer).
    pub async fn join_team(
        &self,
        session_id: &SessionId,
        player_id: PlayerId,
        display_name: String,
        team: Option<Team>,
    ) -> Result<Arc<Session>, StoreError> {
        self.execute(session_id, Command::JoinTeam { player_id, display_name, team }).await
    }

    /// Promote a player to spymaster.
    pub async fn set_spymaster(&self, session_id: &SessionId, player_id: PlayerId) -> Result<Arc<Session>, StoreError> {
        self.execute(session_id, Command::SetSpymaster { player_id }).await
    }

    /// Reveal a tile.
    pub async fn reveal_tile(
        &self,
        session_id: &SessionId,
        player_id: PlayerId,
        position: usize,
    ) -> Result<Arc<Session>, StoreError> {
        self.execute(session_id, Command::RevealTile { player_id, position }).await
    }

    /// Pass the turn.
    pub async fn end_turn(&self, session_id: &SessionId, player_id: PlayerId) -> Result<Arc<Session>, StoreError> {
        self.execute(session_id, Command::EndTurn { player_id }).await
    }

    /// Current committed state. Never waits on in-flight commands.
    pub async fn get_snapshot(&self, session_id: &SessionId) -> Result<Arc<Session>, StoreError> {
        let slot = self.slot(session_id).await?;
        let committed = slot.committed.read().await;
        Ok(Arc::clone(&*committed))
    }

    /// Register a push channel. The current snapshot is delivered before
    /// any later commit. Returns `None` if the channel could not take it.
    pub async fn subscribe(
        &self,
        session_id: &SessionId,
        client_id: ClientId,
        viewer: Option<PlayerId>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<Option<SubscriptionToken>, StoreError> {
        let slot = self.slot(session_id).await?;
        let committed = slot.committed.read().await;
        Ok(self.gateway.subscribe(&committed, client_id, viewer, sender).await)
    }

    /// Remove the push channel registered under `token`. Idempotent.
    pub async fn unsubscribe(&self, session_id: &SessionId, client_id: &str, token: SubscriptionToken) -> bool {
        self.gateway.unsubscribe(session_id, client_id, token).await
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Number of push subscribers for a session.
    pub async fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.gateway.subscriber_count(session_id).await
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::engine::MoveRejection;
    use crate::game::state::{Affiliation, SessionStatus};
    use crate::network::protocol::SessionSnapshot;

    fn store_with_seed(seed: u64) -> SessionStore {
        let config = StoreConfig {
            master_seed: Some(seed),
            ..Default::default()
        };
        SessionStore::new(config, Arc::new(Gateway::new()))
    }

    fn pid(s: &str) -> PlayerId {
        PlayerId::new(s)
    }

    fn own_tile(session: &Session) -> usize {
        let own = Affiliation::from(session.current_turn);
        session.tiles.iter().position(|t| t.affiliation == own).unwrap()
    }

    fn tile_of(session: &Session, affiliation: Affiliation) -> usize {
        session.tiles.iter().position(|t| t.affiliation == affiliation).unwrap()
    }

    fn recv_snapshot(rx: &mut mpsc::Receiver<ServerMessage>) -> SessionSnapshot {
        match rx.try_recv() {
            Ok(ServerMessage::Snapshot { snapshot }) => snapshot,
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_session_places_creator() {
        let store = store_with_seed(42);
        let session = store.create_session(pid("alice"), "Alice").await.unwrap();

        assert_eq!(session.version, 0);
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.tiles.len(), 25);
        let alice = session.player(&pid("alice")).unwrap();
        assert_eq!(alice.team, Some(session.current_turn));
        assert_eq!(alice.role, Role::Operative);
        assert_eq!(alice.display_name, "Alice");
        assert_eq!(session.remaining.get(session.current_turn), 9);
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_board_reproducible_from_master_seed() {
        let store = store_with_seed(7);
        let session = store.create_session(pid("a"), "A").await.unwrap();

        let mut rng = DeterministicRng::for_session(7, &session.id);
        let expected = deal_session(session.id.clone(), &BoardScheme::STANDARD, WORDS, &mut rng).unwrap();
        assert_eq!(session.tiles, expected.tiles);
        assert_eq!(session.current_turn, expected.current_turn);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let store = store_with_seed(1);
        let id = "missing".to_string();
        assert_eq!(
            store.get_snapshot(&id).await.unwrap_err(),
            StoreError::SessionNotFound(id.clone())
        );
        assert!(matches!(
            store.end_turn(&id, pid("x")).await,
            Err(StoreError::SessionNotFound(_))
        ));
        let (tx, _rx) = mpsc::channel(4);
        assert!(store.subscribe(&id, "c".into(), None, tx).await.is_err());
    }

    #[tokio::test]
    async fn test_commit_bumps_version_and_broadcasts() {
        let store = store_with_seed(3);
        let session = store.create_session(pid("a"), "A").await.unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        assert!(store.subscribe(&session.id, "tab".into(), None, tx).await.unwrap().is_some());
        assert_eq!(recv_snapshot(&mut rx).version, 0);

        let position = own_tile(&session);
        let after = store.reveal_tile(&session.id, pid("a"), position).await.unwrap();
        assert_eq!(after.version, 1);
        assert!(after.updated_at >= session.updated_at);

        let pushed = recv_snapshot(&mut rx);
        assert_eq!(pushed.version, 1);
        assert!(pushed.tiles[position].revealed);

        let polled = store.get_snapshot(&session.id).await.unwrap();
        assert_eq!(polled.version, 1);
    }

    #[tokio::test]
    async fn test_rejections_and_noops_are_not_broadcast() {
        let store = store_with_seed(4);
        let session = store.create_session(pid("a"), "A").await.unwrap();
        let other = session.current_turn.opponent();
        store.join_team(&session.id, pid("spy"), "Spy".into(), Some(other)).await.unwrap();
        store.set_spymaster(&session.id, pid("spy")).await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        store.subscribe(&session.id, "tab".into(), None, tx).await.unwrap();
        let before = recv_snapshot(&mut rx);

        let err = store.reveal_tile(&session.id, pid("spy"), 0).await.unwrap_err();
        assert_eq!(err, StoreError::Game(GameError::InvalidMove(MoveRejection::SpymasterForbidden)));

        let same = store.set_spymaster(&session.id, pid("spy")).await.unwrap();
        assert_eq!(same.version, before.version);

        assert!(rx.try_recv().is_err());
        assert_eq!(store.get_snapshot(&session.id).await.unwrap().version, before.version);
    }

    #[tokio::test]
    async fn test_racing_reveals_accept_exactly_one() {
        let store = Arc::new(store_with_seed(5));
        let session = store.create_session(pid("a"), "A").await.unwrap();
        let position = own_tile(&session);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = session.id.clone();
                tokio::spawn(async move { store.reveal_tile(&id, pid("a"), position).await })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert_eq!(
                    e,
                    StoreError::Game(GameError::InvalidMove(MoveRejection::AlreadyRevealed))
                ),
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(store.get_snapshot(&session.id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = store_with_seed(6);
        let s1 = store.create_session(pid("a"), "A").await.unwrap();
        let s2 = store.create_session(pid("b"), "B").await.unwrap();

        store.end_turn(&s1.id, pid("a")).await.unwrap();
        assert_eq!(store.get_snapshot(&s1.id).await.unwrap().version, 1);
        assert_eq!(store.get_snapshot(&s2.id).await.unwrap().version, 0);

        // Players are scoped to their session
        assert!(matches!(
            store.end_turn(&s2.id, pid("a")).await,
            Err(StoreError::Game(GameError::PlayerNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_finished_session_is_read_only() {
        let store = store_with_seed(8);
        let session = store.create_session(pid("a"), "A").await.unwrap();
        let assassin = tile_of(&session, Affiliation::Assassin);

        let done = store.reveal_tile(&session.id, pid("a"), assassin).await.unwrap();
        assert_eq!(done.winner, Some(session.current_turn.opponent()));

        for result in [
            store.end_turn(&session.id, pid("a")).await,
            store.join_team(&session.id, pid("late"), "Late".into(), None).await,
            store.reveal_tile(&session.id, pid("a"), own_tile(&session)).await,
        ] {
            assert_eq!(result.unwrap_err(), StoreError::Game(GameError::SessionFinished));
        }
        assert!(store.get_snapshot(&session.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_pushes() {
        let store = store_with_seed(9);
        let session = store.create_session(pid("a"), "A").await.unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let token = store.subscribe(&session.id, "tab".into(), None, tx).await.unwrap().unwrap();
        recv_snapshot(&mut rx);
        assert_eq!(store.subscriber_count(&session.id).await, 1);

        assert!(store.unsubscribe(&session.id, "tab", token).await);
        assert!(!store.unsubscribe(&session.id, "tab", token).await);
        assert_eq!(store.subscriber_count(&session.id).await, 0);

        store.end_turn(&session.id, pid("a")).await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_store_error_codes() {
        let err = StoreError::SessionNotFound("x".into());
        assert_eq!(ServerError::from(&err).code, ErrorCode::NotFound);
        let err = StoreError::Game(GameError::NoTeam);
        assert_eq!(ServerError::from(&err).code, ErrorCode::NoTeam);
    }
}
