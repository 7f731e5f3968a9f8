//! Sync adapter driver.
//!
//! Owns one background task per session that keeps a push channel open,
//! falls back to polling while it is down, and reconnects on a fixed delay.
//! Commands go out on request connections with a local prediction shown
//! in the meantime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::predict::predict;
use crate::client::rpc::{self, RpcClient};
use crate::client::sync::{SyncAction, SyncState, SyncView};
use crate::client::{ClientError, SyncConfig, MIN_INTERVAL};
use crate::game::command::Command;
use crate::game::state::{short_id, PlayerId, SessionId};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage, SessionSnapshot};

/// State shared between the adapter handle, the driver and the poller.
struct Shared {
    session_id: SessionId,
    player_id: Option<PlayerId>,
    config: SyncConfig,
    rpc: RpcClient,
    state: Mutex<SyncState>,
    view_tx: watch::Sender<SyncView>,
}

impl Shared {
    fn publish(&self, state: &SyncState) {
        self.view_tx.send_replace(state.view());
    }

    /// Reconcile a snapshot from either path.
    async fn offer(&self, snapshot: SessionSnapshot) -> bool {
        let mut state = self.state.lock().await;
        let applied = state.apply_snapshot(snapshot);
        if applied {
            self.publish(&state);
        }
        applied
    }
}

/// Whether an error means the session is gone for good.
fn is_not_found(error: &ClientError) -> bool {
    matches!(error, ClientError::Server(e) if e.code == ErrorCode::NotFound)
}

/// Client-side synchronization for one session.
pub struct SyncAdapter {
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
    driver: JoinHandle<()>,
}

impl SyncAdapter {
    /// Start syncing `session_id`, viewing it as `player_id` (anonymous if
    /// `None`). Must be called inside a tokio runtime.
    pub fn start(config: SyncConfig, session_id: impl Into<SessionId>, player_id: Option<PlayerId>) -> Self {
        let session_id = session_id.into();
        let state = SyncState::new(session_id.clone(), &config);
        let (view_tx, _) = watch::channel(state.view());

        let shared = Arc::new(Shared {
            session_id,
            player_id,
            rpc: RpcClient::new(&config),
            config,
            state: Mutex::new(state),
            view_tx,
        });

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let driver = tokio::spawn(drive(Arc::clone(&shared), shutdown_rx));

        Self { shared, shutdown_tx, driver }
    }

    /// Session being synced.
    pub fn session_id(&self) -> &SessionId {
        &self.shared.session_id
    }

    /// Request client, for chat and other one-off calls.
    pub fn rpc(&self) -> &RpcClient {
        &self.shared.rpc
    }

    /// Current view.
    pub fn view(&self) -> SyncView {
        self.shared.view_tx.borrow().clone()
    }

    /// Watch every view change.
    pub fn subscribe(&self) -> watch::Receiver<SyncView> {
        self.shared.view_tx.subscribe()
    }

    /// Issue a command.
    ///
    /// The predicted post-state is displayed before the request leaves. On
    /// success the reply is reconciled like any other snapshot; on failure
    /// the last authoritative state is restored and the error returned.
    pub async fn issue(&self, command: Command) -> Result<SessionSnapshot, ClientError> {
        {
            let mut state = self.shared.state.lock().await;
            if let Some(current) = state.displayed() {
                match predict(current, &command) {
                    Ok(predicted) => {
                        state.predict(predicted);
                        self.shared.publish(&state);
                    }
                    // Still sent: the server may know better than our view
                    Err(e) => debug!("No prediction for {}: {}", command.kind(), e),
                }
            }
        }

        match self.shared.rpc.command(&self.shared.session_id, command).await {
            Ok(snapshot) => {
                self.shared.offer(snapshot.clone()).await;
                Ok(snapshot)
            }
            Err(e) => {
                let mut state = self.shared.state.lock().await;
                state.reject();
                self.shared.publish(&state);
                Err(e)
            }
        }
    }

    /// Pull once, outside the polling schedule. Returns whether it was newer.
    pub async fn refresh(&self) -> Result<bool, ClientError> {
        let snapshot = self
            .shared
            .rpc
            .get_snapshot(&self.shared.session_id, self.shared.player_id.as_ref())
            .await?;
        Ok(self.shared.offer(snapshot).await)
    }

    /// Stop the driver and any polling.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.driver.await {
            debug!("Sync driver ended abnormally: {}", e);
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

async fn drive(shared: Arc<Shared>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut poller: Option<JoinHandle<()>> = None;
    let sid = short_id(&shared.session_id).to_string();

    loop {
        {
            let mut state = shared.state.lock().await;
            state.connecting();
            shared.publish(&state);
        }

        // One id per attempt; a dying older connection must not share it
        let client_id = Uuid::new_v4().to_string();
        let error = tokio::select! {
            e = run_channel(&shared, &client_id, &mut poller) => e,
            _ = shutdown_rx.recv() => break,
        };

        if is_not_found(&error) {
            warn!("Session {} not found, giving up", sid);
            let mut state = shared.state.lock().await;
            let actions = state.abandon();
            shared.publish(&state);
            drop(state);
            perform(&shared, actions, &mut poller);
            break;
        }
        debug!("Push channel for {} down: {}", sid, error);

        let reconnect = {
            let mut state = shared.state.lock().await;
            let actions = state.channel_lost();
            shared.publish(&state);
            actions
        };
        let delay = perform(&shared, reconnect, &mut poller);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.recv() => break,
        }
    }

    if let Some(handle) = poller.take() {
        handle.abort();
    }
    debug!("Sync driver for {} stopped", sid);
}

/// Carry out transition side effects. Returns the reconnect delay, if any
/// was requested, else the configured one.
fn perform(shared: &Arc<Shared>, actions: Vec<SyncAction>, poller: &mut Option<JoinHandle<()>>) -> Duration {
    let mut delay = shared.config.reconnect_delay;
    for action in actions {
        match action {
            SyncAction::StartPolling { after } => {
                if let Some(old) = poller.take() {
                    old.abort();
                }
                *poller = Some(tokio::spawn(poll(Arc::clone(shared), after)));
            }
            SyncAction::CancelPolling => {
                if let Some(handle) = poller.take() {
                    handle.abort();
                }
            }
            SyncAction::ScheduleReconnect { after } => delay = after,
        }
    }
    delay
}

/// Open the push channel and apply pushes until it fails. Only returns
/// with the reason it ended.
async fn run_channel(shared: &Arc<Shared>, client_id: &str, poller: &mut Option<JoinHandle<()>>) -> ClientError {
    match stream_pushes(shared, client_id, poller).await {
        Ok(never) => match never {},
        Err(e) => e,
    }
}

async fn stream_pushes(
    shared: &Arc<Shared>,
    client_id: &str,
    poller: &mut Option<JoinHandle<()>>,
) -> Result<std::convert::Infallible, ClientError> {
    let mut ws = rpc::open(&shared.config.server_url, shared.config.token.as_deref()).await?;
    rpc::send(&mut ws, &ClientMessage::Subscribe {
        session_id: shared.session_id.clone(),
        client_id: client_id.to_string(),
        player_id: shared.player_id.clone(),
    })
    .await?;

    let mut live = false;
    loop {
        match rpc::recv(&mut ws).await? {
            ServerMessage::Snapshot { snapshot } => {
                let mut state = shared.state.lock().await;
                state.apply_snapshot(snapshot);
                if !live {
                    live = true;
                    let actions = state.channel_open();
                    perform(shared, actions, poller);
                    info!("Push channel live for session {}", short_id(&shared.session_id));
                }
                shared.publish(&state);
            }
            ServerMessage::Error(error) => return Err(ClientError::Server(error)),
            ServerMessage::Shutdown { reason } => {
                info!("Server closing push channel: {}", reason);
                return Err(ClientError::Closed);
            }
            _ => {}
        }
    }
}

/// Polling fallback: wait out the grace delay, then pull on a fixed interval
/// until aborted.
async fn poll(shared: Arc<Shared>, grace: Duration) {
    tokio::time::sleep(grace).await;

    let mut interval = tokio::time::interval(shared.config.poll_interval.max(MIN_INTERVAL));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match shared.rpc.get_snapshot(&shared.session_id, shared.player_id.as_ref()).await {
            Ok(snapshot) => {
                if shared.offer(snapshot).await {
                    debug!("Poll applied newer snapshot for {}", short_id(&shared.session_id));
                }
            }
            Err(e) if is_not_found(&e) => {
                warn!("Session {} not found while polling", short_id(&shared.session_id));
                return;
            }
            Err(e) => debug!("Poll failed: {}", e),
        }
    }
}
