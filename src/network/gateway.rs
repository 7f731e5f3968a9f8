//! Transport Gateway
//!
//! Per-session fan-out of snapshots to subscribed client channels.
//!
//! Each subscriber owns a bounded `mpsc` channel. Delivery never waits on a
//! slow client: a full or closed channel is dropped from the broadcast set,
//! which closes the client's push connection and sends it to its fallback.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::game::state::{short_id, PlayerId, Session, SessionId};
use crate::network::protocol::{ServerMessage, SessionSnapshot};

/// Client instance identifier (one per connected tab / adapter).
pub type ClientId = String;

/// Identifies one registration. A client id can be registered again by a
/// newer connection; only the holder of the current token can remove it.
pub type SubscriptionToken = u64;

/// Why a subscriber was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Receiver fell behind.
    Lagging,
    /// Receiver is gone.
    Closed,
}

struct Subscriber {
    token: SubscriptionToken,
    viewer: Option<PlayerId>,
    sender: mpsc::Sender<ServerMessage>,
}

/// Broadcast registry.
#[derive(Default)]
pub struct Gateway {
    channels: RwLock<BTreeMap<SessionId, BTreeMap<ClientId, Subscriber>>>,
    next_token: AtomicU64,
}

impl Gateway {
    /// Create an empty gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client and deliver `current` to it first.
    ///
    /// Re-subscribing with the same client id replaces the old channel and
    /// invalidates the old token. Returns `None` if the initial delivery
    /// failed; the client is then not registered.
    pub async fn subscribe(
        &self,
        current: &Session,
        client_id: ClientId,
        viewer: Option<PlayerId>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Option<SubscriptionToken> {
        let snapshot = SessionSnapshot::for_viewer(current, viewer.as_ref());
        let mut channels = self.channels.write().await;

        if let Err(e) = sender.try_send(ServerMessage::Snapshot { snapshot }) {
            warn!("Initial snapshot to {} failed: {}", client_id, e);
            return None;
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let session_subs = channels.entry(current.id.clone()).or_default();
        if session_subs.insert(client_id.clone(), Subscriber { token, viewer, sender }).is_some() {
            debug!("Client {} re-subscribed to {}", client_id, short_id(&current.id));
        } else {
            debug!(
                "Client {} subscribed to {} ({} total)",
                client_id,
                short_id(&current.id),
                session_subs.len()
            );
        }
        Some(token)
    }

    /// Remove a client's registration if `token` is still the current one.
    /// Idempotent; a stale token leaves a newer registration in place.
    pub async fn unsubscribe(&self, session_id: &SessionId, client_id: &str, token: SubscriptionToken) -> bool {
        let mut channels = self.channels.write().await;
        let Some(session_subs) = channels.get_mut(session_id) else {
            return false;
        };
        let removed = match session_subs.get(client_id).map(|sub| sub.token) {
            Some(current) if current == token => session_subs.remove(client_id).is_some(),
            Some(_) => {
                debug!("Ignoring stale unsubscribe of {} from {}", client_id, short_id(session_id));
                false
            }
            None => false,
        };
        if session_subs.is_empty() {
            channels.remove(session_id);
        }
        if removed {
            debug!("Client {} unsubscribed from {}", client_id, short_id(session_id));
        }
        removed
    }

    /// Push a committed session to every subscriber, filtered per viewer.
    ///
    /// Returns the number of successful deliveries.
    pub async fn broadcast(&self, session: &Session) -> usize {
        let mut channels = self.channels.write().await;
        let Some(session_subs) = channels.get_mut(&session.id) else {
            return 0;
        };

        let public = SessionSnapshot::for_viewer(session, None);
        let mut full: Option<SessionSnapshot> = None;
        let mut dropped = Vec::new();
        let mut delivered = 0;

        for (client_id, sub) in session_subs.iter() {
            let snapshot = match &sub.viewer {
                Some(id) if session.is_spymaster(id) => {
                    full.get_or_insert_with(|| SessionSnapshot::full(session)).clone()
                }
                _ => public.clone(),
            };

            match sub.sender.try_send(ServerMessage::Snapshot { snapshot }) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => dropped.push((client_id.clone(), DropReason::Lagging)),
                Err(mpsc::error::TrySendError::Closed(_)) => dropped.push((client_id.clone(), DropReason::Closed)),
            }
        }

        for (client_id, reason) in dropped {
            warn!(
                "Dropping subscriber {} from {}: {:?}",
                client_id,
                short_id(&session.id),
                reason
            );
            session_subs.remove(&client_id);
        }
        if session_subs.is_empty() {
            channels.remove(&session.id);
        }

        delivered
    }

    /// Subscribers currently registered for a session.
    pub async fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.channels
            .read()
            .await
            .get(session_id)
            .map_or(0, BTreeMap::len)
    }
}

// =============================================================================
// TESTS
// =============================================================================
