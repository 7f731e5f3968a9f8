//! Reconciliation and Transport Selection
//!
//! Pure client-side state: no I/O, no clocks. The adapter feeds it events
//! (snapshot arrived, channel opened, channel lost) and executes the
//! [`SyncAction`]s it hands back.
//!
//! ## Reconciliation
//!
//! The version is the only ordering authority. A snapshot newer than the
//! last applied one replaces both the authoritative and the displayed state,
//! discarding any prediction on top. Anything else is a duplicate or stale
//! and is dropped, so push and poll deliveries may interleave freely.
//!
//! ## Connection
//!
//! ```text
//! DISCONNECTED --connecting--> CONNECTING --channel_open--> LIVE
//!      ^                            |                         |
//!      +-------- channel_lost ------+------- channel_lost ----+
//! ```

use std::time::Duration;

use crate::client::SyncConfig;
use crate::game::state::SessionId;
use crate::network::protocol::SessionSnapshot;

/// Push channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel; polling may be active.
    Disconnected,
    /// Channel handshake in progress.
    Connecting,
    /// Subscribed and receiving pushes.
    Live,
}

/// Side effect requested by a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Begin pulling snapshots after a grace delay.
    StartPolling {
        /// Grace delay before the first pull.
        after: Duration,
    },
    /// Stop pulling immediately.
    CancelPolling,
    /// Try to reopen the push channel after a fixed delay.
    ScheduleReconnect {
        /// Delay before the attempt.
        after: Duration,
    },
}

/// What a UI would render.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncView {
    /// Displayed state, possibly a prediction on top of the last snapshot.
    pub snapshot: Option<SessionSnapshot>,
    /// Push channel state.
    pub connection: ConnectionState,
    /// Whether the polling fallback is running.
    pub polling: bool,
}

impl SyncView {
    /// Version of the displayed state.
    pub fn version(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|s| s.version)
    }

    /// True while no push channel is live.
    pub fn is_reconnecting(&self) -> bool {
        self.connection != ConnectionState::Live
    }
}

/// Per-session client synchronization state.
#[derive(Debug, Clone)]
pub struct SyncState {
    session_id: SessionId,
    last_applied_version: Option<u64>,
    authoritative: Option<SessionSnapshot>,
    displayed: Option<SessionSnapshot>,
    connection: ConnectionState,
    polling: bool,
    polling_grace: Duration,
    reconnect_delay: Duration,
}

impl SyncState {
    /// Fresh state for a session, disconnected and empty.
    pub fn new(session_id: impl Into<SessionId>, config: &SyncConfig) -> Self {
        Self {
            session_id: session_id.into(),
            last_applied_version: None,
            authoritative: None,
            displayed: None,
            connection: ConnectionState::Disconnected,
            polling: false,
            polling_grace: config.polling_grace,
            reconnect_delay: config.reconnect_delay,
        }
    }

    // =========================================================================
    // RECONCILIATION
    // =========================================================================

    /// Offer a snapshot from either delivery path.
    ///
    /// Returns `true` if it was newer and is now displayed.
    pub fn apply_snapshot(&mut self, snapshot: SessionSnapshot) -> bool {
        if snapshot.id != self.session_id {
            return false;
        }
        if self.last_applied_version.is_some_and(|v| snapshot.version <= v) {
            return false;
        }

        self.last_applied_version = Some(snapshot.version);
        self.displayed = Some(snapshot.clone());
        self.authoritative = Some(snapshot);
        true
    }

    /// Display a provisional post-state. Never touches the applied version.
    pub fn predict(&mut self, predicted: SessionSnapshot) {
        if predicted.id == self.session_id {
            self.displayed = Some(predicted);
        }
    }

    /// Drop any prediction and show the last authoritative snapshot again.
    pub fn reject(&mut self) {
        self.displayed = self.authoritative.clone();
    }

    // =========================================================================
    // CONNECTION
    // =========================================================================

    /// A channel handshake started.
    pub fn connecting(&mut self) {
        self.connection = ConnectionState::Connecting;
    }

    /// The channel is subscribed. Polling stops at once.
    pub fn channel_open(&mut self) -> Vec<SyncAction> {
        self.connection = ConnectionState::Live;
        if self.polling {
            self.polling = false;
            vec![SyncAction::CancelPolling]
        } else {
            Vec::new()
        }
    }

    /// The channel closed, errored, or never opened.
    pub fn channel_lost(&mut self) -> Vec<SyncAction> {
        self.connection = ConnectionState::Disconnected;

        let mut actions = Vec::with_capacity(2);
        if !self.polling {
            self.polling = true;
            actions.push(SyncAction::StartPolling { after: self.polling_grace });
        }
        actions.push(SyncAction::ScheduleReconnect { after: self.reconnect_delay });
        actions
    }

    /// The session no longer exists. Stop every delivery path.
    pub fn abandon(&mut self) -> Vec<SyncAction> {
        self.connection = ConnectionState::Disconnected;
        if self.polling {
            self.polling = false;
            vec![SyncAction::CancelPolling]
        } else {
            Vec::new()
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Session this state tracks.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Highest version applied so far.
    pub fn last_applied_version(&self) -> Option<u64> {
        self.last_applied_version
    }

    /// Last snapshot received from the server.
    pub fn authoritative(&self) -> Option<&SessionSnapshot> {
        self.authoritative.as_ref()
    }

    /// What is currently shown.
    pub fn displayed(&self) -> Option<&SessionSnapshot> {
        self.displayed.as_ref()
    }

    /// Push channel state.
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Whether polling is running.
    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// Renderable copy.
    pub fn view(&self) -> SyncView {
        SyncView {
            snapshot: self.displayed.clone(),
            connection: self.connection,
            polling: self.polling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{sample_session, Team};
    use proptest::prelude::*;

    fn config() -> SyncConfig {
        SyncConfig::new("ws://test")
            .with_polling_grace(Duration::from_millis(100))
            .with_reconnect_delay(Duration::from_millis(200))
    }

    fn snapshot_at(version: u64) -> SessionSnapshot {
        let mut session = sample_session("sync");
        session.version = version;
        session.current_turn = if version % 2 == 0 { Team::TeamA } else { Team::TeamB };
        SessionSnapshot::full(&session)
    }

    #[test]
    fn test_newer_snapshot_replaces() {
        let mut state = SyncState::new("sync", &config());
        assert!(state.apply_snapshot(snapshot_at(0)));
        assert!(state.apply_snapshot(snapshot_at(3)));
        assert_eq!(state.last_applied_version(), Some(3));
        assert_eq!(state.displayed(), Some(&snapshot_at(3)));
    }

    #[test]
    fn test_stale_and_duplicate_discarded() {
        let mut state = SyncState::new("sync", &config());
        state.apply_snapshot(snapshot_at(7));

        assert!(!state.apply_snapshot(snapshot_at(5)));
        assert!(!state.apply_snapshot(snapshot_at(7)));
        assert_eq!(state.displayed(), Some(&snapshot_at(7)));
    }

    #[test]
    fn test_seven_then_five_equals_five_then_seven() {
        let mut a = SyncState::new("sync", &config());
        a.apply_snapshot(snapshot_at(7));
        a.apply_snapshot(snapshot_at(5));

        let mut b = SyncState::new("sync", &config());
        b.apply_snapshot(snapshot_at(5));
        b.apply_snapshot(snapshot_at(7));

        assert_eq!(a.view(), b.view());
    }

    #[test]
    fn test_other_session_ignored() {
        let mut state = SyncState::new("other", &config());
        assert!(!state.apply_snapshot(snapshot_at(1)));
        assert_eq!(state.last_applied_version(), None);
    }

    #[test]
    fn test_prediction_overwritten_by_newer_version() {
        let mut state = SyncState::new("sync", &config());
        state.apply_snapshot(snapshot_at(2));

        let mut guess = snapshot_at(2);
        guess.tiles[0].revealed = true;
        state.predict(guess.clone());
        assert_eq!(state.displayed(), Some(&guess));
        assert_eq!(state.last_applied_version(), Some(2));

        // Same version again is stale; the guess stays up
        state.apply_snapshot(snapshot_at(2));
        assert_eq!(state.displayed(), Some(&guess));

        state.apply_snapshot(snapshot_at(3));
        assert_eq!(state.displayed(), Some(&snapshot_at(3)));
    }

    #[test]
    fn test_reject_restores_authoritative() {
        let mut state = SyncState::new("sync", &config());
        state.apply_snapshot(snapshot_at(4));

        let mut guess = snapshot_at(4);
        guess.current_turn = guess.current_turn.opponent();
        state.predict(guess);
        state.reject();

        assert_eq!(state.displayed(), state.authoritative());
    }

    #[test]
    fn test_connection_lifecycle() {
        let mut state = SyncState::new("sync", &config());
        assert_eq!(state.connection(), ConnectionState::Disconnected);

        state.connecting();
        assert_eq!(state.connection(), ConnectionState::Connecting);
        assert!(state.channel_open().is_empty());
        assert_eq!(state.connection(), ConnectionState::Live);

        let actions = state.channel_lost();
        assert_eq!(actions, vec![
            SyncAction::StartPolling { after: Duration::from_millis(100) },
            SyncAction::ScheduleReconnect { after: Duration::from_millis(200) },
        ]);
        assert!(state.is_polling());
        assert!(state.view().is_reconnecting());
    }

    #[test]
    fn test_failed_reconnect_does_not_restart_polling() {
        let mut state = SyncState::new("sync", &config());
        state.channel_lost();

        state.connecting();
        let actions = state.channel_lost();
        assert_eq!(actions, vec![SyncAction::ScheduleReconnect { after: Duration::from_millis(200) }]);
        assert!(state.is_polling());
    }

    #[test]
    fn test_going_live_cancels_polling() {
        let mut state = SyncState::new("sync", &config());
        state.channel_lost();

        state.connecting();
        assert_eq!(state.channel_open(), vec![SyncAction::CancelPolling]);
        assert!(!state.is_polling());
        assert_eq!(state.connection(), ConnectionState::Live);
    }

    #[test]
    fn test_abandon_stops_polling() {
        let mut state = SyncState::new("sync", &config());
        state.channel_lost();
        assert_eq!(state.abandon(), vec![SyncAction::CancelPolling]);
        assert!(!state.is_polling());
        assert!(state.abandon().is_empty());
    }

    fn versions_and_shuffle() -> impl Strategy<Value = (Vec<u64>, Vec<u64>)> {
        proptest::collection::vec(0u64..30, 1..12)
            .prop_flat_map(|versions| (Just(versions.clone()), Just(versions).prop_shuffle()))
    }

    proptest! {
        #[test]
        fn prop_delivery_order_does_not_matter((ordered, shuffled) in versions_and_shuffle()) {
            let mut a = SyncState::new("sync", &config());
            let mut b = SyncState::new("sync", &config());
            for v in &ordered {
                a.apply_snapshot(snapshot_at(*v));
            }
            for v in &shuffled {
                b.apply_snapshot(snapshot_at(*v));
            }

            let max = ordered.iter().copied().max();
            prop_assert_eq!(a.last_applied_version(), max);
            prop_assert_eq!(a.view(), b.view());
        }
    }
}
