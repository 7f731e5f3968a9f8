//! Team Chat
//!
//! In-memory message log keyed by `(session, channel)`. A channel is either a
//! team (`Some(team)`) or the session-wide channel (`None`).
//!
//! ## Access
//!
//! - Session-wide channel: any player registered in the session, observers included.
//! - Team channel: only current members of that team, spymaster included.
//!
//! Membership is evaluated against the session state at call time, so a
//! player who switches teams immediately loses the old team's history.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::game::state::{short_id, Player, PlayerId, SessionId, Team};

/// Maximum characters per message.
pub const MAX_MESSAGE_LEN: usize = 500;

/// Messages kept per channel; older ones are dropped.
pub const MAX_HISTORY: usize = 500;

/// One chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message id.
    pub id: Uuid,
    /// Message text.
    pub content: String,
    /// Who sent it.
    pub sender_id: PlayerId,
    /// Sender's name at send time.
    pub display_name: String,
    /// Session the channel belongs to.
    pub session_id: SessionId,
    /// Team channel, or `None` for session-wide.
    pub team: Option<Team>,
    /// Server receive time.
    pub timestamp: DateTime<Utc>,
}

/// Chat errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Caller is not registered in the session.
    #[error("player {0} is not in this session")]
    NotMember(PlayerId),

    /// Caller is not on the channel's team.
    #[error("not a member of {0}")]
    WrongTeam(Team),

    /// Blank message.
    #[error("message is empty")]
    Empty,

    /// Message over the length limit.
    #[error("message longer than {max} characters")]
    TooLong {
        /// Limit that was exceeded.
        max: usize,
    },
}

/// Check whether `player` may read or write `channel`.
pub fn authorize(player: Option<&Player>, player_id: &PlayerId, channel: Option<Team>) -> Result<(), ChatError> {
    let player = player.ok_or_else(|| ChatError::NotMember(player_id.clone()))?;
    match channel {
        None => Ok(()),
        Some(team) if player.team == Some(team) => Ok(()),
        Some(team) => Err(ChatError::WrongTeam(team)),
    }
}

type ChannelKey = (SessionId, Option<Team>);

/// In-memory chat store.
#[derive(Debug, Default)]
pub struct ChatService {
    channels: RwLock<BTreeMap<ChannelKey, VecDeque<ChatMessage>>>,
}

impl ChatService {
    /// Create an empty chat store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. The caller must have passed [`authorize`].
    pub async fn send(
        &self,
        session_id: &SessionId,
        team: Option<Team>,
        content: &str,
        sender: &Player,
    ) -> Result<ChatMessage, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::Empty);
        }
        if content.chars().count() > MAX_MESSAGE_LEN {
            return Err(ChatError::TooLong { max: MAX_MESSAGE_LEN });
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            content: content.to_string(),
            sender_id: sender.id.clone(),
            display_name: sender.display_name.clone(),
            session_id: session_id.clone(),
            team,
            timestamp: Utc::now(),
        };

        let mut channels = self.channels.write().await;
        let log = channels.entry((session_id.clone(), team)).or_default();
        if log.len() >= MAX_HISTORY {
            log.pop_front();
        }
        log.push_back(message.clone());

        debug!(
            "Chat {}:{:?} <- {} ({} chars)",
            short_id(session_id),
            team,
            sender.id,
            message.content.len()
        );
        Ok(message)
    }

    /// All retained messages of a channel, oldest first.
    pub async fn list(&self, session_id: &SessionId, team: Option<Team>) -> Vec<ChatMessage> {
        let channels = self.channels.read().await;
        channels
            .get(&(session_id.clone(), team))
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Role;

    fn player(id: &str, team: Option<Team>, role: Role) -> Player {
        Player {
            id: PlayerId::new(id),
            display_name: id.to_uppercase(),
            team,
            role,
        }
    }

    #[test]
    fn test_authorize_policy() {
        let a = player("a", Some(Team::TeamA), Role::Operative);
        let spy = player("spy", Some(Team::TeamA), Role::Spymaster);
        let obs = player("obs", None, Role::Operative);

        assert!(authorize(Some(&a), &a.id, Some(Team::TeamA)).is_ok());
        assert!(authorize(Some(&spy), &spy.id, Some(Team::TeamA)).is_ok());
        assert_eq!(
            authorize(Some(&spy), &spy.id, Some(Team::TeamB)),
            Err(ChatError::WrongTeam(Team::TeamB))
        );
        assert!(authorize(Some(&obs), &obs.id, None).is_ok());
        assert_eq!(
            authorize(Some(&obs), &obs.id, Some(Team::TeamA)),
            Err(ChatError::WrongTeam(Team::TeamA))
        );

        let ghost = PlayerId::new("ghost");
        assert_eq!(authorize(None, &ghost, None), Err(ChatError::NotMember(ghost.clone())));
    }

    #[tokio::test]
    async fn test_send_and_list_in_order() {
        let chat = ChatService::new();
        let session = "session-1".to_string();
        let a = player("a", Some(Team::TeamA), Role::Operative);

        chat.send(&session, Some(Team::TeamA), "first", &a).await.unwrap();
        chat.send(&session, Some(Team::TeamA), "  second  ", &a).await.unwrap();

        let messages = chat.list(&session, Some(Team::TeamA)).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
        assert_eq!(messages[1].display_name, "A");
        assert_ne!(messages[0].id, messages[1].id);
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let chat = ChatService::new();
        let s1 = "s1".to_string();
        let s2 = "s2".to_string();
        let a = player("a", Some(Team::TeamA), Role::Operative);

        chat.send(&s1, Some(Team::TeamA), "team", &a).await.unwrap();
        chat.send(&s1, None, "all", &a).await.unwrap();

        assert_eq!(chat.list(&s1, Some(Team::TeamA)).await.len(), 1);
        assert_eq!(chat.list(&s1, None).await.len(), 1);
        assert!(chat.list(&s1, Some(Team::TeamB)).await.is_empty());
        assert!(chat.list(&s2, Some(Team::TeamA)).await.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_content() {
        let chat = ChatService::new();
        let s = "s".to_string();
        let a = player("a", Some(Team::TeamA), Role::Operative);

        assert_eq!(chat.send(&s, None, "   ", &a).await, Err(ChatError::Empty));
        let long = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert_eq!(
            chat.send(&s, None, &long, &a).await,
            Err(ChatError::TooLong { max: MAX_MESSAGE_LEN })
        );
        assert!(chat.list(&s, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let chat = ChatService::new();
        let s = "s".to_string();
        let a = player("a", None, Role::Operative);

        for i in 0..MAX_HISTORY + 3 {
            chat.send(&s, None, &format!("m{}", i), &a).await.unwrap();
        }
        let messages = chat.list(&s, None).await;
        assert_eq!(messages.len(), MAX_HISTORY);
        assert_eq!(messages[0].content, "m3");
    }
}
