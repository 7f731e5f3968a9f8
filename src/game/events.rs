//! Game Events
//!
//! What an accepted command did. Produced by the engine, logged by the store.

use serde::{Serialize, Deserialize};

use crate::game::state::{Affiliation, PlayerId, Role, Team};

/// Why a session finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverCause {
    /// The guessing team revealed the assassin.
    Assassin,
    /// A team's last tile was revealed.
    TeamCleared,
}

/// One observable effect of a command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    /// A new player entered the session.
    PlayerJoined {
        player_id: PlayerId,
        team: Option<Team>,
    },

    /// An existing player changed team or name.
    PlayerUpdated {
        player_id: PlayerId,
        team: Option<Team>,
        role: Role,
    },

    /// A player became spymaster, possibly displacing another.
    SpymasterAssigned {
        player_id: PlayerId,
        team: Team,
        demoted: Option<PlayerId>,
    },

    /// A tile was flipped.
    TileRevealed {
        player_id: PlayerId,
        position: usize,
        affiliation: Affiliation,
    },

    /// The turn moved to the other team.
    TurnPassed {
        from: Team,
        to: Team,
    },

    /// The session reached FINISHED.
    GameOver {
        winner: Team,
        cause: GameOverCause,
    },
}
