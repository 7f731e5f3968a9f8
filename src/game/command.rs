//! Commands
//!
//! Every mutation a client can request against a session.

use serde::{Serialize, Deserialize};

use crate::game::state::{PlayerId, Team};

/// A state-changing request, issued on behalf of one player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Upsert a player onto a team (`None` = observer).
    JoinTeam {
        /// Who is joining.
        player_id: PlayerId,
        /// Name shown to others.
        display_name: String,
        /// Target team.
        team: Option<Team>,
    },

    /// Promote a player to spymaster of their team.
    SetSpymaster {
        /// Who is promoted.
        player_id: PlayerId,
    },

    /// Reveal one tile.
    RevealTile {
        /// Who is guessing.
        player_id: PlayerId,
        /// Board position.
        position: usize,
    },

    /// Hand the turn to the other team.
    EndTurn {
        /// Who is passing.
        player_id: PlayerId,
    },
}

impl Command {
    /// The player this command acts for.
    pub fn player_id(&self) -> &PlayerId {
        match self {
            Command::JoinTeam { player_id, .. }
            | Command::SetSpymaster { player_id }
            | Command::RevealTile { player_id, .. }
            | Command::EndTurn { player_id } => player_id,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::JoinTeam { .. } => "join_team",
            Command::SetSpymaster { .. } => "set_spymaster",
            Command::RevealTile { .. } => "reveal_tile",
            Command::EndTurn { .. } => "end_turn",
        }
    }
}
