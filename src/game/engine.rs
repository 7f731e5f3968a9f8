//! Game Engine
//!
//! Pure transition function `(Session, Command) -> (Session', events)`.
//! The input session is never touched; a rejected command leaves the caller
//! holding exactly what it passed in.
//!
//! ## Reveal resolution
//!
//! 1. Assassin: the guessing team loses immediately.
//! 2. Own colour: keep guessing, or win if that was the last one.
//! 3. Neutral or opponent colour: turn passes, unless the opponent's
//!    last tile was just revealed, in which case the opponent wins.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::command::Command;
use crate::game::events::{GameEvent, GameOverCause};
use crate::game::state::{Affiliation, Player, PlayerId, Role, Session, SessionStatus, Team};

/// Why a move was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum MoveRejection {
    /// The player's team does not hold the turn (or the player has no team).
    #[error("not your team's turn")]
    NotYourTurn,
    /// Spymasters cannot reveal tiles.
    #[error("spymasters cannot reveal tiles")]
    SpymasterForbidden,
    /// The tile is already face up.
    #[error("tile already revealed")]
    AlreadyRevealed,
    /// Position is off the board.
    #[error("no tile at that position")]
    NoSuchTile,
}

/// Engine rejections.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GameError {
    /// Player is not part of the session.
    #[error("player {0} not found")]
    PlayerNotFound(PlayerId),

    /// The session already has a winner.
    #[error("session finished")]
    SessionFinished,

    /// The command needs team membership.
    #[error("player has no team")]
    NoTeam,

    /// Turn, role or tile precondition failed.
    #[error("invalid move: {0}")]
    InvalidMove(#[from] MoveRejection),
}

/// Result of applying an accepted command.
#[derive(Clone, Debug)]
pub struct Transition {
    /// Post-state. Equal to the input when `events` is empty.
    pub session: Session,
    /// What changed.
    pub events: Vec<GameEvent>,
}

impl Transition {
    /// True when the command was accepted but changed nothing.
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// Apply a command. On change the returned session has `version + 1`.
pub fn apply(session: &Session, command: &Command) -> Result<Transition, GameError> {
    if session.is_finished() {
        return Err(GameError::SessionFinished);
    }

    let mut next = session.clone();
    let events = match command {
        Command::JoinTeam { player_id, display_name, team } => {
            join_team(&mut next, player_id, display_name, *team)
        }
        Command::SetSpymaster { player_id } => set_spymaster(&mut next, player_id)?,
        Command::RevealTile { player_id, position } => reveal_tile(&mut next, player_id, *position)?,
        Command::EndTurn { player_id } => end_turn(&mut next, player_id)?,
    };

    if !events.is_empty() {
        next.version += 1;
    }

    Ok(Transition { session: next, events })
}

/// Check every RevealTile precondition without mutating anything.
pub fn check_reveal(session: &Session, player_id: &PlayerId, position: usize) -> Result<(), GameError> {
    if session.is_finished() {
        return Err(GameError::SessionFinished);
    }

    let player = session
        .player(player_id)
        .ok_or_else(|| GameError::PlayerNotFound(player_id.clone()))?;

    if player.is_spymaster() {
        return Err(MoveRejection::SpymasterForbidden.into());
    }

    if player.team != Some(session.current_turn) {
        return Err(MoveRejection::NotYourTurn.into());
    }

    let tile = session.tiles.get(position).ok_or(MoveRejection::NoSuchTile)?;
    if tile.revealed {
        return Err(MoveRejection::AlreadyRevealed.into());
    }

    Ok(())
}

fn join_team(
    session: &mut Session,
    player_id: &PlayerId,
    display_name: &str,
    team: Option<Team>,
) -> Vec<GameEvent> {
    match session.players.get_mut(player_id) {
        None => {
            session.players.insert(player_id.clone(), Player {
                id: player_id.clone(),
                display_name: display_name.to_string(),
                team,
                role: Role::Operative,
            });
            vec![GameEvent::PlayerJoined { player_id: player_id.clone(), team }]
        }
        Some(player) => {
            let team_changed = player.team != team;
            let renamed = player.display_name != display_name;
            if !team_changed && !renamed {
                return Vec::new();
            }

            if team_changed {
                // Switching teams forfeits spymaster status
                player.team = team;
                player.role = Role::Operative;
            }
            if renamed {
                player.display_name = display_name.to_string();
            }

            vec![GameEvent::PlayerUpdated {
                player_id: player_id.clone(),
                team: player.team,
                role: player.role,
            }]
        }
    }
}

fn set_spymaster(session: &mut Session, player_id: &PlayerId) -> Result<Vec<GameEvent>, GameError> {
    let player = session
        .player(player_id)
        .ok_or_else(|| GameError::PlayerNotFound(player_id.clone()))?;
    let team = player.team.ok_or(GameError::NoTeam)?;

    if player.is_spymaster() {
        return Ok(Vec::new());
    }

    let mut demoted = None;
    for (id, p) in session.players.iter_mut() {
        if id == player_id {
            p.role = Role::Spymaster;
        } else if p.team == Some(team) && p.is_spymaster() {
            p.role = Role::Operative;
            demoted = Some(id.clone());
        }
    }

    Ok(vec![GameEvent::SpymasterAssigned {
        player_id: player_id.clone(),
        team,
        demoted,
    }])
}

fn reveal_tile(session: &mut Session, player_id: &PlayerId, position: usize) -> Result<Vec<GameEvent>, GameError> {
    check_reveal(session, player_id, position)?;

    let turn = session.current_turn;
    let tile = session.tiles.get_mut(position).ok_or(MoveRejection::NoSuchTile)?;
    tile.revealed = true;
    let affiliation = tile.affiliation;

    if let Some(owner) = affiliation.team() {
        session.remaining.decrement(owner);
    }

    let mut events = vec![GameEvent::TileRevealed {
        player_id: player_id.clone(),
        position,
        affiliation,
    }];

    let opponent = turn.opponent();
    if affiliation == Affiliation::Assassin {
        finish(session, opponent, GameOverCause::Assassin, &mut events);
    } else if affiliation == Affiliation::from(turn) {
        if session.remaining.get(turn) == 0 {
            finish(session, turn, GameOverCause::TeamCleared, &mut events);
        }
    } else if affiliation == Affiliation::from(opponent) && session.remaining.get(opponent) == 0 {
        finish(session, opponent, GameOverCause::TeamCleared, &mut events);
    } else {
        pass_turn(session, &mut events);
    }

    Ok(events)
}

fn end_turn(session: &mut Session, player_id: &PlayerId) -> Result<Vec<GameEvent>, GameError> {
    let player = session
        .player(player_id)
        .ok_or_else(|| GameError::PlayerNotFound(player_id.clone()))?;

    if player.team != Some(session.current_turn) {
        return Err(MoveRejection::NotYourTurn.into());
    }

    let mut events = Vec::with_capacity(1);
    pass_turn(session, &mut events);
    Ok(events)
}

fn pass_turn(session: &mut Session, events: &mut Vec<GameEvent>) {
    let from = session.current_turn;
    session.current_turn = from.opponent();
    events.push(GameEvent::TurnPassed { from, to: session.current_turn });
}

fn finish(session: &mut Session, winner: Team, cause: GameOverCause, events: &mut Vec<GameEvent>) {
    session.winner = Some(winner);
    session.status = SessionStatus::Finished;
    events.push(GameEvent::GameOver { winner, cause });
}

// =============================================================================
// TESTS
// =============================================================================
