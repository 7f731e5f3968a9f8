//! Game State Definitions
//!
//! The data model for one session: tiles, players, turn, remaining counts.
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Session identifier.
pub type SessionId = String;

/// First 8 characters of an id, for log lines.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

// =============================================================================
// PLAYER ID
// =============================================================================

/// Stable player identifier, supplied by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Create from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// TEAMS, ROLES, AFFILIATIONS
// =============================================================================

/// One of the two competing teams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    /// First team.
    TeamA,
    /// Second team.
    TeamB,
}

impl Team {
    /// Both teams, in a fixed order.
    pub const ALL: [Team; 2] = [Team::TeamA, Team::TeamB];

    /// The other team.
    #[inline]
    pub fn opponent(self) -> Team {
        match self {
            Team::TeamA => Team::TeamB,
            Team::TeamB => Team::TeamA,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::TeamA => f.write_str("team_a"),
            Team::TeamB => f.write_str("team_b"),
        }
    }
}

/// What a tile secretly belongs to. Fixed at board generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affiliation {
    /// Belongs to team A.
    TeamA,
    /// Belongs to team B.
    TeamB,
    /// Belongs to nobody; ends the turn.
    Neutral,
    /// Loses the game for whoever reveals it.
    Assassin,
}

impl Affiliation {
    /// The team owning this tile, if any.
    #[inline]
    pub fn team(self) -> Option<Team> {
        match self {
            Affiliation::TeamA => Some(Team::TeamA),
            Affiliation::TeamB => Some(Team::TeamB),
            Affiliation::Neutral | Affiliation::Assassin => None,
        }
    }
}

impl From<Team> for Affiliation {
    fn from(team: Team) -> Self {
        match team {
            Team::TeamA => Affiliation::TeamA,
            Team::TeamB => Affiliation::TeamB,
        }
    }
}

/// Player role within a team.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Guesses tiles.
    #[default]
    Operative,
    /// Sees every affiliation, never reveals.
    Spymaster,
}

/// Session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting commands.
    Active,
    /// A winner exists. Terminal.
    Finished,
}

// =============================================================================
// TILE / PLAYER
// =============================================================================

/// One addressable cell on the board.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// Index into the board, unique and immutable.
    pub position: usize,
    /// The word printed on the tile.
    pub word: String,
    /// Hidden ownership.
    pub affiliation: Affiliation,
    /// Flips false -> true exactly once.
    pub revealed: bool,
}

/// A participant in a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Stable identity.
    pub id: PlayerId,
    /// Name shown to other players.
    pub display_name: String,
    /// `None` means observer.
    pub team: Option<Team>,
    /// Operative or spymaster.
    pub role: Role,
}

impl Player {
    /// Check if this player is a spymaster.
    #[inline]
    pub fn is_spymaster(&self) -> bool {
        self.role == Role::Spymaster
    }
}

/// Unrevealed team tiles left per team.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remaining {
    /// Team A tiles still hidden.
    pub team_a: u32,
    /// Team B tiles still hidden.
    pub team_b: u32,
}

impl Remaining {
    /// Count for a team.
    #[inline]
    pub fn get(&self, team: Team) -> u32 {
        match team {
            Team::TeamA => self.team_a,
            Team::TeamB => self.team_b,
        }
    }

    /// Decrement a team's count, saturating at zero.
    pub fn decrement(&mut self, team: Team) {
        let slot = match team {
            Team::TeamA => &mut self.team_a,
            Team::TeamB => &mut self.team_b,
        };
        *slot = slot.saturating_sub(1);
    }

    /// Count unrevealed team tiles on a board.
    pub fn count(tiles: &[Tile]) -> Self {
        let mut remaining = Self::default();
        for tile in tiles.iter().filter(|t| !t.revealed) {
            match tile.affiliation {
                Affiliation::TeamA => remaining.team_a += 1,
                Affiliation::TeamB => remaining.team_b += 1,
                _ => {}
            }
        }
        remaining
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Authoritative state of one game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Board, in position order.
    pub tiles: Vec<Tile>,
    /// Players keyed by id.
    pub players: BTreeMap<PlayerId, Player>,
    /// Team allowed to act. Keeps its last value once finished.
    pub current_turn: Team,
    /// Hidden team tiles per team.
    pub remaining: Remaining,
    /// Set once, never cleared.
    pub winner: Option<Team>,
    /// Active or finished.
    pub status: SessionStatus,
    /// Bumped by exactly one per committed mutation.
    pub version: u64,
    /// When the session was dealt.
    pub created_at: DateTime<Utc>,
    /// Last commit time.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session at version 0 from a dealt board.
    pub fn new(id: impl Into<SessionId>, tiles: Vec<Tile>, starting_team: Team) -> Self {
        let now = Utc::now();
        let remaining = Remaining::count(&tiles);
        Self {
            id: id.into(),
            tiles,
            players: BTreeMap::new(),
            current_turn: starting_team,
            remaining,
            winner: None,
            status: SessionStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a player.
    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    /// Check if the game is over.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }

    /// Check if a player is the spymaster of either team.
    pub fn is_spymaster(&self, id: &PlayerId) -> bool {
        self.players.get(id).is_some_and(Player::is_spymaster)
    }

    /// Number of tiles dealt to a team, revealed or not.
    pub fn initial_count(&self, team: Team) -> u32 {
        let affiliation = Affiliation::from(team);
        self.tiles.iter().filter(|t| t.affiliation == affiliation).count() as u32
    }

    /// Verify the structural invariants that every commit must preserve.
    pub fn check_invariants(&self) -> Result<(), String> {
        let counted = Remaining::count(&self.tiles);
        if counted != self.remaining {
            return Err(format!(
                "remaining {:?} does not match board {:?}",
                self.remaining, counted
            ));
        }

        if self.is_finished() != self.winner.is_some() {
            return Err(format!(
                "status {:?} inconsistent with winner {:?}",
                self.status, self.winner
            ));
        }

        for (position, tile) in self.tiles.iter().enumerate() {
            if tile.position != position {
                return Err(format!("tile at index {} claims position {}", position, tile.position));
            }
        }

        for team in Team::ALL {
            let spymasters = self
                .players
                .values()
                .filter(|p| p.team == Some(team) && p.is_spymaster())
                .count();
            if spymasters > 1 {
                return Err(format!("{} has {} spymasters", team, spymasters));
            }
        }

        if self.players.values().any(|p| p.team.is_none() && p.is_spymaster()) {
            return Err("observer holds spymaster role".to_string());
        }

        Ok(())
    }
}

/// Fixed 25-tile board for tests: positions 0-8 team A, 9-16 team B,
/// 17-23 neutral, 24 assassin; team A starts. Timestamps are pinned to the
/// epoch so two calls build equal sessions.
#[cfg(test)]
pub(crate) fn sample_session(id: &str) -> Session {
    let tiles = (0..25)
        .map(|position| {
            let affiliation = match position {
                0..=8 => Affiliation::TeamA,
                9..=16 => Affiliation::TeamB,
                17..=23 => Affiliation::Neutral,
                _ => Affiliation::Assassin,
            };
            Tile {
                position,
                word: format!("WORD{}", position),
                affiliation,
                revealed: false,
            }
        })
        .collect();
    let mut session = Session::new(id, tiles, Team::TeamA);
    let epoch = DateTime::<Utc>::UNIX_EPOCH;
    session.created_at = epoch;
    session.updated_at = epoch;
    session
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_counts() {
        let session = sample_session("s");
        assert_eq!(session.version, 0);
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.remaining, Remaining { team_a: 9, team_b: 8 });
        assert_eq!(session.initial_count(Team::TeamA), 9);
        assert_eq!(session.initial_count(Team::TeamB), 8);
        assert!(session.check_invariants().is_ok());
    }

    #[test]
    fn test_sample_session_is_reproducible() {
        let a = sample_session("s");
        let b = sample_session("s");
        assert_eq!(a, b);
        assert_eq!(a.created_at, a.updated_at);
    }

    #[test]
    fn test_opponent() {
        assert_eq!(Team::TeamA.opponent(), Team::TeamB);
        assert_eq!(Team::TeamB.opponent(), Team::TeamA);
    }

    #[test]
    fn test_affiliation_team() {
        assert_eq!(Affiliation::TeamA.team(), Some(Team::TeamA));
        assert_eq!(Affiliation::Neutral.team(), None);
        assert_eq!(Affiliation::Assassin.team(), None);
        assert_eq!(Affiliation::from(Team::TeamB), Affiliation::TeamB);
    }

    #[test]
    fn test_remaining_saturates() {
        let mut remaining = Remaining { team_a: 1, team_b: 0 };
        remaining.decrement(Team::TeamA);
        remaining.decrement(Team::TeamB);
        assert_eq!(remaining, Remaining::default());
    }

    #[test]
    fn test_invariants_catch_drift() {
        let mut session = sample_session("s");
        session.remaining.team_a = 3;
        assert!(session.check_invariants().is_err());

        let mut session = sample_session("s");
        session.winner = Some(Team::TeamA);
        assert!(session.check_invariants().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Team::TeamA).unwrap();
        assert_eq!(json, "\"team_a\"");
        let json = serde_json::to_string(&Affiliation::Assassin).unwrap();
        assert_eq!(json, "\"assassin\"");
        let json = serde_json::to_string(&PlayerId::new("p1")).unwrap();
        assert_eq!(json, "\"p1\"");
    }
}
