//! Board Generation
//!
//! Deals a fixed-order board: words and affiliations are both shuffled with
//! the supplied RNG, so the same seed always yields the same board.

use thiserror::Error;

use crate::core::rng::DeterministicRng;
use crate::game::state::{Affiliation, Session, SessionId, Team, Tile};

/// Built-in word pool.
pub const WORDS: &[&str] = &[
    "AFRICA", "AGENT", "AIR", "ALIEN", "ALPS", "AMAZON", "AMBULANCE", "AMERICA", "ANGEL",
    "ANTARCTICA", "APPLE", "ARM", "ATLANTIS", "AUSTRALIA", "AZTEC", "BACK", "BALL", "BAND",
    "BANK", "BAR", "BARK", "BAT", "BATTERY", "BEACH", "BEAR", "BEAT", "BED", "BEIJING",
    "BELL", "BELT", "BERLIN", "BERMUDA", "BERRY", "BILL", "BLOCK", "BOARD", "BOLT", "BOMB",
    "BOND", "BOOM", "BOOT", "BOTTLE", "BOW", "BOX", "BRIDGE", "BRUSH", "BUCK", "BUFFALO",
    "BUG", "BUGLE", "BUTTON", "CALF", "CANADA", "CAP", "CAPITAL", "CAR", "CARD", "CARROT",
    "CASINO", "CAST", "CAT", "CELL", "CENTAUR", "CENTER", "CHAIR", "CHANGE", "CHARGE", "CHECK",
    "CHEST", "CHICK", "CHINA", "CHOCOLATE", "CHURCH", "CIRCLE", "CLIFF", "CLOAK", "CLUB",
    "CODE", "COLD", "COMIC", "COMPOUND", "CONCERT", "CONDUCTOR", "CONTRACT", "COOK", "COPPER",
    "COTTON", "COURT", "COVER", "CRANE", "CRASH", "CRICKET", "CROSS", "CROWN", "CYCLE",
    "DANCE", "DATE", "DAY", "DEATH", "DECK", "DEGREE", "DIAMOND", "DICE", "DINOSAUR",
];

/// How a board's tiles are split between affiliations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoardScheme {
    /// Total tiles.
    pub size: usize,
    /// Tiles for the team that moves first.
    pub starting_team_tiles: usize,
    /// Tiles for the other team.
    pub other_team_tiles: usize,
    /// Assassin tiles.
    pub assassins: usize,
}

impl BoardScheme {
    /// The classic 5x5 board: 9 / 8 / 7 neutral / 1 assassin.
    pub const STANDARD: BoardScheme = BoardScheme {
        size: 25,
        starting_team_tiles: 9,
        other_team_tiles: 8,
        assassins: 1,
    };

    /// Tiles left over for neutral.
    pub fn neutral_tiles(&self) -> Result<usize, BoardError> {
        let assigned = self.starting_team_tiles + self.other_team_tiles + self.assassins;
        self.size
            .checked_sub(assigned)
            .ok_or(BoardError::CountMismatch { size: self.size, assigned })
    }
}

impl Default for BoardScheme {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Board generation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    /// Requested counts exceed the board size.
    #[error("affiliation counts ({assigned}) exceed board size ({size})")]
    CountMismatch {
        /// Board size.
        size: usize,
        /// Sum of non-neutral tiles requested.
        assigned: usize,
    },

    /// Not enough distinct words to fill the board.
    #[error("need {needed} words, pool has {available}")]
    NotEnoughWords {
        /// Board size.
        needed: usize,
        /// Words supplied.
        available: usize,
    },
}

/// Deal a board for `starting_team` from `words`.
pub fn generate_board(
    scheme: &BoardScheme,
    starting_team: Team,
    words: &[&str],
    rng: &mut DeterministicRng,
) -> Result<Vec<Tile>, BoardError> {
    let neutral = scheme.neutral_tiles()?;
    if words.len() < scheme.size {
        return Err(BoardError::NotEnoughWords {
            needed: scheme.size,
            available: words.len(),
        });
    }

    let mut affiliations = Vec::with_capacity(scheme.size);
    affiliations.extend(std::iter::repeat(Affiliation::from(starting_team)).take(scheme.starting_team_tiles));
    affiliations.extend(std::iter::repeat(Affiliation::from(starting_team.opponent())).take(scheme.other_team_tiles));
    affiliations.extend(std::iter::repeat(Affiliation::Neutral).take(neutral));
    affiliations.extend(std::iter::repeat(Affiliation::Assassin).take(scheme.assassins));
    rng.shuffle(&mut affiliations);

    let mut pool: Vec<&str> = words.to_vec();
    rng.shuffle(&mut pool);

    Ok(affiliations
        .into_iter()
        .zip(pool)
        .enumerate()
        .map(|(position, (affiliation, word))| Tile {
            position,
            word: word.to_string(),
            affiliation,
            revealed: false,
        })
        .collect())
}

/// Deal a whole session: pick the starting team, then the board.
pub fn deal_session(
    id: impl Into<SessionId>,
    scheme: &BoardScheme,
    words: &[&str],
    rng: &mut DeterministicRng,
) -> Result<Session, BoardError> {
    let starting_team = if rng.next_bool() { Team::TeamA } else { Team::TeamB };
    let tiles = generate_board(scheme, starting_team, words, rng)?;
    Ok(Session::new(id, tiles, starting_team))
}

// =============================================================================
// TESTS
// =============================================================================
