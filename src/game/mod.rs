//! Game Logic Module
//!
//! Everything about a single Codenames game, free of I/O.
//!
//! ## Module Structure
//!
//! - `state`: Session, tiles, players, teams
//! - `board`: Deterministic board dealing
//! - `command`: Mutation requests
//! - `engine`: Pure transition function
//! - `events`: What an accepted command changed

pub mod state;
pub mod board;
pub mod command;
pub mod engine;
pub mod events;

// Re-export key types
pub use state::{Affiliation, Player, PlayerId, Remaining, Role, Session, SessionId, SessionStatus, Team, Tile};
pub use board::{deal_session, generate_board, BoardError, BoardScheme, WORDS};
pub use command::Command;
pub use engine::{apply, check_reveal, GameError, MoveRejection, Transition};
pub use events::{GameEvent, GameOverCause};
