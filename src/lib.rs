//! # Codenames Session Server
//!
//! Authoritative game-state engine and real-time synchronization for a
//! two-team word-guessing game.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     CODENAMES SERVER                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  core/            - Deterministic primitives                  │
//! │  └── rng.rs       - Seeded Xorshift128+ PRNG                  │
//! │                                                               │
//! │  game/            - Game logic (pure, no I/O)                 │
//! │  ├── state.rs     - Session, tiles, players                   │
//! │  ├── board.rs     - Board dealing                             │
//! │  ├── command.rs   - Mutation requests                         │
//! │  ├── engine.rs    - Turn / reveal / win transitions           │
//! │  └── events.rs    - What a commit changed                     │
//! │                                                               │
//! │  network/         - Server plumbing                           │
//! │  ├── session.rs   - Session store, single writer per session  │
//! │  ├── gateway.rs   - Push fan-out per session                  │
//! │  ├── protocol.rs  - Wire messages, filtered snapshots         │
//! │  ├── auth.rs      - JWT identity                              │
//! │  └── server.rs    - WebSocket server                          │
//! │                                                               │
//! │  client/          - Client sync adapter                       │
//! │  ├── sync.rs      - Version reconciliation, push/poll states  │
//! │  ├── predict.rs   - Optimistic prediction                     │
//! │  ├── rpc.rs       - Request connections                       │
//! │  └── adapter.rs   - Background driver                         │
//! │                                                               │
//! │  chat.rs          - Session and team chat channels            │
//! │  config.rs        - Environment configuration                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Every committed mutation bumps the session version by exactly one and is
//! pushed to all subscribers. Clients apply a snapshot only if its version
//! is higher than the last one they applied, so the push channel and the
//! polling fallback can race without the view ever going backwards.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod chat;
pub mod client;
pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::ServerConfig;
pub use crate::core::rng::DeterministicRng;
pub use game::command::Command;
pub use game::engine::{apply, GameError, MoveRejection};
pub use game::state::{PlayerId, Session, SessionId, Team};
pub use network::protocol::SessionSnapshot;
pub use network::server::GameServer;
pub use network::session::SessionStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
