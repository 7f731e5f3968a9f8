//! Network Layer
//!
//! Session store, broadcast gateway and the WebSocket server in front of them.
//! This layer is **non-deterministic** - all game rules run through `game/`.

pub mod auth;
pub mod gateway;
pub mod protocol;
pub mod session;
pub mod server;

pub use auth::{authenticate, validate_token, AuthConfig, AuthError, Identity, TokenClaims};
pub use gateway::{ClientId, Gateway, SubscriptionToken};
pub use protocol::{
    ClientMessage, ErrorCode, RequestId, ServerError, ServerMessage, SessionSnapshot, TileView,
};
pub use session::{SessionStore, StoreConfig, StoreError};
pub use server::{ConnectionStats, GameServer, GameServerError};
