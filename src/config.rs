//! Server configuration from the environment.
//!
//! | Variable                     | Default        |
//! |------------------------------|----------------|
//! | `CODENAMES_BIND`             | `0.0.0.0:8080` |
//! | `CODENAMES_MAX_CONNECTIONS`  | `1000`         |
//! | `CODENAMES_CHANNEL_CAPACITY` | `64`           |
//! | `CODENAMES_SEED`             | random         |
//!
//! Auth settings come from [`AuthConfig::from_env`].

use std::net::SocketAddr;
use std::str::FromStr;

use tracing::warn;

use crate::game::board::{BoardScheme, WORDS};
use crate::network::auth::AuthConfig;
use crate::network::session::StoreConfig;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound queue per connection and per push subscription.
    pub channel_capacity: usize,
    /// Master seed for board dealing. Random when unset.
    pub master_seed: Option<u64>,
    /// Identity provider settings.
    pub auth: AuthConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            channel_capacity: 64,
            master_seed: None,
            auth: AuthConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("CODENAMES_BIND", defaults.bind_addr),
            max_connections: env_or("CODENAMES_MAX_CONNECTIONS", defaults.max_connections),
            channel_capacity: env_or("CODENAMES_CHANNEL_CAPACITY", defaults.channel_capacity).max(1),
            master_seed: env_opt("CODENAMES_SEED"),
            auth: AuthConfig::from_env(),
            version: defaults.version,
        }
    }

    /// Session store settings derived from this config.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            master_seed: self.master_seed,
            scheme: BoardScheme::STANDARD,
            words: WORDS,
        }
    }
}

fn env_opt<T: FromStr>(key: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    env_opt(key).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.channel_capacity, 64);
        assert!(config.master_seed.is_none());
        assert!(!config.auth.is_configured());
    }

    #[test]
    fn test_env_parsing_falls_back() {
        std::env::set_var("CODENAMES_TEST_GOOD", "17");
        std::env::set_var("CODENAMES_TEST_BAD", "seventeen");

        assert_eq!(env_or("CODENAMES_TEST_GOOD", 3usize), 17);
        assert_eq!(env_or("CODENAMES_TEST_BAD", 3usize), 3);
        assert_eq!(env_or("CODENAMES_TEST_UNSET", 3usize), 3);
        assert_eq!(env_opt::<u64>("CODENAMES_TEST_BAD"), None);
    }

    #[test]
    fn test_store_config_carries_seed() {
        let config = ServerConfig {
            master_seed: Some(99),
            ..Default::default()
        };
        let store = config.store_config();
        assert_eq!(store.master_seed, Some(99));
        assert_eq!(store.scheme, BoardScheme::STANDARD);
    }
}
