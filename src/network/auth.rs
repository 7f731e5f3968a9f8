//! Player identity from bearer tokens.
//!
//! A verified token's `sub` becomes a stable [`PlayerId`] and its `name`
//! the default display name. Tokens are issued elsewhere; this server only
//! verifies them.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::game::state::PlayerId;

/// Namespace mixed into every derived player id.
const PLAYER_ID_DOMAIN: &[u8] = b"codenames-player:";

/// Token verification settings. Without a key, players are trusted to
/// declare their own ids.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Required `iss`, if any.
    pub issuer: Option<String>,
    /// Required `aud`, if any.
    pub audience: Option<String>,
    /// RS256 public key (PEM). Takes precedence over `secret`.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret.
    pub secret: Option<String>,
}

impl AuthConfig {
    /// Read `CODENAMES_JWT_*`. Blank values count as unset.
    pub fn from_env() -> Self {
        Self {
            issuer: env_nonempty("CODENAMES_JWT_ISSUER"),
            audience: env_nonempty("CODENAMES_JWT_AUDIENCE"),
            public_key_pem: env_nonempty("CODENAMES_JWT_PUBLIC_KEY"),
            secret: env_nonempty("CODENAMES_JWT_SECRET"),
        }
    }

    /// Whether connections must present a token before acting.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }

    fn key(&self) -> Result<Option<(Algorithm, DecodingKey)>, AuthError> {
        if let Some(pem) = &self.public_key_pem {
            let key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| AuthError::Key(e.to_string()))?;
            return Ok(Some((Algorithm::RS256, key)));
        }
        Ok(self
            .secret
            .as_ref()
            .map(|s| (Algorithm::HS256, DecodingKey::from_secret(s.as_bytes()))))
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.set_required_spec_claims(&["exp", "sub"]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Claims read from a player token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Account id at the issuer.
    pub sub: String,
    /// Preferred display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Expiry, Unix seconds.
    pub exp: u64,
    /// Issued at, Unix seconds.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience, a string or a list.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Player id for this account: the first 16 bytes of a namespaced
    /// SHA-256 of `sub`, hex encoded. Account ids never reach other players.
    pub fn player_id(&self) -> PlayerId {
        let hash = Sha256::new()
            .chain_update(PLAYER_ID_DOMAIN)
            .chain_update(self.sub.as_bytes())
            .finalize();
        PlayerId::new(hex::encode(&hash[..16]))
    }
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable id used in every command.
    pub player_id: PlayerId,
    /// Name from the token, if any.
    pub display_name: Option<String>,
}

impl From<&TokenClaims> for Identity {
    fn from(claims: &TokenClaims) -> Self {
        Self {
            player_id: claims.player_id(),
            display_name: claims.name.clone().filter(|n| !n.trim().is_empty()),
        }
    }
}

/// Why a token was refused.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The server has no key and accepts self-declared ids.
    #[error("authentication is not enabled")]
    Disabled,
    /// Past its `exp`.
    #[error("token expired")]
    Expired,
    /// `sub` missing or blank.
    #[error("token has no subject")]
    NoSubject,
    /// The configured public key could not be parsed.
    #[error("server key unusable: {0}")]
    Key(String),
    /// Bad signature, issuer, audience or encoding.
    #[error("token rejected: {0}")]
    Rejected(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::MissingRequiredClaim(claim) if claim == "sub" => AuthError::NoSubject,
            _ => AuthError::Rejected(err.to_string()),
        }
    }
}

/// Verify a token's signature and claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let (algorithm, key) = config.key()?.ok_or(AuthError::Disabled)?;
    let claims = decode::<TokenClaims>(token, &key, &config.validation(algorithm))?.claims;
    if claims.sub.trim().is_empty() {
        return Err(AuthError::NoSubject);
    }
    Ok(claims)
}

/// Verify a token and resolve the caller's identity.
pub fn authenticate(token: &str, config: &AuthConfig) -> Result<Identity, AuthError> {
    validate_token(token, config).map(|claims| Identity::from(&claims))
}

// =============================================================================
// TESTS
// =============================================================================
