#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-auth-support** – JWT capability tokens for the demo CLI.
//!
//! This crate is deliberately outside the kernel's lawful write path: the
//! guard pipeline (`bos-guard`) is what actually authorizes a command once
//! it reaches [`bos_kernel::Kernel::submit`], consulting the actor and
//! business-state projections folded from the log itself. A capability
//! token here only answers a narrower question for the demo CLI – "does
//! the caller hold a credential naming this actor, for this business,
//! with this scope" – before it ever bothers constructing a command.
//!
//! A `Claims` shape naming a BOS business and actor, a `CapabilityToken` /
//! `TokenValidator` trait split, and a bundled HS256 JWT implementation.

use bos_types::{ActorType, BusinessId};
use serde::{Deserialize, Serialize};
use async_trait::async_trait;
use thiserror::Error;

/// Canonical claim set embedded in every capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject – the actor id this token speaks for.
    pub sub: String,
    /// Kind of actor the subject claims to be.
    pub actor_type: ActorType,
    /// Business the subject is scoped to.
    pub business_id: BusinessId,
    /// Ordered list of scopes the holder may act under (e.g. `marketing`,
    /// `cash_engine`). Interpretation is left to the caller; the guard
    /// pipeline's own scope enforcement is unrelated to this list.
    pub scopes: Vec<String>,
    /// Issued-at timestamp (seconds since Unix epoch).
    pub iat: u64,
    /// Absolute expiry timestamp (seconds since Unix epoch).
    pub exp: u64,
    /// Unique token identifier (e.g. UUIDv4) for replay protection.
    pub jti: String,
}

/// Failure modes for minting or validating a token.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying JWT library rejected the token (bad signature,
    /// malformed, expired, wrong algorithm, ...).
    #[error("token rejected: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    /// The system clock could not be read as a Unix timestamp.
    #[error("system clock is before the Unix epoch")]
    ClockBeforeEpoch,
}

/// Crate result helper.
pub type Result<T> = std::result::Result<T, Error>;

/// Abstract behaviour common to all capability token formats.
#[async_trait]
pub trait CapabilityToken: Sized + Send + Sync {
    /// Mint a new token from raw `claims` using the provided secret key.
    async fn mint(claims: &Claims, key: &[u8]) -> Result<Self>;

    /// Return the serialized wire representation (e.g. JWT string).
    fn as_str(&self) -> &str;
}

/// Verifier trait used by the CLI before it builds a command on the
/// holder's behalf.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Verify authenticity and expiry, returning the embedded [`Claims`].
    async fn validate(&self, raw: &str) -> Result<Claims>;
}

/// HS256 JWT implementation bundled for the demo CLI.
pub mod hs256 {
    use super::{CapabilityToken, Claims, Error, Result, TokenValidator};
    use async_trait::async_trait;
    use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation};
    use std::time::{SystemTime, UNIX_EPOCH};
    use uuid::Uuid;

    /// Concrete JWT (HS256) capability token.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct JwtHs256Token {
        token: String,
    }

    impl JwtHs256Token {
        /// The raw JWT string.
        pub fn as_str(&self) -> &str {
            &self.token
        }

        fn decode_internal(token: &str, secret: &str) -> std::result::Result<TokenData<Claims>, jsonwebtoken::errors::Error> {
            let mut validation = Validation::new(Algorithm::HS256);
            validation.validate_exp = true;
            validation.leeway = 0;
            decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        }

        /// Decode and validate the token against `secret`, returning its claims.
        pub fn claims(&self, secret: &str) -> Result<Claims> {
            Self::decode_internal(&self.token, secret).map(|d| d.claims).map_err(Error::Token)
        }
    }

    #[async_trait]
    impl CapabilityToken for JwtHs256Token {
        async fn mint(claims: &Claims, key: &[u8]) -> Result<Self> {
            let mut header = Header::new(Algorithm::HS256);
            header.typ = Some("bos.cap+jwt".into());
            let jwt = encode(&header, claims, &EncodingKey::from_secret(key)).map_err(Error::Token)?;
            Ok(Self { token: jwt })
        }

        fn as_str(&self) -> &str {
            &self.token
        }
    }

    /// Build a fresh [`Claims`] with `iat`/`jti` stamped from the wall
    /// clock, expiring `ttl_secs` from now.
    pub fn build_claims(sub: &str, actor_type: super::ActorType, business_id: super::BusinessId, scopes: Vec<String>, ttl_secs: u64) -> Result<Claims> {
        let issued_at = SystemTime::now().duration_since(UNIX_EPOCH).map_err(|_| Error::ClockBeforeEpoch)?.as_secs();
        Ok(Claims {
            sub: sub.to_owned(),
            actor_type,
            business_id,
            scopes,
            iat: issued_at,
            exp: issued_at + ttl_secs,
            jti: Uuid::new_v4().to_string(),
        })
    }

    /// HS256 JWT validator.
    #[derive(Clone, Debug)]
    pub struct JwtHs256Validator {
        secret: String,
        validation: Validation,
    }

    impl JwtHs256Validator {
        /// Construct a validator that checks signatures against `secret`.
        pub fn new(secret: impl Into<String>) -> Self {
            let mut validation = Validation::new(Algorithm::HS256);
            validation.validate_exp = true;
            Self { secret: secret.into(), validation }
        }
    }

    #[async_trait]
    impl TokenValidator for JwtHs256Validator {
        async fn validate(&self, raw: &str) -> Result<Claims> {
            let data = decode::<Claims>(raw, &DecodingKey::from_secret(self.secret.as_bytes()), &self.validation).map_err(Error::Token)?;
            Ok(data.claims)
        }
    }

    /// Glob-import helper for downstream crates reaching for the HS256
    /// implementation specifically.
    pub mod prelude {
        pub use super::{JwtHs256Token, JwtHs256Validator};
        pub use crate::{CapabilityToken, Claims, TokenValidator};
    }
}

/// Single-line glob import for downstream crates.
pub mod prelude {
    pub use super::hs256::prelude::*;
    pub use super::{CapabilityToken, Claims, TokenValidator};
}
