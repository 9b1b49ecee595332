//! Signed client assertions (`private_key_jwt`).
//!
//! Providers configured with a signing key authenticate the gateway with a
//! short-lived RS256 JWT instead of the shared client secret.

use crate::error::{ConfigurationError, TokenError};
use crate::provider::ClientSigningKey;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Form value of `client_assertion_type` for JWT bearer assertions.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

const ASSERTION_TTL_SECONDS: i64 = 3600;

/// Claims of a client assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Signs client assertions for one provider.
pub struct AssertionSigner {
    client_id: String,
    audience: String,
    key_id: Option<String>,
    key: EncodingKey,
}

impl AssertionSigner {
    /// Loads the signing key for a client.
    ///
    /// The audience is the provider's issuer URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidSigningKey` if the PEM is not an
    /// RSA private key.
    pub fn new(
        provider: &str,
        client_id: &str,
        audience: &str,
        signing_key: &ClientSigningKey,
    ) -> Result<Self, Report<ConfigurationError>> {
        let key = EncodingKey::from_rsa_pem(signing_key.private_key_pem().as_bytes()).map_err(
            |e| ConfigurationError::InvalidSigningKey {
                provider: provider.to_string(),
                reason: e.to_string(),
            },
        )?;

        Ok(Self {
            client_id: client_id.to_string(),
            audience: audience.to_string(),
            key_id: signing_key.key_id().map(str::to_string),
            key,
        })
    }

    /// Signs a fresh assertion, valid for one hour.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if encoding fails.
    pub fn sign(&self) -> Result<String, Report<TokenError>> {
        let now = Utc::now();
        let claims = AssertionClaims {
            iss: self.client_id.clone(),
            sub: self.client_id.clone(),
            aud: vec![self.audience.clone()],
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ASSERTION_TTL_SECONDS)).timestamp(),
            jti: Ulid::new().to_string(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&self.key_id);

        encode(&header, &claims, &self.key).map_err(|e| {
            TokenError::Signing {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

impl fmt::Debug for AssertionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionSigner")
            .field("client_id", &self.client_id)
            .field("audience", &self.audience)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}
