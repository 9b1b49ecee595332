//! Session tokens.
//!
//! A session is an access/refresh pair of HMAC-signed JWTs bound to a local
//! login. The access token is short-lived and authorizes API calls; the
//! refresh token lives longer and can only be traded for a new access token.
//! Each token carries a `token_use` claim so one can never stand in for the
//! other.

use crate::error::{AuthenticationError, TokenError};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shortest HMAC secret accepted for signing session tokens.
pub const MIN_SECRET_LEN: usize = 32;

const ALGORITHM: Algorithm = Algorithm::HS512;

/// Which half of a session a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    /// Returns the claim value for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried by both session tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Local login name.
    pub sub: String,
    /// Issued at (seconds since the epoch).
    pub iat: i64,
    /// Not before (seconds since the epoch).
    pub nbf: i64,
    /// Expiry (seconds since the epoch).
    pub exp: i64,
    /// Access or refresh.
    pub token_use: TokenKind,
}

impl SessionClaims {
    /// Returns the login the token is bound to.
    #[must_use]
    pub fn login(&self) -> &str {
        &self.sub
    }

    /// Returns the expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// A freshly signed token.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    token: String,
    kind: TokenKind,
    ttl: Duration,
    expires_at: DateTime<Utc>,
}

impl IssuedToken {
    /// Returns the compact JWT.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns whether this is an access or refresh token.
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Returns how long the token is valid for from issuance.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns when the token expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("kind", &self.kind)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Both halves of a session, minted together.
///
/// A pair only exists once both tokens are signed, so callers that turn it
/// into cookies either set both or neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokenPair {
    login: String,
    access: IssuedToken,
    refresh: IssuedToken,
}

impl SessionTokenPair {
    /// Returns the login both tokens are bound to.
    #[must_use]
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Returns the access token.
    #[must_use]
    pub fn access(&self) -> &IssuedToken {
        &self.access
    }

    /// Returns the refresh token.
    #[must_use]
    pub fn refresh(&self) -> &IssuedToken {
        &self.refresh
    }
}

/// Signs and verifies session tokens.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    /// Creates a token service signing with the given HMAC secret.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::InvalidSecret` if the secret is shorter than
    /// [`MIN_SECRET_LEN`] bytes.
    pub fn new(
        secret: &[u8],
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self, Report<TokenError>> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::InvalidSecret {
                reason: format!(
                    "secret is {} bytes, at least {MIN_SECRET_LEN} required",
                    secret.len()
                ),
            }
            .into());
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl,
            refresh_ttl,
        })
    }

    /// Returns the access token lifetime.
    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Returns the refresh token lifetime.
    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Signs a new access token for a login.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if the token cannot be encoded.
    pub fn issue_access_token(&self, login: &str) -> Result<IssuedToken, Report<TokenError>> {
        self.issue(login, TokenKind::Access, self.access_ttl)
    }

    /// Signs a new refresh token for a login.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if the token cannot be encoded.
    pub fn issue_refresh_token(&self, login: &str) -> Result<IssuedToken, Report<TokenError>> {
        self.issue(login, TokenKind::Refresh, self.refresh_ttl)
    }

    /// Signs both halves of a session in one step.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if either token cannot be encoded; no
    /// partial pair is ever returned.
    pub fn issue_session(&self, login: &str) -> Result<SessionTokenPair, Report<TokenError>> {
        let access = self.issue_access_token(login)?;
        let refresh = self.issue_refresh_token(login)?;
        Ok(SessionTokenPair {
            login: login.to_string(),
            access,
            refresh,
        })
    }

    /// Verifies an access token.
    ///
    /// # Errors
    ///
    /// Returns an `AuthenticationError` if the token is invalid, expired, or
    /// is a refresh token.
    pub fn verify_access(&self, token: &str) -> Result<SessionClaims, Report<AuthenticationError>> {
        self.verify(token, TokenKind::Access)
    }

    /// Verifies a refresh token.
    ///
    /// # Errors
    ///
    /// Returns an `AuthenticationError` if the token is invalid, expired, or
    /// is an access token.
    pub fn verify_refresh(
        &self,
        token: &str,
    ) -> Result<SessionClaims, Report<AuthenticationError>> {
        self.verify(token, TokenKind::Refresh)
    }

    /// Mints a new access token from a valid refresh token.
    ///
    /// No identity provider is contacted.
    ///
    /// # Errors
    ///
    /// Returns an `AuthenticationError::InvalidToken` wrapping the cause if
    /// the refresh token does not verify or the new token cannot be signed.
    pub fn refresh(&self, refresh_token: &str) -> Result<IssuedToken, Report<AuthenticationError>> {
        let claims = self.verify_refresh(refresh_token)?;
        self.issue_access_token(&claims.sub).map_err(|e| {
            AuthenticationError::InvalidToken {
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn issue(
        &self,
        login: &str,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, Report<TokenError>> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let claims = SessionClaims {
            sub: login.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            token_use: kind,
        };

        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding_key).map_err(|e| {
            TokenError::Signing {
                reason: e.to_string(),
            }
        })?;

        Ok(IssuedToken {
            token,
            kind,
            ttl,
            expires_at,
        })
    }

    fn verify(
        &self,
        token: &str,
        expected: TokenKind,
    ) -> Result<SessionClaims, Report<AuthenticationError>> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "nbf", "sub"]);

        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthenticationError::TokenExpired,
                _ => AuthenticationError::InvalidToken {
                    reason: e.to_string(),
                },
            },
        )?;

        if data.claims.token_use != expected {
            return Err(AuthenticationError::WrongTokenKind {
                expected: expected.to_string(),
                found: data.claims.token_use.to_string(),
            }
            .into());
        }

        Ok(data.claims)
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}
