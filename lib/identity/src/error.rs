//! Error types for the identity crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ConfigurationError`: Invalid provider configuration (startup-fatal)
//! - `AuthenticationError`: Session token verification failures
//! - `TokenError`: Session token or client assertion issuance failures
//! - `StoreError`: User store backend failures
//! - `SyncError`: Failures mapping an external identity onto a local user

use std::fmt;

/// Errors from validating or resolving provider configuration.
///
/// These are only ever raised while the provider registry is being built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A required field is missing or malformed.
    InvalidField { field: String, reason: String },
    /// Two providers of the same kind share a slug.
    DuplicateSlug { slug: String },
    /// The discovery document could not be fetched or parsed.
    Discovery { provider: String, reason: String },
    /// The provider does not advertise an endpoint the gateway needs.
    MissingEndpoint { provider: String, endpoint: String },
    /// The configured client assertion key could not be loaded.
    InvalidSigningKey { provider: String, reason: String },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidField { field, reason } => {
                write!(f, "invalid configuration field '{field}': {reason}")
            }
            Self::DuplicateSlug { slug } => {
                write!(f, "provider slug '{slug}' is configured more than once")
            }
            Self::Discovery { provider, reason } => {
                write!(f, "discovery failed for provider '{provider}': {reason}")
            }
            Self::MissingEndpoint { provider, endpoint } => {
                write!(f, "provider '{provider}' does not advertise a {endpoint}")
            }
            Self::InvalidSigningKey { provider, reason } => {
                write!(f, "invalid signing key for provider '{provider}': {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Errors from verifying a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// Token signature or structure is invalid.
    InvalidToken { reason: String },
    /// Token has expired.
    TokenExpired,
    /// A refresh token was presented where an access token is required, or
    /// the other way around.
    WrongTokenKind { expected: String, found: String },
    /// No token was presented.
    MissingToken,
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidToken { reason } => write!(f, "invalid token: {reason}"),
            Self::TokenExpired => write!(f, "token has expired"),
            Self::WrongTokenKind { expected, found } => {
                write!(f, "expected {expected} token, found {found} token")
            }
            Self::MissingToken => write!(f, "no token presented"),
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Errors from signing tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The signing secret is unusable.
    InvalidSecret { reason: String },
    /// Encoding or signing the token failed.
    Signing { reason: String },
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSecret { reason } => write!(f, "invalid signing secret: {reason}"),
            Self::Signing { reason } => write!(f, "failed to sign token: {reason}"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Errors from a user store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    Backend { details: String },
    /// A stored record could not be decoded.
    Corrupt { login: String, details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { details } => write!(f, "user store error: {details}"),
            Self::Corrupt { login, details } => {
                write!(f, "stored user '{login}' is corrupt: {details}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from synchronizing an external identity into the user store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The identity carries no email, so no login name can be derived.
    MissingLogin { subject: String, issuer: String },
    /// The user store failed.
    Store { details: String },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLogin { subject, issuer } => {
                write!(
                    f,
                    "cannot derive a login for subject '{subject}' from '{issuer}': no email claim"
                )
            }
            Self::Store { details } => write!(f, "user sync failed: {details}"),
        }
    }
}

impl std::error::Error for SyncError {}
