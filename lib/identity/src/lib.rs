//! Federated identity and session tokens for the portcullis gateway.
//!
//! This crate provides:
//! - Provider configuration (`ProviderConfig`, `AuthKind`)
//! - External identities and their mapping onto local users (`ExternalUserInfo`)
//! - User sync against a pluggable store (`UserStore`, `sync_user`)
//! - Session token issuance and verification (`TokenService`)
//! - Signed client assertions for providers that require them (`AssertionSigner`)
//!
//! # Login Model
//!
//! A person signs in at an external provider. The verified identity is
//! stamped with the issuer of the provider that verified it, mapped onto a
//! local login, and a session of two JWTs is minted for that login:
//! - An access token, short-lived, presented on every request
//! - A refresh token, long-lived, only good for minting new access tokens
//!
//! # Example
//!
//! ```
//! use portcullis_identity::{
//!     ExternalUserInfo, IdentityClaims, InMemoryUserStore, OidcUserInfo, TokenService, sync_user,
//! };
//! use chrono::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let info = OidcUserInfo::new(
//!     IdentityClaims::new("sub_123".to_string())
//!         .with_email(Some("alice@example.com".to_string())),
//!     "https://idp.example.com",
//! );
//! assert_eq!(info.login(), "alice");
//!
//! let store = InMemoryUserStore::new();
//! let user = sync_user(&store, &info).await.unwrap();
//!
//! let tokens = TokenService::new(
//!     b"an-hmac-secret-of-at-least-32-bytes",
//!     Duration::minutes(15),
//!     Duration::hours(24),
//! )
//! .unwrap();
//! let session = tokens.issue_session(user.login()).unwrap();
//! let claims = tokens.verify_access(session.access().token()).unwrap();
//! assert_eq!(claims.login(), "alice");
//! # }
//! ```

pub mod assertion;
pub mod error;
pub mod identity;
pub mod provider;
pub mod sync;
pub mod token;
pub mod user;

// Re-export main types at crate root
pub use assertion::{AssertionClaims, AssertionSigner, CLIENT_ASSERTION_TYPE};
pub use error::{AuthenticationError, ConfigurationError, StoreError, SyncError, TokenError};
pub use identity::{
    ExternalUserInfo, IdentityClaims, OidcUserInfo, ProviderContext, UserProfile, login_from_email,
};
pub use provider::{AuthKind, ClientSigningKey, ProviderConfig, ProviderConfigBuilder};
pub use sync::{InMemoryUserStore, UserStore, sync_user};
pub use token::{IssuedToken, SessionClaims, SessionTokenPair, TokenKind, TokenService};
pub use user::UserRecord;
