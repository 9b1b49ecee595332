//! Authentication module for the portcullis gateway.
//!
//! This module provides:
//! - Browser login through external OIDC providers (authorization code + PKCE)
//! - Device authorization for headless clients
//! - JWT session cookies, refresh and logout
//! - A session extractor for Axum routes
//!
//! # Routes
//!
//! Provider routes are addressed by kind and slug and mounted under
//! [`PROVIDERS_PATH`]:
//! - `GET  /{kind}/{slug}/login`
//! - `GET  /{kind}/{slug}/callback`
//! - `POST /{kind}/{slug}/device/code`
//! - `POST /{kind}/{slug}/token`
//!
//! Session routes live directly under [`AUTH_PATH`]: `POST /refresh`,
//! `GET /logout`, `GET /session`.

pub mod db;
pub mod device;
pub mod middleware;
pub mod oidc;
pub mod registry;
pub mod routes;
pub mod session;
pub mod transient;

use crate::config::SessionConfig;
use crate::error::GatewayError;
use axum::Router;
use axum::extract::FromRef;
use axum::routing::{get, post};
use axum_extra::extract::cookie::Key;
use base64::Engine;
use portcullis_identity::{AuthKind, ConfigurationError, TokenService, UserStore};
use rootcause::prelude::Report;
use std::str::FromStr;
use std::sync::Arc;

pub use middleware::RequireSession;
pub use oidc::{OidcRelyingParty, RelyingParty};
pub use registry::{Provider, ProviderRegistry};

/// Mount point of all authentication routes.
pub const AUTH_PATH: &str = "/api/auth";

/// Mount point of the per-provider routes.
pub const PROVIDERS_PATH: &str = "/api/auth/providers";

/// Absolute path prefix of one provider's routes.
#[must_use]
pub fn provider_path(kind: AuthKind, slug: &str) -> String {
    format!("{PROVIDERS_PATH}/{kind}/{slug}")
}

/// Cookie attributes shared by the handlers.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Whether cookies carry the Secure flag.
    pub secure: bool,
    /// Lifetime of a login attempt's state and PKCE cookies.
    pub transient_ttl: chrono::Duration,
}

impl CookieSettings {
    /// Reads cookie settings from the session configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidField` if the transient TTL is out
    /// of range.
    pub fn from_config(config: &SessionConfig) -> Result<Self, Report<ConfigurationError>> {
        Ok(Self {
            secure: config.secure_cookies,
            transient_ttl: config.transient_ttl()?,
        })
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Configured identity providers.
    pub registry: Arc<ProviderRegistry>,
    /// Session token signer.
    pub tokens: Arc<TokenService>,
    /// Local user store.
    pub users: Arc<dyn UserStore>,
    /// Cookie attributes.
    pub cookies: CookieSettings,
    /// Key encrypting the transient login cookies.
    pub cookie_key: Key,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        registry: ProviderRegistry,
        tokens: TokenService,
        users: Arc<dyn UserStore>,
        cookies: CookieSettings,
        cookie_key: Key,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            tokens: Arc::new(tokens),
            users,
            cookies,
            cookie_key,
        }
    }

    /// Resolves the provider named by a route's kind and slug segments.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::UnknownProvider` if the kind is unknown or no
    /// provider of that kind has the slug.
    pub fn provider(&self, kind: &str, slug: &str) -> Result<Arc<Provider>, GatewayError> {
        AuthKind::from_str(kind)
            .ok()
            .and_then(|kind| self.registry.get(kind, slug))
            .ok_or_else(|| GatewayError::UnknownProvider {
                kind: kind.to_string(),
                slug: slug.to_string(),
            })
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Loads the transient cookie key, or generates one for this process.
///
/// # Errors
///
/// Returns `ConfigurationError::InvalidField` if the configured key is not
/// base64 or is shorter than 64 bytes.
pub fn cookie_key(configured: Option<&str>) -> Result<Key, Report<ConfigurationError>> {
    let Some(encoded) = configured else {
        tracing::warn!(
            "no session.cookie_key configured; login attempts will not survive a restart or cross instances"
        );
        return Ok(Key::generate());
    };

    let invalid = |reason: String| ConfigurationError::InvalidField {
        field: "session.cookie_key".to_string(),
        reason,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| invalid(e.to_string()))?;
    Key::try_from(bytes.as_slice())
        .map_err(|_| invalid(format!("key is {} bytes, at least 64 required", bytes.len())).into())
}

/// Routes for one provider, relative to [`PROVIDERS_PATH`].
pub fn provider_routes() -> Router<AppState> {
    Router::new()
        .route("/{kind}/{slug}/login", get(routes::login))
        .route("/{kind}/{slug}/callback", get(routes::callback))
        .route("/{kind}/{slug}/device/code", post(device::device_code))
        .route("/{kind}/{slug}/token", post(device::device_token))
}

/// All authentication routes, relative to [`AUTH_PATH`].
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/providers", provider_routes())
        .route("/refresh", post(session::refresh))
        .route("/logout", get(session::logout))
        .route("/session", get(session::current_session))
}
