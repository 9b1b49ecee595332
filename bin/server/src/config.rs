//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from an optional TOML file overlaid by
//! environment variables (`PORTCULLIS__SESSION__JWT_SECRET=...`).
//!
//! See [`ProviderConfig`](portcullis_identity::ProviderConfig) for the
//! per-provider settings.

use portcullis_identity::{ConfigurationError, ProviderConfig};
use rootcause::prelude::Report;
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "PORTCULLIS_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "portcullis.toml";

/// Longest lifetime accepted for a token or cookie, in minutes.
const MAX_TTL_MINUTES: i64 = 366 * 24 * 60;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// PostgreSQL database connection URL. Users are kept in memory when
    /// unset.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Upper bound on each outbound call to an identity provider.
    #[serde(default = "default_provider_timeout_seconds")]
    pub provider_timeout_seconds: u64,

    /// Session configuration.
    pub session: SessionConfig,

    /// External identity providers, grouped by kind.
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// External identity providers, grouped by kind.
#[derive(Debug, Default, Deserialize)]
pub struct ProvidersConfig {
    /// OpenID Connect providers.
    #[serde(default)]
    pub oidc: Vec<ProviderConfig>,
}

/// Session-related configuration.
#[derive(Clone, Deserialize)]
pub struct SessionConfig {
    /// HMAC secret for signing session tokens. At least 32 bytes.
    pub jwt_secret: String,

    /// Access token lifetime in minutes.
    #[serde(default = "default_access_token_ttl_minutes")]
    pub access_token_ttl_minutes: i64,

    /// Refresh token lifetime in minutes.
    #[serde(default = "default_refresh_token_ttl_minutes")]
    pub refresh_token_ttl_minutes: i64,

    /// Lifetime of the state and PKCE cookies of a login attempt.
    #[serde(default = "default_transient_ttl_minutes")]
    pub transient_ttl_minutes: i64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Defaults to true for production safety; set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,

    /// Base64 key for encrypting transient cookies, at least 64 bytes.
    /// Instances behind one load balancer must share it. A random key is
    /// generated per process when unset.
    #[serde(default)]
    pub cookie_key: Option<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_provider_timeout_seconds() -> u64 {
    60
}

fn default_access_token_ttl_minutes() -> i64 {
    15
}

fn default_refresh_token_ttl_minutes() -> i64 {
    24 * 60
}

fn default_transient_ttl_minutes() -> i64 {
    10
}

fn default_secure_cookies() -> bool {
    true
}

impl SessionConfig {
    /// Creates a session configuration with defaults for everything but the
    /// signing secret.
    #[must_use]
    pub fn new(jwt_secret: String) -> Self {
        Self {
            jwt_secret,
            access_token_ttl_minutes: default_access_token_ttl_minutes(),
            refresh_token_ttl_minutes: default_refresh_token_ttl_minutes(),
            transient_ttl_minutes: default_transient_ttl_minutes(),
            secure_cookies: default_secure_cookies(),
            cookie_key: None,
        }
    }

    /// Access token lifetime.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidField` unless the lifetime is
    /// between one minute and a year.
    pub fn access_token_ttl(&self) -> Result<chrono::Duration, Report<ConfigurationError>> {
        ttl(
            "session.access_token_ttl_minutes",
            self.access_token_ttl_minutes,
        )
    }

    /// Refresh token lifetime.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidField` unless the lifetime is
    /// between one minute and a year.
    pub fn refresh_token_ttl(&self) -> Result<chrono::Duration, Report<ConfigurationError>> {
        ttl(
            "session.refresh_token_ttl_minutes",
            self.refresh_token_ttl_minutes,
        )
    }

    /// Lifetime of a login attempt's transient cookies.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidField` unless the lifetime is
    /// between one minute and a year.
    pub fn transient_ttl(&self) -> Result<chrono::Duration, Report<ConfigurationError>> {
        ttl("session.transient_ttl_minutes", self.transient_ttl_minutes)
    }
}

fn ttl(field: &str, minutes: i64) -> Result<chrono::Duration, Report<ConfigurationError>> {
    if !(1..=MAX_TTL_MINUTES).contains(&minutes) {
        return Err(ConfigurationError::InvalidField {
            field: field.to_string(),
            reason: format!("{minutes} is outside 1..={MAX_TTL_MINUTES} minutes"),
        }
        .into());
    }
    Ok(chrono::Duration::minutes(minutes))
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("access_token_ttl_minutes", &self.access_token_ttl_minutes)
            .field("refresh_token_ttl_minutes", &self.refresh_token_ttl_minutes)
            .field("transient_ttl_minutes", &self.transient_ttl_minutes)
            .field("secure_cookies", &self.secure_cookies)
            .field("cookie_key", &self.cookie_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Loads configuration from the configuration file and environment.
    ///
    /// The file named by `PORTCULLIS_CONFIG` is required when that variable
    /// is set; otherwise `portcullis.toml` is read if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let file = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => config::File::with_name(&path).required(true),
            Err(_) => config::File::from(Path::new(DEFAULT_CONFIG_PATH)).required(false),
        };
        Self::load(file, config::Environment::with_prefix("PORTCULLIS"))
    }

    /// Loads configuration from a TOML string. Environment variables are not
    /// consulted.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_toml(toml: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn load<F>(file: F, env: config::Environment) -> Result<Self, config::ConfigError>
    where
        F: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .add_source(file)
            .add_source(env.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
