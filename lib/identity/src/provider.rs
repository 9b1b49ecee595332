//! External identity provider configuration.
//!
//! This module provides configuration types for connecting to external
//! OIDC identity providers. Each provider is addressed in routes by its
//! kind and slug, e.g. `/oidc/corp/login`.

use crate::error::ConfigurationError;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The family of identity protocol a provider speaks.
///
/// Appears as the first path segment of every provider route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    /// OpenID Connect.
    Oidc,
}

impl AuthKind {
    /// Returns the route segment for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Oidc => "oidc",
        }
    }
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oidc" => Ok(Self::Oidc),
            other => Err(ConfigurationError::InvalidField {
                field: "kind".to_string(),
                reason: format!("unknown provider kind '{other}'"),
            }),
        }
    }
}

/// Private key used to sign client assertions instead of sending the
/// shared client secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientSigningKey {
    /// Optional `kid` header the provider uses to select the public key.
    #[serde(default)]
    key_id: Option<String>,
    /// RSA private key, PEM encoded.
    private_key_pem: String,
}

impl ClientSigningKey {
    /// Creates a signing key from a PEM-encoded RSA private key.
    #[must_use]
    pub fn new(private_key_pem: String, key_id: Option<String>) -> Self {
        Self {
            key_id,
            private_key_pem,
        }
    }

    /// Returns the key id, if configured.
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Returns the PEM-encoded private key.
    #[must_use]
    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }
}

impl fmt::Debug for ClientSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSigningKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Configuration for one external OIDC identity provider.
///
/// Loaded once at startup and never mutated afterwards. Fields with
/// defaults can be omitted from configuration files.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable, URL-safe identifier used in routes (e.g. "corp").
    slug: String,
    /// The OIDC issuer URL (e.g. "https://idp.example.com").
    issuer_url: String,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret. May be empty for public clients or when a
    /// signing key is configured.
    #[serde(default)]
    client_secret: String,
    /// Fixed callback URL. When absent it is derived from the inbound
    /// request's scheme and host.
    #[serde(default)]
    redirect_uri: Option<String>,
    /// OAuth2 scopes to request, in order.
    /// Default: ["openid", "email", "profile"]
    #[serde(default = "default_scopes")]
    scopes: Vec<String>,
    /// Turns off PKCE for providers that reject it.
    #[serde(default)]
    disable_pkce: bool,
    /// Overrides the discovery document location. Defaults to
    /// `{issuer_url}/.well-known/openid-configuration`.
    #[serde(default)]
    discovery_url: Option<String>,
    /// Extra query parameters appended to every authorize request.
    #[serde(default)]
    url_params: BTreeMap<String, String>,
    /// Key for signing device-flow client assertions.
    #[serde(default)]
    signing_key: Option<ClientSigningKey>,
}

fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "email".to_string(),
        "profile".to_string(),
    ]
}

impl ProviderConfig {
    /// Creates a new provider configuration with defaults for optional fields.
    #[must_use]
    pub fn new(slug: String, issuer_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            slug,
            issuer_url,
            client_id,
            client_secret,
            redirect_uri: None,
            scopes: default_scopes(),
            disable_pkce: false,
            discovery_url: None,
            url_params: BTreeMap::new(),
            signing_key: None,
        }
    }

    /// Creates a configuration builder for more customization.
    #[must_use]
    pub fn builder(
        slug: String,
        issuer_url: String,
        client_id: String,
        client_secret: String,
    ) -> ProviderConfigBuilder {
        ProviderConfigBuilder {
            config: Self::new(slug, issuer_url, client_id, client_secret),
        }
    }

    /// Returns the provider slug.
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Returns the OIDC issuer URL.
    #[must_use]
    pub fn issuer_url(&self) -> &str {
        &self.issuer_url
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Returns the configured callback URL, if any.
    #[must_use]
    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uri.as_deref()
    }

    /// Returns the OAuth2 scopes to request.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Returns true if PKCE should be used on the authorization code flow.
    #[must_use]
    pub fn pkce_enabled(&self) -> bool {
        !self.disable_pkce
    }

    /// Returns the discovery document override, if any.
    #[must_use]
    pub fn discovery_url(&self) -> Option<&str> {
        self.discovery_url.as_deref()
    }

    /// Returns the extra authorize-request parameters.
    #[must_use]
    pub fn url_params(&self) -> &BTreeMap<String, String> {
        &self.url_params
    }

    /// Returns the client assertion signing key, if any.
    #[must_use]
    pub fn signing_key(&self) -> Option<&ClientSigningKey> {
        self.signing_key.as_ref()
    }

    /// Checks the fields that can be validated without contacting the provider.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidField` naming the first bad field.
    pub fn validate(&self) -> Result<(), Report<ConfigurationError>> {
        if self.slug.is_empty() {
            return Err(invalid_field("slug", "must not be empty").into());
        }
        if !self
            .slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(invalid_field(
                "slug",
                &format!(
                    "'{}' may only contain lowercase letters, digits, '-' and '_'",
                    self.slug
                ),
            )
            .into());
        }
        if !(self.issuer_url.starts_with("https://") || self.issuer_url.starts_with("http://")) {
            return Err(invalid_field(
                "issuer_url",
                &format!("'{}' is not an http(s) URL", self.issuer_url),
            )
            .into());
        }
        if self.client_id.is_empty() {
            return Err(invalid_field("client_id", "must not be empty").into());
        }
        if self.scopes.iter().any(|s| s.trim().is_empty() || s.contains(' ')) {
            return Err(invalid_field("scopes", "scopes must be single non-empty tokens").into());
        }
        Ok(())
    }
}

fn invalid_field(field: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("slug", &self.slug)
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("disable_pkce", &self.disable_pkce)
            .field("discovery_url", &self.discovery_url)
            .field("url_params", &self.url_params)
            .field("signing_key", &self.signing_key)
            .finish_non_exhaustive()
    }
}

/// Builder for `ProviderConfig`.
#[derive(Debug)]
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
}

impl ProviderConfigBuilder {
    /// Sets a fixed callback URL.
    #[must_use]
    pub fn redirect_uri(mut self, redirect_uri: String) -> Self {
        self.config.redirect_uri = Some(redirect_uri);
        self
    }

    /// Sets the OAuth2 scopes to request.
    #[must_use]
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.config.scopes = scopes;
        self
    }

    /// Adds a scope to the list of scopes to request.
    #[must_use]
    pub fn add_scope(mut self, scope: String) -> Self {
        if !self.config.scopes.contains(&scope) {
            self.config.scopes.push(scope);
        }
        self
    }

    /// Turns PKCE off.
    #[must_use]
    pub fn disable_pkce(mut self) -> Self {
        self.config.disable_pkce = true;
        self
    }

    /// Overrides the discovery document location.
    #[must_use]
    pub fn discovery_url(mut self, url: String) -> Self {
        self.config.discovery_url = Some(url);
        self
    }

    /// Adds an extra authorize-request parameter.
    #[must_use]
    pub fn url_param(mut self, key: String, value: String) -> Self {
        self.config.url_params.insert(key, value);
        self
    }

    /// Sets the client assertion signing key.
    #[must_use]
    pub fn signing_key(mut self, key: ClientSigningKey) -> Self {
        self.config.signing_key = Some(key);
        self
    }

    /// Builds the `ProviderConfig`.
    #[must_use]
    pub fn build(self) -> ProviderConfig {
        self.config
    }
}
