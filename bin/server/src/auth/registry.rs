//! Registry of configured identity providers.
//!
//! Built once at startup and shared read-only by every request.

use super::oidc::{OidcRelyingParty, RelyingParty};
use portcullis_identity::{AuthKind, ConfigurationError, ProviderConfig};
use rootcause::prelude::Report;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// One configured provider and the relying party that talks to it.
pub struct Provider {
    kind: AuthKind,
    config: ProviderConfig,
    relying_party: Arc<dyn RelyingParty>,
}

impl Provider {
    /// Pairs an OIDC provider configuration with its relying party.
    pub fn oidc(config: ProviderConfig, relying_party: Arc<dyn RelyingParty>) -> Self {
        Self {
            kind: AuthKind::Oidc,
            config,
            relying_party,
        }
    }

    /// Returns the protocol family.
    #[must_use]
    pub fn kind(&self) -> AuthKind {
        self.kind
    }

    /// Returns the provider slug.
    #[must_use]
    pub fn slug(&self) -> &str {
        self.config.slug()
    }

    /// Returns the configured issuer, the only issuer identities from this
    /// provider are ever attributed to.
    #[must_use]
    pub fn issuer(&self) -> &str {
        self.config.issuer_url()
    }

    /// Returns the provider configuration.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Returns the relying party for this provider.
    #[must_use]
    pub fn relying_party(&self) -> &dyn RelyingParty {
        self.relying_party.as_ref()
    }
}

/// All configured providers, keyed by kind and slug.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<(AuthKind, String), Arc<Provider>>,
}

impl ProviderRegistry {
    /// Validates the configuration and discovers every provider.
    ///
    /// Configuration is checked in full before any network call.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigurationError` encountered; there are no
    /// retries.
    pub async fn discover(
        configs: Vec<ProviderConfig>,
        http: reqwest::Client,
    ) -> Result<Self, Report<ConfigurationError>> {
        check_configs(configs.iter())?;

        let mut providers = Vec::with_capacity(configs.len());
        for config in configs {
            info!(provider = %config.slug(), issuer = %config.issuer_url(), "discovering OIDC provider");
            let relying_party = OidcRelyingParty::discover(config.clone(), http.clone()).await?;
            providers.push(Provider::oidc(config, Arc::new(relying_party)));
        }

        Self::from_providers(providers)
    }

    /// Builds a registry from providers whose relying parties already exist.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if a configuration is invalid or two
    /// providers of one kind share a slug.
    pub fn from_providers(providers: Vec<Provider>) -> Result<Self, Report<ConfigurationError>> {
        check_configs(providers.iter().map(Provider::config))?;

        let providers = providers
            .into_iter()
            .map(|p| ((p.kind, p.slug().to_string()), Arc::new(p)))
            .collect();
        Ok(Self { providers })
    }

    /// Looks up a provider.
    #[must_use]
    pub fn get(&self, kind: AuthKind, slug: &str) -> Option<Arc<Provider>> {
        self.providers.get(&(kind, slug.to_string())).cloned()
    }

    /// Returns the number of providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no provider is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn check_configs<'a>(
    configs: impl Iterator<Item = &'a ProviderConfig>,
) -> Result<(), Report<ConfigurationError>> {
    let mut seen = HashSet::new();
    for config in configs {
        config.validate()?;
        if !seen.insert(config.slug()) {
            return Err(ConfigurationError::DuplicateSlug {
                slug: config.slug().to_string(),
            }
            .into());
        }
    }
    Ok(())
}
