//! Application router and startup wiring.

use crate::auth::{self, AUTH_PATH, AppState, CookieSettings, ProviderRegistry, db::PgUserStore};
use crate::config::ServerConfig;
use axum::Router;
use portcullis_identity::{ConfigurationError, InMemoryUserStore, TokenService, UserStore};
use rootcause::prelude::Report;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest(AUTH_PATH, auth::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the application state from configuration.
///
/// Discovers every provider and, when a database is configured, connects
/// and runs migrations. Any failure here is fatal to startup.
///
/// # Errors
///
/// Returns a `ConfigurationError` describing the first problem found.
pub async fn build_state(config: ServerConfig) -> Result<AppState, Report<ConfigurationError>> {
    let cookies = CookieSettings::from_config(&config.session)?;
    let tokens = TokenService::new(
        config.session.jwt_secret.as_bytes(),
        config.session.access_token_ttl()?,
        config.session.refresh_token_ttl()?,
    )
    .map_err(|e| ConfigurationError::InvalidField {
        field: "session.jwt_secret".to_string(),
        reason: e.to_string(),
    })?;
    let cookie_key = auth::cookie_key(config.session.cookie_key.as_deref())?;

    let http = auth::oidc::http_client(Duration::from_secs(config.provider_timeout_seconds))?;
    let registry = ProviderRegistry::discover(config.providers.oidc, http).await?;
    tracing::info!(providers = registry.len(), "provider registry ready");

    let users: Arc<dyn UserStore> = match &config.database_url {
        Some(url) => Arc::new(connect_user_store(url).await?),
        None => {
            tracing::warn!("no database_url configured; users are kept in memory");
            Arc::new(InMemoryUserStore::new())
        }
    };

    Ok(AppState::new(
        registry,
        tokens,
        users,
        cookies,
        cookie_key,
    ))
}

async fn connect_user_store(url: &str) -> Result<PgUserStore, Report<ConfigurationError>> {
    let invalid = |reason: String| ConfigurationError::InvalidField {
        field: "database_url".to_string(),
        reason,
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .map_err(|e| invalid(format!("failed to connect: {e}")))?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| invalid(format!("failed to run migrations: {e}")))?;

    Ok(PgUserStore::new(pool))
}
