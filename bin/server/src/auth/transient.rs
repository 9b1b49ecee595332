//! Short-lived cookies carrying one login attempt.
//!
//! The state cookie holds the anti-forgery state, the ID token nonce and the
//! post-login target; the PKCE cookie holds the code verifier. Both are
//! encrypted with the process cookie key, scoped to the provider's route
//! prefix and expire after the transient TTL. The callback clears them,
//! so each attempt can complete at most once.

use super::{CookieSettings, provider_path};
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::Utc;
use portcullis_identity::AuthKind;
use serde::{Deserialize, Serialize};
use time::Duration as TimeDuration;

/// State cookie name.
pub const STATE_COOKIE: &str = "auth_state";

/// PKCE verifier cookie name.
pub const PKCE_COOKIE: &str = "auth_pkce";

/// What the gateway remembers between redirect and callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowState {
    /// Provider the attempt was started for.
    pub slug: String,
    /// Anti-forgery state echoed back by the provider.
    pub state: String,
    /// Nonce expected in the ID token.
    pub nonce: String,
    /// Where to send the browser after login.
    #[serde(default)]
    pub target: Option<String>,
    /// When the attempt started (seconds since the epoch).
    pub issued_at: i64,
}

impl FlowState {
    /// Starts a new attempt now.
    #[must_use]
    pub fn new(slug: String, state: String, nonce: String, target: Option<String>) -> Self {
        Self {
            slug,
            state,
            nonce,
            target,
            issued_at: Utc::now().timestamp(),
        }
    }

    /// Returns true once the attempt is older than the TTL.
    #[must_use]
    pub fn is_expired(&self, ttl: chrono::Duration) -> bool {
        Utc::now().timestamp() - self.issued_at > ttl.num_seconds()
    }
}

/// Adds the cookies for a new attempt, replacing any earlier attempt.
pub fn store(
    jar: PrivateCookieJar,
    settings: &CookieSettings,
    kind: AuthKind,
    flow: &FlowState,
    pkce_verifier: Option<&str>,
) -> Result<PrivateCookieJar, serde_json::Error> {
    let path = provider_path(kind, &flow.slug);
    let jar = jar.add(transient_cookie(
        STATE_COOKIE,
        serde_json::to_string(flow)?,
        &path,
        settings,
    ));
    Ok(match pkce_verifier {
        Some(verifier) => jar.add(transient_cookie(
            PKCE_COOKIE,
            verifier.to_string(),
            &path,
            settings,
        )),
        None => jar.remove(Cookie::build((PKCE_COOKIE, "")).path(path)),
    })
}

/// Reads the attempt back. `None` if the state cookie is missing, was
/// tampered with, or does not parse.
#[must_use]
pub fn load(jar: &PrivateCookieJar) -> Option<(FlowState, Option<String>)> {
    let flow = jar
        .get(STATE_COOKIE)
        .and_then(|cookie| serde_json::from_str(cookie.value()).ok())?;
    let verifier = jar.get(PKCE_COOKIE).map(|cookie| cookie.value().to_string());
    Some((flow, verifier))
}

/// Removes both cookies of an attempt.
#[must_use]
pub fn clear(jar: PrivateCookieJar, kind: AuthKind, slug: &str) -> PrivateCookieJar {
    let path = provider_path(kind, slug);
    jar.remove(Cookie::build((STATE_COOKIE, "")).path(path.clone()))
        .remove(Cookie::build((PKCE_COOKIE, "")).path(path))
}

fn transient_cookie(
    name: &'static str,
    value: String,
    path: &str,
    settings: &CookieSettings,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .path(path.to_string())
        .http_only(true)
        .secure(settings.secure)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::seconds(settings.transient_ttl.num_seconds()))
        .build()
}
