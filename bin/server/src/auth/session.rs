//! Session cookies and the refresh, logout and session routes.

use super::middleware::RequireSession;
use super::{AppState, CookieSettings};
use crate::error::GatewayError;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Redirect};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use portcullis_identity::{IssuedToken, TokenService};
use serde::{Deserialize, Serialize};
use time::Duration as TimeDuration;
use tracing::{debug, instrument};

/// Access token cookie name.
pub const ACCESS_COOKIE: &str = "access_token";

/// Refresh token cookie name.
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Mints a session for a login and adds both cookies to the jar.
///
/// Both tokens are signed before the jar is touched, so on error the
/// response carries neither.
///
/// # Errors
///
/// Returns `GatewayError::TokenIssuance` if either token cannot be signed.
pub fn issue_session(
    tokens: &TokenService,
    jar: CookieJar,
    settings: &CookieSettings,
    login: &str,
) -> Result<CookieJar, GatewayError> {
    let pair = tokens
        .issue_session(login)
        .map_err(|e| GatewayError::TokenIssuance {
            details: e.to_string(),
        })?;

    Ok(jar
        .add(session_cookie(ACCESS_COOKIE, pair.access(), settings))
        .add(session_cookie(REFRESH_COOKIE, pair.refresh(), settings)))
}

fn session_cookie(
    name: &'static str,
    token: &IssuedToken,
    settings: &CookieSettings,
) -> Cookie<'static> {
    Cookie::build((name, token.token().to_string()))
        .path("/")
        .http_only(true)
        .secure(settings.secure)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::seconds(token.ttl().num_seconds()))
        .build()
}

/// Body of a refresh request.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    refresh_token: String,
}

/// A freshly minted access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

/// Trades a refresh token for a new access token.
///
/// The refresh token is read from a JSON body, or from the refresh cookie
/// when the body is empty. No identity provider is contacted.
#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let refresh_token = if body.is_empty() {
        jar.get(REFRESH_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .ok_or_else(|| GatewayError::Unauthenticated {
                details: "no refresh token presented".to_string(),
            })?
    } else {
        serde_json::from_slice::<RefreshRequest>(&body)
            .map_err(|e| GatewayError::MalformedRequest {
                details: format!("invalid refresh request: {e}"),
            })?
            .refresh_token
    };

    let access = state
        .tokens
        .refresh(&refresh_token)
        .map_err(|e| GatewayError::Unauthenticated {
            details: e.to_string(),
        })?;
    debug!("refreshed access token");

    let response = AccessTokenResponse {
        access_token: access.token().to_string(),
        token_type: "Bearer".to_string(),
        expires_at: access.expires_at(),
    };
    let jar = jar.add(session_cookie(ACCESS_COOKIE, &access, &state.cookies));
    Ok((jar, Json(response)))
}

/// Logs out by clearing both session cookies.
pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    let remove_access = Cookie::build((ACCESS_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO);
    let remove_refresh = Cookie::build((REFRESH_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO);

    (jar.add(remove_access).add(remove_refresh), Redirect::to("/"))
}

/// The session behind the presented access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    pub login: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Describes the caller's session.
pub async fn current_session(RequireSession(claims): RequireSession) -> Json<SessionInfo> {
    Json(SessionInfo {
        expires_at: claims.expires_at(),
        login: claims.sub,
    })
}
