//! Session extractor for Axum.

use super::AppState;
use super::session::ACCESS_COOKIE;
use crate::error::GatewayError;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use portcullis_identity::SessionClaims;

/// Extractor for requiring a valid access token.
///
/// The token is read from an `Authorization: Bearer` header, falling back to
/// the access token cookie. Refresh tokens are refused.
pub struct RequireSession(pub SessionClaims);

impl<S> FromRequestParts<S> for RequireSession
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let token = match bearer_token(parts) {
            Some(token) => token,
            None => CookieJar::from_headers(&parts.headers)
                .get(ACCESS_COOKIE)
                .map(|cookie| cookie.value().to_string())
                .ok_or_else(|| GatewayError::Unauthenticated {
                    details: "no access token presented".to_string(),
                })?,
        };

        let claims =
            app_state
                .tokens
                .verify_access(&token)
                .map_err(|e| GatewayError::Unauthenticated {
                    details: e.to_string(),
                })?;

        Ok(RequireSession(claims))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
