//! Browser login: the authorize redirect and the provider callback.

use super::oidc::{AuthorizeRequest, CodeExchange};
use super::registry::Provider;
use super::transient::{self, FlowState};
use super::{AppState, provider_path, session};
use crate::error::GatewayError;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::http::header::HOST;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::{CookieJar, PrivateCookieJar};
use openidconnect::{CsrfToken, Nonce, PkceCodeChallenge, PkceCodeVerifier};
use portcullis_identity::{OidcUserInfo, sync_user};
use serde::Deserialize;
use tracing::{info, instrument};

/// Header set by reverse proxies to the original request scheme.
const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Query parameters for the login redirect.
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    /// Relative path to land on after login.
    redirect_uri: Option<String>,
}

/// Query parameters for the OIDC callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    /// Relative path to land on after login; overrides the one given at
    /// login time.
    redirect_uri: Option<String>,
    /// Set by the provider when the user aborted or the request was refused.
    error: Option<String>,
    error_description: Option<String>,
}

/// Initiates the OIDC login flow by redirecting to the identity provider.
#[instrument(skip_all, fields(provider = %slug))]
pub async fn login(
    State(state): State<AppState>,
    Path((kind, slug)): Path<(String, String)>,
    Query(query): Query<LoginQuery>,
    headers: HeaderMap,
    jar: PrivateCookieJar,
) -> Result<impl IntoResponse, GatewayError> {
    let provider = state.provider(&kind, &slug)?;
    let redirect_uri = redirect_uri_for(&provider, &headers)?;

    let csrf = CsrfToken::new_random();
    let nonce = Nonce::new_random();
    let (challenge, verifier) = if provider.config().pkce_enabled() {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        (Some(challenge), Some(verifier))
    } else {
        (None, None)
    };

    let flow = FlowState::new(
        slug.clone(),
        csrf.secret().clone(),
        nonce.secret().clone(),
        query.redirect_uri.as_deref().and_then(safe_target),
    );

    let auth_url = provider
        .relying_party()
        .authorize_url(AuthorizeRequest {
            redirect_uri,
            state: csrf,
            nonce,
            pkce_challenge: challenge,
        })
        .map_err(|e| GatewayError::MalformedRequest {
            details: e.to_string(),
        })?;

    let jar = transient::store(
        jar,
        &state.cookies,
        provider.kind(),
        &flow,
        verifier.as_ref().map(|v| v.secret().as_str()),
    )
    .map_err(|e| GatewayError::MalformedRequest {
        details: format!("failed to encode login state: {e}"),
    })?;

    Ok((jar, Redirect::to(auth_url.as_str())))
}

/// Handles the OIDC callback after the user authenticates with the identity provider.
///
/// A callback that does not match the attempt in the state cookie is
/// rejected before anything else happens. Any later failure also discards
/// the attempt.
#[instrument(skip_all, fields(provider = %slug))]
pub async fn callback(
    State(state): State<AppState>,
    Path((kind, slug)): Path<(String, String)>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
    private_jar: PrivateCookieJar,
    jar: CookieJar,
) -> Response {
    let provider = match state.provider(&kind, &slug) {
        Ok(provider) => provider,
        Err(e) => return e.into_response(),
    };

    let Some((flow, verifier)) = transient::load(&private_jar) else {
        return untrusted(&slug, "no login in progress").into_response();
    };
    if query.state.as_deref() != Some(flow.state.as_str()) {
        return untrusted(&slug, "state does not match").into_response();
    }

    let private_jar = transient::clear(private_jar, provider.kind(), &slug);
    match complete_login(&state, &provider, query, flow, verifier, &headers, jar).await {
        Ok((jar, redirect)) => (private_jar, jar, redirect).into_response(),
        Err(e) => (private_jar, e).into_response(),
    }
}

async fn complete_login(
    state: &AppState,
    provider: &Provider,
    query: CallbackQuery,
    flow: FlowState,
    verifier: Option<String>,
    headers: &HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), GatewayError> {
    if flow.slug != provider.slug() {
        return Err(untrusted(provider.slug(), "login was started for another provider"));
    }
    if flow.is_expired(state.cookies.transient_ttl) {
        return Err(untrusted(provider.slug(), "login attempt expired"));
    }
    if let Some(error) = query.error {
        let description = query.error_description.unwrap_or_default();
        return Err(untrusted(
            provider.slug(),
            &format!("provider returned {error}: {description}"),
        ));
    }
    let code = query
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| GatewayError::MalformedRequest {
            details: "callback has no code".to_string(),
        })?;

    let claims = provider
        .relying_party()
        .exchange_code(CodeExchange {
            code,
            redirect_uri: redirect_uri_for(provider, headers)?,
            pkce_verifier: verifier.map(PkceCodeVerifier::new),
            nonce: Nonce::new(flow.nonce),
        })
        .await
        .map_err(|e| GatewayError::Provider {
            provider: provider.slug().to_string(),
            details: e.to_string(),
        })?;

    let identity = OidcUserInfo::new(claims, provider.issuer());
    let user = sync_user(state.users.as_ref(), &identity)
        .await
        .map_err(|e| GatewayError::Persistence {
            provider: provider.slug().to_string(),
            details: e.to_string(),
        })?;

    let jar = session::issue_session(&state.tokens, jar, &state.cookies, user.login())?;

    let target = query
        .redirect_uri
        .as_deref()
        .and_then(safe_target)
        .or(flow.target)
        .unwrap_or_else(|| "/".to_string());

    info!(login = %user.login(), "login completed");
    Ok((jar, Redirect::to(&target)))
}

fn untrusted(slug: &str, details: &str) -> GatewayError {
    GatewayError::UntrustedCallback {
        provider: slug.to_string(),
        details: details.to_string(),
    }
}

/// Returns the configured callback URL, or derives one from the request.
fn redirect_uri_for(provider: &Provider, headers: &HeaderMap) -> Result<String, GatewayError> {
    if let Some(uri) = provider.config().redirect_uri() {
        return Ok(uri.to_string());
    }

    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| GatewayError::MalformedRequest {
            details: "no Host header to derive the callback URL from".to_string(),
        })?;
    let scheme = headers
        .get(FORWARDED_PROTO)
        .and_then(|h| h.to_str().ok())
        .filter(|proto| matches!(*proto, "http" | "https"))
        .unwrap_or("http");

    Ok(format!(
        "{scheme}://{host}{}/callback",
        provider_path(provider.kind(), provider.slug())
    ))
}

/// Accepts only same-site relative paths as post-login targets.
///
/// Targets are printable ASCII without spaces. Browsers strip tabs and
/// newlines from a `Location`, so `/\t/host` would be followed as `//host`.
fn safe_target(target: &str) -> Option<String> {
    let printable = target.bytes().all(|b| b.is_ascii_graphic());
    let is_relative =
        target.starts_with('/') && !target.starts_with("//") && !target.contains('\\');
    (printable && is_relative).then(|| target.to_string())
}
