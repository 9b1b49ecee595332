//! Device authorization for headless clients.
//!
//! The gateway never polls: clients poll the token route themselves at the
//! provider's interval, and every reply, pending or final, is the
//! provider's own. No session cookie is set on this path.

use super::AppState;
use super::oidc::{DeviceCodeResponse, ProviderReply};
use crate::error::GatewayError;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use serde::Deserialize;
use tracing::{debug, instrument};

/// Body of a device token request.
#[derive(Debug, Deserialize)]
pub struct DeviceTokenRequest {
    device_code: String,
}

/// Starts a device authorization with the provider.
///
/// Client credentials and scopes come from the provider configuration;
/// the request body is ignored.
#[instrument(skip_all, fields(provider = %slug))]
pub async fn device_code(
    State(state): State<AppState>,
    Path((kind, slug)): Path<(String, String)>,
) -> Result<Json<DeviceCodeResponse>, GatewayError> {
    let provider = state.provider(&kind, &slug)?;

    let details = provider
        .relying_party()
        .device_authorization()
        .await
        .map_err(|e| GatewayError::DeviceAuthorization {
            provider: slug.clone(),
            details: e.to_string(),
        })?;

    debug!(expires_in = details.expires_in, "device authorization started");
    Ok(Json(details))
}

/// Makes one token request for a device code and relays the reply.
#[instrument(skip_all, fields(provider = %slug))]
pub async fn device_token(
    State(state): State<AppState>,
    Path((kind, slug)): Path<(String, String)>,
    payload: Result<Json<DeviceTokenRequest>, JsonRejection>,
) -> Result<ProviderReply, GatewayError> {
    let provider = state.provider(&kind, &slug)?;

    let Json(request) = payload.map_err(|e| GatewayError::MalformedRequest {
        details: e.body_text(),
    })?;
    if request.device_code.trim().is_empty() {
        return Err(GatewayError::MalformedRequest {
            details: "device_code must not be empty".to_string(),
        });
    }

    let reply = provider
        .relying_party()
        .device_access_token(&request.device_code)
        .await
        .map_err(|e| GatewayError::Provider {
            provider: slug.clone(),
            details: e.to_string(),
        })?;

    debug!(status = %reply.status, "relayed device token reply");
    Ok(reply)
}
