//! Handler error type for the gateway routes.
//!
//! Every failure in a handler becomes a [`GatewayError`]. Its response is an
//! opaque plain-text body; the detail is only ever logged, together with the
//! provider slug when there is one.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;

/// Errors surfaced by gateway handlers.
#[derive(Debug)]
pub enum GatewayError {
    /// No provider of this kind and slug is configured.
    UnknownProvider { kind: String, slug: String },
    /// The request is missing a field or carries a malformed one.
    MalformedRequest { details: String },
    /// The callback did not come from a login this browser started, or the
    /// provider reported that the login was aborted.
    UntrustedCallback { provider: String, details: String },
    /// An outbound call to the provider failed or timed out.
    Provider { provider: String, details: String },
    /// The device authorization request failed.
    DeviceAuthorization { provider: String, details: String },
    /// The user store failed.
    Persistence { provider: String, details: String },
    /// Session tokens could not be signed.
    TokenIssuance { details: String },
    /// A session token was missing or did not verify.
    Unauthenticated { details: String },
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProvider { kind, slug } => {
                write!(f, "no {kind} provider named '{slug}'")
            }
            Self::MalformedRequest { details } => write!(f, "malformed request: {details}"),
            Self::UntrustedCallback { provider, details } => {
                write!(f, "untrusted callback for provider '{provider}': {details}")
            }
            Self::Provider { provider, details } => {
                write!(f, "provider '{provider}' request failed: {details}")
            }
            Self::DeviceAuthorization { provider, details } => {
                write!(
                    f,
                    "device authorization with provider '{provider}' failed: {details}"
                )
            }
            Self::Persistence { provider, details } => {
                write!(f, "user sync after '{provider}' login failed: {details}")
            }
            Self::TokenIssuance { details } => write!(f, "session issuance failed: {details}"),
            Self::Unauthenticated { details } => write!(f, "not authenticated: {details}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// Returns the HTTP status this error maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownProvider { .. } => StatusCode::NOT_FOUND,
            Self::MalformedRequest { .. } | Self::UntrustedCallback { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::Provider { .. }
            | Self::DeviceAuthorization { .. }
            | Self::Persistence { .. }
            | Self::TokenIssuance { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            Self::UnknownProvider { .. } => "Unknown identity provider",
            Self::MalformedRequest { .. } => "Malformed request",
            Self::UntrustedCallback { .. } => "Invalid login callback",
            Self::Provider { .. } => "Authentication failed",
            Self::DeviceAuthorization { .. } => "Failed to send device authorization request",
            Self::Persistence { .. } | Self::TokenIssuance { .. } => "Internal server error",
            Self::Unauthenticated { .. } => "Not authenticated",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            Self::UnknownProvider { kind, slug } => {
                tracing::debug!(kind = %kind, provider = %slug, "unknown provider requested");
            }
            Self::MalformedRequest { details } => {
                tracing::debug!(details = %details, "malformed request");
            }
            Self::UntrustedCallback { provider, details } => {
                tracing::warn!(provider = %provider, details = %details, "rejected login callback");
            }
            Self::Provider { provider, details }
            | Self::DeviceAuthorization { provider, details } => {
                tracing::error!(provider = %provider, error = %details, "identity provider request failed");
            }
            Self::Persistence { provider, details } => {
                tracing::error!(provider = %provider, error = %details, "user sync failed");
            }
            Self::TokenIssuance { details } => {
                tracing::error!(error = %details, "session token issuance failed");
            }
            Self::Unauthenticated { details } => {
                tracing::debug!(details = %details, "unauthenticated request");
            }
        }

        (self.status(), self.public_message()).into_response()
    }
}
