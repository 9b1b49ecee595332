//! OIDC relying party built on the openidconnect crate.
//!
//! [`RelyingParty`] is the seam between the HTTP handlers and one external
//! provider. [`OidcRelyingParty`] is the real implementation; tests swap in
//! stubs.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use openidconnect::core::{
    CoreAuthDisplay, CoreAuthenticationFlow, CoreClaimName, CoreClaimType, CoreClient,
    CoreClientAuthMethod, CoreDeviceAuthorizationResponse, CoreGrantType, CoreJsonWebKey,
    CoreJsonWebKeySet, CoreJweContentEncryptionAlgorithm, CoreJweKeyManagementAlgorithm,
    CoreResponseMode, CoreResponseType, CoreSubjectIdentifierType,
};
use openidconnect::url::Url;
use openidconnect::{
    AdditionalProviderMetadata, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    DeviceAuthorizationUrl, EndpointMaybeSet, EndpointNotSet, EndpointSet, IssuerUrl, Nonce,
    PkceCodeChallenge, PkceCodeVerifier, ProviderMetadata, RedirectUrl, Scope, TokenResponse,
    TokenUrl,
};
use portcullis_identity::{
    AssertionSigner, CLIENT_ASSERTION_TYPE, ConfigurationError, IdentityClaims, ProviderConfig,
};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Grant type of the device access token request.
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Provider metadata fields beyond the OIDC discovery core.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DeviceEndpointMetadata {
    /// Device authorization endpoint, advertised by providers that support
    /// the device flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_authorization_endpoint: Option<DeviceAuthorizationUrl>,
}

impl AdditionalProviderMetadata for DeviceEndpointMetadata {}

/// Discovery document as the gateway reads it.
pub type GatewayProviderMetadata = ProviderMetadata<
    DeviceEndpointMetadata,
    CoreAuthDisplay,
    CoreClientAuthMethod,
    CoreClaimName,
    CoreClaimType,
    CoreGrantType,
    CoreJweContentEncryptionAlgorithm,
    CoreJweKeyManagementAlgorithm,
    CoreJsonWebKey,
    CoreResponseMode,
    CoreResponseType,
    CoreSubjectIdentifierType,
>;

/// Client built from discovery: the authorize URL is always known, the token
/// and userinfo URLs only when advertised.
type DiscoveredClient = CoreClient<
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointMaybeSet,
    EndpointMaybeSet,
>;

/// Everything needed to build one authorize redirect.
pub struct AuthorizeRequest {
    /// Callback URL registered with the provider.
    pub redirect_uri: String,
    /// Anti-forgery state.
    pub state: CsrfToken,
    /// ID token replay nonce.
    pub nonce: Nonce,
    /// PKCE challenge, absent when PKCE is disabled for the provider.
    pub pkce_challenge: Option<PkceCodeChallenge>,
}

/// Everything needed to redeem an authorization code.
pub struct CodeExchange {
    pub code: String,
    /// Must match the redirect URI used in the authorize request.
    pub redirect_uri: String,
    pub pkce_verifier: Option<PkceCodeVerifier>,
    pub nonce: Nonce,
}

/// Device authorization as returned to headless clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    /// Seconds until the device code expires.
    pub expires_in: u64,
    /// Minimum seconds between token requests.
    pub interval: u64,
}

impl From<&CoreDeviceAuthorizationResponse> for DeviceCodeResponse {
    fn from(details: &CoreDeviceAuthorizationResponse) -> Self {
        Self {
            device_code: details.device_code().secret().clone(),
            user_code: details.user_code().secret().clone(),
            verification_uri: details.verification_uri().url().to_string(),
            verification_uri_complete: details
                .verification_uri_complete()
                .map(|uri| uri.secret().clone()),
            expires_in: details.expires_in().as_secs(),
            interval: details.interval().as_secs(),
        }
    }
}

/// A provider's token endpoint reply, relayed unchanged.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl IntoResponse for ProviderReply {
    fn into_response(self) -> Response {
        let content_type = self
            .content_type
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));
        (self.status, [(CONTENT_TYPE, content_type)], self.body).into_response()
    }
}

/// Failures talking to an identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The callback URL is not a valid absolute URL.
    InvalidRedirect { uri: String, reason: String },
    /// The HTTP round trip failed or timed out.
    Request { endpoint: String, reason: String },
    /// The token endpoint rejected the authorization code.
    TokenExchange { reason: String },
    /// The token response carried no ID token.
    MissingIdToken,
    /// The ID token failed verification.
    InvalidIdToken { reason: String },
    /// The provider does not advertise a device authorization endpoint.
    DeviceFlowUnsupported,
    /// The device authorization request failed.
    DeviceAuthorization { reason: String },
    /// A client assertion could not be signed.
    ClientAssertion { reason: String },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRedirect { uri, reason } => {
                write!(f, "invalid redirect URI '{uri}': {reason}")
            }
            Self::Request { endpoint, reason } => {
                write!(f, "request to {endpoint} failed: {reason}")
            }
            Self::TokenExchange { reason } => write!(f, "code exchange failed: {reason}"),
            Self::MissingIdToken => write!(f, "token response has no ID token"),
            Self::InvalidIdToken { reason } => write!(f, "ID token rejected: {reason}"),
            Self::DeviceFlowUnsupported => {
                write!(f, "provider does not advertise a device authorization endpoint")
            }
            Self::DeviceAuthorization { reason } => {
                write!(f, "device authorization failed: {reason}")
            }
            Self::ClientAssertion { reason } => {
                write!(f, "failed to sign client assertion: {reason}")
            }
        }
    }
}

impl std::error::Error for ProviderError {}

/// The operations the gateway needs from one external provider.
#[async_trait]
pub trait RelyingParty: Send + Sync {
    /// Builds the provider's authorize URL.
    fn authorize_url(&self, request: AuthorizeRequest) -> Result<Url, Report<ProviderError>>;

    /// Redeems an authorization code and returns the verified ID token
    /// claims.
    async fn exchange_code(
        &self,
        exchange: CodeExchange,
    ) -> Result<IdentityClaims, Report<ProviderError>>;

    /// Starts a device authorization.
    async fn device_authorization(&self) -> Result<DeviceCodeResponse, Report<ProviderError>>;

    /// Makes one device access token request. Whatever the provider
    /// answers, success or OAuth error, is returned as is.
    async fn device_access_token(
        &self,
        device_code: &str,
    ) -> Result<ProviderReply, Report<ProviderError>>;

    /// Returns the provider's token endpoint.
    fn token_endpoint(&self) -> &str;
}

/// Builds the HTTP client used for every outbound provider call.
///
/// # Errors
///
/// Returns a `ConfigurationError` if the TLS backend cannot be initialised.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, Report<ConfigurationError>> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|e| {
            ConfigurationError::InvalidField {
                field: "provider_timeout_seconds".to_string(),
                reason: format!("failed to create HTTP client: {e}"),
            }
            .into()
        })
}

/// Token endpoint access shared by the code and device flows.
struct TokenEndpointClient {
    token_endpoint: TokenUrl,
    assertion_signer: Option<AssertionSigner>,
}

/// A relying party for one discovered OIDC provider.
pub struct OidcRelyingParty {
    config: ProviderConfig,
    metadata: GatewayProviderMetadata,
    token: TokenEndpointClient,
    http: reqwest::Client,
}

impl OidcRelyingParty {
    /// Fetches the provider's discovery document and JWKS.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if discovery fails, the advertised
    /// issuer differs from the configured one, or a required endpoint is
    /// missing.
    pub async fn discover(
        config: ProviderConfig,
        http: reqwest::Client,
    ) -> Result<Self, Report<ConfigurationError>> {
        let issuer = IssuerUrl::new(config.issuer_url().to_string()).map_err(|e| {
            ConfigurationError::InvalidField {
                field: "issuer_url".to_string(),
                reason: e.to_string(),
            }
        })?;

        let metadata = match config.discovery_url() {
            None => GatewayProviderMetadata::discover_async(issuer, &http)
                .await
                .map_err(|e| discovery_error(&config, e))?,
            Some(url) => fetch_metadata(&config, url, &issuer, &http).await?,
        };

        Self::from_metadata(config, metadata, http)
    }

    /// Creates a relying party from already fetched metadata.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the metadata lacks a token endpoint,
    /// the configured redirect URI is malformed, or the signing key does not
    /// load.
    pub fn from_metadata(
        config: ProviderConfig,
        metadata: GatewayProviderMetadata,
        http: reqwest::Client,
    ) -> Result<Self, Report<ConfigurationError>> {
        let token_endpoint = metadata.token_endpoint().cloned().ok_or_else(|| {
            ConfigurationError::MissingEndpoint {
                provider: config.slug().to_string(),
                endpoint: "token endpoint".to_string(),
            }
        })?;

        if let Some(uri) = config.redirect_uri() {
            RedirectUrl::new(uri.to_string()).map_err(|e| ConfigurationError::InvalidField {
                field: "redirect_uri".to_string(),
                reason: e.to_string(),
            })?;
        }

        let assertion_signer = config
            .signing_key()
            .map(|key| {
                AssertionSigner::new(config.slug(), config.client_id(), config.issuer_url(), key)
            })
            .transpose()?;

        Ok(Self {
            config,
            metadata,
            token: TokenEndpointClient {
                token_endpoint,
                assertion_signer,
            },
            http,
        })
    }

    /// Returns the provider configuration.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn client(&self) -> DiscoveredClient {
        let secret = match self.config.client_secret() {
            "" => None,
            secret => Some(ClientSecret::new(secret.to_string())),
        };
        CoreClient::from_provider_metadata(
            self.metadata.clone(),
            ClientId::new(self.config.client_id().to_string()),
            secret,
        )
    }

    fn extra_scopes(&self) -> impl Iterator<Item = Scope> + '_ {
        // openidconnect always sends the openid scope itself.
        self.config
            .scopes()
            .iter()
            .filter(|scope| scope.as_str() != "openid")
            .map(|scope| Scope::new(scope.clone()))
    }
}

#[async_trait]
impl RelyingParty for OidcRelyingParty {
    fn authorize_url(&self, request: AuthorizeRequest) -> Result<Url, Report<ProviderError>> {
        let redirect = parse_redirect(&request.redirect_uri)?;
        let client = self.client().set_redirect_uri(redirect);

        let AuthorizeRequest {
            state,
            nonce,
            pkce_challenge,
            ..
        } = request;

        let mut auth_request = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                move || state,
                move || nonce,
            )
            .add_scopes(self.extra_scopes());

        if let Some(challenge) = pkce_challenge {
            auth_request = auth_request.set_pkce_challenge(challenge);
        }
        for (name, value) in self.config.url_params() {
            auth_request = auth_request.add_extra_param(name.as_str(), value.as_str());
        }

        let (url, _, _) = auth_request.url();
        Ok(url)
    }

    async fn exchange_code(
        &self,
        exchange: CodeExchange,
    ) -> Result<IdentityClaims, Report<ProviderError>> {
        let redirect = parse_redirect(&exchange.redirect_uri)?;
        let client = self.client().set_redirect_uri(redirect);

        let mut token_request = client
            .exchange_code(AuthorizationCode::new(exchange.code))
            .map_err(|e| ProviderError::TokenExchange {
                reason: e.to_string(),
            })?;
        if let Some(verifier) = exchange.pkce_verifier {
            token_request = token_request.set_pkce_verifier(verifier);
        }

        let token_response = token_request
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::TokenExchange {
                reason: e.to_string(),
            })?;

        let id_token = token_response
            .id_token()
            .ok_or(ProviderError::MissingIdToken)?;
        let claims = id_token
            .claims(&client.id_token_verifier(), &exchange.nonce)
            .map_err(|e| ProviderError::InvalidIdToken {
                reason: e.to_string(),
            })?;

        let name = claims
            .name()
            .and_then(|n| n.get(None))
            .map(|n| n.as_str().to_string())
            .or_else(|| claims.preferred_username().map(|u| u.as_str().to_string()));

        Ok(IdentityClaims::new(claims.subject().to_string())
            .with_email(claims.email().map(|e| e.as_str().to_string()))
            .with_name(name)
            .with_names(
                claims
                    .given_name()
                    .and_then(|n| n.get(None))
                    .map(|n| n.as_str().to_string()),
                claims
                    .family_name()
                    .and_then(|n| n.get(None))
                    .map(|n| n.as_str().to_string()),
            ))
    }

    async fn device_authorization(&self) -> Result<DeviceCodeResponse, Report<ProviderError>> {
        let endpoint = self
            .metadata
            .additional_metadata()
            .device_authorization_endpoint
            .clone()
            .ok_or(ProviderError::DeviceFlowUnsupported)?;

        let details: CoreDeviceAuthorizationResponse = self
            .client()
            .set_device_authorization_url(endpoint)
            .exchange_device_code()
            .add_scopes(self.extra_scopes())
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::DeviceAuthorization {
                reason: e.to_string(),
            })?;

        Ok(DeviceCodeResponse::from(&details))
    }

    async fn device_access_token(
        &self,
        device_code: &str,
    ) -> Result<ProviderReply, Report<ProviderError>> {
        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", DEVICE_CODE_GRANT_TYPE.to_string()),
            ("device_code", device_code.to_string()),
            ("client_id", self.config.client_id().to_string()),
        ];
        if !self.config.scopes().is_empty() {
            form.push(("scope", self.config.scopes().join(" ")));
        }
        match &self.token.assertion_signer {
            Some(signer) => {
                let assertion = signer.sign().map_err(|e| ProviderError::ClientAssertion {
                    reason: e.to_string(),
                })?;
                form.push(("client_assertion_type", CLIENT_ASSERTION_TYPE.to_string()));
                form.push(("client_assertion", assertion));
            }
            None if !self.config.client_secret().is_empty() => {
                form.push(("client_secret", self.config.client_secret().to_string()));
            }
            None => {}
        }

        let endpoint = self.token.token_endpoint.url().clone();
        let response = self
            .http
            .post(endpoint)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                endpoint: self.token_endpoint().to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = response.bytes().await.map_err(|e| ProviderError::Request {
            endpoint: self.token_endpoint().to_string(),
            reason: e.to_string(),
        })?;

        Ok(ProviderReply {
            status,
            content_type,
            body,
        })
    }

    fn token_endpoint(&self) -> &str {
        self.token.token_endpoint.url().as_str()
    }
}

fn parse_redirect(uri: &str) -> Result<RedirectUrl, Report<ProviderError>> {
    RedirectUrl::new(uri.to_string()).map_err(|e| {
        ProviderError::InvalidRedirect {
            uri: uri.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn discovery_error(config: &ProviderConfig, reason: impl fmt::Display) -> ConfigurationError {
    ConfigurationError::Discovery {
        provider: config.slug().to_string(),
        reason: reason.to_string(),
    }
}

/// Reads metadata and keys from a discovery document outside the issuer's
/// well-known location.
async fn fetch_metadata(
    config: &ProviderConfig,
    discovery_url: &str,
    issuer: &IssuerUrl,
    http: &reqwest::Client,
) -> Result<GatewayProviderMetadata, Report<ConfigurationError>> {
    let metadata: GatewayProviderMetadata = http
        .get(discovery_url)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| discovery_error(config, e))?
        .json()
        .await
        .map_err(|e| discovery_error(config, e))?;

    if metadata.issuer() != issuer {
        return Err(discovery_error(
            config,
            format!(
                "document at {discovery_url} advertises issuer '{}'",
                metadata.issuer().as_str()
            ),
        )
        .into());
    }

    let jwks: CoreJsonWebKeySet = http
        .get(metadata.jwks_uri().url().clone())
        .header(ACCEPT, "application/json")
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| discovery_error(config, e))?
        .json()
        .await
        .map_err(|e| discovery_error(config, e))?;

    Ok(metadata.set_jwks(jwks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(device: bool) -> GatewayProviderMetadata {
        let mut doc = serde_json::json!({
            "issuer": "https://idp.example.com",
            "authorization_endpoint": "https://idp.example.com/authorize",
            "token_endpoint": "https://idp.example.com/token",
            "jwks_uri": "https://idp.example.com/jwks",
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"],
        });
        if device {
            doc["device_authorization_endpoint"] =
                serde_json::json!("https://idp.example.com/device");
        }
        serde_json::from_value(doc).expect("metadata")
    }

    fn relying_party(config: ProviderConfig) -> OidcRelyingParty {
        let http = http_client(Duration::from_secs(5)).expect("http client");
        OidcRelyingParty::from_metadata(config, metadata(true), http).expect("relying party")
    }

    fn corp() -> ProviderConfig {
        ProviderConfig::builder(
            "corp".to_string(),
            "https://idp.example.com".to_string(),
            "gateway".to_string(),
            "shh".to_string(),
        )
        .url_param("prompt".to_string(), "login".to_string())
        .build()
    }

    fn query(url: &Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn values<'a>(pairs: &'a [(String, String)], name: &str) -> Vec<&'a str> {
        pairs
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[test]
    fn authorize_url_carries_state_challenge_and_params() {
        let rp = relying_party(corp());
        let (challenge, _verifier) = PkceCodeChallenge::new_random_sha256();
        let expected_challenge = challenge.as_str().to_string();

        let url = rp
            .authorize_url(AuthorizeRequest {
                redirect_uri: "https://gw.example.com/callback".to_string(),
                state: CsrfToken::new("state-1".to_string()),
                nonce: Nonce::new("nonce-1".to_string()),
                pkce_challenge: Some(challenge),
            })
            .expect("url");

        assert_eq!(url.host_str(), Some("idp.example.com"));
        assert_eq!(url.path(), "/authorize");
        let pairs = query(&url);
        assert_eq!(values(&pairs, "state"), ["state-1"]);
        assert_eq!(values(&pairs, "nonce"), ["nonce-1"]);
        assert_eq!(values(&pairs, "client_id"), ["gateway"]);
        assert_eq!(
            values(&pairs, "redirect_uri"),
            ["https://gw.example.com/callback"]
        );
        assert_eq!(values(&pairs, "code_challenge"), [expected_challenge.as_str()]);
        assert_eq!(values(&pairs, "code_challenge_method"), ["S256"]);
        assert_eq!(values(&pairs, "prompt"), ["login"]);
        assert_eq!(values(&pairs, "scope"), ["openid email profile"]);
    }

    #[test]
    fn authorize_url_without_pkce_has_no_challenge() {
        let rp = relying_party(corp());

        let url = rp
            .authorize_url(AuthorizeRequest {
                redirect_uri: "https://gw.example.com/callback".to_string(),
                state: CsrfToken::new("s".to_string()),
                nonce: Nonce::new("n".to_string()),
                pkce_challenge: None,
            })
            .expect("url");

        assert!(values(&query(&url), "code_challenge").is_empty());
    }

    #[test]
    fn relative_redirect_is_rejected() {
        let rp = relying_party(corp());

        let err = rp
            .authorize_url(AuthorizeRequest {
                redirect_uri: "/callback".to_string(),
                state: CsrfToken::new("s".to_string()),
                nonce: Nonce::new("n".to_string()),
                pkce_challenge: None,
            })
            .expect_err("relative redirect");

        assert!(err.to_string().contains("invalid redirect URI"));
    }

    #[test]
    fn token_endpoint_reads_through_metadata() {
        assert_eq!(
            relying_party(corp()).token_endpoint(),
            "https://idp.example.com/token"
        );
    }

    #[test]
    fn metadata_without_token_endpoint_is_rejected() {
        let doc = serde_json::json!({
            "issuer": "https://idp.example.com",
            "authorization_endpoint": "https://idp.example.com/authorize",
            "jwks_uri": "https://idp.example.com/jwks",
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"],
        });
        let metadata: GatewayProviderMetadata = serde_json::from_value(doc).expect("metadata");
        let http = http_client(Duration::from_secs(5)).expect("http client");

        let err = OidcRelyingParty::from_metadata(corp(), metadata, http)
            .err()
            .expect("missing token endpoint");

        assert!(err.to_string().contains("token endpoint"));
    }

    #[test]
    fn device_endpoint_is_optional_metadata() {
        assert!(
            metadata(false)
                .additional_metadata()
                .device_authorization_endpoint
                .is_none()
        );
        assert!(
            metadata(true)
                .additional_metadata()
                .device_authorization_endpoint
                .is_some()
        );
    }

    #[test]
    fn provider_reply_keeps_status_and_body() {
        let reply = ProviderReply {
            status: StatusCode::BAD_REQUEST,
            content_type: None,
            body: Bytes::from_static(br#"{"error":"authorization_pending"}"#),
        };

        let response = reply.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
    }
}
