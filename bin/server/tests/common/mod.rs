//! Shared fixtures for the gateway HTTP tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use axum_extra::extract::cookie::Key;
use axum_test::TestServer;
use openidconnect::url::Url;
use portcullis_identity::{
    IdentityClaims, InMemoryUserStore, ProviderConfig, StoreError, TokenService, UserRecord,
    UserStore,
};
use portcullis_server::app;
use portcullis_server::auth::oidc::{
    AuthorizeRequest, CodeExchange, DeviceCodeResponse, GatewayProviderMetadata, ProviderError,
    ProviderReply, RelyingParty,
};
use portcullis_server::auth::{AppState, CookieSettings, Provider, ProviderRegistry};
use rootcause::prelude::Report;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const JWT_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
pub const ISSUER: &str = "https://idp.example.com";
pub const GATEWAY_HOST: &str = "gw.example.com";

pub fn tokens() -> TokenService {
    TokenService::new(
        JWT_SECRET,
        chrono::Duration::minutes(15),
        chrono::Duration::hours(24),
    )
    .expect("token service")
}

pub fn corp_config() -> ProviderConfig {
    ProviderConfig::new(
        "corp".to_string(),
        ISSUER.to_string(),
        "gateway".to_string(),
        "shh".to_string(),
    )
}

/// Builds application state over the given providers.
pub fn app_state(providers: Vec<Provider>, users: Arc<dyn UserStore>) -> AppState {
    AppState::new(
        ProviderRegistry::from_providers(providers).expect("registry"),
        tokens(),
        users,
        CookieSettings {
            secure: false,
            transient_ttl: chrono::Duration::minutes(10),
        },
        Key::generate(),
    )
}

pub fn server(state: AppState) -> TestServer {
    TestServer::new(app::router(state)).expect("create test server")
}

pub fn host_header() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("host"),
        HeaderValue::from_static(GATEWAY_HOST),
    )
}

/// Discovery document for an issuer, with every endpoint under it.
pub fn discovery_document(issuer: &str) -> serde_json::Value {
    json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "device_authorization_endpoint": format!("{issuer}/device"),
        "jwks_uri": format!("{issuer}/jwks"),
        "response_types_supported": ["code"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
    })
}

pub fn metadata(issuer: &str) -> GatewayProviderMetadata {
    serde_json::from_value(discovery_document(issuer)).expect("metadata")
}

pub fn query_values(url: &str, name: &str) -> Vec<String> {
    Url::parse(url)
        .expect("absolute url")
        .query_pairs()
        .filter(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .collect()
}

/// What the stub saw in a code exchange.
#[derive(Debug, Clone)]
pub struct SeenExchange {
    pub code: String,
    pub redirect_uri: String,
    pub pkce_verifier: Option<String>,
    pub nonce: String,
}

/// Relying party that answers from memory.
pub struct StubRelyingParty {
    claims: Result<IdentityClaims, ProviderError>,
    pub exchanges: AtomicUsize,
    pub last_exchange: Mutex<Option<SeenExchange>>,
}

impl StubRelyingParty {
    pub fn returning(claims: IdentityClaims) -> Arc<Self> {
        Arc::new(Self {
            claims: Ok(claims),
            exchanges: AtomicUsize::new(0),
            last_exchange: Mutex::new(None),
        })
    }

    pub fn failing(error: ProviderError) -> Arc<Self> {
        Arc::new(Self {
            claims: Err(error),
            exchanges: AtomicUsize::new(0),
            last_exchange: Mutex::new(None),
        })
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Option<SeenExchange> {
        self.last_exchange.lock().expect("lock").clone()
    }
}

#[async_trait]
impl RelyingParty for StubRelyingParty {
    fn authorize_url(&self, request: AuthorizeRequest) -> Result<Url, Report<ProviderError>> {
        let mut params = vec![
            ("state", request.state.secret().clone()),
            ("nonce", request.nonce.secret().clone()),
            ("redirect_uri", request.redirect_uri),
        ];
        if let Some(challenge) = request.pkce_challenge {
            params.push(("code_challenge", challenge.as_str().to_string()));
        }
        Ok(Url::parse_with_params(&format!("{ISSUER}/authorize"), params).expect("url"))
    }

    async fn exchange_code(
        &self,
        exchange: CodeExchange,
    ) -> Result<IdentityClaims, Report<ProviderError>> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        *self.last_exchange.lock().expect("lock") = Some(SeenExchange {
            code: exchange.code,
            redirect_uri: exchange.redirect_uri,
            pkce_verifier: exchange.pkce_verifier.map(|v| v.secret().clone()),
            nonce: exchange.nonce.secret().clone(),
        });
        self.claims.clone().map_err(Report::from)
    }

    async fn device_authorization(&self) -> Result<DeviceCodeResponse, Report<ProviderError>> {
        Err(ProviderError::DeviceFlowUnsupported.into())
    }

    async fn device_access_token(
        &self,
        _device_code: &str,
    ) -> Result<ProviderReply, Report<ProviderError>> {
        Err(ProviderError::DeviceFlowUnsupported.into())
    }

    fn token_endpoint(&self) -> &str {
        "https://idp.example.com/token"
    }
}

/// User store that counts writes.
#[derive(Default)]
pub struct CountingStore {
    inner: InMemoryUserStore,
    upserts: AtomicUsize,
}

impl CountingStore {
    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub async fn user(&self, login: &str) -> Option<UserRecord> {
        self.inner.find(login).await.expect("find")
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl UserStore for CountingStore {
    async fn find(&self, login: &str) -> Result<Option<UserRecord>, Report<StoreError>> {
        self.inner.find(login).await
    }

    async fn upsert(&self, user: &UserRecord) -> Result<(), Report<StoreError>> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(user).await
    }
}

/// Key id the fake provider signs ID tokens with.
pub const SIGNING_KID: &str = "test-signing-key";

const SIGNING_KEY: &str =
    include_str!("../../../../lib/identity/testdata/client_assertion_key.pem");
const SIGNING_JWKS: &str =
    include_str!("../../../../lib/identity/testdata/client_assertion_jwk.json");

/// ID token the fake provider issues in exchange for one authorization code.
#[derive(Debug, Clone)]
pub struct IdTokenGrant {
    pub nonce: String,
    /// Overrides the `iss` claim; the provider's own issuer otherwise.
    pub issuer: Option<String>,
    pub audience: String,
    /// Seconds from now until `exp`; negative for an already expired token.
    pub expires_in: i64,
}

impl IdTokenGrant {
    pub fn new(nonce: &str) -> Self {
        Self {
            nonce: nonce.to_string(),
            issuer: None,
            audience: "gateway".to_string(),
            expires_in: 300,
        }
    }
}

/// Identity provider served from a local port.
pub struct FakeIdp {
    pub issuer: String,
    token_requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
    codes: Arc<Mutex<HashMap<String, IdTokenGrant>>>,
}

impl FakeIdp {
    /// Form fields of every token request received so far.
    pub fn token_requests(&self) -> Vec<HashMap<String, String>> {
        self.token_requests.lock().expect("lock").clone()
    }

    /// Makes `code` redeemable once for an ID token built from `grant`.
    pub fn grant_code(&self, code: &str, grant: IdTokenGrant) {
        self.codes
            .lock()
            .expect("lock")
            .insert(code.to_string(), grant);
    }
}

#[derive(Clone)]
struct IdpState {
    issuer: String,
    token_requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
    codes: Arc<Mutex<HashMap<String, IdTokenGrant>>>,
}

/// Device code the fake provider treats as approved.
pub const APPROVED_DEVICE_CODE: &str = "approved-device-code";

/// Body the fake provider answers for any other device code.
pub const PENDING_BODY: &str = r#"{"error":"authorization_pending","error_description":"waiting for user"}"#;

pub async fn spawn_idp() -> FakeIdp {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake idp");
    let issuer = format!("http://{}", listener.local_addr().expect("local addr"));
    let token_requests = Arc::new(Mutex::new(Vec::new()));
    let codes = Arc::new(Mutex::new(HashMap::new()));

    let state = IdpState {
        issuer: issuer.clone(),
        token_requests: token_requests.clone(),
        codes: codes.clone(),
    };
    let router = Router::new()
        .route("/.well-known/openid-configuration", get(well_known))
        .route("/custom/discovery", get(well_known))
        .route("/foreign/discovery", get(foreign_discovery))
        .route(
            "/jwks",
            get(|| async { ([("content-type", "application/json")], SIGNING_JWKS) }),
        )
        .route("/device", post(device_authorization))
        .route("/token", post(token))
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("fake idp");
    });

    FakeIdp {
        issuer,
        token_requests,
        codes,
    }
}

async fn well_known(State(state): State<IdpState>) -> Json<serde_json::Value> {
    Json(discovery_document(&state.issuer))
}

async fn foreign_discovery(State(state): State<IdpState>) -> Json<serde_json::Value> {
    let mut doc = discovery_document(&state.issuer);
    doc["issuer"] = json!("https://somebody-else.example.com");
    Json(doc)
}

async fn device_authorization(State(state): State<IdpState>) -> Json<serde_json::Value> {
    Json(json!({
        "device_code": "device-code-123",
        "user_code": "ABCD-EFGH",
        "verification_uri": format!("{}/activate", state.issuer),
        "expires_in": 600,
        "interval": 5,
    }))
}

fn sign_id_token(issuer: &str, grant: &IdTokenGrant) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = json!({
        "iss": grant.issuer.as_deref().unwrap_or(issuer),
        "sub": "alice-subject",
        "aud": grant.audience,
        "iat": now,
        "exp": now + grant.expires_in,
        "nonce": grant.nonce,
        "email": "alice@example.com",
        "name": "Alice Liddell",
    });
    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = Some(SIGNING_KID.to_string());
    let key =
        jsonwebtoken::EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).expect("signing key");
    jsonwebtoken::encode(&header, &claims, &key).expect("sign id token")
}

fn json_reply(
    status: StatusCode,
    body: String,
) -> (StatusCode, [(&'static str, &'static str); 1], String) {
    (status, [("content-type", "application/json")], body)
}

async fn token(
    State(state): State<IdpState>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, [(&'static str, &'static str); 1], String) {
    if form.get("grant_type").map(String::as_str) == Some("authorization_code") {
        let grant = form
            .get("code")
            .and_then(|code| state.codes.lock().expect("lock").remove(code));
        state.token_requests.lock().expect("lock").push(form);
        return match grant {
            Some(grant) => json_reply(
                StatusCode::OK,
                json!({
                    "access_token": "idp-access-token",
                    "token_type": "Bearer",
                    "expires_in": 3600,
                    "id_token": sign_id_token(&state.issuer, &grant),
                })
                .to_string(),
            ),
            None => json_reply(
                StatusCode::BAD_REQUEST,
                json!({ "error": "invalid_grant" }).to_string(),
            ),
        };
    }

    let approved = form.get("device_code").map(String::as_str) == Some(APPROVED_DEVICE_CODE);
    state.token_requests.lock().expect("lock").push(form);

    if approved {
        let body = json!({
            "access_token": "idp-access-token",
            "refresh_token": "idp-refresh-token",
            "token_type": "Bearer",
            "expires_in": 3600,
        });
        (
            StatusCode::OK,
            [("content-type", "application/json")],
            body.to_string(),
        )
    } else {
        (
            StatusCode::BAD_REQUEST,
            [("content-type", "application/json")],
            PENDING_BODY.to_string(),
        )
    }
}
