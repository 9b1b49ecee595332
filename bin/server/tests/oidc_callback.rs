//! Code exchange and ID token verification against a local identity provider.

mod common;

use axum::http::StatusCode;
use axum_extra::extract::cookie::Key;
use axum_test::{TestResponse, TestServer};
use common::{
    CountingStore, FakeIdp, IdTokenGrant, host_header, query_values, server, spawn_idp, tokens,
};
use portcullis_identity::ProviderConfig;
use portcullis_server::auth::oidc::http_client;
use portcullis_server::auth::{AppState, CookieSettings, ProviderRegistry};
use std::sync::Arc;
use std::time::Duration;

const LOGIN: &str = "/api/auth/providers/oidc/corp/login";
const CALLBACK: &str = "/api/auth/providers/oidc/corp/callback";

struct Harness {
    idp: FakeIdp,
    server: TestServer,
    users: Arc<CountingStore>,
}

async fn harness() -> Harness {
    let idp = spawn_idp().await;
    let config = ProviderConfig::new(
        "corp".to_string(),
        idp.issuer.clone(),
        "gateway".to_string(),
        "shh".to_string(),
    );
    let http = http_client(Duration::from_secs(5)).expect("http client");
    let registry = ProviderRegistry::discover(vec![config], http)
        .await
        .expect("discovery");
    let users = Arc::new(CountingStore::default());
    let server = server(AppState::new(
        registry,
        tokens(),
        users.clone(),
        CookieSettings {
            secure: false,
            transient_ttl: chrono::Duration::minutes(10),
        },
        Key::generate(),
    ));
    Harness { idp, server, users }
}

/// A login started against the provider, with the values it sent upstream.
struct Login {
    response: TestResponse,
    state: String,
    nonce: String,
}

async fn login(server: &TestServer) -> Login {
    let (name, value) = host_header();
    let response = server.get(LOGIN).add_header(name, value).await;
    response.assert_status(StatusCode::SEE_OTHER);
    let location = response.header("location");
    let location = location.to_str().expect("location");
    let state = query_values(location, "state").pop().expect("state");
    let nonce = query_values(location, "nonce").pop().expect("nonce");
    Login {
        response,
        state,
        nonce,
    }
}

async fn callback(server: &TestServer, login: &Login, code: &str) -> TestResponse {
    let (name, value) = host_header();
    let mut request = server
        .get(&format!("{CALLBACK}?code={code}&state={}", login.state))
        .add_header(name, value);
    for cookie in login.response.cookies().iter() {
        request = request.add_cookie(cookie.clone());
    }
    request.await
}

async fn assert_rejected(h: &Harness, response: &TestResponse) {
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.maybe_cookie("access_token").is_none());
    assert!(response.maybe_cookie("refresh_token").is_none());
    assert_eq!(h.users.upserts(), 0);
    assert!(h.users.user("alice").await.is_none());
}

#[tokio::test]
async fn verified_id_token_issues_session() {
    let h = harness().await;
    let login = login(&h.server).await;
    h.idp.grant_code("good-code", IdTokenGrant::new(&login.nonce));

    let response = callback(&h.server, &login, "good-code").await;

    response.assert_status(StatusCode::SEE_OTHER);
    let access = response.cookie("access_token");
    assert_eq!(
        tokens().verify_access(access.value()).expect("access").login(),
        "alice"
    );
    let user = h.users.user("alice").await.expect("user stored");
    assert_eq!(user.profile().display_name.as_deref(), Some("Alice Liddell"));
    let context = user.last_authenticated_by().expect("provider context");
    assert_eq!(context.issuer, h.idp.issuer);
    assert_eq!(context.subject, "alice-subject");

    let requests = h.idp.token_requests();
    assert_eq!(requests.len(), 1);
    let form = &requests[0];
    assert_eq!(form["grant_type"], "authorization_code");
    assert_eq!(form["code"], "good-code");
    assert!(!form["code_verifier"].is_empty());
}

#[tokio::test]
async fn id_token_from_another_issuer_is_rejected() {
    let h = harness().await;
    let login = login(&h.server).await;
    let mut grant = IdTokenGrant::new(&login.nonce);
    grant.issuer = Some("https://somebody-else.example.com".to_string());
    h.idp.grant_code("code", grant);

    let response = callback(&h.server, &login, "code").await;

    assert_rejected(&h, &response).await;
}

#[tokio::test]
async fn id_token_with_another_nonce_is_rejected() {
    let h = harness().await;
    let login = login(&h.server).await;
    h.idp.grant_code("code", IdTokenGrant::new("replayed-nonce"));

    let response = callback(&h.server, &login, "code").await;

    assert_rejected(&h, &response).await;
}

#[tokio::test]
async fn expired_id_token_is_rejected() {
    let h = harness().await;
    let login = login(&h.server).await;
    let mut grant = IdTokenGrant::new(&login.nonce);
    grant.expires_in = -3600;
    h.idp.grant_code("code", grant);

    let response = callback(&h.server, &login, "code").await;

    assert_rejected(&h, &response).await;
}

#[tokio::test]
async fn id_token_for_another_client_is_rejected() {
    let h = harness().await;
    let login = login(&h.server).await;
    let mut grant = IdTokenGrant::new(&login.nonce);
    grant.audience = "someone-else".to_string();
    h.idp.grant_code("code", grant);

    let response = callback(&h.server, &login, "code").await;

    assert_rejected(&h, &response).await;
}

#[tokio::test]
async fn unknown_code_is_rejected_by_provider() {
    let h = harness().await;
    let login = login(&h.server).await;

    let response = callback(&h.server, &login, "never-granted").await;

    assert_rejected(&h, &response).await;
    assert_eq!(h.idp.token_requests().len(), 1);
}
