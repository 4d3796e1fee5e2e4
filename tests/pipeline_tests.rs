//! Integration tests for the authenticated request pipeline
//!
//! Every test runs against a wiremock server. Call counts are enforced with
//! `.expect(n)`, which wiremock verifies when the server is dropped.

use lms_api_client::classify::default_message;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use lms_api_client::{
    ApiClient, ApiError, ClientConfig, FileTokenStore, MemoryTokenStore, RequestDescriptor,
    StoredSession, TokenStore,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const REFRESH_PATH: &str = "/auth/refresh/";

// ============================================================================
// Helpers
// ============================================================================

/// Records every login route the client navigates to
#[derive(Clone, Default)]
struct Redirects(Arc<Mutex<Vec<String>>>);

impl Redirects {
    fn routes(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct Harness {
    server: MockServer,
    store: Arc<MemoryTokenStore>,
    redirects: Redirects,
    client: ApiClient,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn harness(store: MemoryTokenStore) -> Harness {
    init_tracing();
    let server = MockServer::start().await;
    let store = Arc::new(store);
    let redirects = Redirects::default();

    let sink = redirects.clone();
    let client = ApiClient::builder()
        .config(ClientConfig::builder().base_url(server.uri()).build())
        .store(store.clone())
        .on_session_expired(move |route: &str| sink.0.lock().unwrap().push(route.to_string()))
        .build()
        .expect("client builds");

    Harness {
        server,
        store,
        redirects,
        client,
    }
}

fn authorization_of(request: &Request) -> Option<String> {
    request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn mount_refresh(
    server: &MockServer,
    refresh_token: &str,
    response: ResponseTemplate,
    times: u64,
) {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({ "refresh_token": refresh_token })))
        .respond_with(response)
        .expect(times)
        .mount(server)
        .await;
}

async fn mount_authed(
    server: &MockServer,
    verb: &str,
    route: &str,
    token: &str,
    response: ResponseTemplate,
    times: u64,
) {
    Mock::given(method(verb))
        .and(path(route))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(response)
        .expect(times)
        .mount(server)
        .await;
}

#[derive(Debug, Deserialize, PartialEq)]
struct Quiz {
    id: u64,
    title: String,
}

// ============================================================================
// Headers
// ============================================================================

#[tokio::test]
async fn bearer_header_is_exact() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    let me = ResponseTemplate::new(200).set_body_json(json!({"id": 1}));
    mount_authed(&h.server, "GET", "/me/", "T1", me, 1).await;

    let me: serde_json::Value = h.client.get("/me/").await.unwrap();
    assert_eq!(me, json!({"id": 1}));

    let requests = h.server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(authorization_of(&requests[0]).as_deref(), Some("Bearer T1"));
    assert_eq!(
        requests[0].headers.get("content-type").unwrap(),
        "application/json"
    );
}

#[tokio::test]
async fn no_token_means_no_header() {
    let h = harness(MemoryTokenStore::new()).await;
    Mock::given(method("GET"))
        .and(path("/public/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&h.server)
        .await;

    let items: Vec<serde_json::Value> = h.client.get("/public/").await.unwrap();
    assert!(items.is_empty());

    let requests = h.server.received_requests().await.unwrap();
    assert!(authorization_of(&requests[0]).is_none());
}

#[tokio::test]
async fn skip_auth_sends_no_header_and_classifies_401() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    Mock::given(method("POST"))
        .and(path("/auth/login/"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Bad credentials"})),
        )
        .expect(1)
        .mount(&h.server)
        .await;
    mount_refresh(&h.server, "R1", ResponseTemplate::new(200), 0).await;

    let request = RequestDescriptor::post("/auth/login/")
        .body(json!({"username": "ada", "password": "wrong"}))
        .skip_auth();
    let err = h.client.execute::<serde_json::Value>(request).await.unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert!(!err.is_auth_expired());
    assert_eq!(err.to_string(), "Bad credentials");

    let requests = h.server.received_requests().await.unwrap();
    assert!(authorization_of(&requests[0]).is_none());
    assert!(h.redirects.routes().is_empty());
    assert_eq!(h.store.access_token().as_deref(), Some("T1"));
}

#[tokio::test]
async fn caller_authorization_header_never_leaks() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    for route in ["/x", "/y"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&h.server)
            .await;
    }
    let caller = HeaderValue::from_static("Bearer CALLER");

    let authed = RequestDescriptor::get("/x").header(AUTHORIZATION, caller.clone());
    h.client.execute::<serde_json::Value>(authed).await.unwrap();
    let anonymous = RequestDescriptor::get("/y")
        .header(AUTHORIZATION, caller)
        .skip_auth();
    h.client.execute::<serde_json::Value>(anonymous).await.unwrap();

    let requests = h.server.received_requests().await.unwrap();
    let values = |route: &str| -> Vec<String> {
        let request = requests.iter().find(|r| r.url.path() == route).unwrap();
        request
            .headers
            .get_all("authorization")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    };
    assert_eq!(values("/x"), vec!["Bearer T1".to_string()]);
    assert!(values("/y").is_empty());
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    mount_authed(&h.server, "GET", "/quizzes/42/", "T1", ResponseTemplate::new(401), 1).await;
    let refreshed = ResponseTemplate::new(200).set_body_json(json!({"access_token": "T2"}));
    mount_refresh(&h.server, "R1", refreshed, 1).await;
    mount_authed(
        &h.server,
        "GET",
        "/quizzes/42/",
        "T2",
        ResponseTemplate::new(200).set_body_json(json!({"id": 42, "title": "Fractions"})),
        1,
    )
    .await;

    let quiz: Quiz = h.client.get("/quizzes/42/").await.unwrap();

    assert_eq!(
        quiz,
        Quiz {
            id: 42,
            title: "Fractions".to_string()
        }
    );
    assert_eq!(h.store.access_token().as_deref(), Some("T2"));
    // no rotation: the old refresh token stays
    assert_eq!(h.store.refresh_token().as_deref(), Some("R1"));
    assert!(h.redirects.routes().is_empty());

    let requests = h.server.received_requests().await.unwrap();
    let refresh = requests
        .iter()
        .find(|r| r.url.path() == REFRESH_PATH)
        .expect("refresh call");
    assert!(authorization_of(refresh).is_none());
}

#[tokio::test]
async fn refresh_rotates_refresh_token() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    mount_authed(&h.server, "GET", "/tasks/", "T1", ResponseTemplate::new(401), 1).await;
    mount_refresh(
        &h.server,
        "R1",
        ResponseTemplate::new(200)
            .set_body_json(json!({"access_token": "T2", "refresh_token": "R2"})),
        1,
    )
    .await;
    let tasks = ResponseTemplate::new(200).set_body_json(json!([]));
    mount_authed(&h.server, "GET", "/tasks/", "T2", tasks, 1).await;

    let tasks: Vec<serde_json::Value> = h.client.get("/tasks/").await.unwrap();

    assert!(tasks.is_empty());
    assert_eq!(h.store.access_token().as_deref(), Some("T2"));
    assert_eq!(h.store.refresh_token().as_deref(), Some("R2"));
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    for route in ["/a", "/b"] {
        mount_authed(&h.server, "GET", route, "T1", ResponseTemplate::new(401), 1).await;
        mount_authed(
            &h.server,
            "GET",
            route,
            "T2",
            ResponseTemplate::new(200).set_body_json(json!({ "route": route })),
            1,
        )
        .await;
    }
    // slow refresh so the second 401 lands while the first refresh is in flight
    mount_refresh(
        &h.server,
        "R1",
        ResponseTemplate::new(200)
            .set_body_json(json!({"access_token": "T2"}))
            .set_delay(Duration::from_millis(200)),
        1,
    )
    .await;

    let (a, b) = tokio::join!(
        h.client.get::<serde_json::Value>("/a"),
        h.client.get::<serde_json::Value>("/b"),
    );

    assert_eq!(a.unwrap(), json!({"route": "/a"}));
    assert_eq!(b.unwrap(), json!({"route": "/b"}));
    assert_eq!(h.client.refresh_coordinator().exchange_count(), 1);
}

#[tokio::test]
async fn many_concurrent_callers_across_clones_refresh_once() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    Mock::given(method("GET"))
        .and(path("/departments/"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(8)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/departments/"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 3}])))
        .expect(8)
        .mount(&h.server)
        .await;
    mount_refresh(
        &h.server,
        "R1",
        ResponseTemplate::new(200)
            .set_body_json(json!({"access_token": "T2"}))
            .set_delay(Duration::from_millis(200)),
        1,
    )
    .await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = h.client.clone();
            tokio::spawn(async move { client.get::<serde_json::Value>("/departments/").await })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap().unwrap(), json!([{"id": 3}]));
    }
    assert_eq!(h.client.refresh_coordinator().exchange_count(), 1);
}

#[tokio::test]
async fn late_401_after_refresh_retries_without_refreshing_again() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    mount_authed(&h.server, "GET", "/a", "T1", ResponseTemplate::new(401), 1).await;
    // rejected well after the refresh for /a has landed
    let slow_401 = ResponseTemplate::new(401).set_delay(Duration::from_millis(300));
    mount_authed(&h.server, "GET", "/b", "T1", slow_401, 1).await;
    for route in ["/a", "/b"] {
        let ok = ResponseTemplate::new(200).set_body_json(json!({ "route": route }));
        mount_authed(&h.server, "GET", route, "T2", ok, 1).await;
    }
    let refreshed = ResponseTemplate::new(200).set_body_json(json!({"access_token": "T2"}));
    mount_refresh(&h.server, "R1", refreshed, 1).await;

    let (a, b) = tokio::join!(
        h.client.get::<serde_json::Value>("/a"),
        h.client.get::<serde_json::Value>("/b"),
    );

    assert_eq!(a.unwrap(), json!({"route": "/a"}));
    assert_eq!(b.unwrap(), json!({"route": "/b"}));
    assert_eq!(h.client.refresh_coordinator().exchange_count(), 1);
    assert!(h.redirects.routes().is_empty());
}

#[tokio::test]
async fn second_401_after_refresh_is_auth_expired() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    mount_authed(&h.server, "GET", "/spot-checks/", "T1", ResponseTemplate::new(401), 1).await;
    let refreshed = ResponseTemplate::new(200).set_body_json(json!({"access_token": "T2"}));
    mount_refresh(&h.server, "R1", refreshed, 1).await;
    mount_authed(&h.server, "GET", "/spot-checks/", "T2", ResponseTemplate::new(401), 1).await;

    let err = h.client.get::<serde_json::Value>("/spot-checks/").await.unwrap_err();

    assert!(err.is_auth_expired());
    assert_eq!(h.client.refresh_coordinator().exchange_count(), 1);
}

// ============================================================================
// Refresh failure
// ============================================================================

#[tokio::test]
async fn rejected_refresh_clears_tokens_and_redirects() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    h.store.set_active_role("admin").unwrap();
    h.store.set_user(json!({"username": "ada"})).unwrap();
    // never retried
    mount_authed(&h.server, "GET", "/quizzes/", "T1", ResponseTemplate::new(401), 1).await;
    mount_refresh(
        &h.server,
        "R1",
        ResponseTemplate::new(401).set_body_json(json!({"detail": "Token is blacklisted"})),
        1,
    )
    .await;

    let err = h.client.get::<serde_json::Value>("/quizzes/").await.unwrap_err();

    assert!(err.is_auth_expired());
    assert_eq!(h.redirects.routes(), vec!["/login".to_string()]);
    assert_eq!(h.store.snapshot(), StoredSession::default());
}

#[tokio::test]
async fn refresh_server_error_is_treated_like_rejection() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    mount_authed(&h.server, "GET", "/users/", "T1", ResponseTemplate::new(401), 1).await;
    mount_refresh(&h.server, "R1", ResponseTemplate::new(503), 1).await;

    let err = h.client.get::<serde_json::Value>("/users/").await.unwrap_err();

    assert!(err.is_auth_expired());
    assert_eq!(h.redirects.routes().len(), 1);
    assert!(h.store.access_token().is_none());
}

#[tokio::test]
async fn unreachable_refresh_endpoint_fails_refresh() {
    init_tracing();
    let server = MockServer::start().await;
    let store = Arc::new(MemoryTokenStore::with_tokens("T1", "R1"));
    let redirects = Redirects::default();
    let sink = redirects.clone();

    // nothing listens on port 1
    let client = ApiClient::builder()
        .config(
            ClientConfig::builder()
                .base_url(server.uri())
                .refresh_path("http://127.0.0.1:1/auth/refresh/")
                .login_route("/sign-in")
                .build(),
        )
        .store(store.clone())
        .on_session_expired(move |route: &str| sink.0.lock().unwrap().push(route.to_string()))
        .build()
        .unwrap();
    mount_authed(&server, "GET", "/tasks/", "T1", ResponseTemplate::new(401), 1).await;

    let err = client.get::<serde_json::Value>("/tasks/").await.unwrap_err();

    assert!(err.is_auth_expired());
    assert_eq!(redirects.routes(), vec!["/sign-in".to_string()]);
    assert!(store.refresh_token().is_none());
}

#[tokio::test]
async fn missing_refresh_token_skips_refresh_call() {
    let store = MemoryTokenStore::new();
    store.set_access_token("T1").unwrap();
    let h = harness(store).await;
    mount_authed(&h.server, "DELETE", "/tasks/7/", "T1", ResponseTemplate::new(401), 1).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let err = h.client.delete("/tasks/7/").await.unwrap_err();

    assert!(err.is_auth_expired());
    assert_eq!(h.client.refresh_coordinator().exchange_count(), 0);
    assert!(h.store.access_token().is_none());
    assert_eq!(h.redirects.routes(), vec!["/login".to_string()]);
}

#[tokio::test]
async fn concurrent_callers_share_a_failed_refresh() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    for route in ["/a", "/b"] {
        mount_authed(&h.server, "GET", route, "T1", ResponseTemplate::new(401), 1).await;
    }
    mount_refresh(
        &h.server,
        "R1",
        ResponseTemplate::new(400).set_delay(Duration::from_millis(200)),
        1,
    )
    .await;

    let (a, b) = tokio::join!(
        h.client.get::<serde_json::Value>("/a"),
        h.client.get::<serde_json::Value>("/b"),
    );

    assert!(a.unwrap_err().is_auth_expired());
    assert!(b.unwrap_err().is_auth_expired());
    // one failed refresh, one redirect
    assert_eq!(h.redirects.routes().len(), 1);
}

#[tokio::test]
async fn late_401_after_failed_refresh_expires_session_once() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    mount_authed(&h.server, "GET", "/a", "T1", ResponseTemplate::new(401), 1).await;
    // rejected after the refresh for /a has already failed
    let slow_401 = ResponseTemplate::new(401).set_delay(Duration::from_millis(300));
    mount_authed(&h.server, "GET", "/b", "T1", slow_401, 1).await;
    mount_refresh(&h.server, "R1", ResponseTemplate::new(400), 1).await;

    let (a, b) = tokio::join!(
        h.client.get::<serde_json::Value>("/a"),
        h.client.get::<serde_json::Value>("/b"),
    );

    assert!(a.unwrap_err().is_auth_expired());
    assert!(b.unwrap_err().is_auth_expired());
    assert_eq!(h.redirects.routes(), vec!["/login".to_string()]);
    assert_eq!(h.client.refresh_coordinator().exchange_count(), 1);
}

// ============================================================================
// Response handling
// ============================================================================

#[tokio::test]
async fn no_content_resolves_to_none() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    mount_authed(&h.server, "DELETE", "/quizzes/9/", "T1", ResponseTemplate::new(204), 2).await;

    let body = h
        .client
        .execute::<serde_json::Value>(RequestDescriptor::delete("/quizzes/9/"))
        .await
        .unwrap();
    assert!(body.is_none());

    h.client.delete("/quizzes/9/").await.unwrap();
}

#[tokio::test]
async fn fallback_messages_follow_status_table() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    mount_authed(
        &h.server,
        "GET",
        "/quizzes/404/",
        "T1",
        ResponseTemplate::new(404).set_body_string("<html><body>Not Found</body></html>"),
        1,
    )
    .await;
    mount_authed(&h.server, "GET", "/quizzes/", "T1", ResponseTemplate::new(429), 1).await;

    let err = h.client.get::<serde_json::Value>("/quizzes/404/").await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), default_message(404));

    let err = h.client.get::<serde_json::Value>("/quizzes/").await.unwrap_err();
    assert_eq!(err.status(), Some(429));
    assert_eq!(err.user_message(), default_message(429));
}

#[tokio::test]
async fn json_error_body_supplies_message_and_code() -> anyhow::Result<()> {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    mount_authed(
        &h.server,
        "POST",
        "/quizzes/",
        "T1",
        ResponseTemplate::new(422).set_body_json(json!({
            "message": "Quiz needs at least one question",
            "code": "empty_quiz"
        })),
        1,
    )
    .await;

    let err = h
        .client
        .post::<_, serde_json::Value>("/quizzes/", &json!({"title": "Empty"}))
        .await
        .unwrap_err();

    match err {
        ApiError::Api { status, code, message } => {
            assert_eq!(status, 422);
            assert_eq!(code.as_deref(), Some("empty_quiz"));
            assert_eq!(message, "Quiz needs at least one question");
        }
        other => anyhow::bail!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn server_errors_are_not_retried_by_the_pipeline() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    mount_authed(&h.server, "GET", "/dashboard/", "T1", ResponseTemplate::new(500), 1).await;

    let err = h.client.get::<serde_json::Value>("/dashboard/").await.unwrap_err();
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn invalid_success_body_is_a_decode_error() {
    let h = harness(MemoryTokenStore::with_tokens("T1", "R1")).await;
    mount_authed(
        &h.server,
        "GET",
        "/quizzes/1/",
        "T1",
        ResponseTemplate::new(200).set_body_string("definitely not json"),
        1,
    )
    .await;

    let err = h.client.get::<Quiz>("/quizzes/1/").await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let config = ClientConfig::builder().base_url("http://127.0.0.1:1").build();
    let client = ApiClient::new(config).unwrap();

    let err = client.get::<serde_json::Value>("/quizzes/").await.unwrap_err();

    assert!(err.is_network());
    assert_eq!(err.status(), None);
    assert!(err.user_message().contains("Network error"));
}

// ============================================================================
// Login / logout
// ============================================================================

#[tokio::test]
async fn login_persists_tokens_and_user() {
    let h = harness(MemoryTokenStore::new()).await;
    Mock::given(method("POST"))
        .and(path("/auth/login/"))
        .and(body_json(json!({"username": "ada", "password": "hunter2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "T1",
            "refresh_token": "R1",
            "user": {"id": 5, "username": "ada", "roles": ["student", "admin"]}
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let login = h
        .client
        .login(&json!({"username": "ada", "password": "hunter2"}))
        .await
        .unwrap();

    assert_eq!(login.access_token, "T1");
    assert!(h.client.is_authenticated());
    assert_eq!(h.store.refresh_token().as_deref(), Some("R1"));
    assert_eq!(h.client.current_user().unwrap()["username"], "ada");

    let requests = h.server.received_requests().await.unwrap();
    assert!(authorization_of(&requests[0]).is_none());

    h.client.logout().unwrap();
    assert!(!h.client.is_authenticated());
    assert!(h.client.current_user().is_none());
}

#[tokio::test]
async fn refreshed_tokens_reach_the_file_store() {
    init_tracing();
    let temp_dir = tempfile::TempDir::new().unwrap();
    let session_path = temp_dir.path().join("session.json");
    let store = Arc::new(FileTokenStore::with_path(session_path.clone()));
    store.set_access_token("T1").unwrap();
    store.set_refresh_token("R1").unwrap();

    let server = MockServer::start().await;
    let client = ApiClient::builder()
        .config(ClientConfig::builder().base_url(server.uri()).build())
        .store(store)
        .build()
        .unwrap();

    mount_authed(&server, "GET", "/me/", "T1", ResponseTemplate::new(401), 1).await;
    mount_refresh(
        &server,
        "R1",
        ResponseTemplate::new(200).set_body_json(json!({"access": "T2", "refresh": "R2"})),
        1,
    )
    .await;
    let me = ResponseTemplate::new(200).set_body_json(json!({"id": 5}));
    mount_authed(&server, "GET", "/me/", "T2", me, 1).await;

    let me: serde_json::Value = client.get("/me/").await.unwrap();
    assert_eq!(me["id"], 5);

    let reopened = FileTokenStore::with_path(session_path);
    assert_eq!(reopened.access_token().as_deref(), Some("T2"));
    assert_eq!(reopened.refresh_token().as_deref(), Some("R2"));
}
