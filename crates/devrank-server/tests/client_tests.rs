//! Upstream client behaviour against a mock API

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use devrank_common::SubjectKey;
use devrank_server::config::GithubConfig;
use devrank_server::harvest::{BackoffPolicy, CredentialPool, GithubClient, UpstreamError};

fn policy() -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_secs(5),
        floor: Duration::from_secs(1),
        max: Duration::from_secs(3600),
    }
}

fn client(server: &MockServer, tokens: &[&str]) -> GithubClient {
    let config = GithubConfig {
        base_url: server.uri(),
        tokens: tokens.iter().map(|t| t.to_string()).collect(),
        user_agent: "devrank-tests".into(),
        request_timeout_secs: 5,
        max_exhausted_wait_secs: 0,
    };
    let pool = Arc::new(CredentialPool::new(tokens.iter().copied(), policy()));
    GithubClient::new(&config, pool).expect("client builds")
}

fn user_body(login: &str) -> serde_json::Value {
    json!({
        "login": login,
        "id": 583231,
        "followers": 40,
        "public_repos": 3,
        "location": "Berlin, Germany",
        "created_at": "2011-01-25T18:44:36Z"
    })
}

fn exhausted() -> ResponseTemplate {
    let reset = chrono::Utc::now().timestamp() + 600;
    ResponseTemplate::new(403)
        .insert_header("x-ratelimit-remaining", "0")
        .insert_header("x-ratelimit-reset", reset.to_string().as_str())
        .set_body_json(json!({ "message": "API rate limit exceeded" }))
}

fn key(login: &str) -> SubjectKey {
    SubjectKey::parse(login).unwrap()
}

#[tokio::test]
async fn test_rotates_to_next_credential_on_quota_exhaustion() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .and(header("authorization", "Bearer tok-a"))
        .respond_with(exhausted())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .and(header("authorization", "Bearer tok-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_body("octocat")))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server, &["tok-a", "tok-b"]);

    let user = client.get_user(&key("octocat")).await.unwrap();
    assert_eq!(user.followers, 40);

    // tok-a is cooling down, so the next call goes straight to tok-b
    client.get_user(&key("octocat")).await.unwrap();
    assert_eq!(client.credentials().acquire().map(|c| c.index()), Some(1));
}

#[tokio::test]
async fn test_fully_exhausted_pool_reports_quota() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(exhausted())
        .mount(&server)
        .await;

    let client = client(&server, &["tok-a"]);
    let err = client.get_user(&key("octocat")).await.unwrap_err();

    match err {
        UpstreamError::QuotaExhausted { retry_after, .. } => assert!(retry_after > Duration::ZERO),
        other => panic!("expected quota exhaustion, got {other:?}"),
    }
    assert!(client.credentials().acquire().is_none());
}

#[tokio::test]
async fn test_forbidden_without_quota_headers_is_not_rotated() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "blocked" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, &["tok-a", "tok-b"]);
    let err = client.get_user(&key("octocat")).await.unwrap_err();

    assert!(matches!(err, UpstreamError::Status { status: 403, .. }));
}

#[tokio::test]
async fn test_missing_user_is_terminal() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/ghost"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .mount(&server)
        .await;

    let client = client(&server, &["tok-a"]);
    let err = client.get_user(&key("ghost")).await.unwrap_err();

    assert!(matches!(err, UpstreamError::NotFound(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_server_errors_are_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = client(&server, &["tok-a"]);
    let err = client.get_user(&key("octocat")).await.unwrap_err();

    assert!(matches!(err, UpstreamError::Server { status: 502, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_anonymous_requests_without_tokens() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_body("octocat")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, &[]);
    let user = client.get_user(&key("octocat")).await.unwrap();
    assert_eq!(user.login, "octocat");

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_event_pagination_stops_on_422() {
    let server = MockServer::start().await;

    let push = json!({
        "type": "PushEvent",
        "created_at": "2026-10-01T10:00:00Z",
        "repo": { "name": "octocat/tool" },
        "payload": { "size": 2 }
    });

    Mock::given(method("GET"))
        .and(path("/users/octocat/events/public"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([push])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/octocat/events/public"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "message": "pagination is limited" })))
        .mount(&server)
        .await;

    let client = client(&server, &["tok-a"]);
    let events = client.list_user_events(&key("octocat"), 3).await.unwrap();

    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_repo_pagination_stops_on_short_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat/repos"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "name": "tool", "full_name": "octocat/tool", "stargazers_count": 10, "forks_count": 2 }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, &["tok-a"]);
    let repos = client.list_user_repos(&key("octocat"), 10).await.unwrap();

    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].stargazers_count, 10);
}

/// Real time throughout: a paused clock would also fire the request timeout
/// while the client waits on the mock server
fn waiting_client(server: &MockServer, policy: BackoffPolicy, max_wait: Duration) -> GithubClient {
    let config = GithubConfig {
        base_url: server.uri(),
        tokens: vec!["tok-a".to_string()],
        user_agent: "devrank-tests".into(),
        request_timeout_secs: 5,
        max_exhausted_wait_secs: 0,
    };
    let pool = Arc::new(CredentialPool::new(["tok-a"], policy));
    GithubClient::new(&config, pool)
        .expect("client builds")
        .with_max_exhausted_wait(max_wait)
}

#[tokio::test]
async fn test_waits_for_cooldown_then_retries_with_same_credential() {
    let server = MockServer::start().await;

    // No reset header, so the wait is the pool's own cooldown
    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-ratelimit-remaining", "0")
                .set_body_json(json!({ "message": "API rate limit exceeded" })),
        )
        .with_priority(1)
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_body("octocat")))
        .mount(&server)
        .await;

    let cooldown = BackoffPolicy {
        base: Duration::from_millis(200),
        floor: Duration::from_millis(200),
        max: Duration::from_secs(1),
    };
    let client = waiting_client(&server, cooldown, Duration::from_secs(5));

    let started = std::time::Instant::now();
    let user = client.get_user(&key("octocat")).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(user.login, "octocat");
    assert!(elapsed >= Duration::from_millis(200), "did not wait for the cooldown: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "waited past the cooldown: {elapsed:?}");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|r| r.headers.get("authorization").map(|v| v.as_bytes()) == Some(b"Bearer tok-a".as_slice())));
}

#[tokio::test]
async fn test_wait_is_capped_and_final_attempt_goes_anonymous() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .and(header("authorization", "Bearer tok-a"))
        .respond_with(exhausted())
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_body("octocat")))
        .mount(&server)
        .await;

    let long_cooldown = BackoffPolicy {
        base: Duration::from_secs(60),
        floor: Duration::from_secs(60),
        max: Duration::from_secs(3600),
    };
    let client = waiting_client(&server, long_cooldown, Duration::from_millis(100));

    let started = std::time::Instant::now();
    let user = client.get_user(&key("octocat")).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(user.login, "octocat");
    // The reset hint is ten minutes away; the sleep stops at the ceiling
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(5));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].headers.get("authorization").is_none());
    assert!(client.credentials().acquire().is_none());
}
