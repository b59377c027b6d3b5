mod support;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use chrono::TimeDelta;
use credential_relay::router::relay_router;
use credential_relay::types::{Provider, TokenGrant};
use serde_json::{Value, json};
use support::{FakeProvider, Harness};
use tower::ServiceExt;

const KEY: &str = "pwd";

fn app(h: &Harness) -> Router {
    relay_router(h.state(KEY))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("failed to build request")
}

fn keyed_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-relay-key", KEY)
        .body(Body::empty())
        .expect("failed to build request")
}

fn post_json(uri: &str, body: Value, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("authorization", format!("Bearer {key}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("failed to build request")
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.expect("request failed");
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response body was not json")
    };
    (status, body)
}

#[tokio::test]
async fn health_is_open() {
    let h = Harness::new(FakeProvider::new(Provider::Zoom)).await;

    let (status, body) = send(&app(&h), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn authorize_returns_consent_url_with_state() {
    let h = Harness::new(FakeProvider::new(Provider::Zoom)).await;

    let (status, body) = send(&app(&h), get("/auth/zoom/authorize/u-1")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["provider"], "zoom");
    assert_eq!(body["user_id"], "u-1");
    assert!(body["auth_url"].as_str().unwrap().contains("state=u-1"));
}

#[tokio::test]
async fn unknown_or_disabled_providers_are_rejected() {
    let h = Harness::new(FakeProvider::new(Provider::Zoom)).await;
    let app = app(&h);

    let (status, _) = send(&app, get("/auth/myspace/authorize/u-1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, get("/auth/google/authorize/u-1")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "provider_disabled");
}

#[tokio::test]
async fn callback_without_code_is_bad_request() {
    let h = Harness::new(FakeProvider::new(Provider::Asana)).await;

    let (status, body) = send(&app(&h), get("/auth/asana/callback?state=u1")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
    assert_eq!(h.fake.exchanges(), 0);
}

#[tokio::test]
async fn callback_connects_the_account() {
    let fake = FakeProvider::new(Provider::Asana)
        .with_email("dev@acme.io")
        .with_exchange(Ok(TokenGrant::new("A1")
            .with_refresh_token("R1")
            .with_expires_in(TimeDelta::seconds(3600))));
    let h = Harness::new(fake).await;

    let (status, body) = send(&app(&h), get("/auth/asana/callback?code=abc&state=u1")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], "u1");
    assert_eq!(body["provider"], "asana");
    assert_eq!(body["provider_account_email"], "dev@acme.io");
    assert!(body.get("access_token").is_none());
    assert!(h.store.get("u1", Provider::Asana).await.unwrap().is_some());
}

#[tokio::test]
async fn integrations_require_the_relay_key() {
    let h = Harness::new(FakeProvider::new(Provider::Google)).await;
    h.seed("u1", "A1", Some("R1"), Some(TimeDelta::seconds(3600))).await;
    let app = app(&h);

    let (status, _) = send(&app, get("/integrations/u1")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, keyed_get("/integrations/u1")).await;
    assert_eq!(status, StatusCode::OK);
    let integrations = body["integrations"].as_array().unwrap();
    assert_eq!(integrations.len(), 1);
    assert_eq!(integrations[0]["provider"], "google");
    assert_eq!(integrations[0]["has_refresh_token"], true);
    assert!(!body.to_string().contains("A1"));
}

#[tokio::test]
async fn action_relays_the_provider_json() {
    let fake = FakeProvider::new(Provider::Asana)
        .with_status(200, r#"{"data":{"gid":"7","name":"Write docs"}}"#);
    let h = Harness::new(fake).await;
    h.seed("u1", "A1", Some("R1"), Some(TimeDelta::seconds(3600))).await;

    let (status, body) = send(
        &app(&h),
        post_json(
            "/actions/asana/u1",
            json!({ "action": "get_task", "task_id": "7" }),
            Some(KEY),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Write docs");
    assert_eq!(h.fake.sends(), 1);
}

#[tokio::test]
async fn action_errors_carry_the_reauthorize_hint() {
    let h = Harness::new(FakeProvider::new(Provider::Zoom)).await;
    h.seed("u1", "A1", None, Some(TimeDelta::zero())).await;

    let (status, body) = send(
        &app(&h),
        post_json(
            "/actions/zoom/u1",
            json!({ "action": "list_meetings" }),
            Some(KEY),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["provider"], "zoom");
    assert_eq!(body["error"]["reauthorize"], true);
}

#[tokio::test]
async fn webhook_always_acknowledges_and_stores_valid_chunks() {
    let h = Harness::new(FakeProvider::new(Provider::Zoom)).await;
    let app = app(&h);

    let (status, _) = send(&app, keyed_get("/transcripts/bot-1/u1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let malformed = Request::builder()
        .method("POST")
        .uri("/webhooks/transcripts")
        .body(Body::from("not json"))
        .expect("failed to build request");
    let (status, body) = send(&app, malformed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let hook = json!({
        "data": { "bot_id": "bot-1", "text": "hello there", "metadata": { "user_id": "u1" } }
    });
    let (status, _) = send(&app, post_json("/webhooks/transcripts", hook, None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, keyed_get("/transcripts/bot-1/u1")).await;
    assert_eq!(status, StatusCode::OK);
    let chunks = body["transcripts"].as_array().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0]["transcript_text"], "hello there");
}
