//! Non-inference routes and router-wide middleware.

mod common;

use axum::http::StatusCode;
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;

#[tokio::test]
async fn test_health_endpoints() {
    let gw = gateway(config("http://127.0.0.1:9")).await;

    let resp = get(&gw.router, "/healthz").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&body_bytes(resp).await[..], b"ok");

    let (status, body) = body_json(get(&gw.router, "/api/health").await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "service": "claude-gateway"}));
}

#[tokio::test]
async fn test_models_listed_without_auth() {
    let mut cfg = config("http://127.0.0.1:9");
    cfg.api_key = Some("gw-secret".into());
    let gw = gateway(cfg).await;

    let (status, body) = body_json(get(&gw.router, "/v1/models").await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec!["claude-sonnet-4-5-thinking", "claude-opus-4-5-thinking", "claude-haiku-4-5-20251001"]
    );
}

#[tokio::test]
async fn test_security_and_request_id_headers() {
    let gw = gateway(config("http://127.0.0.1:9")).await;
    let resp = get(&gw.router, "/healthz").await;
    let headers = resp.headers();

    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["cache-control"], "no-store");
    assert!(!headers["x-request-id"].is_empty());
}

#[tokio::test]
async fn test_cookie_and_bearer_auth_accepted() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_message("m", "ok", 1, 1)))
        .expect(2)
        .mount(&upstream)
        .await;

    let mut cfg = config(&upstream.uri());
    cfg.api_key = Some("gw-secret".into());
    let gw = gateway(cfg).await;
    let body = json!({"model": "m", "max_tokens": 8, "messages": [{"role": "user", "content": "hi"}]});

    let resp = post(&gw.router, "/v1/messages", &body, &[("cookie", "auth_token=gw-secret")]).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = post(&gw.router, "/v1/messages", &body, &[("authorization", "Bearer gw-secret")]).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_reflect_requests() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_message("m", "ok", 2, 3)))
        .mount(&upstream)
        .await;

    let gw = gateway(config(&upstream.uri())).await;
    let body = json!({"model": "claude-metrics", "max_tokens": 8, "messages": [{"role": "user", "content": "hi"}]});
    assert_eq!(post(&gw.router, "/v1/messages", &body, &[]).await.status(), StatusCode::OK);
    gw.logs.settled().await;

    let resp = get(&gw.router, "/metrics").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(resp).await.to_vec()).unwrap();
    assert!(text.contains(r#"gateway_requests_total{is_streaming="false",model="claude-metrics",status="success"} 1"#));
    assert!(text.contains(r#"gateway_tokens_total{model="claude-metrics",type="output"} 3"#));
    assert!(text.contains(r#"gateway_channel_attempts_total{channel_id="0",outcome="success"} 1"#));
}
