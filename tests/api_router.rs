//! HTTP surface driven through `tower::ServiceExt::oneshot`.

use arena::agent::{DecisionAdapter, ProviderRegistry, RetryPolicy, ScriptedProvider};
use arena::api::{create_router, AppState};
use arena::config::AppConfig;
use arena::domain::{Agent, CompetitionMode, ProviderKind};
use arena::engine::SessionRunner;
use arena::ledger::{LedgerStore, MemoryLedger};
use arena::market::StaticQuoteResolver;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const TOKEN: &str = "trigger-secret";

async fn app() -> (Router, Arc<MemoryLedger>) {
    let ledger = Arc::new(MemoryLedger::new());
    let mut providers = ProviderRegistry::new();
    for (id, capital) in [("alpha", dec!(10000)), ("beta", dec!(12000))] {
        let agent = Agent::new(id, id, ProviderKind::Scripted, "script", capital, CompetitionMode::Baseline);
        ledger.insert_agent(&agent).await.unwrap();
        providers.insert(
            id,
            DecisionAdapter::new(
                Arc::new(ScriptedProvider::fixed(r#"{"sentiment":"neutral","actions":[]}"#)),
                RetryPolicy::none(),
                Duration::from_secs(1),
            ),
        );
    }
    let quotes = Arc::new(StaticQuoteResolver::with_prices([("AAPL", dec!(100))]));
    let runner = SessionRunner::new(
        Arc::new(AppConfig::default_config()),
        ledger.clone(),
        quotes,
        providers,
    )
    .unwrap();
    let state = AppState::new(Arc::new(runner), Some(TOKEN));
    (create_router(state), ledger)
}

fn trigger(auth: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/session")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn trigger_without_token_is_unauthorized_and_does_no_work() {
    let (app, ledger) = app().await;
    let response = app
        .oneshot(trigger(None, r#"{"force":true}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(ledger.decisions_for("alpha").await.is_empty());
}

#[tokio::test]
async fn trigger_with_wrong_token_is_unauthorized() {
    let (app, _) = app().await;
    let response = app
        .oneshot(trigger(Some("Bearer nope"), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let (app, ledger) = app().await;
    let auth = format!("Bearer {TOKEN}");
    let response = app
        .oneshot(trigger(Some(&auth), r#"{"force":"yes please"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(ledger.decisions_for("alpha").await.is_empty());
}

#[tokio::test]
async fn authorized_trigger_returns_report() {
    let (app, _) = app().await;
    let auth = format!("Bearer {TOKEN}");
    // Forced and dry so the result does not depend on the wall clock's weekday
    let response = app
        .oneshot(trigger(Some(&auth), r#"{"force":true,"dry_run":true}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report = json_body(response).await;
    assert!(report["session_id"].is_string());
    assert!(report["state"] == "completed" || report["state"] == "skipped");
    assert_eq!(report["dry_run"], true);
}

#[tokio::test]
async fn leaderboard_is_ranked() {
    let (app, _) = app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/leaderboard")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["entries"][0]["agent_id"], "beta");
    assert_eq!(body["entries"][0]["rank"], 1);
    assert_eq!(body["entries"][1]["rank"], 2);
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _) = app().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}
