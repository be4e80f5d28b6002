// Liveness probe and the protected metrics endpoint
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use base64::Engine;
use serial_test::serial;

mod common;
use common::TestApp;

#[tokio::test]
async fn health_reports_dependencies() {
    let app = TestApp::new();

    let response = app.get("/health", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
}

#[tokio::test]
async fn health_degrades_when_cache_is_down() {
    let app = TestApp::new();
    app.cache.set_unavailable(true);

    let response = app.get("/health", None).await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body["status"], "degraded");
}

#[tokio::test]
async fn health_degrades_when_store_is_down() {
    let app = TestApp::new();
    app.store.set_unavailable(true);

    let response = app.get("/health", None).await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
#[serial]
async fn metrics_require_basic_auth() {
    std::env::set_var("METRICS_AUTH", "ops:secret");
    let app = TestApp::new();

    let anonymous = app.get("/metrics", None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let wrong = app
        .send(
            Request::builder()
                .uri("/metrics")
                .header(
                    header::AUTHORIZATION,
                    format!(
                        "Basic {}",
                        base64::engine::general_purpose::STANDARD.encode("ops:wrong")
                    ),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    // Produce at least one sample for the exposition.
    app.create_scenario_quiz("student-1").await;

    let authorized = app
        .send(
            Request::builder()
                .uri("/metrics")
                .header(
                    header::AUTHORIZATION,
                    format!(
                        "Basic {}",
                        base64::engine::general_purpose::STANDARD.encode("ops:secret")
                    ),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(authorized.status, StatusCode::OK);
    let text = authorized.body.as_str().unwrap();
    assert!(text.contains("http_requests_total"));
    assert!(text.contains("generation_calls_total"));

    std::env::remove_var("METRICS_AUTH");
}
