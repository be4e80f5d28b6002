// Admission control through the full router
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};

use quizzer_api::config::AdmissionFailureMode;

mod common;
use common::{test_config, TestApp};

async fn anonymous_get(app: &TestApp, uri: &str, ip: &str) -> common::TestResponse {
    app.send(
        Request::builder()
            .method("GET")
            .uri(uri)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn hundred_requests_admitted_then_blocked_until_block_ends() {
    let app = TestApp::new();

    for i in 0..100 {
        let response = app.get("/api/v1/quiz/all", Some("student-1")).await;
        assert_eq!(response.status, StatusCode::OK, "request {} was refused", i + 1);
    }

    let refused = app.get("/api/v1/quiz/all", Some("student-1")).await;
    assert_eq!(refused.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(refused.body["kind"], "rate_conflict");
    assert_eq!(refused.headers.get(header::RETRY_AFTER).unwrap(), "300");

    // The window has emptied but the block is still in force.
    app.clock.advance(chrono::Duration::seconds(90));
    let still_blocked = app.get("/api/v1/quiz/all", Some("student-1")).await;
    assert_eq!(still_blocked.status, StatusCode::TOO_MANY_REQUESTS);

    app.clock.advance(chrono::Duration::seconds(211));
    let resumed = app.get("/api/v1/quiz/all", Some("student-1")).await;
    assert_eq!(resumed.status, StatusCode::OK);
}

#[tokio::test]
async fn identities_are_counted_separately() {
    let mut config = test_config();
    config.admission.max_requests = 2;
    let app = TestApp::with_config(config);

    for _ in 0..2 {
        assert_eq!(
            app.get("/api/v1/quiz/all", Some("alice")).await.status,
            StatusCode::OK
        );
    }
    assert_eq!(
        app.get("/api/v1/quiz/all", Some("alice")).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        app.get("/api/v1/quiz/all", Some("bob")).await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn anonymous_callers_are_keyed_by_address_and_still_need_a_token() {
    let mut config = test_config();
    config.admission.max_requests = 1;
    let app = TestApp::with_config(config);

    let first = anonymous_get(&app, "/api/v1/quiz/all", "10.0.0.1").await;
    assert_eq!(first.status, StatusCode::UNAUTHORIZED);
    assert_eq!(first.body["kind"], "unauthorized");

    let second = anonymous_get(&app, "/api/v1/quiz/all", "10.0.0.1").await;
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);

    let other_address = anonymous_get(&app, "/api/v1/quiz/all", "10.0.0.2").await;
    assert_eq!(other_address.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unreachable_counter_store_fails_open_by_default() {
    let app = TestApp::new();
    app.cache.set_unavailable(true);

    let response = app.get("/api/v1/quiz/all", Some("student-1")).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn fail_closed_mode_refuses_when_store_is_unreachable() {
    let mut config = test_config();
    config.admission.failure_mode = AdmissionFailureMode::Closed;
    let app = TestApp::with_config(config);
    app.cache.set_unavailable(true);

    let response = app.get("/api/v1/quiz/all", Some("student-1")).await;
    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.body["kind"], "rate_conflict");
}

#[tokio::test]
async fn disabled_admission_lets_everything_through() {
    let mut config = test_config();
    config.admission.enabled = false;
    config.admission.max_requests = 1;
    let app = TestApp::with_config(config);

    for _ in 0..5 {
        assert_eq!(
            app.get("/api/v1/quiz/all", Some("student-1")).await.status,
            StatusCode::OK
        );
    }
}
