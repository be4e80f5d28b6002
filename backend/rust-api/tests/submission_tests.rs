// Grading, cooldown, retries and result history
use axum::http::{header, StatusCode};
use serde_json::{json, Value};

mod common;
use common::TestApp;
use quizzer_api::utils::time::Clock;

async fn submit(app: &TestApp, user: &str, quiz_id: &Value, answers: Value) -> common::TestResponse {
    app.post(
        "/api/v1/quiz/submit",
        Some(user),
        json!({"quiz_id": quiz_id, "answers": answers}),
    )
    .await
}

#[tokio::test]
async fn submission_is_graded_per_question() {
    let app = TestApp::new();
    let quiz = app.create_scenario_quiz("student-1").await;

    let response = submit(&app, "student-1", &quiz["id"], json!([1, 2, 0])).await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);

    let body = &response.body;
    assert_eq!(body["score"], 2);
    assert_eq!(body["total"], 3);
    assert_eq!(body["percentage"], 67);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["is_correct"], true);
    assert_eq!(results[1]["is_correct"], false);
    assert_eq!(results[1]["user_answer"], 2);
    assert_eq!(results[1]["correct_answer"], 3);
    assert_eq!(results[1]["explanation"], "Two plus two is four");
    assert_eq!(results[2]["is_correct"], true);

    let submission = &body["submission"];
    assert_eq!(submission["identity"], "user:student-1");
    assert_eq!(submission["quiz_id"], quiz["id"]);
    assert_eq!(submission["is_retry"], false);
    assert_eq!(app.store.submission_count(), 1);
}

#[tokio::test]
async fn answer_count_must_match_question_count() {
    let app = TestApp::new();
    let quiz = app.create_scenario_quiz("student-1").await;

    let response = submit(&app, "student-1", &quiz["id"], json!([1, 3])).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["kind"], "validation_error");
    assert_eq!(response.body["message"], "Expected 3 answers, got 2");
    assert_eq!(app.store.submission_count(), 0);
}

#[tokio::test]
async fn unknown_quiz_is_not_found() {
    let app = TestApp::new();

    let response = submit(&app, "student-1", &json!("no-such-quiz"), json!([0])).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["kind"], "not_found");
}

#[tokio::test]
async fn second_submission_within_cooldown_is_refused() {
    let app = TestApp::new();
    let quiz = app.create_scenario_quiz("student-1").await;

    let first = submit(&app, "student-1", &quiz["id"], json!([1, 3, 0])).await;
    assert_eq!(first.status, StatusCode::CREATED);

    app.clock.advance(chrono::Duration::seconds(120));
    let second = submit(&app, "student-1", &quiz["id"], json!([1, 3, 0])).await;
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.body["kind"], "rate_conflict");
    assert!(second.headers.get(header::RETRY_AFTER).is_some());

    // Another student is not affected.
    let other = submit(&app, "student-2", &quiz["id"], json!([0, 0, 0])).await;
    assert_eq!(other.status, StatusCode::CREATED);

    app.clock.advance(chrono::Duration::seconds(181));
    let later = submit(&app, "student-1", &quiz["id"], json!([1, 3, 0])).await;
    assert_eq!(later.status, StatusCode::CREATED);
    assert_eq!(app.store.submission_count(), 3);
}

#[tokio::test]
async fn concurrent_submissions_store_exactly_one() {
    let app = TestApp::new();
    let quiz = app.create_scenario_quiz("student-1").await;

    let (a, b) = tokio::join!(
        submit(&app, "student-1", &quiz["id"], json!([1, 3, 0])),
        submit(&app, "student-1", &quiz["id"], json!([0, 0, 0])),
    );

    let mut statuses = vec![a.status.as_u16(), b.status.as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![201, 429]);
    assert_eq!(app.store.submission_count(), 1);
}

#[tokio::test]
async fn retry_copies_the_original_and_skips_cooldown() {
    let app = TestApp::new();
    let quiz = app.create_scenario_quiz("student-1").await;
    let first = submit(&app, "student-1", &quiz["id"], json!([1, 2, 0])).await;
    let original_id = first.body["submission"]["id"].as_str().unwrap().to_string();

    let retried = app
        .post(
            &format!("/api/v1/quiz/retry/{}", original_id),
            Some("student-1"),
            json!({}),
        )
        .await;
    assert_eq!(retried.status, StatusCode::CREATED, "{}", retried.body);

    let copy = &retried.body["submission"];
    assert_ne!(copy["id"], original_id.as_str());
    assert_eq!(copy["is_retry"], true);
    assert_eq!(copy["original_submission_id"], original_id.as_str());
    assert_eq!(copy["score"], 2);
    assert_eq!(copy["answers"], json!([1, 2, 0]));
    assert_eq!(retried.body["original"]["id"], original_id.as_str());

    // A retry does not start a new cooldown window, and is not blocked by one.
    let again = app
        .post(
            &format!("/api/v1/quiz/retry/{}", original_id),
            Some("student-1"),
            json!({}),
        )
        .await;
    assert_eq!(again.status, StatusCode::CREATED);
    assert_eq!(app.store.submission_count(), 3);
}

#[tokio::test]
async fn retry_of_someone_elses_or_unknown_submission_is_not_found() {
    let app = TestApp::new();
    let quiz = app.create_scenario_quiz("student-1").await;
    let first = submit(&app, "student-1", &quiz["id"], json!([1, 2, 0])).await;
    let original_id = first.body["submission"]["id"].as_str().unwrap().to_string();

    let foreign = app
        .post(
            &format!("/api/v1/quiz/retry/{}", original_id),
            Some("student-2"),
            json!({}),
        )
        .await;
    assert_eq!(foreign.status, StatusCode::NOT_FOUND);

    let unknown = app
        .post("/api/v1/quiz/retry/does-not-exist", Some("student-1"), json!({}))
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    assert_eq!(unknown.body["kind"], "not_found");
}

#[tokio::test]
async fn results_are_newest_first_with_quiz_metadata() {
    let app = TestApp::new();
    let math = app.create_scenario_quiz("student-1").await;
    let science = app
        .post(
            "/api/v1/quiz/create",
            Some("student-1"),
            json!({"grade_level": 6, "subject": "Science", "difficulty": "hard"}),
        )
        .await
        .body["quiz"]
        .clone();

    submit(&app, "student-1", &math["id"], json!([1, 3, 0])).await;
    app.clock.advance(chrono::Duration::seconds(10));
    submit(&app, "student-1", &science["id"], json!([0, 0, 0])).await;
    app.clock.advance(chrono::Duration::seconds(10));
    submit(&app, "student-2", &math["id"], json!([1, 3, 0])).await;

    let response = app.get("/api/v1/quiz/results", Some("student-1")).await;
    assert_eq!(response.status, StatusCode::OK);
    let results = response.body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["quiz_id"], science["id"]);
    assert_eq!(results[0]["quiz"]["subject"], "Science");
    assert_eq!(results[0]["quiz"]["difficulty"], "hard");
    assert_eq!(results[1]["quiz_id"], math["id"]);
    assert_eq!(results[1]["score"], 3);
    assert_eq!(results[1]["quiz"]["title"], "Grade 5 Math Warmup");
}

#[tokio::test]
async fn results_filters_combine() {
    let app = TestApp::new();
    let math = app.create_scenario_quiz("student-1").await;
    let science = app
        .post(
            "/api/v1/quiz/create",
            Some("student-1"),
            json!({"grade_level": 6, "subject": "Science"}),
        )
        .await
        .body["quiz"]
        .clone();

    let start = app.clock.now();
    submit(&app, "student-1", &math["id"], json!([1, 3, 0])).await;
    app.clock.advance(chrono::Duration::days(2));
    submit(&app, "student-1", &science["id"], json!([0, 0, 1])).await;

    let by_subject = app
        .get("/api/v1/quiz/results?subject=science", Some("student-1"))
        .await;
    assert_eq!(by_subject.body["results"].as_array().unwrap().len(), 1);
    assert_eq!(by_subject.body["results"][0]["quiz_id"], science["id"]);

    let by_grade = app
        .get("/api/v1/quiz/results?grade=5", Some("student-1"))
        .await;
    assert_eq!(by_grade.body["results"][0]["quiz_id"], math["id"]);

    let by_score = app
        .get("/api/v1/quiz/results?min_score=2&max_score=3", Some("student-1"))
        .await;
    let scored = by_score.body["results"].as_array().unwrap();
    assert_eq!(scored.len(), 1);
    assert_eq!(scored[0]["score"], 3);

    let end = (start + chrono::Duration::days(1)).format("%Y-%m-%dT%H:%M:%SZ");
    let by_date = app
        .get(
            &format!("/api/v1/quiz/results?end_date={}", end),
            Some("student-1"),
        )
        .await;
    let dated = by_date.body["results"].as_array().unwrap();
    assert_eq!(dated.len(), 1);
    assert_eq!(dated[0]["quiz_id"], math["id"]);
}

#[tokio::test]
async fn inconsistent_results_filters_are_rejected() {
    let app = TestApp::new();

    let scores = app
        .get("/api/v1/quiz/results?min_score=5&max_score=1", Some("student-1"))
        .await;
    assert_eq!(scores.status, StatusCode::BAD_REQUEST);
    assert_eq!(scores.body["kind"], "validation_error");

    let dates = app
        .get(
            "/api/v1/quiz/results?start_date=2024-02-01T00:00:00Z&end_date=2024-01-01T00:00:00Z",
            Some("student-1"),
        )
        .await;
    assert_eq!(dates.status, StatusCode::BAD_REQUEST);

    let garbage = app
        .get("/api/v1/quiz/results?min_score=lots", Some("student-1"))
        .await;
    assert_eq!(garbage.status, StatusCode::BAD_REQUEST);
    assert_eq!(garbage.body["kind"], "validation_error");
}

#[tokio::test]
async fn listing_shows_stored_quizzes_newest_first() {
    let app = TestApp::new();
    let math = app.create_scenario_quiz("student-1").await;
    app.clock.advance(chrono::Duration::seconds(5));
    let science = app
        .post(
            "/api/v1/quiz/create",
            Some("student-1"),
            json!({"grade_level": 6, "subject": "Science"}),
        )
        .await
        .body["quiz"]
        .clone();

    let listed = app.get("/api/v1/quiz/all", Some("student-1")).await;
    let quizzes = listed.body.as_array().unwrap();
    assert_eq!(quizzes.len(), 2);
    assert_eq!(quizzes[0]["id"], science["id"]);
    assert_eq!(quizzes[1]["id"], math["id"]);
    assert!(quizzes[0].get("questions").is_none());
}
