use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::extractors::ValidatedJson;
use crate::models::quiz::{CreateQuizRequest, CreateQuizResponse, HintRequest, HintResponse};
use crate::models::submission::{
    percentage, ResultsQuery, ResultsResponse, RetryResponse, SubmitQuizRequest,
    SubmitQuizResponse,
};
use crate::models::{Identity, QuizSummary};
use crate::services::notification_service::NotificationDispatcher;
use crate::services::quiz_service::QuizService;
use crate::services::submission_ledger::SubmissionLedger;
use crate::services::AppState;

/// POST /api/v1/quiz/create
pub async fn create_quiz(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<CreateQuizRequest>,
) -> Result<(StatusCode, Json<CreateQuizResponse>), ApiError> {
    let cached = QuizService::new(&state).create_quiz(req).await?;
    tracing::debug!(quiz_id = %cached.value.id, status = ?cached.status, "Quiz served");

    Ok((
        StatusCode::CREATED,
        Json(CreateQuizResponse {
            message: "Quiz created successfully".to_string(),
            quiz: cached.value,
        }),
    ))
}

/// POST /api/v1/quiz/hint
pub async fn get_hint(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<HintRequest>,
) -> Result<Json<HintResponse>, ApiError> {
    let hint = QuizService::new(&state).get_hint(req).await?;
    Ok(Json(HintResponse { hint }))
}

/// POST /api/v1/quiz/submit
///
/// The result email is sent in the background once the submission is stored;
/// its outcome never changes this response.
pub async fn submit_quiz(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    ValidatedJson(req): ValidatedJson<SubmitQuizRequest>,
) -> Result<(StatusCode, Json<SubmitQuizResponse>), ApiError> {
    let outcome = SubmissionLedger::new(&state)
        .submit(&identity, &req.quiz_id, req.answers)
        .await?;

    let response = SubmitQuizResponse {
        score: outcome.submission.score,
        total: outcome.submission.total,
        percentage: percentage(outcome.submission.score, outcome.submission.total),
        results: outcome.results.clone(),
        submission: outcome.submission.clone(),
    };

    let dispatcher = NotificationDispatcher::new(&state);
    tokio::spawn(async move {
        dispatcher
            .notify(&outcome.submission, &outcome.quiz, &outcome.results)
            .await;
    });

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/quiz/results
pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    query: Result<Query<ResultsQuery>, QueryRejection>,
) -> Result<Json<ResultsResponse>, ApiError> {
    let Query(query) =
        query.map_err(|e| ApiError::validation(format!("Invalid query: {}", e.body_text())))?;

    let results = SubmissionLedger::new(&state).results(&identity, query).await?;
    Ok(Json(ResultsResponse { results }))
}

/// POST /api/v1/quiz/retry/{submission_id}
pub async fn retry_submission(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(submission_id): Path<String>,
) -> Result<(StatusCode, Json<RetryResponse>), ApiError> {
    let (submission, original) = SubmissionLedger::new(&state)
        .retry(&identity, &submission_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RetryResponse {
            submission,
            original,
        }),
    ))
}

/// GET /api/v1/quiz/all
pub async fn list_quizzes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<QuizSummary>>, ApiError> {
    Ok(Json(QuizService::new(&state).list_quizzes().await?))
}
