use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::{
    extractors::AppJson,
    models::{CompletionReason, StartAttemptRequest, SubmitAnswerRequest},
    services::AppState,
};

pub async fn start_attempt(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<StartAttemptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        "Start attempt requested: student_id={}, test_id={}",
        req.student_id,
        req.test_id
    );

    let now = state.attempts.now();
    let attempt = state
        .attempts
        .start_attempt(&req.student_id, &req.test_id, now)
        .await?;

    Ok((StatusCode::CREATED, Json(attempt)))
}

pub async fn get_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let now = state.attempts.now();
    let attempt = state.attempts.get_attempt_status(&attempt_id, now).await?;
    Ok(Json(attempt))
}

pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
    AppJson(req): AppJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let now = state.attempts.now();
    let response = state
        .attempts
        .submit_answer(&attempt_id, &req.question_id, req.answer, now)
        .await?;

    Ok(Json(response))
}

pub async fn list_answers(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let answers = state.attempts.list_answers(&attempt_id).await?;
    Ok(Json(answers))
}

pub async fn complete_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Completing attempt: {}", attempt_id);

    let now = state.attempts.now();
    let attempt = state
        .attempts
        .complete_attempt(&attempt_id, now, CompletionReason::Manual)
        .await?;

    Ok(Json(attempt))
}
