use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::{models::TestProgressResponse, services::AppState};

/// Dashboard snapshot: every attempt on the test, lapsed ones already expired.
pub async fn list_test_attempts(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let now = state.attempts.now();
    let (test, attempts) = state.attempts.list_test_attempts(&test_id, now).await?;

    Ok(Json(TestProgressResponse {
        max_score: test.max_score(),
        test_id: test.id,
        title: test.title,
        family: test.family,
        attempts,
    }))
}
