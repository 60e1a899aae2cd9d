use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;

use super::ApiError;
use crate::{
    metrics::SSE_CONNECTIONS_ACTIVE,
    services::{AppState, ProgressSubscription},
};

/// SSE endpoint with live progress of every attempt on a test
/// GET /api/v1/tests/{id}/stream
pub async fn test_stream(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Unknown tests get a 404 instead of a stream that never emits
    state.attempts.test_definition(&test_id).await?;

    tracing::info!("Observer connected to SSE stream: test={}", test_id);
    let subscription = state.publisher.subscribe(&test_id);

    Ok(Sse::new(progress_stream(subscription)).keep_alive(KeepAlive::default()))
}

/// Decrements the connection gauge when the client goes away.
struct ConnectionGuard {
    test_id: String,
}

impl ConnectionGuard {
    fn new(test_id: &str) -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        Self {
            test_id: test_id.to_string(),
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
        tracing::info!("Observer disconnected from SSE stream: test={}", self.test_id);
    }
}

fn progress_stream(
    subscription: ProgressSubscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = ConnectionGuard::new(subscription.test_id());

    stream::unfold(
        (subscription, guard),
        |(mut subscription, guard)| async move {
            let progress = subscription.recv().await?;

            let event = Event::default()
                .event(progress.event_name())
                .id(progress.sequence.to_string())
                .data(progress.to_sse_data());

            Some((Ok(event), (subscription, guard)))
        },
    )
}
