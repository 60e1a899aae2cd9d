use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::Duration;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use serial_test::serial;
use tower::ServiceExt;

mod common;

use common::{create_test_app, ORTHOEOPY_TEST, REGULAR_TEST, SPELLING_TEST};

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let body = match body {
        Some(json) => Body::from(json.to_string()),
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            panic!(
                "non-JSON body for {} {}: {}",
                method,
                uri,
                String::from_utf8_lossy(&bytes)
            )
        })
    };
    (status, json)
}

async fn start(app: &Router, student: &str, test: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/api/v1/attempts",
        Some(json!({ "student_id": student, "test_id": test })),
    )
    .await
}

#[tokio::test]
async fn full_attempt_flow_over_http() {
    let app = create_test_app().router();

    let (status, attempt) = start(&app, "student-1", SPELLING_TEST).await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", attempt);
    assert_eq!(attempt["status"], "in_progress");
    assert_eq!(attempt["attempt_number"], 1);
    let attempt_id = attempt["id"].as_str().unwrap().to_string();

    let (status, answer) = send(
        &app,
        "POST",
        &format!("/api/v1/attempts/{}/answers", attempt_id),
        Some(json!({
            "question_id": "q1",
            "answer": { "kind": "letter", "letter": "е" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", answer);
    assert_eq!(answer["is_correct"], true);
    assert_eq!(answer["points_awarded"], 1);
    assert_eq!(answer["total_score"], 1);
    assert_eq!(answer["questions_answered"], 1);

    let (status, answers) = send(
        &app,
        "GET",
        &format!("/api/v1/attempts/{}/answers", attempt_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answers.as_array().unwrap().len(), 1);

    let (status, done) = send(
        &app,
        "POST",
        &format!("/api/v1/attempts/{}/complete", attempt_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "completed");
    assert_eq!(done["percentage"], 50.0);

    let (status, fetched) = send(&app, "GET", &format!("/api/v1/attempts/{}", attempt_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["completed_at"], done["completed_at"]);
}

#[tokio::test]
async fn engine_errors_map_to_status_codes() {
    let test_app = create_test_app();
    let app = test_app.router();

    let (status, body) = start(&app, "student-1", "missing-test").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "test_not_found");
    assert_eq!(body["test_id"], "missing-test");

    let (_, attempt) = start(&app, "student-1", REGULAR_TEST).await;
    let attempt_id = attempt["id"].as_str().unwrap().to_string();

    let (status, body) = start(&app, "student-1", REGULAR_TEST).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "attempt_already_in_progress");
    assert_eq!(body["attempt_id"], attempt_id.as_str());

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/attempts/{}/answers", attempt_id),
        Some(json!({ "question_id": "q9", "answer": { "kind": "choice", "option_ids": ["A"] } })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "unknown_question");
    assert_eq!(body["question_id"], "q9");

    // Past the deadline the attempt is gone
    test_app.clock.advance(Duration::minutes(31));
    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/attempts/{}/answers", attempt_id),
        Some(json!({ "question_id": "q1", "answer": { "kind": "choice", "option_ids": ["A"] } })),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"], "attempt_expired");

    let (status, body) = send(&app, "GET", "/api/v1/attempts/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "attempt_not_found");
}

#[tokio::test]
async fn malformed_requests_are_rejected_as_json() {
    let app = create_test_app().router();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/attempts")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value =
        serde_json::from_slice(&response.into_body().collect().await.unwrap().to_bytes()).unwrap();
    assert_eq!(body["error"], "invalid_request");

    let (status, body) = start(&app, "", ORTHOEOPY_TEST).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/attempts",
        Some(json!({ "student_id": "student-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/attempts")
                .body(Body::from(r#"{"student_id":"s","test_id":"t"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value =
        serde_json::from_slice(&response.into_body().collect().await.unwrap().to_bytes()).unwrap();
    assert_eq!(body["error"], "invalid_request");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Content-Type"));
}

#[tokio::test]
async fn unrecognized_answer_shape_scores_zero() {
    let app = create_test_app().router();
    let (_, attempt) = start(&app, "student-1", ORTHOEOPY_TEST).await;
    let attempt_id = attempt["id"].as_str().unwrap();

    let (status, answer) = send(
        &app,
        "POST",
        &format!("/api/v1/attempts/{}/answers", attempt_id),
        Some(json!({ "question_id": "q1", "answer": { "kind": "drawing" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", answer);
    assert_eq!(answer["is_correct"], false);
    assert_eq!(answer["points_awarded"], 0);
}

#[tokio::test]
async fn dashboard_lists_attempts_with_lazy_expiry() {
    let test_app = create_test_app();
    let app = test_app.router();

    start(&app, "student-1", ORTHOEOPY_TEST).await;
    start(&app, "student-2", ORTHOEOPY_TEST).await;
    test_app.clock.advance(Duration::minutes(45));

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/v1/tests/{}/attempts", ORTHOEOPY_TEST),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["family"], "orthoeopy");
    assert_eq!(body["max_score"], 1);

    let attempts = body["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|a| a["status"] == "expired"));
}

#[tokio::test]
async fn stream_requires_known_test() {
    let test_app = create_test_app();
    let app = test_app.router();

    let (status, body) = send(&app, "GET", "/api/v1/tests/missing/stream", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "test_not_found");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/tests/{}/stream", ORTHOEOPY_TEST))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    assert_eq!(test_app.state.publisher.observer_count(ORTHOEOPY_TEST), 1);

    drop(response);
    assert_eq!(test_app.state.publisher.observer_count(ORTHOEOPY_TEST), 0);
}

#[tokio::test]
async fn responses_carry_trace_id() {
    let app = create_test_app().router();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-trace-id", "trace-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-trace-id"], "trace-123");
}

#[tokio::test]
#[serial]
async fn metrics_require_basic_auth() {
    std::env::set_var("METRICS_AUTH", "ops:secret");
    let app = create_test_app().router();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let credentials = general_purpose::STANDARD.encode("ops:secret");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .header("authorization", format!("Basic {}", credentials))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&text).contains("http_requests_total"));

    std::env::remove_var("METRICS_AUTH");
}
