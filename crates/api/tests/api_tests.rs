//! Integration tests for the book run and job endpoints.

mod common;

use assert_matches::assert_matches;
use axum::http::{header, StatusCode};
use common::{body_bytes, body_json, build_test_app, get, post, wait_for_job};

// ---------------------------------------------------------------------------
// Health and middleware
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok_with_request_id() {
    let test = build_test_app();
    let response = get(test.router(), "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response.headers().get("x-request-id").cloned();
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["running_jobs"], 0);

    let request_id = request_id.expect("x-request-id header");
    assert_eq!(request_id.to_str().unwrap().len(), 36);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let test = build_test_app();
    let response = get(test.router(), "/api/v1/nothing-here").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Starting runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_returns_202_and_job_finishes() {
    let test = build_test_app();
    test.write_book("spring");

    let response = post(test.router(), "/api/v1/books/spring/run").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    let job_id = json["data"]["job_id"].as_str().unwrap().to_string();
    assert_eq!(job_id.len(), 12);

    let job = wait_for_job(&test, &job_id).await;
    assert_eq!(job["data"]["status"], "finished");
    assert_eq!(job["data"]["book_id"], "spring");
    assert_eq!(job["data"]["summary"]["pages_saved"], 2);
    assert_matches!(job["data"]["last_image"].as_str(), Some(p) if p.ends_with("stub_p2.png"));

    let latest = body_json(get(test.router(), "/api/v1/books/spring/job").await).await;
    assert_eq!(latest["data"]["job_id"], job_id.as_str());
}

#[tokio::test]
async fn run_unknown_book_returns_404() {
    let test = build_test_app();
    let response = post(test.router(), "/api/v1/books/missing/run").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn run_rejects_unsafe_book_id() {
    let test = build_test_app();
    let response = post(test.router(), "/api/v1/books/a..b/run").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn run_with_invalid_book_json_returns_422() {
    let test = build_test_app();
    std::fs::create_dir_all(test.books_dir()).unwrap();
    std::fs::write(test.books_dir().join("broken.json"), "{not json").unwrap();

    let response = post(test.router(), "/api/v1/books/broken/run").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn book_without_jobs_has_no_latest_job() {
    let test = build_test_app();
    let response = get(test.router(), "/api/v1/books/spring/job").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Job queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_returns_404_everywhere() {
    let test = build_test_app();
    for uri in [
        "/api/v1/jobs/abc",
        "/api/v1/jobs/abc/preview",
        "/api/v1/jobs/abc/stream",
    ] {
        let response = get(test.router(), uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn preview_serves_latest_artifact() {
    let test = build_test_app();
    test.write_book("spring");
    let json = body_json(post(test.router(), "/api/v1/books/spring/run").await).await;
    let job_id = json["data"]["job_id"].as_str().unwrap().to_string();
    wait_for_job(&test, &job_id).await;

    let response = get(test.router(), &format!("/api/v1/jobs/{job_id}/preview")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(body_bytes(response).await, b"\x89PNG");
}

#[tokio::test]
async fn stream_of_finished_job_ends_with_done() {
    let test = build_test_app();
    test.write_book("spring");
    let json = body_json(post(test.router(), "/api/v1/books/spring/run").await).await;
    let job_id = json["data"]["job_id"].as_str().unwrap().to_string();
    wait_for_job(&test, &job_id).await;

    let response = get(test.router(), &format!("/api/v1/jobs/{job_id}/stream")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_matches!(
        response.headers()[header::CONTENT_TYPE].to_str(),
        Ok(ct) if ct.starts_with("text/event-stream")
    );

    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.contains("event: image"), "{body}");
    assert!(body.contains("event: progress\ndata: 100"), "{body}");
    assert!(body.trim_end().ends_with("event: done\ndata: finished"), "{body}");
}
