//! Assertions for `application/problem+json` error responses.

use actix_web::http::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use actix_web::http::StatusCode;
use serde::Deserialize;

/// Mirror of the backend's problem-details body.
#[derive(Debug, Deserialize)]
pub struct ProblemDetailsLike {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub trace_id: String,
}

/// Assert that response parts follow the error contract and return the
/// parsed body.
///
/// Checks status, content type, `x-trace-id` parity with the body, the
/// `type` URL suffix, and that `Retry-After` is present exactly on 503s.
pub fn assert_problem_details_from_parts(
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
    expected_code: &str,
    expected_status: StatusCode,
    expected_detail_contains: Option<&str>,
) -> ProblemDetailsLike {
    assert_eq!(status, expected_status);

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(
        content_type.starts_with("application/problem+json"),
        "Content-Type must be application/problem+json (got {content_type})"
    );

    let problem: ProblemDetailsLike =
        serde_json::from_slice(body).expect("Response body should be valid ProblemDetails JSON");

    let trace_id_header = headers
        .get("x-trace-id")
        .expect("x-trace-id header should be present")
        .to_str()
        .expect("x-trace-id header should be valid UTF-8");
    assert!(!trace_id_header.is_empty());
    assert_eq!(problem.trace_id, trace_id_header);

    assert_eq!(problem.code, expected_code);
    assert_eq!(problem.status, expected_status.as_u16());
    assert!(
        problem.type_.ends_with(&format!("/errors/{expected_code}")),
        "unexpected type URL {}",
        problem.type_
    );
    assert!(!problem.title.is_empty());

    if let Some(fragment) = expected_detail_contains {
        assert!(
            problem.detail.contains(fragment),
            "detail {:?} should contain {fragment:?}",
            problem.detail
        );
    }

    let has_retry_after = headers.contains_key(RETRY_AFTER);
    if expected_status == StatusCode::SERVICE_UNAVAILABLE {
        assert!(has_retry_after, "503 responses must carry Retry-After");
    } else {
        assert!(!has_retry_after, "{expected_status} must not carry Retry-After");
    }

    problem
}
