//! Admission-control middleware.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

use super::client_ip::client_ip;
use crate::ratelimit::{Decision, RateLimiter};

/// Request header carrying the access token. Header names match
/// case-insensitively, so `api_key` is accepted too.
pub const TOKEN_HEADER: &str = "API_KEY";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

pub const LIMIT_EXCEEDED_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Run every request through the rate limiter before it reaches a handler.
///
/// Storage failures fail the request with 500 rather than letting it through.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);
    let token = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let decision = match limiter.check_limit(&ip, &token).await {
        Ok(decision) => decision,
        Err(e) => {
            error!(ip = %ip, error = %e, "Rate limit check failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error" })),
            )
                .into_response();
        }
    };

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        debug!(ip = %ip, has_token = !token.is_empty(), "Request rejected");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": LIMIT_EXCEEDED_MESSAGE })),
        )
            .into_response()
    };

    insert_limit_headers(response.headers_mut(), &decision);
    response
}

fn insert_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));

    let reset = decision.reset_time.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    if let Ok(value) = HeaderValue::from_str(&reset) {
        headers.insert(RESET_HEADER, value);
    }
}
