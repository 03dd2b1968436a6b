//! HTTP server implementation.

use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::rate_limit;
use crate::error::Result;
use crate::ratelimit::RateLimiter;

/// Build the application router with every route behind the rate limiter.
pub fn router(rate_limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/data", post(data))
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit))
}

async fn index() -> Json<Value> {
    Json(json!({ "message": "Hello World! Rate limiter is working." }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn data() -> Json<Value> {
    Json(json!({
        "message": "Data received successfully",
        "data": "This is a protected endpoint",
    }))
}

/// HTTP server fronting the rate limiter.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { addr, rate_limiter }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        let app = router(self.rate_limiter);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::middleware::{
        LIMIT_EXCEEDED_MESSAGE, REMAINING_HEADER, RESET_HEADER, TOKEN_HEADER,
    };
    use crate::ratelimit::{CounterStore, LimitPolicy, MemoryStore};
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::collections::HashMap;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_limiter(store: Arc<MemoryStore>) -> Arc<RateLimiter> {
        let policy = LimitPolicy {
            default_ip_limit: 3,
            default_token_limit: 5,
            block_duration: Duration::from_secs(10),
            token_overrides: HashMap::from([("test_token".to_string(), 2)]),
        };
        Arc::new(RateLimiter::new(store, policy))
    }

    fn get_request(path: &str, token: Option<&str>) -> Request<Body> {
        let peer: SocketAddr = "192.168.1.1:12345".parse().unwrap();
        let mut builder = Request::builder().uri(path).extension(ConnectInfo(peer));
        if let Some(token) = token {
            builder = builder.header(TOKEN_HEADER, token);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ip_limit_returns_429() {
        let app = router(test_limiter(Arc::new(MemoryStore::new())));

        for expected in ["2", "1", "0"] {
            let response = app.clone().oneshot(get_request("/", None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[REMAINING_HEADER], expected);
            assert!(response.headers().contains_key(RESET_HEADER));
        }

        let response = app.clone().oneshot(get_request("/", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[REMAINING_HEADER], "0");
        let body = body_json(response).await;
        assert_eq!(body["error"], LIMIT_EXCEEDED_MESSAGE);
    }

    #[tokio::test]
    async fn test_token_limit_and_priority() {
        let app = router(test_limiter(Arc::new(MemoryStore::new())));

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(get_request("/", Some("test_token")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(get_request("/", Some("test_token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // Same connection, no token: the IP budget is untouched
        let response = app.clone().oneshot(get_request("/", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REMAINING_HEADER], "2");
    }

    #[tokio::test]
    async fn test_token_header_name_is_case_insensitive() {
        let app = router(test_limiter(Arc::new(MemoryStore::new())));

        for name in ["API_KEY", "api_key", "Api_Key"] {
            let request = Request::builder()
                .uri("/")
                .extension(ConnectInfo("192.168.1.1:12345".parse::<SocketAddr>().unwrap()))
                .header(name, "test_token")
                .body(Body::empty())
                .unwrap();
            app.clone().oneshot(request).await.unwrap();
        }

        // All three spellings drew from the same two-request token budget
        let response = app
            .clone()
            .oneshot(get_request("/", Some("test_token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = app.clone().oneshot(get_request("/", None)).await.unwrap();
        assert_eq!(response.headers()[REMAINING_HEADER], "2");
    }

    #[tokio::test]
    async fn test_forwarded_clients_are_limited_separately() {
        let app = router(test_limiter(Arc::new(MemoryStore::new())));

        for _ in 0..4 {
            app.clone().oneshot(get_request("/", None)).await.unwrap();
        }

        let mut request = get_request("/", None);
        request
            .headers_mut()
            .insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_storage_failure_returns_500() {
        let store = Arc::new(MemoryStore::new());
        store.close().await.unwrap();
        let app = router(test_limiter(store));

        let response = app.oneshot(get_request("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.headers().contains_key(REMAINING_HEADER));
        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error");
    }

    #[tokio::test]
    async fn test_post_data_route() {
        let app = router(test_limiter(Arc::new(MemoryStore::new())));

        let request = Request::builder()
            .method("POST")
            .uri("/api/data")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["message"], "Data received successfully");
    }

    #[tokio::test]
    async fn test_server_shuts_down_on_signal() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = HttpServer::new(addr, test_limiter(Arc::new(MemoryStore::new())));

        tokio_test::assert_ok!(server.serve_with_shutdown(async {}).await);
    }
}
