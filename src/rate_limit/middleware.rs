//! Middleware that applies the rate limit to every request.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use time::OffsetDateTime;

use crate::{
    Error,
    rate_limit::{Consumption, RateLimiter},
};

/// The header holding the bucket's capacity.
pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
/// The header holding the tokens left in the current window.
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// The header holding the Unix timestamp at which the next token frees up.
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Middleware function that takes a token from the rate limit bucket before
/// running the rest of the request.
///
/// Requests are rejected with `429 Too Many Requests` when the bucket is
/// empty, and with `500 Internal Server Error` if the counter store fails.
/// Rejected requests never reach the route handler.
pub async fn rate_limit_guard(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let consumption = match limiter.consume() {
        Ok(consumption) => consumption,
        Err(error) => {
            tracing::error!(
                "Could not check rate limit for {} {}: {error}",
                request.method(),
                request.uri()
            );
            return error.into_response();
        }
    };

    let mut response = if consumption.allowed {
        next.run(request).await
    } else {
        tracing::warn!(
            "Rate limit exceeded for bucket \"{}\", rejecting {} {}",
            limiter.bucket().key,
            request.method(),
            request.uri()
        );

        let mut response = Error::TooManyRequests.into_response();
        let retry_after =
            (consumption.resets_at - OffsetDateTime::now_utc().unix_timestamp()).max(0);
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(retry_after));
        response
    };

    insert_rate_limit_headers(response.headers_mut(), &consumption);

    response
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, consumption: &Consumption) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(consumption.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(consumption.remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(consumption.resets_at));
}

#[cfg(test)]
mod tests {
    use axum::{Router, http::StatusCode, middleware, routing::get};
    use axum_test::TestServer;
    use rusqlite::Connection;
    use time::Duration;

    use crate::{
        Error,
        rate_limit::{
            BucketConfig, Consumption, CounterStore, RateLimiter, SqliteCounterStore,
        },
    };

    use super::{RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, rate_limit_guard};

    #[derive(Debug)]
    struct UnreachableCounterStore;

    impl CounterStore for UnreachableCounterStore {
        fn consume(&self, _: &str, _: u32, _: Duration) -> Result<Consumption, Error> {
            Err(Error::CounterStoreError("connection refused".to_owned()))
        }
    }

    fn get_test_server(limiter: RateLimiter) -> TestServer {
        let app = Router::new()
            .route("/", get(|| async { "hello" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_guard));

        TestServer::try_new(app).expect("Could not create test server.")
    }

    fn sqlite_limiter(capacity: u32) -> RateLimiter {
        let store = SqliteCounterStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let bucket = BucketConfig::new("global", capacity, Duration::seconds(60)).unwrap();

        RateLimiter::new(store, bucket)
    }

    #[tokio::test]
    async fn allows_requests_under_limit() {
        let server = get_test_server(sqlite_limiter(2));

        let response = server.get("/").await;

        response.assert_status_ok();
        response.assert_text("hello");
        assert_eq!(response.header(RATE_LIMIT_LIMIT), "2");
        assert_eq!(response.header(RATE_LIMIT_REMAINING), "1");
    }

    #[tokio::test]
    async fn rejects_request_over_limit() {
        let server = get_test_server(sqlite_limiter(2));
        server.get("/").await.assert_status_ok();
        server.get("/").await.assert_status_ok();

        let response = server.get("/").await;

        response.assert_status(StatusCode::TOO_MANY_REQUESTS);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["message"], "Too many requests, please try again later.");
        assert_eq!(response.header(RATE_LIMIT_REMAINING), "0");
        assert!(response.headers().get("retry-after").is_some());
    }

    #[tokio::test]
    async fn store_failure_is_internal_server_error() {
        let bucket = BucketConfig::new("global", 10, Duration::seconds(60)).unwrap();
        let server = get_test_server(RateLimiter::new(UnreachableCounterStore, bucket));

        let response = server.get("/").await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.text().contains("message"));
        assert!(!response.text().contains("hello"));
    }
}
