use axum::response::{IntoResponse, Response};

use crate::Error;

/// The fallback route handler for any path that has no route.
pub async fn get_404_not_found() -> Response {
    Error::NotFound.into_response()
}
