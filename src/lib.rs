//! Spendwise is a personal finance tracker.
//!
//! This library provides a JSON REST API for recording income and expenses,
//! listing them per user and summarising a user's balance. All requests pass
//! through a rate limiter backed by a persistent counter store.
//!
//! The [sign_up] module holds the client-side sign-up flow that drives an
//! external identity provider.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde::Serialize;
use tokio::signal;

mod app_state;
mod database_id;
mod db;
mod endpoints;
mod logging;
mod not_found;
mod rate_limit;
mod routing;
pub mod sign_up;
mod transaction;

pub use app_state::AppState;
pub use database_id::TransactionId;
pub use db::initialize as initialize_db;
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use rate_limit::{BucketConfig, Consumption, CounterStore, RateLimiter, SqliteCounterStore};
pub use routing::build_router;
pub use transaction::{Amount, Summary, Transaction};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!("failed to install terminate signal handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One or more required fields were absent, null or empty in a request body.
    ///
    /// Holds the names of the offending fields in the order they were checked.
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    /// The request body could not be parsed as JSON of the expected shape.
    #[error("invalid request body: {0}")]
    InvalidJson(String),

    /// A transaction ID in the URL was not a positive integer.
    #[error("\"{0}\" is not a valid transaction ID")]
    InvalidTransactionId(String),

    /// An amount was not a number, or was too large to store.
    #[error("\"{0}\" is not a valid amount")]
    InvalidAmount(String),

    /// A transaction was submitted with an amount of zero.
    ///
    /// Transactions are either income (positive) or an expense (negative),
    /// so zero carries no meaning.
    #[error("amount must not be zero")]
    ZeroAmount,

    /// Tried to delete a transaction that does not exist.
    #[error("tried to delete a transaction that is not in the database")]
    DeleteMissingTransaction,

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// The rate limit bucket has no tokens left for the current window.
    #[error("too many requests")]
    TooManyRequests,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock.
    #[error("could not acquire the database lock")]
    DatabaseLockError,

    /// The counter store backing the rate limiter failed or was unreachable.
    ///
    /// The error string should only be logged on the server.
    #[error("the rate limit counter store failed: {0}")]
    CounterStoreError(String),

    /// The server was started with settings that cannot work, e.g. a rate
    /// limit of zero requests.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

/// The JSON body sent with every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingFields(_)
            | Error::InvalidJson(_)
            | Error::InvalidTransactionId(_)
            | Error::InvalidAmount(_)
            | Error::ZeroAmount => StatusCode::BAD_REQUEST,
            Error::DeleteMissingTransaction | Error::NotFound => StatusCode::NOT_FOUND,
            Error::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Error::SqlError(_)
            | Error::DatabaseLockError
            | Error::CounterStoreError(_)
            | Error::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn client_message(&self) -> String {
        match self {
            Error::MissingFields(fields) => {
                format!("All fields are required, missing: {}", fields.join(", "))
            }
            Error::InvalidJson(reason) => format!("Invalid request body: {reason}"),
            Error::InvalidTransactionId(id) => {
                format!("Invalid transaction ID \"{id}\", expected a positive integer")
            }
            Error::InvalidAmount(amount) => {
                format!("Invalid amount \"{amount}\", expected a number of dollars")
            }
            Error::ZeroAmount => "Amount must not be zero".to_owned(),
            Error::DeleteMissingTransaction => "Transaction not found".to_owned(),
            Error::NotFound => "Not found".to_owned(),
            Error::TooManyRequests => "Too many requests, please try again later.".to_owned(),
            // Anything else is not intended to be shown to the client.
            _ => "Internal server error".to_owned(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!("An unexpected error occurred: {}", self);
        }

        let body = ErrorBody {
            message: self.client_message(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod error_tests {
    use axum::{http::StatusCode, response::IntoResponse};

    use crate::Error;

    async fn get_message(error: Error) -> (StatusCode, String) {
        let response = error.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        (status, body["message"].as_str().unwrap().to_owned())
    }

    #[tokio::test]
    async fn missing_fields_lists_field_names() {
        let (status, message) = get_message(Error::MissingFields(vec!["title", "amount"])).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            message.contains("title, amount"),
            "'{message}' does not name the missing fields"
        );
    }

    #[tokio::test]
    async fn sql_error_does_not_leak_details() {
        let (status, message) = get_message(Error::SqlError(
            rusqlite::Error::InvalidColumnName("secret_column".to_owned()),
        ))
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("secret_column"));
    }

    #[tokio::test]
    async fn counter_store_error_is_internal_server_error() {
        let (status, _) = get_message(Error::CounterStoreError("unreachable".to_owned())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn too_many_requests_has_message() {
        let (status, message) = get_message(Error::TooManyRequests).await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(message.starts_with("Too many requests"));
    }

    #[test]
    fn no_rows_maps_to_not_found() {
        let error: Error = rusqlite::Error::QueryReturnedNoRows.into();

        assert!(matches!(error, Error::NotFound));
    }
}
