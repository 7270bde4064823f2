//! Totals of a user's income, expenses and balance.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, Path, State},
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{AppState, Error, transaction::Amount};

/// The aggregate of all of a user's transactions.
///
/// `balance` is always `income + expense`, `income` is never negative and
/// `expense` is never positive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// The sum of all amounts, i.e. what the user has left.
    pub balance: Amount,
    /// The sum of the positive amounts.
    pub income: Amount,
    /// The sum of the negative amounts.
    pub expense: Amount,
}

/// Sum the transactions for `user_id` in a single pass over their rows.
///
/// A user with no transactions has a summary of all zeros.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn get_summary(user_id: &str, connection: &Connection) -> Result<Summary, Error> {
    connection
        .query_row(
            "SELECT
                COALESCE(SUM(amount), 0),
                COALESCE(SUM(CASE WHEN amount > 0 THEN amount ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN amount < 0 THEN amount ELSE 0 END), 0)
             FROM transactions
             WHERE user_id = :user_id",
            &[(":user_id", &user_id)],
            |row| {
                Ok(Summary {
                    balance: row.get(0)?,
                    income: row.get(1)?,
                    expense: row.get(2)?,
                })
            },
        )
        .map_err(|error| error.into())
}

/// The state needed to summarise a user's transactions.
#[derive(Debug, Clone)]
pub struct SummaryState {
    /// The database connection for reading transactions.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for SummaryState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// A route handler that responds with the [Summary] for a user.
pub async fn get_summary_endpoint(
    State(state): State<SummaryState>,
    Path(user_id): Path<String>,
) -> Response {
    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    match get_summary(&user_id, &connection) {
        Ok(summary) => Json(summary).into_response(),
        Err(error) => {
            tracing::error!("could not get summary for user {user_id}: {error}");
            error.into_response()
        }
    }
}
