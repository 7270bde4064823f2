//! Defines the endpoint for creating a new transaction.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::Deserialize;
use time::Date;

use crate::{
    AppState, Error,
    transaction::{
        Amount, Transaction,
        core::{NewTransaction, create_transaction},
    },
};

/// The state needed to create a transaction.
#[derive(Debug, Clone)]
pub struct CreateTransactionState {
    /// The database connection for managing transactions.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for CreateTransactionState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// An amount as sent by a client, either a JSON number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    /// A JSON number, e.g. `-4.5`.
    Number(f64),
    /// A string holding a number, e.g. `"-4.50"`.
    Text(String),
}

/// The JSON body for creating a transaction.
///
/// Every field is optional here so that a missing field can be reported by
/// name instead of as a generic deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct CreateTransactionRequest {
    /// The user that owns the transaction.
    pub user_id: Option<String>,
    /// Text describing the transaction.
    pub title: Option<String>,
    /// The value of the transaction in dollars.
    pub amount: Option<AmountInput>,
    /// The category of the transaction.
    pub category: Option<String>,
    /// When the transaction happened, defaults to today.
    pub created_at: Option<Date>,
}

impl CreateTransactionRequest {
    /// Check that every required field is present and usable.
    ///
    /// # Errors
    /// Returns:
    /// - [Error::MissingFields] naming each field that is absent, null or blank,
    /// - [Error::InvalidAmount] if the amount is not a number,
    /// - or [Error::ZeroAmount] if the amount rounds to zero cents.
    pub fn validate(self) -> Result<NewTransaction, Error> {
        let mut missing = Vec::new();

        let title = non_blank(self.title);
        if title.is_none() {
            missing.push("title");
        }

        let amount = match self.amount {
            Some(AmountInput::Number(dollars)) => Some(Amount::try_from(dollars)),
            Some(AmountInput::Text(text)) if !text.trim().is_empty() => Some(text.parse()),
            _ => None,
        };
        if amount.is_none() {
            missing.push("amount");
        }

        let category = non_blank(self.category);
        if category.is_none() {
            missing.push("category");
        }

        let user_id = non_blank(self.user_id);
        if user_id.is_none() {
            missing.push("user_id");
        }

        let (Some(title), Some(amount), Some(category), Some(user_id)) =
            (title, amount, category, user_id)
        else {
            return Err(Error::MissingFields(missing));
        };

        let amount = amount?;
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }

        Ok(Transaction::build(&user_id, &title, amount, &category).created_at(self.created_at))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

/// A route handler for creating a new transaction, responds with the created transaction.
pub async fn create_transaction_endpoint(
    State(state): State<CreateTransactionState>,
    payload: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return Error::InvalidJson(rejection.body_text()).into_response(),
    };

    let new_transaction = match request.validate() {
        Ok(new_transaction) => new_transaction,
        Err(error) => return error.into_response(),
    };

    let connection = match state.db_connection.lock() {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("could not acquire database lock: {error}");
            return Error::DatabaseLockError.into_response();
        }
    };

    match create_transaction(new_transaction, &connection) {
        Ok(transaction) => (StatusCode::CREATED, Json(transaction)).into_response(),
        Err(error) => {
            tracing::error!("could not create transaction: {error}");
            error.into_response()
        }
    }
}
