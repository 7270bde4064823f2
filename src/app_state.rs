//! Implements a struct that holds the state of the REST server.

use std::sync::{Arc, Mutex};

use axum::extract::FromRef;
use rusqlite::Connection;

use crate::{Error, db::initialize, rate_limit::RateLimiter};

/// The state of the REST server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The database connection for transactions.
    pub db_connection: Arc<Mutex<Connection>>,

    /// The rate limiter applied to every request.
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the tables for the domain models.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn new(db_connection: Connection, rate_limiter: RateLimiter) -> Result<Self, Error> {
        initialize(&db_connection)?;

        Ok(Self {
            db_connection: Arc::new(Mutex::new(db_connection)),
            rate_limiter,
        })
    }
}

impl FromRef<AppState> for RateLimiter {
    fn from_ref(state: &AppState) -> Self {
        state.rate_limiter.clone()
    }
}
