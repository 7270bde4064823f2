//! Defines the core data models and database queries for transactions.

use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{Error, database_id::TransactionId, transaction::Amount};

// ============================================================================
// MODELS
// ============================================================================

/// An expense or income, i.e. an event where money was either spent or earned.
///
/// To create a new `Transaction`, use [Transaction::build].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: TransactionId,
    /// The identity provider's ID for the user that owns the transaction.
    pub user_id: String,
    /// A short description of what the transaction was for.
    pub title: String,
    /// The amount of money earned (positive) or spent (negative).
    pub amount: Amount,
    /// A free-text category, e.g. "Food" or "Salary".
    pub category: String,
    /// The date the transaction was recorded.
    pub created_at: Date,
}

impl Transaction {
    /// Create a new transaction.
    ///
    /// Shortcut for [NewTransaction] for discoverability.
    pub fn build(user_id: &str, title: &str, amount: Amount, category: &str) -> NewTransaction {
        NewTransaction {
            user_id: user_id.to_owned(),
            title: title.to_owned(),
            amount,
            category: category.to_owned(),
            created_at: None,
        }
    }
}

/// A transaction that has not been saved to the database yet.
#[derive(Debug, PartialEq, Clone)]
pub struct NewTransaction {
    /// The user that owns the transaction.
    pub user_id: String,

    /// A short description of the transaction.
    pub title: String,

    /// The monetary amount of the transaction.
    ///
    /// Positive values represent income, negative values represent expenses.
    ///
    /// # Examples
    /// - `1500.00` - Salary deposit
    /// - `-4.50` - Coffee
    pub amount: Amount,

    /// The category of the transaction, e.g. "Food", "Transport", "Rent".
    pub category: String,

    /// The date the transaction was recorded.
    ///
    /// `None` uses the database's current date.
    pub created_at: Option<Date>,
}

impl NewTransaction {
    /// Set the date for the transaction.
    pub fn created_at(mut self, created_at: Option<Date>) -> Self {
        self.created_at = created_at;
        self
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the transactions table in the database.
///
/// Does nothing if the table already exists.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    // AUTOINCREMENT stops IDs of deleted rows from being handed out again.
    connection.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                amount INTEGER NOT NULL,
                category TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (date('now'))
                )",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_user_created
            ON transactions(user_id, created_at)",
        (),
    )?;

    Ok(())
}

/// Create a new transaction in the database.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn create_transaction(
    new_transaction: NewTransaction,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(
            "INSERT INTO transactions (user_id, title, amount, category, created_at)
             VALUES (?1, ?2, ?3, ?4, COALESCE(?5, date('now')))
             RETURNING id, user_id, title, amount, category, created_at",
        )?
        .query_row(
            (
                new_transaction.user_id,
                new_transaction.title,
                new_transaction.amount,
                new_transaction.category,
                new_transaction.created_at,
            ),
            map_transaction_row,
        )?;

    Ok(transaction)
}

/// Get all of the transactions belonging to `user_id`, newest first.
///
/// Transactions on the same date are ordered by descending ID so the most
/// recently created comes first.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn get_transactions_for_user(
    user_id: &str,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    let mut statement = connection.prepare(
        "SELECT id, user_id, title, amount, category, created_at
         FROM transactions
         WHERE user_id = :user_id
         ORDER BY created_at DESC, id DESC",
    )?;

    let transactions = statement
        .query_map(&[(":user_id", &user_id)], map_transaction_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(transactions)
}

type RowsAffected = usize;

/// Delete the transaction with `id`.
///
/// Returns the number of rows deleted, zero means no transaction had that ID.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn delete_transaction(id: TransactionId, connection: &Connection) -> Result<RowsAffected, Error> {
    connection
        .execute("DELETE FROM transactions WHERE id = :id", &[(":id", &id)])
        .map_err(|err| err.into())
}

/// Retrieve a transaction from the database by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid transaction,
/// - or [Error::SqlError] there is some other SQL error.
#[cfg(test)]
pub fn get_transaction(id: TransactionId, connection: &Connection) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(
            "SELECT id, user_id, title, amount, category, created_at FROM transactions WHERE id = :id",
        )?
        .query_one(&[(":id", &id)], map_transaction_row)?;

    Ok(transaction)
}

/// Get the total number of transactions in the database.
#[cfg(test)]
pub fn count_transactions(connection: &Connection) -> Result<u32, Error> {
    connection
        .query_row("SELECT COUNT(id) FROM transactions;", [], |row| row.get(0))
        .map_err(|error| error.into())
}

/// Map a database row to a Transaction.
pub fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    let id = row.get(0)?;
    let user_id = row.get(1)?;
    let title = row.get(2)?;
    let amount = row.get(3)?;
    let category = row.get(4)?;
    let created_at = row.get(5)?;

    Ok(Transaction {
        id,
        user_id,
        title,
        amount,
        category,
        created_at,
    })
}

// ============================================================================
// TESTS
// ============================================================================
