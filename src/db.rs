//! Sets up the application database.

use rusqlite::{Connection, Transaction as SqlTransaction, TransactionBehavior};

use crate::{Error, transaction::create_transaction_table};

/// Create all of the database tables for the application.
///
/// Safe to call on a database that has already been initialized, existing
/// tables and rows are left untouched.
///
/// # Errors
/// Returns an error if any of the tables could not be created.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    let transaction = SqlTransaction::new_unchecked(connection, TransactionBehavior::Exclusive)?;

    create_transaction_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::initialize;

    #[test]
    fn initialize_is_idempotent() {
        let connection = Connection::open_in_memory().unwrap();

        initialize(&connection).expect("first initialization failed");
        connection
            .execute(
                "INSERT INTO transactions (user_id, title, amount, category) VALUES ('u1', 'Pay', 100000, 'Salary')",
                (),
            )
            .unwrap();
        initialize(&connection).expect("second initialization failed");

        let count: i64 = connection
            .query_row("SELECT COUNT(id) FROM transactions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
