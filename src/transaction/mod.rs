//! Transaction management for the finance tracker.
//!
//! This module contains everything related to transactions:
//! - The `Transaction` model and the `Amount` type for money
//! - Database functions for storing, querying, and deleting transactions
//! - The summary of a user's income, expenses and balance
//! - Route handlers for the transaction API

mod amount;
mod core;
mod create_endpoint;
mod delete_endpoint;
mod list_endpoint;
mod summary;

pub use amount::Amount;
pub use core::{Transaction, create_transaction_table};
pub use create_endpoint::create_transaction_endpoint;
pub use delete_endpoint::delete_transaction_endpoint;
pub use list_endpoint::get_transactions_endpoint;
pub use summary::{Summary, get_summary_endpoint};

#[cfg(test)]
pub use core::{
    count_transactions, create_transaction, delete_transaction, get_transaction,
    get_transactions_for_user,
};
