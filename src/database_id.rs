//! Database ID type definitions.

use crate::Error;

/// Alias for the integer type used for mapping to transaction IDs.
pub type TransactionId = i64;

/// Parse a transaction ID taken from a URL path segment.
///
/// Only a plain run of ASCII digits naming a positive integer is accepted.
/// Signs, whitespace, decimals and values that overflow are all rejected
/// rather than coerced.
///
/// # Errors
/// Returns [Error::InvalidTransactionId] if `raw` is not a positive integer.
pub fn parse_transaction_id(raw: &str) -> Result<TransactionId, Error> {
    if raw.is_empty() || !raw.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(Error::InvalidTransactionId(raw.to_owned()));
    }

    match raw.parse::<TransactionId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(Error::InvalidTransactionId(raw.to_owned())),
    }
}
