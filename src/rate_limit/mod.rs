//! Request rate limiting.
//!
//! Every request takes one token from a single global bucket held in a
//! [CounterStore]. A token returns to the bucket once the window has passed
//! since it was taken, so no span of one window ever allows more than the
//! bucket's capacity. When the bucket is empty the request is rejected with
//! `429 Too Many Requests`.

mod middleware;
mod store;

use std::sync::Arc;

use time::Duration;

use crate::Error;

/// The longest rate limit window allowed.
pub const MAX_WINDOW: Duration = Duration::days(1);

pub use middleware::rate_limit_guard;
pub use store::{Consumption, CounterStore, SqliteCounterStore};

/// The settings for the rate limit bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketConfig {
    /// The key identifying the bucket in the counter store.
    pub key: String,
    /// The number of requests allowed per window.
    pub capacity: u32,
    /// How long a token stays out of the bucket once taken.
    pub window: Duration,
}

impl BucketConfig {
    /// Create the settings for a bucket.
    ///
    /// # Errors
    /// Returns [Error::InvalidConfig] if `key` is empty, `capacity` is zero or
    /// `window` is shorter than one second or longer than [MAX_WINDOW].
    pub fn new(key: &str, capacity: u32, window: Duration) -> Result<Self, Error> {
        if key.is_empty() {
            return Err(Error::InvalidConfig(
                "the rate limit key must not be empty".to_owned(),
            ));
        }

        if capacity == 0 {
            return Err(Error::InvalidConfig(
                "the rate limit capacity must be at least 1".to_owned(),
            ));
        }

        if window.whole_seconds() < 1 {
            return Err(Error::InvalidConfig(format!(
                "the rate limit window must be at least one second, got {window}"
            )));
        }

        if window > MAX_WINDOW {
            return Err(Error::InvalidConfig(format!(
                "the rate limit window must be at most {MAX_WINDOW}, got {window}"
            )));
        }

        Ok(Self {
            key: key.to_owned(),
            capacity,
            window,
        })
    }
}

/// Applies a [BucketConfig] against a [CounterStore].
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    bucket: BucketConfig,
}

impl RateLimiter {
    /// Create a rate limiter that keeps its bucket in `store`.
    pub fn new(store: impl CounterStore + 'static, bucket: BucketConfig) -> Self {
        Self {
            store: Arc::new(store),
            bucket,
        }
    }

    /// The settings of the bucket this limiter draws from.
    pub fn bucket(&self) -> &BucketConfig {
        &self.bucket
    }

    /// Take one token from the bucket.
    ///
    /// # Errors
    /// Returns [Error::CounterStoreError] if the counter store fails.
    pub fn consume(&self) -> Result<Consumption, Error> {
        self.store
            .consume(&self.bucket.key, self.bucket.capacity, self.bucket.window)
    }
}
