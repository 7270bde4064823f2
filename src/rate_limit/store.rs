//! Persistent storage for rate limit buckets.

use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
};

use rusqlite::{Connection, TransactionBehavior};
use time::{Duration, OffsetDateTime};

use crate::Error;

/// The outcome of trying to take one token from a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    /// Whether a token was taken, i.e. whether the request may proceed.
    pub allowed: bool,
    /// The number of requests the bucket allows per window.
    pub limit: u32,
    /// The tokens left in the current window after this attempt.
    pub remaining: u32,
    /// Unix timestamp, in seconds, at which the next token frees up.
    pub resets_at: i64,
}

/// A key-value store of rate limit buckets shared by every server process.
///
/// Buckets use a sliding window: a request is allowed only if fewer than
/// `capacity` requests were allowed in the `window` seconds before it.
/// Implementations must make [CounterStore::consume] atomic, so concurrent
/// callers, including callers in other processes, can never take more than
/// `capacity` tokens in any span of `window` seconds.
pub trait CounterStore: Debug + Send + Sync {
    /// Take one token from the bucket `key`.
    ///
    /// Tokens taken more than `window` ago are returned to the bucket first.
    /// An empty bucket is left empty and the attempt is not allowed.
    ///
    /// # Errors
    /// Returns [Error::CounterStoreError] if the store cannot be reached or
    /// the update fails.
    fn consume(&self, key: &str, capacity: u32, window: Duration) -> Result<Consumption, Error>;
}

/// How long a connection waits for another process to release the write lock.
const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// A [CounterStore] kept in a SQLite database.
///
/// Each allowed request is recorded with its timestamp. Several server
/// processes can share one bucket by opening the same database file.
/// SQLite's write lock serializes their updates.
#[derive(Debug, Clone)]
pub struct SqliteCounterStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteCounterStore {
    /// Create a counter store on `connection`, creating its table if needed.
    ///
    /// # Errors
    /// Returns [Error::CounterStoreError] if the table cannot be created.
    pub fn new(connection: Connection) -> Result<Self, Error> {
        connection
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(store_error)?;
        create_bucket_table(&connection).map_err(store_error)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Take a token as of the Unix timestamp `now`, in seconds.
    fn consume_at(
        &self,
        key: &str,
        capacity: u32,
        window: Duration,
        now: i64,
    ) -> Result<Consumption, Error> {
        let window_start = now.checked_sub(window.whole_seconds()).ok_or_else(|| {
            Error::CounterStoreError(format!("the window {window} is out of range"))
        })?;

        let mut connection = self
            .connection
            .lock()
            .map_err(|error| Error::CounterStoreError(error.to_string()))?;

        // IMMEDIATE takes the write lock up front so that counting and
        // recording cannot interleave with another process.
        let transaction = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_error)?;

        transaction
            .execute(
                "DELETE FROM rate_limit_hit WHERE key = ?1 AND taken_at <= ?2",
                (key, window_start),
            )
            .map_err(store_error)?;

        let (taken, oldest): (u32, Option<i64>) = transaction
            .query_row(
                "SELECT COUNT(*), MIN(taken_at) FROM rate_limit_hit WHERE key = ?1",
                (key,),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(store_error)?;

        let allowed = taken < capacity;
        if allowed {
            transaction
                .execute(
                    "INSERT INTO rate_limit_hit (key, taken_at) VALUES (?1, ?2)",
                    (key, now),
                )
                .map_err(store_error)?;
        }

        transaction.commit().map_err(store_error)?;

        let taken = if allowed { taken + 1 } else { taken };
        let resets_at = oldest.unwrap_or(now).saturating_add(window.whole_seconds());

        Ok(Consumption {
            allowed,
            limit: capacity,
            remaining: capacity.saturating_sub(taken),
            resets_at,
        })
    }
}

impl CounterStore for SqliteCounterStore {
    fn consume(&self, key: &str, capacity: u32, window: Duration) -> Result<Consumption, Error> {
        self.consume_at(
            key,
            capacity,
            window,
            OffsetDateTime::now_utc().unix_timestamp(),
        )
    }
}

fn create_bucket_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS rate_limit_hit (
            key TEXT NOT NULL,
            taken_at INTEGER NOT NULL
            );
        CREATE INDEX IF NOT EXISTS idx_rate_limit_hit_key_taken_at
            ON rate_limit_hit(key, taken_at);",
    )
}

fn store_error(error: rusqlite::Error) -> Error {
    Error::CounterStoreError(error.to_string())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use time::Duration;

    use crate::Error;

    use super::{CounterStore, SqliteCounterStore};

    const KEY: &str = "global";
    const WINDOW: Duration = Duration::seconds(60);

    fn get_test_store() -> SqliteCounterStore {
        SqliteCounterStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn first_consume_fills_bucket() {
        let store = get_test_store();

        let consumption = store.consume_at(KEY, 3, WINDOW, 1_000).unwrap();

        assert!(consumption.allowed);
        assert_eq!(consumption.limit, 3);
        assert_eq!(consumption.remaining, 2);
        assert_eq!(consumption.resets_at, 1_060);
    }

    #[test]
    fn rejects_after_capacity_is_used() {
        let store = get_test_store();

        for i in 0..3 {
            let consumption = store.consume_at(KEY, 3, WINDOW, 1_000 + i).unwrap();
            assert!(consumption.allowed, "consumption {i} should be allowed");
        }

        let consumption = store.consume_at(KEY, 3, WINDOW, 1_010).unwrap();

        assert!(!consumption.allowed);
        assert_eq!(consumption.remaining, 0);
    }

    #[test]
    fn remaining_never_goes_negative() {
        let store = get_test_store();

        for _ in 0..10 {
            store.consume_at(KEY, 2, WINDOW, 1_000).unwrap();
        }

        let consumption = store.consume_at(KEY, 2, WINDOW, 1_000).unwrap();
        assert_eq!(consumption.remaining, 0);
    }

    #[test]
    fn refills_when_window_expires() {
        let store = get_test_store();
        store.consume_at(KEY, 1, WINDOW, 1_000).unwrap();
        assert!(!store.consume_at(KEY, 1, WINDOW, 1_059).unwrap().allowed);

        let consumption = store.consume_at(KEY, 1, WINDOW, 1_060).unwrap();

        assert!(consumption.allowed);
        assert_eq!(consumption.resets_at, 1_120);
    }

    #[test]
    fn never_allows_more_than_capacity_across_window_boundary() {
        let store = get_test_store();
        let mut allowed_near_boundary = 0;

        store.consume_at(KEY, 10, WINDOW, 1_000).unwrap();
        for now in std::iter::repeat_n(1_059, 9).chain(std::iter::repeat_n(1_060, 10)) {
            if store.consume_at(KEY, 10, WINDOW, now).unwrap().allowed {
                allowed_near_boundary += 1;
            }
        }

        // Only the token taken at t=1000 has left the window by t=1060.
        assert_eq!(allowed_near_boundary, 10);
    }

    #[test]
    fn tokens_return_one_at_a_time() {
        let store = get_test_store();
        store.consume_at(KEY, 2, WINDOW, 1_000).unwrap();
        store.consume_at(KEY, 2, WINDOW, 1_030).unwrap();

        let rejected = store.consume_at(KEY, 2, WINDOW, 1_059).unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.resets_at, 1_060);

        let consumption = store.consume_at(KEY, 2, WINDOW, 1_060).unwrap();
        assert!(consumption.allowed);
        assert_eq!(consumption.remaining, 0);
        assert_eq!(consumption.resets_at, 1_090);

        assert!(!store.consume_at(KEY, 2, WINDOW, 1_089).unwrap().allowed);
        assert!(store.consume_at(KEY, 2, WINDOW, 1_090).unwrap().allowed);
    }

    #[test]
    fn out_of_range_window_is_counter_store_error() {
        let store = get_test_store();

        let result = store.consume_at(KEY, 1, Duration::seconds(i64::MAX), -1_000);

        assert!(matches!(result, Err(Error::CounterStoreError(_))));
    }

    #[test]
    fn buckets_are_independent() {
        let store = get_test_store();
        store.consume_at("a", 1, WINDOW, 1_000).unwrap();

        let consumption = store.consume_at("b", 1, WINDOW, 1_000).unwrap();

        assert!(consumption.allowed);
    }

    #[test]
    fn state_survives_reopening_the_database() {
        let path = std::env::temp_dir().join(format!(
            "rate_limit_bucket_test_{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        {
            let store = SqliteCounterStore::new(Connection::open(&path).unwrap()).unwrap();
            store.consume(KEY, 1, WINDOW).unwrap();
        }

        let store = SqliteCounterStore::new(Connection::open(&path).unwrap()).unwrap();
        let consumption = store.consume(KEY, 1, WINDOW).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(!consumption.allowed);
    }

    #[test]
    fn concurrent_stores_share_one_bucket() {
        const CAPACITY: u32 = 100;
        const THREADS: usize = 8;
        const CONSUMES_PER_THREAD: usize = 50;

        let path = std::env::temp_dir().join(format!(
            "rate_limit_concurrent_test_{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        // Create the table before the threads race to do it.
        SqliteCounterStore::new(Connection::open(&path).unwrap()).unwrap();

        let results: Vec<Result<bool, Error>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let path = &path;
                    scope.spawn(move || {
                        let store =
                            SqliteCounterStore::new(Connection::open(path).unwrap()).unwrap();

                        (0..CONSUMES_PER_THREAD)
                            .map(|_| {
                                store
                                    .consume_at(KEY, CAPACITY, WINDOW, 1_000)
                                    .map(|consumption| consumption.allowed)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });
        std::fs::remove_file(&path).unwrap();

        let errors = results.iter().filter(|result| result.is_err()).count();
        let allowed = results
            .iter()
            .filter(|result| matches!(result, Ok(true)))
            .count();

        assert_eq!(errors, 0);
        assert_eq!(allowed, CAPACITY as usize);
    }

    #[test]
    fn broken_table_is_counter_store_error() {
        let store = get_test_store();
        store
            .connection
            .lock()
            .unwrap()
            .execute("DROP TABLE rate_limit_hit", ())
            .unwrap();

        let result = store.consume(KEY, 1, WINDOW);

        assert!(matches!(result, Err(Error::CounterStoreError(_))));
    }
}
