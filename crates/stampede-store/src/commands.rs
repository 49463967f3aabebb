use std::time::Duration;

use async_trait::async_trait;

use stampede_core::BackendResult;

/// Low-level primitives over a backing key-value store.
///
/// Every method is a single atomic step against the store; higher layers
/// compose them without any cross-primitive transaction. Two
/// implementations are substitutable: [`crate::RedisCommands`] over a
/// shared connection and [`crate::EmbeddedCommands`] over an in-process
/// database.
///
/// Absence conventions, mirrored exactly by both implementations:
/// - `get_bytes`/`get_float` return `Err(NotFound)` for an absent key;
/// - list pops return `Ok(None)` for an absent or empty list, never
///   `NotFound`;
/// - map reads on missing keys yield empty results;
/// - `get_min` returns `Err(NotFound)` for an absent sorted set while the
///   other sorted-set queries return 0 (a documented asymmetry kept for
///   behavioural compatibility).
#[async_trait]
pub trait Commands: Send + Sync {
    /// Length of the list at `key`; 0 when absent.
    async fn list_length(&self, key: &str) -> BackendResult<i64>;

    /// Appends a blob to the right of the list, atomically against
    /// concurrent pops.
    async fn list_push_bytes(&self, key: &str, value: &[u8]) -> BackendResult<()>;

    /// Appends an integer to the right of the list. Zero is a valid
    /// element and comes back as `Some(0)` on pop.
    async fn list_push_int(&self, key: &str, value: i64) -> BackendResult<()>;

    /// Removes and returns the leftmost blob.
    async fn list_pop_bytes(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Removes and returns the leftmost integer.
    async fn list_pop_int(&self, key: &str) -> BackendResult<Option<i64>>;

    /// Reads the blob at `key`.
    async fn get_bytes(&self, key: &str) -> BackendResult<Vec<u8>>;

    /// Reads the float at `key`.
    async fn get_float(&self, key: &str) -> BackendResult<f64>;

    /// Writes a blob, optionally expiring after `ttl`.
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Option<Duration>)
        -> BackendResult<()>;

    /// Writes a float, optionally expiring after `ttl`.
    async fn set_float(&self, key: &str, value: f64, ttl: Option<Duration>) -> BackendResult<()>;

    /// Inserts a fresh unique member scored by `score` into the sorted set
    /// at `key`. Repeated inserts of the same score are distinct members.
    async fn add_to_set(&self, key: &str, score: f64) -> BackendResult<()>;

    /// Smallest value in the sorted set. `NotFound` when the set is absent.
    async fn get_min(&self, key: &str) -> BackendResult<f64>;

    /// Largest value in the sorted set; 0 when absent.
    async fn get_max(&self, key: &str) -> BackendResult<f64>;

    /// The upper median: the value at 0-based index `n / 2` of the
    /// ascending order; 0 when absent.
    async fn get_median(&self, key: &str) -> BackendResult<f64>;

    /// Number of members in the sorted set; 0 when absent.
    async fn get_cardinality(&self, key: &str) -> BackendResult<i64>;

    /// Number of members with `min <= score <= max`. A negative `min` is
    /// treated as negative infinity and a negative `max` as positive
    /// infinity.
    async fn range_count(&self, key: &str, min: f64, max: f64) -> BackendResult<i64>;

    /// Atomically adds `amount` to the named float counter.
    async fn increment_counter(&self, key: &str, amount: f64) -> BackendResult<()>;

    /// Sets `key` to `value` in the hash named `map`.
    async fn map_set_key(&self, map: &str, key: &str, value: &[u8]) -> BackendResult<()>;

    /// Reads `key` from the hash named `map`; `None` when either is absent.
    async fn map_get_key_bytes(&self, map: &str, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Keys of the hash named `map`, in implementation-defined order.
    async fn map_get_keys(&self, map: &str) -> BackendResult<Vec<String>>;

    /// Removes `key` from the hash named `map`; absent keys are a no-op.
    async fn map_key_delete(&self, map: &str, key: &str) -> BackendResult<()>;

    /// Releases the backing store.
    async fn close(&self) -> BackendResult<()>;
}
