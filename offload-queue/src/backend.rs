//! Storage backend trait shared by the job store and the index structures.

use crate::error::QueueResult;
use async_trait::async_trait;
use std::time::Duration;

/// Primitive storage operations the queue is built on.
///
/// The vocabulary is a small subset of Redis: expiring JSON strings, a
/// list used as a FIFO, and score-ordered sets. Every operation that moves
/// an id between collections is atomic, so several workers can share one
/// backend without extra locking.
///
/// Any error means the store could not serve the request and is reported
/// as [`QueueError::Unavailable`](crate::QueueError::Unavailable).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl`.
    async fn set_json(&self, key: &str, value: String, ttl: Duration) -> QueueResult<()>;

    /// Overwrite `key` and reset its expiry, only if it currently exists.
    ///
    /// Returns `false` when the key is missing or expired.
    async fn replace_json(&self, key: &str, value: String, ttl: Duration) -> QueueResult<bool>;

    /// Read `key`; expired keys read as `None`.
    async fn get_json(&self, key: &str) -> QueueResult<Option<String>>;

    /// Append `member` to the tail of `list`.
    async fn push(&self, list: &str, member: &str) -> QueueResult<()>;

    /// Remove and return the head of `list`.
    async fn pop(&self, list: &str) -> QueueResult<Option<String>>;

    /// Atomically pop the head of `list` and add it to `set` with `score`.
    async fn pop_into(&self, list: &str, set: &str, score: i64) -> QueueResult<Option<String>>;

    /// Number of members in `list`.
    async fn list_len(&self, list: &str) -> QueueResult<usize>;

    /// Add `member` to `set` with `score`, replacing any previous score.
    async fn set_add(&self, set: &str, member: &str, score: i64) -> QueueResult<()>;

    /// Remove `member` from `set`. Returns whether it was present.
    async fn set_remove(&self, set: &str, member: &str) -> QueueResult<bool>;

    /// Number of members in `set`.
    async fn set_len(&self, set: &str) -> QueueResult<usize>;

    /// Atomically move every member of `set` scored at or below `max_score`
    /// onto the tail of `list`, lowest score first.
    ///
    /// Returns how many members moved. A member is moved by exactly one
    /// caller even when several run concurrently.
    async fn move_due(&self, set: &str, list: &str, max_score: i64) -> QueueResult<usize>;

    /// Check that the store is reachable.
    async fn ping(&self) -> QueueResult<()>;
}
