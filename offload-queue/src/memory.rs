//! In-memory backend (for testing/development).

use crate::backend::Backend;
use crate::error::{QueueError, QueueResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Default)]
struct State {
    values: HashMap<String, (String, Instant)>,
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, HashMap<String, i64>>,
}

impl State {
    fn live_value(&mut self, key: &str) -> Option<&String> {
        let expired = match self.values.get(key) {
            Some((_, expires_at)) => *expires_at <= Instant::now(),
            None => return None,
        };
        if expired {
            self.values.remove(key);
            return None;
        }
        self.values.get(key).map(|(value, _)| value)
    }

    fn evict_expired(&mut self) {
        let now = Instant::now();
        self.values.retain(|_, (_, expires_at)| *expires_at > now);
    }

    fn push_back(&mut self, list: &str, member: String) {
        self.lists
            .entry(list.to_string())
            .or_default()
            .push_back(member);
    }
}

/// Process-local backend with the same atomicity as the Redis one.
///
/// Every operation runs under a single lock. Expiry is measured with
/// tokio's clock, so tests can fast-forward TTLs with a paused runtime.
/// Cloning shares the underlying state.
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    available: Arc<AtomicBool>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the store going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of unexpired values currently stored.
    pub async fn value_count(&self) -> usize {
        let mut state = self.state.lock().await;
        state.evict_expired();
        state.values.len()
    }

    /// Clear all data.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.values.clear();
        state.lists.clear();
        state.sets.clear();
    }

    fn check(&self) -> QueueResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Unavailable("memory backend offline".to_string()))
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn set_json(&self, key: &str, value: String, ttl: Duration) -> QueueResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.evict_expired();
        state
            .values
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn replace_json(&self, key: &str, value: String, ttl: Duration) -> QueueResult<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        if state.live_value(key).is_none() {
            return Ok(false);
        }
        state
            .values
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(true)
    }

    async fn get_json(&self, key: &str) -> QueueResult<Option<String>> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(state.live_value(key).cloned())
    }

    async fn push(&self, list: &str, member: &str) -> QueueResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.push_back(list, member.to_string());
        Ok(())
    }

    async fn pop(&self, list: &str) -> QueueResult<Option<String>> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(state.lists.get_mut(list).and_then(|items| items.pop_front()))
    }

    async fn pop_into(&self, list: &str, set: &str, score: i64) -> QueueResult<Option<String>> {
        self.check()?;
        let mut state = self.state.lock().await;
        let popped = state.lists.get_mut(list).and_then(|items| items.pop_front());
        if let Some(member) = &popped {
            state
                .sets
                .entry(set.to_string())
                .or_default()
                .insert(member.clone(), score);
        }
        Ok(popped)
    }

    async fn list_len(&self, list: &str) -> QueueResult<usize> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.lists.get(list).map_or(0, VecDeque::len))
    }

    async fn set_add(&self, set: &str, member: &str, score: i64) -> QueueResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        state
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> QueueResult<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(state
            .sets
            .get_mut(set)
            .is_some_and(|members| members.remove(member).is_some()))
    }

    async fn set_len(&self, set: &str) -> QueueResult<usize> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.sets.get(set).map_or(0, HashMap::len))
    }

    async fn move_due(&self, set: &str, list: &str, max_score: i64) -> QueueResult<usize> {
        self.check()?;
        let mut state = self.state.lock().await;

        let mut due: Vec<(i64, String)> = match state.sets.get_mut(set) {
            Some(members) => {
                let ids: Vec<(i64, String)> = members
                    .iter()
                    .filter(|(_, score)| **score <= max_score)
                    .map(|(member, score)| (*score, member.clone()))
                    .collect();
                for (_, member) in &ids {
                    members.remove(member);
                }
                ids
            }
            None => return Ok(0),
        };
        due.sort();

        let moved = due.len();
        for (_, member) in due {
            state.push_back(list, member);
        }
        Ok(moved)
    }

    async fn ping(&self) -> QueueResult<()> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let backend = MemoryBackend::new();
        backend
            .set_json("k", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(backend.get_json("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(backend.get_json("missing").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_values_expire() {
        let backend = MemoryBackend::new();
        backend
            .set_json("k", "v".to_string(), Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(backend.get_json("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(backend.get_json("k").await.unwrap().is_none());
        assert_eq!(backend.value_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_evict_expired_values() {
        let backend = MemoryBackend::new();
        backend
            .set_json("old", "v".to_string(), Duration::from_secs(1))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        backend
            .set_json("new", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        {
            let state = backend.state.lock().await;
            assert_eq!(state.values.len(), 1);
            assert!(state.values.contains_key("new"));
        }

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(backend.value_count().await, 0);
        assert!(backend.state.lock().await.values.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_refreshes_ttl_only_when_present() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(10);

        assert!(!backend.replace_json("k", "x".to_string(), ttl).await.unwrap());
        assert!(backend.get_json("k").await.unwrap().is_none());

        backend.set_json("k", "a".to_string(), ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(backend.replace_json("k", "b".to_string(), ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(backend.get_json("k").await.unwrap(), Some("b".to_string()));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!backend.replace_json("k", "c".to_string(), ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_is_fifo() {
        let backend = MemoryBackend::new();
        backend.push("q", "a").await.unwrap();
        backend.push("q", "b").await.unwrap();
        assert_eq!(backend.list_len("q").await.unwrap(), 2);

        assert_eq!(backend.pop("q").await.unwrap(), Some("a".to_string()));
        assert_eq!(backend.pop("q").await.unwrap(), Some("b".to_string()));
        assert_eq!(backend.pop("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_move_due_orders_by_score() {
        let backend = MemoryBackend::new();
        backend.set_add("s", "late", 30).await.unwrap();
        backend.set_add("s", "early", 10).await.unwrap();
        backend.set_add("s", "future", 100).await.unwrap();

        assert_eq!(backend.move_due("s", "q", 50).await.unwrap(), 2);
        assert_eq!(backend.move_due("s", "q", 50).await.unwrap(), 0);
        assert_eq!(backend.set_len("s").await.unwrap(), 1);

        assert_eq!(backend.pop("q").await.unwrap(), Some("early".to_string()));
        assert_eq!(backend.pop("q").await.unwrap(), Some("late".to_string()));
    }

    #[tokio::test]
    async fn test_pop_into_tracks_member() {
        let backend = MemoryBackend::new();
        backend.push("q", "a").await.unwrap();

        let popped = backend.pop_into("q", "leases", 42).await.unwrap();
        assert_eq!(popped, Some("a".to_string()));
        assert_eq!(backend.set_len("leases").await.unwrap(), 1);
        assert!(backend.set_remove("leases", "a").await.unwrap());
        assert!(!backend.set_remove("leases", "a").await.unwrap());

        assert_eq!(backend.pop_into("q", "leases", 42).await.unwrap(), None);
        assert_eq!(backend.set_len("leases").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_backend_errors() {
        let backend = MemoryBackend::new();
        backend.set_available(false);

        let err = backend.push("q", "a").await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(backend.ping().await.is_err());

        backend.set_available(true);
        assert!(backend.ping().await.is_ok());
    }
}
