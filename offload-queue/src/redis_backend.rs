//! Redis backend.

use crate::backend::Backend;
use crate::config::RedisConfig;
use crate::error::{QueueError, QueueResult};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::ConnectionManager};
use std::time::Duration;
use tracing::info;

/// Pops the list head and records it in a sorted set in one step.
const POP_INTO_SCRIPT: &str = r#"
    local member = redis.call("RPOP", KEYS[1])
    if member then
        redis.call("ZADD", KEYS[2], ARGV[1], member)
    end
    return member
"#;

/// Moves every due member of a sorted set onto a list in one step.
const MOVE_DUE_SCRIPT: &str = r#"
    local due = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1])
    for _, member in ipairs(due) do
        redis.call("ZREM", KEYS[1], member)
        redis.call("LPUSH", KEYS[2], member)
    end
    return #due
"#;

/// Backend storing everything in one Redis instance.
///
/// Lists are pushed on the left and popped on the right. Multi-key moves
/// run as Lua scripts, which Redis executes atomically.
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
    pop_into: Script,
    move_due: Script,
}

impl RedisBackend {
    /// Connect using the given configuration.
    pub async fn connect(config: &RedisConfig) -> QueueResult<Self> {
        let client = Client::open(config.connection_url())
            .map_err(|e| QueueError::Config(e.to_string()))?;

        let connection = ConnectionManager::new(client).await?;

        info!(url = %config.url, "Redis backend connected");
        Ok(Self::from_connection(connection))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            pop_into: Script::new(POP_INTO_SCRIPT),
            move_due: Script::new(MOVE_DUE_SCRIPT),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl Backend for RedisBackend {
    async fn set_json(&self, key: &str, value: String, ttl: Duration) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn replace_json(&self, key: &str, value: String, ttl: Duration) -> QueueResult<bool> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("XX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn get_json(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn push(&self, list: &str, member: &str) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.lpush(list, member).await?;
        Ok(())
    }

    async fn pop(&self, list: &str) -> QueueResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.rpop(list, None).await?;
        Ok(value)
    }

    async fn pop_into(&self, list: &str, set: &str, score: i64) -> QueueResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = self
            .pop_into
            .key(list)
            .key(set)
            .arg(score)
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn list_len(&self, list: &str) -> QueueResult<usize> {
        let mut conn = self.connection.clone();
        let len: usize = conn.llen(list).await?;
        Ok(len)
    }

    async fn set_add(&self, set: &str, member: &str, score: i64) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.zadd(set, member, score).await?;
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> QueueResult<bool> {
        let mut conn = self.connection.clone();
        let removed: usize = conn.zrem(set, member).await?;
        Ok(removed > 0)
    }

    async fn set_len(&self, set: &str) -> QueueResult<usize> {
        let mut conn = self.connection.clone();
        let len: usize = conn.zcard(set).await?;
        Ok(len)
    }

    async fn move_due(&self, set: &str, list: &str, max_score: i64) -> QueueResult<usize> {
        let mut conn = self.connection.clone();
        let moved: usize = self
            .move_due
            .key(set)
            .key(list)
            .arg(max_score)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_scripts_touch_expected_commands() {
        assert!(POP_INTO_SCRIPT.contains("RPOP"));
        assert!(POP_INTO_SCRIPT.contains("ZADD"));
        assert!(MOVE_DUE_SCRIPT.contains("ZRANGEBYSCORE"));
        assert!(MOVE_DUE_SCRIPT.contains("LPUSH"));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_round_trip_against_redis() {
        let backend = RedisBackend::connect(&RedisConfig::default()).await.unwrap();
        backend.ping().await.unwrap();

        backend
            .set_json("offload:test:k", "v".to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            backend.get_json("offload:test:k").await.unwrap(),
            Some("v".to_string())
        );

        backend.set_add("offload:test:due", "a", 0).await.unwrap();
        let moved = backend
            .move_due("offload:test:due", "offload:test:list", 1)
            .await
            .unwrap();
        assert_eq!(moved, 1);
        assert_eq!(
            backend.pop("offload:test:list").await.unwrap(),
            Some("a".to_string())
        );
    }
}
