//! Redis implementation of the store facade.
//!
//! Most commands go through a shared [`ConnectionManager`] (which handles
//! reconnection automatically), cloned per call the way the rest of the
//! ecosystem uses it. Two families of operations need a dedicated
//! connection instead:
//!
//! - `WATCH`/`MULTI`/`EXEC` transactions, because the watch state is tied
//!   to one connection and must not interleave with unrelated commands;
//! - blocking pops (`BLPOP`/`BRPOP`), because a blocking command would
//!   stall every other caller multiplexed onto the shared connection.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use super::{KeyTtl, PoppedValue, StoreBackend, StoreError};

/// Store facade backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    /// Client handle, kept for opening dedicated connections.
    client: redis::Client,
    /// Shared multiplexed connection for non-blocking commands.
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, conn })
    }

    /// Opens a dedicated (non-multiplexed) connection for transactions and
    /// blocking commands.
    async fn dedicated_connection(&self) -> Result<redis::aio::Connection, StoreError> {
        Ok(self.client.get_async_connection().await?)
    }

    /// Converts an expiry to whole seconds for Redis, rounding sub-second
    /// durations up so a short expiry never becomes "no expiry".
    fn expiry_secs(expiry: Duration) -> i64 {
        let secs = expiry.as_secs();
        if secs == 0 && expiry.subsec_nanos() > 0 {
            1
        } else {
            secs as i64
        }
    }

    /// Maps a dequeue timeout to the server-side blocking argument. `None`
    /// is 0 ("block forever"); a finite timeout rounds up to at least one
    /// whole second, so a zero or sub-second timeout never turns into an
    /// unbounded block.
    fn block_secs(timeout: Option<Duration>) -> i64 {
        timeout.map_or(0, |t| Self::expiry_secs(t).max(1))
    }

    async fn pop_blocking(
        &self,
        command: &str,
        keys: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<PoppedValue>, StoreError> {
        if keys.is_empty() {
            return Ok(None);
        }

        let timeout_secs = Self::block_secs(timeout);

        let mut conn = self.dedicated_connection().await?;
        let mut cmd = redis::cmd(command);
        for key in keys {
            cmd.arg(key);
        }
        cmd.arg(timeout_secs);

        let popped: Option<PoppedValue> = cmd.query_async(&mut conn).await?;
        Ok(popped)
    }
}

#[async_trait]
impl StoreBackend for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.set_nx(key, value).await?)
    }

    async fn get_and_replace(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.getset(key, value).await?)
    }

    async fn get_and_replace_with_expiry(
        &self,
        key: &str,
        value: &str,
        expiry: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("GETSET")
            .arg(key)
            .arg(value)
            .cmd("EXPIRE")
            .arg(key)
            .arg(Self::expiry_secs(expiry))
            .ignore();

        let (old,): (Option<String>,) = pipe.query_async(&mut conn).await?;
        Ok(old)
    }

    async fn set_if_allowed(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Duration>,
        allow: for<'a> fn(Option<&'a str>) -> bool,
    ) -> Result<bool, StoreError> {
        let mut conn = self.dedicated_connection().await?;

        redis::cmd("WATCH")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await?;

        let current: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        if !allow(current.as_deref()) {
            redis::cmd("UNWATCH").query_async::<_, ()>(&mut conn).await?;
            return Ok(false);
        }

        let mut pipe = redis::pipe();
        let cmd = pipe.atomic().cmd("SET").arg(key).arg(value);
        if let Some(expiry) = expiry {
            cmd.arg("EX").arg(Self::expiry_secs(expiry));
        }

        // EXEC replies nil when the watched key changed underneath us.
        let committed: Option<()> = pipe.query_async(&mut conn).await?;
        if committed.is_none() {
            debug!(key, "conditional commit aborted by concurrent write");
        }
        Ok(committed.is_some())
    }

    async fn expire(&self, key: &str, expiry: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let applied: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(Self::expiry_secs(expiry))
            .query_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let mut conn = self.conn.clone();
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        Ok(match ttl {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            secs => KeyTtl::Remaining(Duration::from_secs(secs.max(0) as u64)),
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys.to_vec()).await?;
        Ok(())
    }

    async fn push_head(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        // One LPUSH with every member keeps the batch all-or-nothing.
        conn.lpush::<_, _, ()>(key, values.to_vec()).await?;
        Ok(())
    }

    async fn push_tail(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(key, values.to_vec()).await?;
        Ok(())
    }

    async fn pop_head_blocking(
        &self,
        keys: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<PoppedValue>, StoreError> {
        self.pop_blocking("BLPOP", keys, timeout).await
    }

    async fn pop_tail_blocking(
        &self,
        keys: &[String],
        timeout: Option<Duration>,
    ) -> Result<Option<PoppedValue>, StoreError> {
        self.pop_blocking("BRPOP", keys, timeout).await
    }

    async fn peek(&self, key: &str, index: i64) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.lindex(key, index as isize).await?)
    }

    async fn list_len(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(key).await?)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.keys(pattern).await?)
    }

    async fn sorted_insert(
        &self,
        key: &str,
        entries: &[(String, f64)],
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(key);
        for (member, score) in entries {
            cmd.arg(*score).arg(member);
        }
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn sorted_peek_max(&self, key: &str) -> Result<Option<(String, f64)>, StoreError> {
        let mut conn = self.conn.clone();
        let top: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        Ok(top.into_iter().next())
    }

    async fn sorted_pop_max(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();

        // The read and the rank removal land in one MULTI so a concurrent
        // dequeue cannot take the same member. Ad-hoc removals issued by
        // third parties are not defended against; this is best-effort.
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREVRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .cmd("ZREMRANGEBYRANK")
            .arg(key)
            .arg(-1)
            .arg(-1)
            .ignore();

        let (members,): (Vec<String>,) = pipe.query_async(&mut conn).await?;
        Ok(members.into_iter().next())
    }

    async fn sorted_len(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("ZLEXCOUNT")
            .arg(key)
            .arg("-")
            .arg("+")
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}
