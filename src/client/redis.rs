//! Redis-backed client surfaces
//!
//! Both surfaces wrap a `redis::aio::ConnectionManager`, which reconnects on
//! its own and is cheap to clone per call. Requires the `redis-storage`
//! feature.

use super::{Capabilities, ClientSurface, CursorCommands, SetOptions, StreamCommands};
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;

async fn connect(redis_url: &str) -> ClientResult<ConnectionManager> {
    let client = redis::Client::open(redis_url)
        .map_err(|e| ClientError::Connection(format!("Failed to create Redis client: {}", e)))?;
    let conn = ConnectionManager::new(client)
        .await
        .map_err(|e| ClientError::Connection(format!("Failed to connect to Redis: {}", e)))?;
    info!(url = %redis_url, "Connected to Redis");
    Ok(conn)
}

/// Redis behind the cursor-scanning surface (`SCAN cursor MATCH p COUNT n`)
#[derive(Clone)]
pub struct RedisCursorClient {
    conn: ConnectionManager,
}

impl RedisCursorClient {
    /// Connect to `redis_url`
    pub async fn connect(redis_url: &str) -> ClientResult<Self> {
        Ok(Self::from_connection(connect(redis_url).await?))
    }

    /// Wrap an existing connection manager
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CursorCommands for RedisCursorClient {
    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> ClientResult<String> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(reply)
    }

    async fn setex(&self, key: &str, seconds: u64, value: &str) -> ClientResult<String> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("SETEX")
            .arg(key)
            .arg(seconds)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(reply)
    }

    async fn del(&self, keys: &[String]) -> ClientResult<i64> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn expire(&self, key: &str, seconds: u64) -> ClientResult<i64> {
        let mut conn = self.conn.clone();
        let applied: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(applied)
    }

    async fn ttl(&self, key: &str) -> ClientResult<i64> {
        let mut conn = self.conn.clone();
        let remaining: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        Ok(remaining)
    }

    async fn mget(&self, keys: &[String]) -> ClientResult<Vec<Option<String>>> {
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> =
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn scan(
        &self,
        cursor: &str,
        pattern: &str,
        count: usize,
    ) -> ClientResult<(String, Vec<String>)> {
        let mut conn = self.conn.clone();
        let page: (String, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(page)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }
}

impl ClientSurface for RedisCursorClient {
    fn cursor_commands(&self) -> Option<Arc<dyn CursorCommands>> {
        Some(Arc::new(self.clone()))
    }

    fn describe(&self) -> String {
        "RedisCursorClient".to_string()
    }
}

/// Redis behind the stream-scanning surface
///
/// `scan_iter` owns a clone of the connection and pages with `SCAN` as the
/// stream is polled.
#[derive(Clone)]
pub struct RedisStreamClient {
    conn: ConnectionManager,
}

impl RedisStreamClient {
    /// Connect to `redis_url`
    pub async fn connect(redis_url: &str) -> ClientResult<Self> {
        Ok(Self::from_connection(connect(redis_url).await?))
    }

    /// Wrap an existing connection manager
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

struct RedisScan {
    conn: ConnectionManager,
    pattern: String,
    count: usize,
    cursor: Option<u64>,
    page: VecDeque<String>,
}

#[async_trait]
impl StreamCommands for RedisStreamClient {
    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        options: SetOptions,
    ) -> ClientResult<Option<String>> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(seconds) = options.ex {
            cmd.arg("EX").arg(seconds);
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply)
    }

    async fn del(&self, keys: &[String]) -> ClientResult<i64> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn expire(&self, key: &str, seconds: u64) -> ClientResult<bool> {
        let mut conn = self.conn.clone();
        let applied: bool = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(applied)
    }

    async fn ttl(&self, key: &str) -> ClientResult<i64> {
        let mut conn = self.conn.clone();
        let remaining: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        Ok(remaining)
    }

    async fn m_get(&self, keys: &[String]) -> ClientResult<Vec<Option<String>>> {
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> =
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    fn scan_iter(&self, pattern: &str, count: usize) -> BoxStream<'static, ClientResult<String>> {
        let state = RedisScan {
            conn: self.conn.clone(),
            pattern: pattern.to_string(),
            count,
            cursor: Some(0),
            page: VecDeque::new(),
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(key) = state.page.pop_front() {
                    return Some((Ok(key), state));
                }
                let Some(cursor) = state.cursor.take() else {
                    return None;
                };
                let page: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&state.pattern)
                    .arg("COUNT")
                    .arg(state.count)
                    .query_async(&mut state.conn)
                    .await;
                match page {
                    Ok((next, keys)) => {
                        state.page.extend(keys);
                        if next != 0 {
                            state.cursor = Some(next);
                        }
                    }
                    Err(err) => return Some((Err(ClientError::from(err)), state)),
                }
            }
        })
        .boxed()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }
}

impl ClientSurface for RedisStreamClient {
    fn stream_commands(&self) -> Option<Arc<dyn StreamCommands>> {
        Some(Arc::new(self.clone()))
    }

    fn describe(&self) -> String {
        "RedisStreamClient".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StoreClient;

    const REDIS_URL: &str = "redis://localhost:6379";

    #[tokio::test]
    #[ignore] // Only run if Redis is available
    async fn test_redis_cursor_client() {
        let client = StoreClient::new(&RedisCursorClient::connect(REDIS_URL).await.unwrap()).unwrap();
        let key = "kvsession:test:cursor".to_string();

        assert!(client.set_with_expiry(&key, 60, "v").await.unwrap());
        assert_eq!(client.get(&key).await.unwrap().as_deref(), Some("v"));
        assert!(client.time_to_live(&key).await.unwrap().remaining().is_some());

        let keys: Vec<String> = client
            .scan("kvsession:test:*", 100)
            .map(|key| key.unwrap())
            .collect()
            .await;
        assert!(keys.contains(&key));

        assert_eq!(client.delete(&[key.clone()]).await.unwrap(), 1);
        assert!(client.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Only run if Redis is available
    async fn test_redis_stream_client() {
        let client = StoreClient::new(&RedisStreamClient::connect(REDIS_URL).await.unwrap()).unwrap();
        let key = "kvsession:test:stream".to_string();

        assert!(client.set(&key, "v").await.unwrap());
        assert!(client.expire(&key, 60).await.unwrap());
        let values = client
            .multi_get(&[key.clone(), "kvsession:test:missing".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some("v".to_string()), None]);

        assert_eq!(client.delete(&[key.clone()]).await.unwrap(), 1);
    }
}
