//! In-memory expiring key-value backend
//!
//! [`MemoryKv`] is a string map with per-key expiry, protected by an async
//! RwLock and measured on `tokio::time::Instant` so paused-clock tests can
//! drive expiry. It is exposed through both client surfaces:
//! [`MemoryCursorClient`] and [`MemoryStreamClient`]. Suitable for
//! development, tests, and single-process deployments.

use super::{
    Capabilities, ClientSurface, CursorCommands, SetOptions, StreamCommands, OK_REPLY,
    SCAN_CURSOR_START,
};
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use regex::Regex;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Writes between full sweeps of expired entries
const SWEEP_INTERVAL: u64 = 1024;

/// Prefix of a cursor that resumes after the named key
const CURSOR_AFTER: &str = "after:";

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct Table {
    entries: BTreeMap<String, Entry>,
    writes: u64,
}

impl Table {
    fn live(&self, key: &str, now: Instant) -> Option<&Entry> {
        self.entries.get(key).filter(|entry| entry.is_live(now))
    }

    /// Drop `key` if it has expired
    fn evict(&mut self, key: &str, now: Instant) {
        if self.entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            self.entries.remove(key);
        }
    }

    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before - self.entries.len()
    }
}

/// Shared in-memory key-value map with per-key expiry
///
/// Clones share the same map. Expired entries are dropped when a read or
/// `expire` finds them, and by a full sweep every [`SWEEP_INTERVAL`] writes.
///
/// # Examples
///
/// ```
/// use kvsession::client::memory::MemoryKv;
///
/// #[tokio::main]
/// async fn main() {
///     let kv = MemoryKv::new();
///     kv.set("greeting", "hello", Some(60)).await;
///     assert_eq!(kv.get("greeting").await.as_deref(), Some("hello"));
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    table: Arc<RwLock<Table>>,
}

impl MemoryKv {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Live value at `key`
    pub async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let table = self.table.read().await;
            match table.entries.get(key) {
                None => return None,
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }
        self.table.write().await.evict(key, now);
        None
    }

    /// Write `value`, replacing any previous value and expiry
    pub async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) {
        let now = Instant::now();
        let expires_at = ttl_secs.map(|secs| now + Duration::from_secs(secs));
        let mut table = self.table.write().await;
        table.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        table.writes += 1;
        if table.writes % SWEEP_INTERVAL == 0 {
            table.sweep(now);
        }
    }

    /// Remove `keys`, returning how many were live
    pub async fn delete(&self, keys: &[String]) -> u64 {
        let now = Instant::now();
        let mut table = self.table.write().await;
        keys.iter()
            .filter_map(|key| table.entries.remove(key))
            .filter(|entry| entry.is_live(now))
            .count() as u64
    }

    /// Set a live key to expire after `secs`; `false` when the key is absent
    pub async fn expire(&self, key: &str, secs: u64) -> bool {
        let now = Instant::now();
        let mut table = self.table.write().await;
        if let Some(entry) = table.entries.get_mut(key).filter(|entry| entry.is_live(now)) {
            entry.expires_at = Some(now + Duration::from_secs(secs));
            return true;
        }
        table.evict(key, now);
        false
    }

    /// Remaining seconds, `-1` without expiry, `-2` when absent
    pub async fn ttl(&self, key: &str) -> i64 {
        let now = Instant::now();
        let table = self.table.read().await;
        match table.live(key, now) {
            Some(entry) => match entry.expires_at {
                Some(at) => {
                    let millis = at.saturating_duration_since(now).as_millis();
                    i64::try_from((millis + 500) / 1_000).unwrap_or(i64::MAX)
                }
                None => -1,
            },
            None => -2,
        }
    }

    /// Live values for `keys`, in order
    pub async fn get_many(&self, keys: &[String]) -> Vec<Option<String>> {
        let now = Instant::now();
        let table = self.table.read().await;
        keys.iter()
            .map(|key| table.live(key, now).map(|entry| entry.value.clone()))
            .collect()
    }

    /// Inspect up to `count` live keys in sorted order, strictly after `after`
    ///
    /// Returns the matching keys and the last key inspected, or `None` once
    /// the key space is exhausted. Resuming from a key rather than a position
    /// means keys deleted mid-scan never cause later keys to be skipped.
    pub async fn scan_page(
        &self,
        after: Option<&str>,
        pattern: &Regex,
        count: usize,
    ) -> (Option<String>, Vec<String>) {
        let now = Instant::now();
        let table = self.table.read().await;
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let mut live = table
            .entries
            .range::<str, _>((lower, Bound::Unbounded))
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key);

        let inspected: Vec<&String> = live.by_ref().take(count.max(1)).collect();
        let next = match (inspected.last(), live.next()) {
            (Some(last), Some(_)) => Some((*last).clone()),
            _ => None,
        };
        let page = inspected
            .into_iter()
            .filter(|key| pattern.is_match(key))
            .cloned()
            .collect();
        (next, page)
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.table
            .read()
            .await
            .entries
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        self.table.write().await.sweep(Instant::now())
    }

    /// Remove every key
    pub async fn clear(&self) {
        self.table.write().await.entries.clear();
    }

    /// Store a raw value without going through any client surface
    ///
    /// Useful for seeding records a session store did not write.
    pub async fn insert_raw(&self, key: &str, value: &str) {
        self.set(key, value, None).await;
    }

    #[cfg(test)]
    async fn stored(&self) -> usize {
        self.table.read().await.entries.len()
    }
}

/// Translate a store glob (`*`, `?`, `[...]`, `\x`) into an anchored regex
pub fn glob_to_regex(pattern: &str) -> ClientResult<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    re.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == ']' {
                        closed = true;
                        break;
                    }
                    class.push(n);
                }
                if closed && !class.is_empty() {
                    re.push('[');
                    for (i, n) in class.chars().enumerate() {
                        match n {
                            '^' if i == 0 => re.push('^'),
                            '-' => re.push('-'),
                            other => re.push_str(&regex::escape(&other.to_string())),
                        }
                    }
                    re.push(']');
                } else {
                    re.push_str(&regex::escape(&format!("[{}", class)));
                    if closed {
                        re.push_str(&regex::escape("]"));
                    }
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| ClientError::Protocol(format!("invalid pattern {pattern}: {e}")))
}

/// [`MemoryKv`] behind the cursor-scanning surface
#[derive(Debug, Clone)]
pub struct MemoryCursorClient {
    kv: MemoryKv,
    capabilities: Capabilities,
}

impl MemoryCursorClient {
    pub fn new(kv: MemoryKv) -> Self {
        Self {
            kv,
            capabilities: Capabilities::full(),
        }
    }

    /// Restrict which optional primitives this client announces
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn kv(&self) -> &MemoryKv {
        &self.kv
    }
}

#[async_trait]
impl CursorCommands for MemoryCursorClient {
    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.kv.get(key).await)
    }

    async fn set(&self, key: &str, value: &str) -> ClientResult<String> {
        self.kv.set(key, value, None).await;
        Ok(OK_REPLY.to_string())
    }

    async fn setex(&self, key: &str, seconds: u64, value: &str) -> ClientResult<String> {
        if !self.capabilities.set_ex {
            return Err(ClientError::Unsupported("SETEX"));
        }
        self.kv.set(key, value, Some(seconds)).await;
        Ok(OK_REPLY.to_string())
    }

    async fn del(&self, keys: &[String]) -> ClientResult<i64> {
        Ok(self.kv.delete(keys).await as i64)
    }

    async fn expire(&self, key: &str, seconds: u64) -> ClientResult<i64> {
        Ok(i64::from(self.kv.expire(key, seconds).await))
    }

    async fn ttl(&self, key: &str) -> ClientResult<i64> {
        if !self.capabilities.ttl {
            return Err(ClientError::Unsupported("TTL"));
        }
        Ok(self.kv.ttl(key).await)
    }

    async fn mget(&self, keys: &[String]) -> ClientResult<Vec<Option<String>>> {
        Ok(self.kv.get_many(keys).await)
    }

    async fn scan(
        &self,
        cursor: &str,
        pattern: &str,
        count: usize,
    ) -> ClientResult<(String, Vec<String>)> {
        let after = if cursor == SCAN_CURSOR_START {
            None
        } else {
            let key = cursor
                .strip_prefix(CURSOR_AFTER)
                .ok_or_else(|| ClientError::Protocol(format!("invalid scan cursor {cursor}")))?;
            Some(key)
        };
        let regex = glob_to_regex(pattern)?;
        let (next, keys) = self.kv.scan_page(after, &regex, count).await;
        let next = next.map_or_else(
            || SCAN_CURSOR_START.to_string(),
            |key| format!("{CURSOR_AFTER}{key}"),
        );
        Ok((next, keys))
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

impl ClientSurface for MemoryCursorClient {
    fn cursor_commands(&self) -> Option<Arc<dyn CursorCommands>> {
        Some(Arc::new(self.clone()))
    }
}

/// [`MemoryKv`] behind the stream-scanning surface
#[derive(Debug, Clone)]
pub struct MemoryStreamClient {
    kv: MemoryKv,
    capabilities: Capabilities,
}

impl MemoryStreamClient {
    pub fn new(kv: MemoryKv) -> Self {
        Self {
            kv,
            capabilities: Capabilities::full(),
        }
    }

    /// Restrict which optional primitives this client announces
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn kv(&self) -> &MemoryKv {
        &self.kv
    }
}

struct StreamScan {
    kv: MemoryKv,
    pattern: Regex,
    count: usize,
    after: Option<String>,
    exhausted: bool,
    page: VecDeque<String>,
}

#[async_trait]
impl StreamCommands for MemoryStreamClient {
    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.kv.get(key).await)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        options: SetOptions,
    ) -> ClientResult<Option<String>> {
        if options.ex.is_some() && !self.capabilities.set_ex {
            return Err(ClientError::Unsupported("SET EX"));
        }
        self.kv.set(key, value, options.ex).await;
        Ok(Some(OK_REPLY.to_string()))
    }

    async fn del(&self, keys: &[String]) -> ClientResult<i64> {
        Ok(self.kv.delete(keys).await as i64)
    }

    async fn expire(&self, key: &str, seconds: u64) -> ClientResult<bool> {
        Ok(self.kv.expire(key, seconds).await)
    }

    async fn ttl(&self, key: &str) -> ClientResult<i64> {
        if !self.capabilities.ttl {
            return Err(ClientError::Unsupported("TTL"));
        }
        Ok(self.kv.ttl(key).await)
    }

    async fn m_get(&self, keys: &[String]) -> ClientResult<Vec<Option<String>>> {
        if !self.capabilities.batched_get {
            return Err(ClientError::Unsupported("MGET"));
        }
        Ok(self.kv.get_many(keys).await)
    }

    fn scan_iter(&self, pattern: &str, count: usize) -> BoxStream<'static, ClientResult<String>> {
        let pattern = match glob_to_regex(pattern) {
            Ok(pattern) => pattern,
            Err(err) => return stream::once(async move { Err(err) }).boxed(),
        };
        let state = StreamScan {
            kv: self.kv.clone(),
            pattern,
            count: count.max(1),
            after: None,
            exhausted: false,
            page: VecDeque::new(),
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(key) = state.page.pop_front() {
                    return Some((Ok(key), state));
                }
                if state.exhausted {
                    return None;
                }
                let (next, keys) = state
                    .kv
                    .scan_page(state.after.as_deref(), &state.pattern, state.count)
                    .await;
                state.page.extend(keys);
                state.exhausted = next.is_none();
                state.after = next;
            }
        })
        .boxed()
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

impl ClientSurface for MemoryStreamClient {
    fn stream_commands(&self) -> Option<Arc<dyn StreamCommands>> {
        Some(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let kv = MemoryKv::new();
        kv.set("a", "1", None).await;
        assert_eq!(kv.get("a").await.as_deref(), Some("1"));
        assert!(kv.get("b").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let kv = MemoryKv::new();
        kv.set("a", "1", Some(2)).await;
        assert_eq!(kv.ttl("a").await, 2);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(kv.get("a").await.as_deref(), Some("1"));
        assert_eq!(kv.ttl("a").await, 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(kv.get("a").await.is_none());
        assert_eq!(kv.ttl("a").await, -2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_extends_live_key_only() {
        let kv = MemoryKv::new();
        kv.set("a", "1", Some(1)).await;
        assert!(kv.expire("a", 10).await);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(kv.get("a").await.is_some());
        assert!(!kv.expire("missing", 10).await);
    }

    #[tokio::test]
    async fn test_ttl_without_expiry() {
        let kv = MemoryKv::new();
        kv.set("a", "1", None).await;
        assert_eq!(kv.ttl("a").await, -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_counts_live_keys_only() {
        let kv = MemoryKv::new();
        kv.set("a", "1", None).await;
        kv.set("b", "2", Some(1)).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let removed = kv
            .delete(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await;
        assert_eq!(removed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_len_and_purge() {
        let kv = MemoryKv::new();
        assert!(kv.is_empty().await);
        kv.set("a", "1", None).await;
        kv.set("b", "2", Some(1)).await;
        assert_eq!(kv.len().await, 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(kv.len().await, 1);
        assert_eq!(kv.purge_expired().await, 1);

        kv.clear().await;
        assert!(kv.is_empty().await);
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("session:*").unwrap();
        assert!(re.is_match("session:abc"));
        assert!(re.is_match("session:"));
        assert!(!re.is_match("sessions:abc"));
        assert!(!re.is_match("xsession:abc"));

        let re = glob_to_regex("h?llo").unwrap();
        assert!(re.is_match("hello"));
        assert!(!re.is_match("heello"));

        let re = glob_to_regex("h[ae]llo").unwrap();
        assert!(re.is_match("hallo"));
        assert!(!re.is_match("hillo"));

        let re = glob_to_regex("h[^e]llo").unwrap();
        assert!(re.is_match("hallo"));
        assert!(!re.is_match("hello"));

        let re = glob_to_regex("a.b\\*").unwrap();
        assert!(re.is_match("a.b*"));
        assert!(!re.is_match("axb*"));
        assert!(!re.is_match("a.bc"));
    }

    #[tokio::test]
    async fn test_cursor_scan_pages() {
        let client = MemoryCursorClient::new(MemoryKv::new());
        for i in 0..5 {
            client.kv().set(&format!("k:{i}"), "v", None).await;
        }
        client.kv().set("other", "v", None).await;

        let (cursor, first) = client.scan("0", "k:*", 4).await.unwrap();
        assert_eq!(cursor, "after:k:3");
        assert_eq!(first, vec!["k:0", "k:1", "k:2", "k:3"]);

        let (cursor, second) = client.scan(&cursor, "k:*", 4).await.unwrap();
        assert_eq!(cursor, "0");
        assert_eq!(second, vec!["k:4"]);
    }

    #[tokio::test]
    async fn test_cursor_scan_survives_deletes_between_pages() {
        let client = MemoryCursorClient::new(MemoryKv::new());
        for i in 0..10 {
            client.kv().set(&format!("k:{i}"), "v", None).await;
        }

        let mut cursor = SCAN_CURSOR_START.to_string();
        let mut removed = 0;
        loop {
            let (next, keys) = client.scan(&cursor, "k:*", 3).await.unwrap();
            removed += client.del(&keys).await.unwrap();
            if next == SCAN_CURSOR_START {
                break;
            }
            cursor = next;
        }
        assert_eq!(removed, 10);
        assert!(client.kv().is_empty().await);
    }

    #[tokio::test]
    async fn test_stream_scan_survives_deletes_between_pages() {
        let client = MemoryStreamClient::new(MemoryKv::new());
        for i in 0..10 {
            client.kv().set(&format!("k:{i}"), "v", None).await;
        }

        let mut keys = client.scan_iter("k:*", 3);
        let mut removed = 0;
        while let Some(key) = keys.next().await {
            removed += client.del(&[key.unwrap()]).await.unwrap();
        }
        assert_eq!(removed, 10);
        assert!(client.kv().is_empty().await);
    }

    #[tokio::test]
    async fn test_scan_page_skips_expired_keys() {
        let kv = MemoryKv::new();
        let all = glob_to_regex("*").unwrap();
        kv.set("a", "1", None).await;
        kv.set("b", "2", Some(0)).await;
        kv.set("c", "3", None).await;

        let (next, page) = kv.scan_page(None, &all, 1).await;
        assert_eq!(page, vec!["a"]);
        assert_eq!(next.as_deref(), Some("a"));

        let (next, page) = kv.scan_page(next.as_deref(), &all, 1).await;
        assert_eq!(page, vec!["c"]);
        assert!(next.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_evicted() {
        let kv = MemoryKv::new();
        kv.set("read", "1", Some(1)).await;
        kv.set("touched", "1", Some(1)).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(kv.get("read").await.is_none());
        assert!(!kv.expire("touched", 10).await);
        assert_eq!(kv.stored().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_expired_entries() {
        let kv = MemoryKv::new();
        for i in 0..SWEEP_INTERVAL - 1 {
            kv.set(&format!("old:{i}"), "v", Some(1)).await;
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(kv.stored().await, (SWEEP_INTERVAL - 1) as usize);

        kv.set("fresh", "v", None).await;
        assert_eq!(kv.stored().await, 1);
    }

    #[tokio::test]
    async fn test_cursor_scan_rejects_bad_cursor() {
        let client = MemoryCursorClient::new(MemoryKv::new());
        let result = client.scan("not-a-number", "*", 10).await;
        assert!(matches!(result, Err(ClientError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_stream_scan_yields_all_matches() {
        let client = MemoryStreamClient::new(MemoryKv::new());
        for i in 0..7 {
            client.kv().set(&format!("k:{i}"), "v", None).await;
        }
        client.kv().set("other", "v", None).await;

        let keys: Vec<String> = client
            .scan_iter("k:*", 3)
            .map(|key| key.unwrap())
            .collect()
            .await;
        assert_eq!(keys.len(), 7);
        assert!(keys.iter().all(|k| k.starts_with("k:")));
    }

    #[tokio::test]
    async fn test_unannounced_primitives_are_rejected() {
        let kv = MemoryKv::new();
        let cursor = MemoryCursorClient::new(kv.clone()).with_capabilities(Capabilities::minimal());
        assert!(matches!(
            cursor.setex("a", 1, "v").await,
            Err(ClientError::Unsupported("SETEX"))
        ));
        assert!(matches!(cursor.ttl("a").await, Err(ClientError::Unsupported("TTL"))));

        let stream = MemoryStreamClient::new(kv).with_capabilities(Capabilities::minimal());
        assert!(stream.m_get(&["a".to_string()]).await.is_err());
        assert!(stream.set("a", "v", SetOptions::expire_in(1)).await.is_err());
        assert!(stream.set("a", "v", SetOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let kv = MemoryKv::new();
        let kv1 = kv.clone();
        let kv2 = kv.clone();

        let handle1 = tokio::spawn(async move {
            for i in 0..10 {
                kv1.set(&format!("a:{i}"), "v", Some(60)).await;
            }
        });

        let handle2 = tokio::spawn(async move {
            for i in 0..10 {
                kv2.set(&format!("b:{i}"), "v", None).await;
            }
        });

        handle1.await.unwrap();
        handle2.await.unwrap();

        assert_eq!(kv.len().await, 20);
    }
}
