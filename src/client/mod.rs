//! Normalized store client
//!
//! Two underlying client surfaces are recognized:
//!
//! - [`CursorCommands`]: string `"OK"` replies, integer flags, variadic `mget`,
//!   and a cursor-based `scan` that the caller drives page by page.
//! - [`StreamCommands`]: optional `"OK"` replies, boolean flags, an optional
//!   batched `m_get`, and a `scan_iter` that yields keys as a stream.
//!
//! A concrete client announces which surface(s) it has through
//! [`ClientSurface`]. [`StoreClient::new`] classifies it once into a
//! [`ClientShape`] and every later call dispatches on that tag. No reply
//! encoding of either surface leaks past [`StoreClient`].

use crate::error::{ClientResult, StoreError, StoreResult};
use crate::types::TimeToLive;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub mod memory;

#[cfg(feature = "redis-storage")]
pub mod redis;

/// Reply the store uses to acknowledge a write
pub const OK_REPLY: &str = "OK";

/// Cursor value that starts and ends a cursor scan
pub const SCAN_CURSOR_START: &str = "0";

/// Optional primitives a surface may provide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Set and expire in one atomic call
    pub set_ex: bool,
    /// Remaining time-to-live query
    pub ttl: bool,
    /// Batched multi-key get (always present on the cursor surface)
    pub batched_get: bool,
}

impl Capabilities {
    /// Every optional primitive available
    pub const fn full() -> Self {
        Self {
            set_ex: true,
            ttl: true,
            batched_get: true,
        }
    }

    /// No optional primitive available
    pub const fn minimal() -> Self {
        Self {
            set_ex: false,
            ttl: false,
            batched_get: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::full()
    }
}

/// Surface of cursor-scanning clients
///
/// Writes answer `"OK"`, `expire` answers `1`/`0`, `ttl` answers seconds,
/// `-1` (no expiry) or `-2` (missing).
#[async_trait]
pub trait CursorCommands: Send + Sync {
    async fn get(&self, key: &str) -> ClientResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> ClientResult<String>;

    /// Only called when [`Capabilities::set_ex`] is announced
    async fn setex(&self, _key: &str, _seconds: u64, _value: &str) -> ClientResult<String> {
        Err(crate::error::ClientError::Unsupported("SETEX"))
    }

    async fn del(&self, keys: &[String]) -> ClientResult<i64>;

    async fn expire(&self, key: &str, seconds: u64) -> ClientResult<i64>;

    /// Only called when [`Capabilities::ttl`] is announced
    async fn ttl(&self, _key: &str) -> ClientResult<i64> {
        Err(crate::error::ClientError::Unsupported("TTL"))
    }

    async fn mget(&self, keys: &[String]) -> ClientResult<Vec<Option<String>>>;

    /// Fetch one page; a returned cursor of `"0"` means the scan is complete
    async fn scan(
        &self,
        cursor: &str,
        pattern: &str,
        count: usize,
    ) -> ClientResult<(String, Vec<String>)>;

    /// Optional primitives; `batched_get` is ignored for this surface
    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }
}

/// Options for [`StreamCommands::set`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Expire after this many seconds
    pub ex: Option<u64>,
}

impl SetOptions {
    pub fn expire_in(seconds: u64) -> Self {
        Self { ex: Some(seconds) }
    }
}

/// Surface of stream-scanning clients
///
/// `set` answers `Some("OK")` or `None`, `expire` answers a boolean.
#[async_trait]
pub trait StreamCommands: Send + Sync {
    async fn get(&self, key: &str) -> ClientResult<Option<String>>;

    /// `options.ex` is only set when [`Capabilities::set_ex`] is announced
    async fn set(&self, key: &str, value: &str, options: SetOptions)
        -> ClientResult<Option<String>>;

    async fn del(&self, keys: &[String]) -> ClientResult<i64>;

    async fn expire(&self, key: &str, seconds: u64) -> ClientResult<bool>;

    /// Only called when [`Capabilities::ttl`] is announced
    async fn ttl(&self, _key: &str) -> ClientResult<i64> {
        Err(crate::error::ClientError::Unsupported("TTL"))
    }

    /// Only called when [`Capabilities::batched_get`] is announced
    async fn m_get(&self, _keys: &[String]) -> ClientResult<Vec<Option<String>>> {
        Err(crate::error::ClientError::Unsupported("MGET"))
    }

    /// Keys matching `pattern`, fetched lazily `count` at a time
    fn scan_iter(&self, pattern: &str, count: usize) -> BoxStream<'static, ClientResult<String>>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }
}

/// Probe answering which surfaces a concrete client exposes
///
/// Both accessors default to absent; implement the ones the client has.
pub trait ClientSurface {
    fn cursor_commands(&self) -> Option<Arc<dyn CursorCommands>> {
        None
    }

    fn stream_commands(&self) -> Option<Arc<dyn StreamCommands>> {
        None
    }

    /// Name used in the unsupported-client error
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// The classified client
#[derive(Clone)]
pub enum ClientShape {
    Cursor(Arc<dyn CursorCommands>),
    Stream(Arc<dyn StreamCommands>),
}

impl ClientShape {
    /// Short name of the variant
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cursor(_) => "cursor",
            Self::Stream(_) => "stream",
        }
    }
}

impl fmt::Debug for ClientShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientShape::{}", self.name())
    }
}

/// Classify a client by the surfaces it exposes
///
/// A cursor surface without a stream surface is [`ClientShape::Cursor`]; any
/// client with a stream surface is [`ClientShape::Stream`]; anything else is
/// [`StoreError::UnsupportedClient`].
pub fn classify<C: ClientSurface + ?Sized>(client: &C) -> StoreResult<ClientShape> {
    match (client.cursor_commands(), client.stream_commands()) {
        (Some(cursor), None) => Ok(ClientShape::Cursor(cursor)),
        (_, Some(stream)) => Ok(ClientShape::Stream(stream)),
        (None, None) => Err(StoreError::UnsupportedClient(client.describe())),
    }
}

/// One operation contract over either client surface
#[derive(Clone)]
pub struct StoreClient {
    shape: ClientShape,
    capabilities: Capabilities,
}

impl fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreClient")
            .field("shape", &self.shape)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl StoreClient {
    /// Wrap a client, failing with [`StoreError::UnsupportedClient`] when it
    /// matches neither surface
    pub fn new<C: ClientSurface + ?Sized>(client: &C) -> StoreResult<Self> {
        let shape = classify(client)?;
        let capabilities = match &shape {
            ClientShape::Cursor(c) => Capabilities {
                batched_get: true,
                ..c.capabilities()
            },
            ClientShape::Stream(s) => s.capabilities(),
        };
        debug!(shape = shape.name(), ?capabilities, "Store client classified");
        Ok(Self {
            shape,
            capabilities,
        })
    }

    /// The classified shape
    pub fn shape(&self) -> &ClientShape {
        &self.shape
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Value stored at `key`, `None` when absent
    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value = match &self.shape {
            ClientShape::Cursor(c) => c.get(key).await?,
            ClientShape::Stream(s) => s.get(key).await?,
        };
        Ok(value)
    }

    /// Store `value` at `key` without expiry; `true` iff acknowledged
    pub async fn set(&self, key: &str, value: &str) -> StoreResult<bool> {
        let acknowledged = match &self.shape {
            ClientShape::Cursor(c) => c.set(key, value).await? == OK_REPLY,
            ClientShape::Stream(s) => {
                s.set(key, value, SetOptions::default()).await?.as_deref() == Some(OK_REPLY)
            }
        };
        Ok(acknowledged)
    }

    /// Store `value` at `key` expiring after `seconds`
    ///
    /// Atomic when the client announces `set_ex`. Otherwise this is a set
    /// followed by an expire: if the expire fails the value stays written
    /// without expiry and the call still reports failure.
    pub async fn set_with_expiry(&self, key: &str, seconds: u64, value: &str) -> StoreResult<bool> {
        if !self.capabilities.set_ex {
            debug!(key = %key, "Client lacks atomic set-with-expiry, using set then expire");
            if !self.set(key, value).await? {
                return Ok(false);
            }
            return self.expire(key, seconds).await;
        }

        let acknowledged = match &self.shape {
            ClientShape::Cursor(c) => c.setex(key, seconds, value).await? == OK_REPLY,
            ClientShape::Stream(s) => {
                s.set(key, value, SetOptions::expire_in(seconds))
                    .await?
                    .as_deref()
                    == Some(OK_REPLY)
            }
        };
        Ok(acknowledged)
    }

    /// Remove `keys`, returning how many existed
    pub async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = match &self.shape {
            ClientShape::Cursor(c) => c.del(keys).await?,
            ClientShape::Stream(s) => s.del(keys).await?,
        };
        Ok(u64::try_from(removed).unwrap_or(0))
    }

    /// Set `key` to expire after `seconds`; `true` iff the key existed
    pub async fn expire(&self, key: &str, seconds: u64) -> StoreResult<bool> {
        let applied = match &self.shape {
            ClientShape::Cursor(c) => c.expire(key, seconds).await? == 1,
            ClientShape::Stream(s) => s.expire(key, seconds).await?,
        };
        Ok(applied)
    }

    /// Remaining time-to-live of `key`
    ///
    /// [`TimeToLive::Unknown`] when the client has no TTL primitive.
    pub async fn time_to_live(&self, key: &str) -> StoreResult<TimeToLive> {
        if !self.capabilities.ttl {
            return Ok(TimeToLive::Unknown);
        }
        let reply = match &self.shape {
            ClientShape::Cursor(c) => c.ttl(key).await?,
            ClientShape::Stream(s) => s.ttl(key).await?,
        };
        Ok(TimeToLive::from_reply(reply))
    }

    /// Values for `keys`, in input order, `None` for absent keys
    pub async fn multi_get(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values = match &self.shape {
            ClientShape::Cursor(c) => c.mget(keys).await?,
            ClientShape::Stream(s) if self.capabilities.batched_get => s.m_get(keys).await?,
            ClientShape::Stream(s) => {
                debug!(keys = keys.len(), "Client lacks batched get, fetching keys one by one");
                let mut values = Vec::with_capacity(keys.len());
                for key in keys {
                    values.push(s.get(key).await?);
                }
                values
            }
        };
        if values.len() != keys.len() {
            return Err(crate::error::ClientError::Protocol(format!(
                "multi-get returned {} values for {} keys",
                values.len(),
                keys.len()
            ))
            .into());
        }
        Ok(values)
    }

    /// Keys matching the glob `pattern`, fetched lazily `batch` at a time
    ///
    /// Each call starts a fresh scan. An error ends the stream after it is
    /// yielded.
    pub fn scan(&self, pattern: &str, batch: usize) -> BoxStream<'static, StoreResult<String>> {
        let batch = batch.max(1);
        match &self.shape {
            ClientShape::Cursor(c) => cursor_scan(Arc::clone(c), pattern.to_string(), batch),
            ClientShape::Stream(s) => s.scan_iter(pattern, batch).map_err(StoreError::from).boxed(),
        }
    }
}

struct CursorScan {
    client: Arc<dyn CursorCommands>,
    pattern: String,
    count: usize,
    cursor: Option<String>,
    page: VecDeque<String>,
}

fn cursor_scan(
    client: Arc<dyn CursorCommands>,
    pattern: String,
    count: usize,
) -> BoxStream<'static, StoreResult<String>> {
    let state = CursorScan {
        client,
        pattern,
        count,
        cursor: Some(SCAN_CURSOR_START.to_string()),
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
            match state.client.scan(&cursor, &state.pattern, state.count).await {
                Ok((next, keys)) => {
                    state.page.extend(keys);
                    if next != SCAN_CURSOR_START {
                        state.cursor = Some(next);
                    }
                }
                Err(err) => return Some((Err(StoreError::from(err)), state)),
            }
        }
    })
    .boxed()
}
