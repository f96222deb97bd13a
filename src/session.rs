//! Session store
//!
//! Create, read, update, delete and touch session records over a
//! [`StoreClient`], applying the configured TTL policy. Records live at
//! `{prefix}:{session_id}` as JSON.
//!
//! Every operation takes the request's [`SessionScope`]. Operations that
//! write or extend a record publish the session id and an expiry estimate
//! into it; `set`, `destroy` and `touch` act on the session it names.
//!
//! Concurrent requests on the same session are not coordinated here: `set`
//! is last-write-wins and a `get` racing a `destroy` may see either state.

use crate::client::StoreClient;
use crate::config::{StoreConfig, Ttl};
use crate::error::{SessionError, SessionResult, StoreResult};
use crate::types::{default_id_generator, IdGenerator, SessionId, SessionMetadata, SessionScope};
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Anything storable as a session payload
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Factory for the payload stored by `create` when none is given
pub type PayloadFactory<P> = Arc<dyn Fn() -> P + Send + Sync>;

/// Session store over a normalized key-value client
///
/// # Examples
///
/// ```
/// use kvsession::client::memory::{MemoryKv, MemoryStreamClient};
/// use kvsession::{SessionScope, SessionStore, StoreClient, StoreConfig};
/// use std::collections::HashMap;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = StoreClient::new(&MemoryStreamClient::new(MemoryKv::new()))?;
///     let store = SessionStore::<HashMap<String, String>>::builder(client)
///         .config(StoreConfig::new().with_ttl(3600).with_rolling(true))
///         .build()?;
///
///     let mut scope = SessionScope::new();
///     let mut payload = HashMap::new();
///     payload.insert("user".to_string(), "ada".to_string());
///     store.create(&mut scope, Some(payload)).await?;
///
///     let id = scope.session_id().cloned().unwrap();
///     let mut next_request = SessionScope::new();
///     let loaded = store.get(&mut next_request, Some(id.as_str())).await?;
///     assert_eq!(loaded.unwrap()["user"], "ada");
///     Ok(())
/// }
/// ```
pub struct SessionStore<P> {
    client: StoreClient,
    config: StoreConfig,
    id_generator: IdGenerator,
    default_payload: PayloadFactory<P>,
}

impl<P> fmt::Debug for SessionStore<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("client", &self.client)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: Payload + Default> SessionStore<P> {
    /// Create a builder whose default payload is `P::default()`
    pub fn builder(client: StoreClient) -> SessionStoreBuilder<P> {
        SessionStoreBuilder::new(client, Arc::new(P::default))
    }
}

impl<P: Payload> SessionStore<P> {
    /// Create a builder with an explicit default-payload factory
    pub fn builder_with_default(
        client: StoreClient,
        default_payload: impl Fn() -> P + Send + Sync + 'static,
    ) -> SessionStoreBuilder<P> {
        SessionStoreBuilder::new(client, Arc::new(default_payload))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn client(&self) -> &StoreClient {
        &self.client
    }

    fn key(&self, session_id: &str) -> String {
        self.config.key_for(session_id)
    }

    fn publish(&self, scope: &mut SessionScope, session_id: SessionId) {
        let expires_at = self.config.expiry_from(Utc::now());
        scope.set(SessionMetadata::new(session_id, expires_at));
    }

    fn encode(&self, payload: &P) -> SessionResult<String> {
        serde_json::to_string(payload).map_err(|e| {
            warn!(error = %e, "Failed to serialize session payload");
            SessionError::Serialization(e)
        })
    }

    /// Write a full record, with the configured TTL when enabled
    async fn write(&self, key: &str, value: &str) -> StoreResult<bool> {
        match self.config.ttl {
            Ttl::Seconds(secs) => self.client.set_with_expiry(key, secs, value).await,
            Ttl::Disabled => self.client.set(key, value).await,
        }
    }

    /// Create a session under a fresh id
    ///
    /// Stores `payload`, or the default payload when `None`, and publishes
    /// the new session into `scope`. On failure `scope` is left untouched.
    pub async fn create(&self, scope: &mut SessionScope, payload: Option<P>) -> SessionResult<P> {
        let session_id = (self.id_generator)();
        let key = self.key(session_id.as_str());
        let payload = payload.unwrap_or_else(|| (self.default_payload)());
        let value = self.encode(&payload)?;

        let written = self.write(&key, &value).await.map_err(|e| {
            warn!(session_id = %session_id, error = %e, "Failed to create session");
            SessionError::from(e)
        })?;
        if !written {
            warn!(session_id = %session_id, "Store rejected session create");
            return Err(SessionError::WriteRejected { key });
        }

        info!(session_id = %session_id, ttl = ?self.config.ttl, "Session created");
        self.publish(scope, session_id);
        Ok(payload)
    }

    /// Load the session stored under `session_id`
    ///
    /// `Ok(None)` for an empty or missing id (without a store call) and for
    /// an absent record. A record that does not decode is
    /// [`SessionError::Corrupt`]. On success the session is published into
    /// `scope` and the rolling or renew policy is applied.
    pub async fn get(
        &self,
        scope: &mut SessionScope,
        session_id: Option<&str>,
    ) -> SessionResult<Option<P>> {
        let session_id = match session_id {
            Some(id) if !id.is_empty() => SessionId::from(id),
            _ => return Ok(None),
        };
        let key = self.key(session_id.as_str());

        let raw = self.client.get(&key).await.map_err(|e| {
            warn!(session_id = %session_id, error = %e, "Failed to load session");
            SessionError::from(e)
        })?;
        let Some(raw) = raw else {
            debug!(session_id = %session_id, "Session not found");
            return Ok(None);
        };

        let payload: P = serde_json::from_str(&raw).map_err(|source| {
            warn!(session_id = %session_id, error = %source, "Stored session is corrupt");
            SessionError::Corrupt {
                session_id: session_id.clone(),
                source,
            }
        })?;

        self.apply_read_policy(&session_id, &key).await.map_err(|e| {
            warn!(session_id = %session_id, error = %e, "Failed to refresh session TTL");
            SessionError::from(e)
        })?;

        self.publish(scope, session_id);
        Ok(Some(payload))
    }

    /// Rolling resets TTL on every read; renew resets it only below the
    /// threshold. With both enabled rolling applies.
    async fn apply_read_policy(&self, session_id: &SessionId, key: &str) -> StoreResult<()> {
        let Ttl::Seconds(ttl) = self.config.ttl else {
            return Ok(());
        };

        if self.config.rolling {
            let applied = self.client.expire(key, ttl).await?;
            debug!(session_id = %session_id, applied, "Rolling TTL reset");
        } else if self.config.renew {
            let remaining = self.client.time_to_live(key).await?;
            match remaining.remaining() {
                Some(secs) if secs < self.config.renew_before_secs => {
                    let applied = self.client.expire(key, ttl).await?;
                    debug!(session_id = %session_id, remaining = secs, applied, "Session renewed");
                }
                _ => {
                    debug!(session_id = %session_id, ?remaining, "Session renewal not needed");
                }
            }
        }
        Ok(())
    }

    /// Overwrite the active session's record with `payload`
    ///
    /// `Ok(None)` when `scope` has no active session; no store call is made.
    pub async fn set(&self, scope: &mut SessionScope, payload: &P) -> SessionResult<Option<bool>> {
        let Some(session_id) = scope.session_id().cloned() else {
            debug!("No active session to set");
            return Ok(None);
        };
        let key = self.key(session_id.as_str());
        let value = self.encode(payload)?;

        let written = self.write(&key, &value).await.map_err(|e| {
            warn!(session_id = %session_id, error = %e, "Failed to save session");
            SessionError::from(e)
        })?;
        if written && self.config.ttl.is_enabled() {
            self.publish(scope, session_id);
        }
        Ok(Some(written))
    }

    /// Delete the active session
    ///
    /// The scope is cleared whatever the outcome. `Ok(true)` iff a record was
    /// removed; `Ok(false)` when nothing was active or the record was already
    /// gone.
    pub async fn destroy(&self, scope: &mut SessionScope) -> SessionResult<bool> {
        let Some(metadata) = scope.clear() else {
            debug!("No active session to destroy");
            return Ok(false);
        };
        let key = self.key(metadata.session_id.as_str());

        let removed = self.client.delete(&[key]).await.map_err(|e| {
            warn!(session_id = %metadata.session_id, error = %e, "Failed to destroy session");
            SessionError::from(e)
        })?;
        info!(session_id = %metadata.session_id, removed, "Session destroyed");
        Ok(removed > 0)
    }

    /// Reset the active session's TTL to the full configured value
    ///
    /// `Ok(None)` when `scope` has no active session, `Ok(Some(false))` when
    /// TTL is disabled or the record no longer exists.
    pub async fn touch(&self, scope: &mut SessionScope) -> SessionResult<Option<bool>> {
        let Some(session_id) = scope.session_id().cloned() else {
            debug!("No active session to touch");
            return Ok(None);
        };
        let Ttl::Seconds(ttl) = self.config.ttl else {
            return Ok(Some(false));
        };

        let key = self.key(session_id.as_str());
        let applied = self.client.expire(&key, ttl).await.map_err(|e| {
            warn!(session_id = %session_id, error = %e, "Failed to touch session");
            SessionError::from(e)
        })?;
        if applied {
            self.publish(scope, session_id);
        }
        Ok(Some(applied))
    }

    /// Ids of every stored session, scanned lazily `batch` keys at a time
    pub fn ids(&self, batch: usize) -> BoxStream<'static, StoreResult<SessionId>> {
        let config = self.config.clone();
        self.client
            .scan(&self.config.key_pattern(), batch)
            .try_filter_map(move |key| {
                let id = config.session_id_from_key(&key).map(SessionId::from);
                futures::future::ready(Ok(id))
            })
            .boxed()
    }

    /// Every live session with its payload
    ///
    /// Records that vanish between scan and load are skipped; records that do
    /// not decode are logged and skipped.
    pub async fn all(&self, batch: usize) -> SessionResult<Vec<(SessionId, P)>> {
        let batch = batch.max(1);
        let mut sessions = Vec::new();
        let mut ids = self.ids(batch).try_chunks(batch);

        while let Some(chunk) = ids.next().await {
            let chunk = chunk.map_err(|e| SessionError::from(e.1))?;
            let keys: Vec<String> = chunk.iter().map(|id| self.key(id.as_str())).collect();
            let values = self.client.multi_get(&keys).await?;

            for (session_id, value) in chunk.into_iter().zip(values) {
                let Some(raw) = value else { continue };
                match serde_json::from_str::<P>(&raw) {
                    Ok(payload) => sessions.push((session_id, payload)),
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Skipping corrupt session");
                    }
                }
            }
        }
        Ok(sessions)
    }

    /// Number of stored sessions
    pub async fn length(&self, batch: usize) -> SessionResult<usize> {
        let count = self
            .ids(batch)
            .try_fold(0usize, |count, _| futures::future::ready(Ok(count + 1)))
            .await?;
        Ok(count)
    }

    /// Delete every stored session, returning how many were removed
    pub async fn clear(&self, batch: usize) -> SessionResult<u64> {
        let batch = batch.max(1);
        let mut removed = 0;
        let mut keys = self.client.scan(&self.config.key_pattern(), batch).try_chunks(batch);

        while let Some(chunk) = keys.next().await {
            let chunk = chunk.map_err(|e| SessionError::from(e.1))?;
            removed += self.client.delete(&chunk).await?;
        }
        info!(prefix = %self.config.prefix, removed, "Sessions cleared");
        Ok(removed)
    }
}

/// Builder for [`SessionStore`]
pub struct SessionStoreBuilder<P> {
    client: StoreClient,
    config: StoreConfig,
    id_generator: IdGenerator,
    default_payload: PayloadFactory<P>,
}

impl<P: Payload> SessionStoreBuilder<P> {
    fn new(client: StoreClient, default_payload: PayloadFactory<P>) -> Self {
        Self {
            client,
            config: StoreConfig::default(),
            id_generator: default_id_generator(),
            default_payload,
        }
    }

    /// Set the store configuration
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the session id generator
    pub fn id_generator(mut self, generator: impl Fn() -> SessionId + Send + Sync + 'static) -> Self {
        self.id_generator = Arc::new(generator);
        self
    }

    /// Replace the default payload factory
    pub fn default_payload(mut self, factory: impl Fn() -> P + Send + Sync + 'static) -> Self {
        self.default_payload = Arc::new(factory);
        self
    }

    /// Validate the configuration and build the store
    pub fn build(self) -> StoreResult<SessionStore<P>> {
        self.config.validate()?;
        if self.config.rolling && self.config.renew {
            debug!("Both rolling and renew enabled; rolling applies on every read");
        }
        Ok(SessionStore {
            client: self.client,
            config: self.config,
            id_generator: self.id_generator,
            default_payload: self.default_payload,
        })
    }
}
