//! Common type definitions used throughout kvsession
//!
//! Session identifiers, the per-request metadata slot, and the normalized
//! time-to-live reply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of a stored session
///
/// Used verbatim as the key suffix in `{prefix}:{session_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new time-ordered identifier
    ///
    /// UUIDv7 in its 32-character hex form: URL-safe, and lexical order
    /// follows creation order.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the identifier, returning the inner string
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Pluggable session id generator
pub type IdGenerator = Arc<dyn Fn() -> SessionId + Send + Sync>;

/// The default generator, [`SessionId::generate`]
pub fn default_id_generator() -> IdGenerator {
    Arc::new(SessionId::generate)
}

/// Active session id plus its estimated expiry
///
/// The expiry is computed from the local clock and the configured TTL; it is
/// a hint for the cookie layer, not the store's own expiry time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
}

impl SessionMetadata {
    pub fn new(session_id: SessionId, expires_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            expires_at,
        }
    }
}

/// Request-scoped slot holding at most one [`SessionMetadata`]
///
/// The session middleware owns one scope per request and passes it into
/// every `SessionStore` call. An empty scope means no active session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionScope {
    metadata: Option<SessionMetadata>,
}

impl SessionScope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scope already carrying an active session
    pub fn with_metadata(metadata: SessionMetadata) -> Self {
        Self {
            metadata: Some(metadata),
        }
    }

    /// Get the active metadata, if any
    pub fn metadata(&self) -> Option<&SessionMetadata> {
        self.metadata.as_ref()
    }

    /// Get the active session id, if any
    pub fn session_id(&self) -> Option<&SessionId> {
        self.metadata.as_ref().map(|m| &m.session_id)
    }

    /// Get the estimated expiry of the active session, if any
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.as_ref().map(|m| m.expires_at)
    }

    /// Check whether a session is active in this scope
    pub fn is_active(&self) -> bool {
        self.metadata.is_some()
    }

    /// Replace the active metadata
    pub fn set(&mut self, metadata: SessionMetadata) {
        self.metadata = Some(metadata);
    }

    /// Remove the active metadata, returning it
    pub fn clear(&mut self) -> Option<SessionMetadata> {
        self.metadata.take()
    }
}

/// Normalized answer to a time-to-live query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "seconds")]
pub enum TimeToLive {
    /// Key exists and expires in this many seconds
    Remaining(u64),
    /// Key exists without an expiry
    NoExpiry,
    /// Key does not exist
    Missing,
    /// The client has no TTL primitive, or the reply was not understood
    Unknown,
}

impl TimeToLive {
    /// Interpret the integer TTL reply used by key-value stores
    /// (`-1` no expiry, `-2` missing)
    pub fn from_reply(reply: i64) -> Self {
        match reply {
            -2 => Self::Missing,
            -1 => Self::NoExpiry,
            secs if secs >= 0 => Self::Remaining(secs as u64),
            _ => Self::Unknown,
        }
    }

    /// Seconds remaining, when the key has an expiry
    pub fn remaining(&self) -> Option<u64> {
        match self {
            Self::Remaining(secs) => Some(*secs),
            _ => None,
        }
    }
}
