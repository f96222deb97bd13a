//! Error types for kvsession
//!
//! Three layers, one enum each: the underlying client surfaces report
//! [`ClientError`], the normalized client reports [`StoreError`], and the
//! session store reports [`SessionError`].

use crate::types::SessionId;
use thiserror::Error;

/// Errors raised by an underlying client surface
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// Connection to the store failed or was lost
    #[error("Store connection failed: {0}")]
    Connection(String),

    /// The store answered with something the surface could not interpret
    #[error("Store protocol error: {0}")]
    Protocol(String),

    /// The surface does not implement this primitive
    #[error("Primitive not supported by client: {0}")]
    Unsupported(&'static str),
}

#[cfg(feature = "redis-storage")]
impl From<redis::RedisError> for ClientError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::Connection(err.to_string())
        } else {
            Self::Protocol(err.to_string())
        }
    }
}

/// Errors raised by the normalized store client
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The supplied client matches neither recognized surface
    #[error("Unsupported client: {0}")]
    UnsupportedClient(String),

    /// The store configuration cannot be honored
    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),

    /// The underlying client call failed
    #[error("Store client error: {0}")]
    Client(#[from] ClientError),
}

/// Recoverable session store failures
///
/// "No session" is never an error; it is `Ok(None)` / `Ok(false)` on the
/// corresponding operation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SessionError {
    /// The payload could not be encoded
    #[error("Session serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// A record exists under the session key but does not decode
    #[error("Session {session_id} is corrupt: {source}")]
    Corrupt {
        session_id: SessionId,
        #[source]
        source: serde_json::Error,
    },

    /// The store did not acknowledge a write
    #[error("Store rejected write to {key}")]
    WriteRejected { key: String },

    /// The store call itself failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<ClientError> for SessionError {
    fn from(err: ClientError) -> Self {
        Self::Store(StoreError::Client(err))
    }
}

/// Type alias for underlying client results
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Type alias for normalized client results
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for session store results
pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Connection("connection refused".to_string());
        let display = format!("{}", err);
        assert!(display.contains("Store connection failed"));
        assert!(display.contains("connection refused"));
    }

    #[test]
    fn test_unsupported_primitive_display() {
        let err = ClientError::Unsupported("TTL");
        assert_eq!(err.to_string(), "Primitive not supported by client: TTL");
    }

    #[test]
    fn test_corrupt_error_display() {
        let source = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err = SessionError::Corrupt {
            session_id: SessionId::from("abc"),
            source,
        };
        let display = format!("{}", err);
        assert!(display.contains("Session abc is corrupt"));
    }

    #[test]
    fn test_error_conversion_client_to_store() {
        let store_err: StoreError = ClientError::Protocol("bad reply".to_string()).into();
        assert!(matches!(store_err, StoreError::Client(ClientError::Protocol(_))));
    }

    #[test]
    fn test_error_conversion_client_to_session() {
        let session_err: SessionError = ClientError::Connection("down".to_string()).into();
        assert!(matches!(
            session_err,
            SessionError::Store(StoreError::Client(ClientError::Connection(_)))
        ));
    }

    #[test]
    fn test_error_conversion_store_to_session() {
        let session_err: SessionError = StoreError::UnsupportedClient("x".to_string()).into();
        assert!(matches!(
            session_err,
            SessionError::Store(StoreError::UnsupportedClient(_))
        ));
    }
}
