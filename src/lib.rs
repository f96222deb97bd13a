//! # kvsession - Session persistence over expiring key-value stores
//!
//! kvsession stores server-side sessions in a key-value store with per-key
//! expiry. It accepts either of two structurally different client surfaces and
//! presents one operation contract to the session middleware above it.
//!
//! ## Features
//!
//! - **Normalized client**: one `get`/`set`/`expire`/`scan` contract over a
//!   cursor-scanning or a stream-scanning client, classified once at
//!   construction
//! - **TTL policies**: fixed, rolling (reset on every read), renew (reset when
//!   little time remains), or disabled
//! - **Explicit request scope**: the active session id and its expiry estimate
//!   travel in a [`SessionScope`] passed to every call
//! - **Backends**: in-memory for development and tests, Redis behind the
//!   `redis-storage` feature
//!
//! ## Quick Start
//!
//! ```
//! use kvsession::client::memory::{MemoryCursorClient, MemoryKv};
//! use kvsession::{SessionScope, SessionStore, StoreClient, StoreConfig};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = StoreClient::new(&MemoryCursorClient::new(MemoryKv::new()))?;
//! let store = SessionStore::<serde_json::Value>::builder(client)
//!     .config(StoreConfig::new().with_prefix("app").with_ttl(1800))
//!     .build()?;
//!
//! // First request: create the session
//! let mut scope = SessionScope::new();
//! store.create(&mut scope, Some(json!({ "user": "ada" }))).await?;
//! let session_id = scope.session_id().cloned().unwrap();
//!
//! // Later request: load it by the id the cookie carried
//! let mut scope = SessionScope::new();
//! let payload = store.get(&mut scope, Some(session_id.as_str())).await?;
//! assert_eq!(payload, Some(json!({ "user": "ada" })));
//!
//! // Logout
//! assert!(store.destroy(&mut scope).await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             Session middleware              │
//! │        (cookie transport, not here)         │
//! └──────────────────────┬──────────────────────┘
//!                        │  &mut SessionScope
//! ┌──────────────────────▼──────────────────────┐
//! │               SessionStore<P>               │
//! │  create / get / set / destroy / touch       │
//! │  fixed · rolling · renew · disabled TTL     │
//! └──────────────────────┬──────────────────────┘
//! ┌──────────────────────▼──────────────────────┐
//! │                 StoreClient                 │
//! │   ClientShape::Cursor | ClientShape::Stream │
//! └──────────────────────┬──────────────────────┘
//!         ┌──────────────┴──────────────┐
//!   CursorCommands                StreamCommands
//!   (memory, Redis)               (memory, Redis)
//! ```
//!
//! ## Module Overview
//!
//! - [`client`]: client surfaces, classification, and the normalized client
//! - [`session`]: the session store and its builder
//! - [`config`]: store configuration
//! - [`types`]: session ids, metadata, scope, TTL replies
//! - [`error`]: error types and result aliases
//!
//! ## License
//!
//! Licensed under either of Apache License 2.0 or MIT license at your option.

// Core type definitions
pub mod types;

// Error types
pub mod error;

// Store configuration
pub mod config;

// Client surfaces and the normalized client
pub mod client;

// Session store
pub mod session;

pub use client::{
    classify, Capabilities, ClientShape, ClientSurface, CursorCommands, SetOptions,
    StoreClient, StreamCommands,
};
pub use config::{StoreConfig, Ttl};
pub use error::{
    ClientError, ClientResult, SessionError, SessionResult, StoreError, StoreResult,
};
pub use session::{Payload, PayloadFactory, SessionStore, SessionStoreBuilder};
pub use types::*;

#[cfg(feature = "redis-storage")]
pub use client::redis::{RedisCursorClient, RedisStreamClient};
