//! Session store configuration
//!
//! Immutable once handed to the session store builder. Deserializable so the
//! embedding application can load it from whatever config source it uses.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Time-to-live applied to session records
///
/// Serialized as an integer number of seconds, or `null` when disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum Ttl {
    /// Records expire this many seconds after being written or extended
    Seconds(u64),
    /// Records never expire
    Disabled,
}

impl Ttl {
    /// Seconds, when enabled
    pub fn seconds(&self) -> Option<u64> {
        match self {
            Self::Seconds(secs) => Some(*secs),
            Self::Disabled => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Seconds(_))
    }
}

impl From<Option<u64>> for Ttl {
    fn from(secs: Option<u64>) -> Self {
        secs.map_or(Self::Disabled, Self::Seconds)
    }
}

impl From<Ttl> for Option<u64> {
    fn from(ttl: Ttl) -> Self {
        ttl.seconds()
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Self::Seconds(default_ttl_secs())
    }
}

/// Session store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Key prefix; records live at `{prefix}:{session_id}`
    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub ttl: Ttl,

    /// Reset TTL to its full value on every read
    #[serde(default)]
    pub rolling: bool,

    /// Reset TTL on read only when fewer than `renew_before_secs` remain
    #[serde(default)]
    pub renew: bool,

    #[serde(default = "default_renew_before_secs")]
    pub renew_before_secs: u64,

    /// Horizon used for expiry estimates when TTL is disabled
    #[serde(default = "default_disabled_ttl_horizon_secs")]
    pub disabled_ttl_horizon_secs: u64,
}

fn default_prefix() -> String {
    "session".to_string()
}

fn default_ttl_secs() -> u64 {
    86_400
}

fn default_renew_before_secs() -> u64 {
    600
}

fn default_disabled_ttl_horizon_secs() -> u64 {
    365 * 86_400
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            ttl: Ttl::default(),
            rolling: false,
            renew: false,
            renew_before_secs: default_renew_before_secs(),
            disabled_ttl_horizon_secs: default_disabled_ttl_horizon_secs(),
        }
    }
}

impl StoreConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the TTL in seconds
    pub fn with_ttl(mut self, secs: u64) -> Self {
        self.ttl = Ttl::Seconds(secs);
        self
    }

    /// Store records without expiry
    pub fn without_ttl(mut self) -> Self {
        self.ttl = Ttl::Disabled;
        self
    }

    /// Enable or disable the rolling policy
    pub fn with_rolling(mut self, rolling: bool) -> Self {
        self.rolling = rolling;
        self
    }

    /// Enable or disable the renew policy
    pub fn with_renew(mut self, renew: bool) -> Self {
        self.renew = renew;
        self
    }

    /// Set the renew threshold in seconds
    pub fn with_renew_before_secs(mut self, secs: u64) -> Self {
        self.renew_before_secs = secs;
        self
    }

    /// Set the expiry-estimate horizon used when TTL is disabled
    pub fn with_disabled_ttl_horizon_secs(mut self, secs: u64) -> Self {
        self.disabled_ttl_horizon_secs = secs;
        self
    }

    /// Reject configurations no store operation could honor
    ///
    /// `rolling` together with `renew` is accepted: rolling resets on every
    /// read, which makes the renew threshold irrelevant.
    pub fn validate(&self) -> StoreResult<()> {
        if self.prefix.is_empty() {
            return Err(StoreError::InvalidConfig("prefix must not be empty".to_string()));
        }
        if self.ttl == Ttl::Seconds(0) {
            return Err(StoreError::InvalidConfig(
                "ttl must be positive; use null to disable expiry".to_string(),
            ));
        }
        Ok(())
    }

    /// Store key for a session id
    pub fn key_for(&self, session_id: &str) -> String {
        format!("{}:{}", self.prefix, session_id)
    }

    /// Glob matching every session key under this prefix
    pub fn key_pattern(&self) -> String {
        format!("{}:*", self.prefix)
    }

    /// Strip the prefix from a store key, if it carries it
    pub fn session_id_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())?.strip_prefix(':')
    }

    /// Estimated expiry of a record written or extended at `now`
    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.ttl.seconds().unwrap_or(self.disabled_ttl_horizon_secs);
        Duration::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX))
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.prefix, "session");
        assert_eq!(config.ttl, Ttl::Seconds(86_400));
        assert!(!config.rolling);
        assert!(!config.renew);
        assert_eq!(config.renew_before_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_deserialize_disabled_ttl() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"prefix":"app","ttl":null,"rolling":true}"#).unwrap();
        assert_eq!(config.prefix, "app");
        assert_eq!(config.ttl, Ttl::Disabled);
        assert!(config.rolling);
    }

    #[test]
    fn test_ttl_serialization() {
        assert_eq!(serde_json::to_string(&Ttl::Seconds(30)).unwrap(), "30");
        assert_eq!(serde_json::to_string(&Ttl::Disabled).unwrap(), "null");
    }

    #[test]
    fn test_builder_setters() {
        let config = StoreConfig::new()
            .with_prefix("sess")
            .with_ttl(120)
            .with_renew(true)
            .with_renew_before_secs(30);
        assert_eq!(config.prefix, "sess");
        assert_eq!(config.ttl.seconds(), Some(120));
        assert!(config.renew);
        assert_eq!(config.renew_before_secs, 30);

        let config = config.without_ttl();
        assert!(!config.ttl.is_enabled());
    }

    #[test]
    fn test_validate_rejects_empty_prefix() {
        let config = StoreConfig::new().with_prefix("");
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let config = StoreConfig::new().with_ttl(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_rolling_and_renew() {
        let config = StoreConfig::new().with_rolling(true).with_renew(true);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_keys() {
        let config = StoreConfig::new().with_prefix("app");
        assert_eq!(config.key_for("abc"), "app:abc");
        assert_eq!(config.key_pattern(), "app:*");
        assert_eq!(config.session_id_from_key("app:abc"), Some("abc"));
        assert_eq!(config.session_id_from_key("apple:abc"), None);
        assert_eq!(config.session_id_from_key("other:abc"), None);
    }

    #[test]
    fn test_expiry_from() {
        let now = Utc::now();
        let config = StoreConfig::new().with_ttl(60);
        assert_eq!(config.expiry_from(now), now + Duration::seconds(60));

        let config = config.without_ttl().with_disabled_ttl_horizon_secs(1_000);
        assert_eq!(config.expiry_from(now), now + Duration::seconds(1_000));
    }
}
