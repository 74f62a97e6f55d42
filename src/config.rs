//! Configuration for the failover group.
//!
//! Configuration is passed to
//! [`FailoverGroup::new()`](crate::group::FailoverGroup::new) and can be
//! constructed programmatically or deserialized from JSON/YAML.
//!
//! # Quick Start
//!
//! ```rust
//! use failover_group::config::FailoverConfig;
//!
//! let config = FailoverConfig {
//!     outbounds: vec!["proxy-a".into(), "proxy-b".into()],
//!     ..Default::default()
//! };
//! assert_eq!(config.max_failures(), 3);
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "outbounds": ["proxy-a", "proxy-b", "proxy-c"],
//!   "max_failures": 3,
//!   "recovery_interval": "5m",
//!   "recovery_url": "https://www.gstatic.com/generate_204",
//!   "interrupt_exist_connections": false
//! }
//! ```
//!
//! Duration fields are humantime strings (`"100ms"`, `"5m"`, `"1h"`).
//! Unknown fields are ignored on deserialization.

use crate::error::{FailoverError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Consecutive-failure threshold applied when the field is absent or zero.
const DEFAULT_MAX_FAILURES: u32 = 3;

/// Recovery probe period applied when the field is absent or unparsable.
const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Configuration for a failover outbound group.
///
/// Fixed at construction; the candidate list is immutable after start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Ordered candidate tags. The first entry is the primary. Required,
    /// at least one tag.
    pub outbounds: Vec<String>,

    /// Consecutive real-traffic failures that trigger a switch.
    /// Zero means "use the default" (3).
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Period between primary-recovery probes as a humantime string
    /// (e.g. `"5m"`, `"100ms"`).
    #[serde(default = "default_recovery_interval")]
    pub recovery_interval: String,

    /// Optional probe URL. When empty, recovery uses a TCP handshake to
    /// `1.1.1.1:443` through the primary.
    #[serde(default)]
    pub recovery_url: Option<String>,

    /// Also evict connections flagged as external on switch/recovery.
    #[serde(default)]
    pub interrupt_exist_connections: bool,
}

fn default_max_failures() -> u32 {
    DEFAULT_MAX_FAILURES
}

fn default_recovery_interval() -> String {
    "5m".to_string()
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            outbounds: Vec::new(),
            max_failures: DEFAULT_MAX_FAILURES,
            recovery_interval: default_recovery_interval(),
            recovery_url: None,
            interrupt_exist_connections: false,
        }
    }
}

impl FailoverConfig {
    /// Create a config for testing with a fast recovery cadence.
    pub fn for_testing(outbounds: &[&str]) -> Self {
        Self {
            outbounds: outbounds.iter().map(|s| s.to_string()).collect(),
            max_failures: DEFAULT_MAX_FAILURES,
            recovery_interval: "100ms".to_string(),
            recovery_url: None,
            interrupt_exist_connections: false,
        }
    }

    /// Validate the parts that cannot be defaulted away.
    pub fn validate(&self) -> Result<()> {
        if self.outbounds.is_empty() {
            return Err(FailoverError::Config("missing outbounds".to_string()));
        }
        Ok(())
    }

    /// Effective failure threshold (zero falls back to the default).
    pub fn max_failures(&self) -> u32 {
        if self.max_failures == 0 {
            DEFAULT_MAX_FAILURES
        } else {
            self.max_failures
        }
    }

    /// Parse the recovery interval, falling back to the 5 minute default.
    pub fn recovery_interval(&self) -> Duration {
        if self.recovery_interval.is_empty() {
            return DEFAULT_RECOVERY_INTERVAL;
        }
        humantime::parse_duration(&self.recovery_interval).unwrap_or(DEFAULT_RECOVERY_INTERVAL)
    }

    /// The probe URL, if a non-empty one is configured.
    pub fn recovery_url(&self) -> Option<&str> {
        self.recovery_url.as_deref().filter(|url| !url.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FailoverConfig::default();
        assert_eq!(config.max_failures(), 3);
        assert_eq!(config.recovery_interval(), Duration::from_secs(300));
        assert!(config.recovery_url().is_none());
        assert!(!config.interrupt_exist_connections);
    }

    #[test]
    fn test_validate_rejects_empty_outbounds() {
        let config = FailoverConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("missing outbounds"));
    }

    #[test]
    fn test_zero_max_failures_falls_back_to_default() {
        let config = FailoverConfig {
            outbounds: vec!["a".into()],
            max_failures: 0,
            ..Default::default()
        };
        assert_eq!(config.max_failures(), 3);
    }

    #[test]
    fn test_empty_recovery_url_is_none() {
        let config = FailoverConfig {
            recovery_url: Some(String::new()),
            ..Default::default()
        };
        assert!(config.recovery_url().is_none());
    }

    #[test]
    fn test_parse_full_json() {
        let config: FailoverConfig = serde_json::from_str(
            r#"{
                "outbounds": ["proxy-a", "proxy-b", "proxy-c"],
                "max_failures": 5,
                "recovery_interval": "30s",
                "recovery_url": "https://www.gstatic.com/generate_204",
                "interrupt_exist_connections": true
            }"#,
        )
        .unwrap();

        assert_eq!(config.outbounds.len(), 3);
        assert_eq!(config.max_failures(), 5);
        assert_eq!(config.recovery_interval(), Duration::from_secs(30));
        assert_eq!(
            config.recovery_url(),
            Some("https://www.gstatic.com/generate_204")
        );
        assert!(config.interrupt_exist_connections);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_json_applies_defaults() {
        let config: FailoverConfig =
            serde_json::from_str(r#"{"outbounds": ["proxy-a"]}"#).unwrap();
        assert_eq!(config.max_failures(), 3);
        assert_eq!(config.recovery_interval(), Duration::from_secs(300));
        assert!(config.recovery_url().is_none());
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let config: FailoverConfig = serde_json::from_str(
            r#"{"outbounds": ["proxy-a"], "some_future_knob": 7}"#,
        )
        .unwrap();
        assert_eq!(config.outbounds, vec!["proxy-a".to_string()]);
    }

    #[test]
    fn test_unparsable_interval_falls_back() {
        let config = FailoverConfig {
            recovery_interval: "not-a-duration".to_string(),
            ..Default::default()
        };
        assert_eq!(config.recovery_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_millisecond_interval() {
        let config = FailoverConfig {
            recovery_interval: "100ms".to_string(),
            ..Default::default()
        };
        assert_eq!(config.recovery_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_roundtrip_serialization() {
        let config = FailoverConfig::for_testing(&["a", "b"]);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: FailoverConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.outbounds, config.outbounds);
        assert_eq!(parsed.recovery_interval(), Duration::from_millis(100));
    }
}
