//! Capture configuration types.
//!
//! [`CaptureConfig`] is the configuration bundle handed to
//! [`Cantap::start`](crate::Cantap::start); [`InterfaceSpec`] names one
//! interface to listen on plus its raw filter tokens. Both deserialize from
//! YAML so an embedding application can keep its capture setup in a config
//! file (see [`from_yaml_str`]).

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};

/// Reserved interface name that binds with the wildcard index and receives
/// from every CAN interface on the system.
pub const ANY_INTERFACE: &str = "any";

/// Which receive timestamps the kernel is asked to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampMode {
    /// No timestamp delivery; frames carry a 0.0 timestamp.
    None,
    /// OS software timestamps (`SO_TIMESTAMP`).
    #[default]
    Software,
    /// Hardware timestamps (`SO_TIMESTAMPING`, raw hardware sample).
    Hardware,
}

/// One interface to capture from: its name (or [`ANY_INTERFACE`]) and the
/// raw filter tokens to compile for it.
///
/// Filter tokens use the `<id>:<mask>` / `<id>~<mask>` / `#<err_mask>` /
/// `j` grammar; they are compiled atomically at session start, before any
/// socket is touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    /// Interface name as given on the command line or in config.
    pub name: String,
    /// Raw filter tokens; empty means accept all data frames.
    #[serde(default)]
    pub filters: Vec<String>,
}

impl InterfaceSpec {
    /// Spec for `name` with no filters (accept all data frames).
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), filters: Vec::new() }
    }

    /// Parse the `<ifname>[,filter]*` command-line form.
    ///
    /// ```
    /// use cantap::InterfaceSpec;
    ///
    /// let spec = InterfaceSpec::parse("can0,123:7FF,#20000000,j");
    /// assert_eq!(spec.name, "can0");
    /// assert_eq!(spec.filters.len(), 3);
    /// ```
    pub fn parse(token: &str) -> Self {
        match token.split_once(',') {
            Some((name, rest)) => Self {
                name: name.to_string(),
                filters: rest.split(',').map(str::to_string).collect(),
            },
            None => Self::new(token),
        }
    }

    /// Whether this spec names the receive-from-anywhere wildcard.
    pub fn is_any(&self) -> bool {
        self.name == ANY_INTERFACE
    }
}

/// Configuration bundle for a capture session.
///
/// A zero value means "unlimited" for `frame_limit` and `idle_timeout_ms`,
/// and "OS default" for `rcvbuf_size`. The capacity knobs preserve the
/// fatal-on-exhaustion contract: they bound the session, they never grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Timestamp delivery mode.
    pub timestamps: TimestampMode,
    /// Ask the kernel to report frames dropped on receive-queue overflow.
    pub monitor_drops: bool,
    /// Stop the whole capture when an interface goes down (default), or
    /// report it and keep reading the remaining interfaces.
    pub down_is_fatal: bool,
    /// Stop after this many frames have been buffered; 0 = unlimited.
    pub frame_limit: u64,
    /// Stop after this long without any received frame; 0 = unlimited.
    pub idle_timeout_ms: u64,
    /// Requested socket receive-buffer size; 0 = OS default.
    pub rcvbuf_size: usize,
    /// Maximum number of interface specifications accepted.
    pub max_interfaces: usize,
    /// Interface-index cache slots (exhaustion is fatal).
    pub registry_capacity: usize,
    /// Frame ring capacity; rounded up to a power of two.
    pub ring_capacity: usize,
    /// Register a process signal handler that stops the session.
    pub handle_signals: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            timestamps: TimestampMode::Software,
            monitor_drops: false,
            down_is_fatal: true,
            frame_limit: 0,
            idle_timeout_ms: 0,
            rcvbuf_size: 0,
            max_interfaces: 16,
            registry_capacity: 30,
            ring_capacity: 256,
            handle_signals: true,
        }
    }
}

impl CaptureConfig {
    /// Validate capacity knobs before a session starts.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_interfaces == 0 {
            return Err(CaptureError::config("max_interfaces must be at least 1"));
        }
        if self.registry_capacity == 0 {
            return Err(CaptureError::config("registry_capacity must be at least 1"));
        }
        if self.ring_capacity == 0 {
            return Err(CaptureError::config("ring_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// A full capture setup as loaded from a YAML document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureSetup {
    /// Interfaces to listen on.
    pub interfaces: Vec<InterfaceSpec>,
    /// Session configuration.
    #[serde(default)]
    pub config: CaptureConfig,
}

/// Load a [`CaptureSetup`] from a YAML string.
///
/// ```
/// let setup = cantap::from_yaml_str(r#"
/// interfaces:
///   - name: vcan0
///     filters: ["123:7FF"]
///   - name: vcan1
/// config:
///   monitor_drops: true
///   idle_timeout_ms: 5000
/// "#).unwrap();
/// assert_eq!(setup.interfaces.len(), 2);
/// assert!(setup.config.monitor_drops);
/// ```
pub fn from_yaml_str(yaml: &str) -> Result<CaptureSetup> {
    serde_yaml_ng::from_str(yaml)
        .map_err(|e| CaptureError::config(format!("invalid capture setup: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.timestamps, TimestampMode::Software);
        assert!(!config.monitor_drops);
        assert!(config.down_is_fatal);
        assert_eq!(config.frame_limit, 0);
        assert_eq!(config.idle_timeout_ms, 0);
        assert_eq!(config.rcvbuf_size, 0);
        assert_eq!(config.max_interfaces, 16);
        assert_eq!(config.registry_capacity, 30);
        assert_eq!(config.ring_capacity, 256);
    }

    #[test]
    fn spec_parse_splits_name_and_filters() {
        let spec = InterfaceSpec::parse("can0,123:7FF,400:700,#000000FF");
        assert_eq!(spec.name, "can0");
        assert_eq!(spec.filters, vec!["123:7FF", "400:700", "#000000FF"]);

        let bare = InterfaceSpec::parse("can8");
        assert_eq!(bare.name, "can8");
        assert!(bare.filters.is_empty());
    }

    #[test]
    fn any_wildcard_is_detected() {
        assert!(InterfaceSpec::parse("any,0~0,#FFFFFFFF").is_any());
        assert!(!InterfaceSpec::new("vcan0").is_any());
    }

    #[test]
    fn yaml_roundtrip_with_partial_config() {
        let setup = from_yaml_str(
            r#"
interfaces:
  - name: vcan2
    filters: ["12345678:DFFFFFFF"]
config:
  timestamps: hardware
  frame_limit: 10
"#,
        )
        .unwrap();
        assert_eq!(setup.interfaces[0].name, "vcan2");
        assert_eq!(setup.config.timestamps, TimestampMode::Hardware);
        assert_eq!(setup.config.frame_limit, 10);
        // untouched knobs keep their defaults
        assert!(setup.config.down_is_fatal);
        assert_eq!(setup.config.ring_capacity, 256);
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        let err = from_yaml_str("interfaces: 12").unwrap_err();
        assert!(matches!(err, CaptureError::Config { .. }));
    }

    #[test]
    fn zero_capacities_rejected() {
        let config = CaptureConfig { ring_capacity: 0, ..Default::default() };
        assert!(config.validate().is_err());
        let config = CaptureConfig { max_interfaces: 0, ..Default::default() };
        assert!(config.validate().is_err());
        assert!(CaptureConfig::default().validate().is_ok());
    }
}
