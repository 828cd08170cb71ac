//! Error types for the capture core.
//!
//! All fatal conditions surface as a single distinguishable [`CaptureError`]
//! with a descriptive cause; recoverable conditions (interface down with
//! `down_is_fatal` disabled, drop-count increases, interrupted waits) never
//! propagate past the capture loop — they are reported as events instead.
//!
//! ## Error Categories
//!
//! - **Configuration errors**: bad filter syntax, too many interfaces,
//!   over-long interface names, unsupported kernel filter features
//! - **Socket errors**: failures opening, configuring or binding a raw CAN
//!   socket, with the failing operation and interface attached
//! - **Protocol errors**: a receive that matches neither the classic nor the
//!   FD frame size (the kernel contract is violated)
//! - **Cache exhaustion**: the interface-index cache ran out of slots

use thiserror::Error;

/// Result type alias for capture operations.
pub type Result<T, E = CaptureError> = std::result::Result<T, E>;

/// Main error type for capture operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CaptureError {
    #[error("invalid filter token '{token}'")]
    FilterSyntax { token: String },

    #[error("more than {max} CAN interfaces requested ({requested})")]
    TooManyInterfaces { requested: usize, max: usize },

    #[error("CAN interface name '{name}' is too long (max {max} bytes)")]
    InterfaceNameTooLong { name: String, max: usize },

    #[error("kernel does not support {feature}")]
    UnsupportedFilter {
        feature: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} failed on '{interface}'")]
    Socket {
        operation: &'static str,
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("incomplete CAN frame: read {nbytes} bytes, expected {classic} or {fd}")]
    Protocol { nbytes: usize, classic: usize, fd: usize },

    #[error("interface index cache full ({capacity} slots)")]
    CacheExhausted { capacity: usize },

    #[error("interface '{interface}' is down")]
    InterfaceDown { interface: String },

    #[error("multiplex wait failed")]
    Wait {
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("{feature} is only available on {required_platform}")]
    UnsupportedPlatform { feature: String, required_platform: String },
}

impl CaptureError {
    /// Returns whether this error terminates the capture run.
    ///
    /// Everything except a per-interface down notice is fatal; whether an
    /// interface going down stops the run is a configuration decision made
    /// by the capture loop, not by the error itself.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CaptureError::InterfaceDown { .. })
    }

    /// Helper constructor for socket-operation errors with interface context.
    pub fn socket(
        operation: &'static str,
        interface: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        CaptureError::Socket { operation, interface: interface.into(), source }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        CaptureError::Config { reason: reason.into() }
    }

    /// Helper constructor for unsupported platform errors.
    pub fn unsupported_platform(
        feature: impl Into<String>,
        required_platform: impl Into<String>,
    ) -> Self {
        CaptureError::UnsupportedPlatform {
            feature: feature.into(),
            required_platform: required_platform.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<CaptureError>();

        let error = CaptureError::config("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn fatal_classification() {
        assert!(CaptureError::FilterSyntax { token: "xyz".into() }.is_fatal());
        assert!(CaptureError::CacheExhausted { capacity: 30 }.is_fatal());
        assert!(CaptureError::Protocol { nbytes: 12, classic: 16, fd: 72 }.is_fatal());
        assert!(!CaptureError::InterfaceDown { interface: "can0".into() }.is_fatal());
    }

    #[test]
    fn messages_carry_context() {
        let err = CaptureError::socket(
            "bind",
            "vcan0",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("bind"));
        assert!(msg.contains("vcan0"));

        let err = CaptureError::FilterSyntax { token: "12:zz".into() };
        assert!(err.to_string().contains("12:zz"));
    }

    #[test]
    fn socket_error_chains_source() {
        let err =
            CaptureError::socket("setsockopt SO_RCVBUF", "can1", std::io::Error::other("boom"));
        let source = std::error::Error::source(&err).expect("source attached");
        assert_eq!(source.to_string(), "boom");
    }
}
