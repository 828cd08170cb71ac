//! Multi-interface SocketCAN capture with a bounded frame ring.
//!
//! Cantap listens on any number of CAN/CAN-FD interfaces concurrently from
//! a single capture thread, applies kernel-level filters per interface, and
//! makes a bounded history of recent frames available to a consumer at its
//! own pace.
//!
//! # Features
//!
//! - **Multiplexed capture**: one blocking wait across all interfaces,
//!   including the reserved `any` wildcard
//! - **Kernel filters**: `id:mask`, inverted `id~mask`, error-class masks
//!   and joined (AND) filter sets, compiled before any socket is touched
//! - **Bounded buffering**: a lossy single-producer/single-consumer ring —
//!   capture never stalls on a slow consumer, staleness is bounded by
//!   capacity
//! - **Health reporting**: kernel drop counters, interface-down notices and
//!   fatal errors delivered as an async event stream
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cantap::{Cantap, CaptureConfig, InterfaceSpec};
//!
//! fn main() -> cantap::Result<()> {
//!     let specs = [
//!         InterfaceSpec::parse("vcan0,123:7FF"),
//!         InterfaceSpec::new("vcan1"),
//!     ];
//!     let mut session = Cantap::start(&specs, CaptureConfig::default())?;
//!
//!     loop {
//!         while let Some(frame) = session.pop() {
//!             println!("{:08X} [{}] {:02X?}", frame.raw_id(), frame.len, frame.payload());
//!         }
//!         if !session.is_running() {
//!             break;
//!         }
//!         std::thread::sleep(std::time::Duration::from_millis(1));
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
pub mod events;
pub mod filter;
pub mod registry;
pub mod ring;
mod shutdown;
pub mod types;

// Capture architecture (Linux only)
#[cfg(target_os = "linux")]
mod capture;
#[cfg(target_os = "linux")]
mod poll;
mod session;
#[cfg(target_os = "linux")]
mod socket;
#[cfg(target_os = "linux")]
mod stream;

// Core exports
pub use error::{CaptureError, Result};
pub use events::{CaptureEvent, EventStream, StopReason};
pub use filter::{FilterRule, FilterSet};
pub use registry::{IfaceRegistry, IndexResolver};
pub use ring::{RingConsumer, RingProducer, frame_ring};
pub use session::{CaptureSession, CaptureStats, InterfaceStats};
pub use shutdown::ShutdownFlag;
pub use types::*;

#[cfg(target_os = "linux")]
pub use registry::SysResolver;
#[cfg(target_os = "linux")]
pub use stream::{DEFAULT_POLL_INTERVAL, FrameStream};

/// Unified entry point for capture sessions.
///
/// # Example
///
/// ```rust,no_run
/// use cantap::{Cantap, CaptureConfig, InterfaceSpec, TimestampMode};
///
/// # fn main() -> cantap::Result<()> {
/// let config = CaptureConfig {
///     timestamps: TimestampMode::Software,
///     monitor_drops: true,
///     ..Default::default()
/// };
/// let session = Cantap::start(&[InterfaceSpec::new("any")], config)?;
/// # drop(session);
/// # Ok(())
/// # }
/// ```
pub struct Cantap;

impl Cantap {
    /// Start capturing from the given interface specifications.
    ///
    /// Compiles all filters, opens and configures one raw CAN socket per
    /// interface, binds them and spawns the capture thread. Fails atomically:
    /// if any interface cannot be set up, sockets already opened are closed
    /// before the error is returned.
    ///
    /// # Platform
    ///
    /// SocketCAN capture is only available on Linux; on other targets this
    /// returns an `UnsupportedPlatform` error.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A filter token does not parse
    /// - More interfaces are requested than `config.max_interfaces`
    /// - An interface name does not resolve or a socket option fails
    /// - The kernel rejects a requested filter feature (join, inverted)
    pub fn start(specs: &[InterfaceSpec], config: CaptureConfig) -> Result<CaptureSession> {
        CaptureSession::start(specs, config)
    }
}
