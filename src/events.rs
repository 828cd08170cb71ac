//! Reportable capture events.
//!
//! The capture loop pushes frames into the ring buffer and everything else
//! — drop deltas, interface-down notices, fatal errors, the final stop
//! notice — onto an unbounded event channel the embedding caller drains at
//! its own pace (or ignores entirely; a full channel never stalls capture).

use tokio_stream::wrappers::UnboundedReceiverStream;

/// Why the capture loop reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop flag was set — an explicit `stop()` or a termination signal.
    Requested,
    /// The configured frame-count limit was reached.
    FrameLimit,
    /// No frame arrived within the configured idle timeout.
    IdleTimeout,
    /// A fatal error stopped the loop; details were reported as
    /// [`CaptureEvent::Fatal`].
    Fatal,
}

/// One reportable event from the capture loop.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// The kernel reported newly dropped frames on a socket's receive queue.
    FramesDropped {
        /// Origin interface name.
        interface: String,
        /// Frames dropped since the previous report.
        dropped: u32,
        /// Cumulative drops on this socket.
        total: u32,
    },
    /// A receive failed because the interface is administratively down.
    InterfaceDown { interface: String },
    /// A fatal condition; the loop stops after emitting this.
    Fatal { message: String },
    /// Final event: the loop reached its terminal state.
    Stopped { reason: StopReason, frames_received: u64 },
}

/// Stream adapter over the session's event channel.
pub type EventStream = UnboundedReceiverStream<CaptureEvent>;
