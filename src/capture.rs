//! The capture loop: blocking-wait-and-dispatch over all capture sockets.
//!
//! A single thread drives the whole multiplex-wait / receive / decode /
//! buffer-write sequence. Each cycle blocks on the multiplexer with a short
//! bounded timeout — that timeout bounds how quickly a stop request or the
//! idle limit is noticed while the bus is quiet, it is not a per-frame
//! timeout — then receives exactly one frame per ready socket, extracts the
//! ancillary metadata, and appends the decoded frame to the ring buffer.
//!
//! Recoverable conditions (interface down when configured non-fatal, drop
//! deltas) become events and the loop continues; everything else emits a
//! fatal event and stops. Socket and multiplexer descriptors are owned by
//! the worker, so every exit path releases them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{error, info, trace, warn};

use crate::error::{CaptureError, Result};
use crate::events::{CaptureEvent, StopReason};
use crate::poll::Epoll;
use crate::registry::{IfaceRegistry, SysResolver};
use crate::ring::RingProducer;
use crate::shutdown::ShutdownFlag;
use crate::socket::{CAN_MAX_DLEN, CAN_MTU, CANFD_MAX_DLEN, CANFD_MTU, CanSocket};
use crate::types::Frame;

/// Bound on one multiplex wait; limits stop/idle reaction latency.
pub(crate) const WAIT_TIMEOUT: Duration = Duration::from_millis(200);

/// Per-interface diff of the kernel's monotonic overflow counter.
#[derive(Debug, Default)]
pub(crate) struct DropTracker {
    last_observed: u32,
}

impl DropTracker {
    /// Record the counter sampled this cycle; returns `(newly_dropped,
    /// cumulative)` when the counter moved since the previous sample.
    pub fn record(&mut self, current: u32) -> Option<(u32, u32)> {
        if current == self.last_observed {
            return None;
        }
        let delta = current.wrapping_sub(self.last_observed);
        self.last_observed = current;
        Some((delta, current))
    }
}

/// Per-socket counters shared with [`CaptureSession::stats`].
///
/// [`CaptureSession::stats`]: crate::CaptureSession::stats
#[derive(Debug)]
pub(crate) struct SocketCounters {
    pub name: String,
    pub frames: AtomicU64,
    pub dropped: AtomicU32,
}

impl SocketCounters {
    pub fn new(name: String) -> Self {
        Self { name, frames: AtomicU64::new(0), dropped: AtomicU32::new(0) }
    }
}

/// Counters shared between the capture thread and the session.
#[derive(Debug)]
pub(crate) struct SharedStats {
    pub frames: AtomicU64,
    pub sockets: Vec<SocketCounters>,
}

/// One bound socket plus its per-interface capture state.
pub(crate) struct SocketHandle {
    pub socket: CanSocket,
    pub drops: DropTracker,
}

/// Everything the capture thread owns.
pub(crate) struct CaptureWorker {
    pub sockets: Vec<SocketHandle>,
    pub epoll: Epoll,
    pub registry: IfaceRegistry<SysResolver>,
    pub producer: RingProducer,
    pub events: mpsc::UnboundedSender<CaptureEvent>,
    pub stop: ShutdownFlag,
    pub stats: Arc<SharedStats>,
    pub hardware_stamps: bool,
    pub down_is_fatal: bool,
    /// Remaining frames until the count limit stops the loop.
    pub frame_budget: Option<u64>,
    pub idle_timeout: Option<Duration>,
}

impl CaptureWorker {
    /// Run the capture loop to its terminal state, then emit the final
    /// stop event. Consumes the worker; sockets and the multiplexer close
    /// when it drops, on every exit path.
    pub fn run(mut self) -> StopReason {
        info!(interfaces = self.sockets.len(), "capture loop started");
        let reason = self.capture_loop();
        let frames = self.stats.frames.load(Ordering::Relaxed);
        info!(?reason, frames, "capture loop stopped");
        let _ = self.events.send(CaptureEvent::Stopped { reason, frames_received: frames });
        reason
    }

    fn capture_loop(&mut self) -> StopReason {
        let mut ready =
            vec![libc::epoll_event { events: 0, u64: 0 }; self.sockets.len().max(1)];
        let mut last_frame = Instant::now();
        let mut limit_hit = false;

        loop {
            if self.stop.should_stop() {
                return StopReason::Requested;
            }
            if let Some(idle) = self.idle_timeout
                && last_frame.elapsed() >= idle
            {
                return StopReason::IdleTimeout;
            }

            let num_events = match self.epoll.wait(&mut ready, WAIT_TIMEOUT) {
                Ok(n) => n,
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(e) => {
                    self.fatal(&CaptureError::Wait { source: e });
                    return StopReason::Fatal;
                }
            };

            for event in &ready[..num_events] {
                let index = event.u64 as usize;
                if let Err(err) = self.dispatch_one(index, &mut limit_hit, &mut last_frame) {
                    self.fatal(&err);
                    return StopReason::Fatal;
                }
            }

            if limit_hit {
                return StopReason::FrameLimit;
            }
        }
    }

    /// Receive and dispatch one frame from the socket at `index`.
    ///
    /// Once the frame budget is exhausted, remaining ready sockets in the
    /// batch are still drained but nothing more is appended to the ring.
    fn dispatch_one(
        &mut self,
        index: usize,
        limit_hit: &mut bool,
        last_frame: &mut Instant,
    ) -> Result<()> {
        let received = match self.sockets[index].socket.recv(self.hardware_stamps) {
            Ok(received) => received,
            Err(e) if e.raw_os_error() == Some(libc::ENETDOWN) => {
                let interface = self.sockets[index].socket.name().to_string();
                warn!(interface = %interface, "interface down");
                let _ = self
                    .events
                    .send(CaptureEvent::InterfaceDown { interface: interface.clone() });
                if self.down_is_fatal {
                    return Err(CaptureError::InterfaceDown { interface });
                }
                return Ok(());
            }
            Err(e) => {
                return Err(CaptureError::socket(
                    "recvmsg",
                    self.sockets[index].socket.name(),
                    e,
                ));
            }
        };

        // the byte count actually received determines which decoding applies
        let max_dlen = match received.nbytes {
            CAN_MTU => CAN_MAX_DLEN,
            CANFD_MTU => CANFD_MAX_DLEN,
            nbytes => {
                return Err(CaptureError::Protocol { nbytes, classic: CAN_MTU, fd: CANFD_MTU });
            }
        };

        let slot = self.registry.lookup(received.ifindex)?;

        if let Some(count) = received.meta.dropped
            && let Some((dropped, total)) = self.sockets[index].drops.record(count)
        {
            let interface = self.registry.name(slot).to_string();
            warn!(interface = %interface, dropped, total, "kernel dropped frames on receive");
            self.stats.sockets[index].dropped.store(total, Ordering::Relaxed);
            let _ = self.events.send(CaptureEvent::FramesDropped { interface, dropped, total });
        }

        if *limit_hit {
            return Ok(());
        }

        let timestamp = received.meta.timestamp.unwrap_or(0.0);
        let len = (received.frame.len as usize).min(max_dlen);
        let frame = Frame::from_wire(received.frame.can_id, &received.frame.data[..len], timestamp);
        trace!(
            interface = %self.registry.name(slot),
            id = frame.raw_id(),
            len = frame.len,
            "frame received"
        );

        self.producer.push(frame);
        *last_frame = Instant::now();
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        self.stats.sockets[index].frames.fetch_add(1, Ordering::Relaxed);

        if let Some(budget) = &mut self.frame_budget {
            *budget -= 1;
            if *budget == 0 {
                *limit_hit = true;
            }
        }
        Ok(())
    }

    fn fatal(&self, err: &CaptureError) {
        error!(error = %err, "fatal capture error");
        let _ = self.events.send(CaptureEvent::Fatal { message: err.to_string() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_tracker_reports_delta_once() {
        let mut tracker = DropTracker::default();
        assert_eq!(tracker.record(0), None);

        // counter jumps 100 -> 107: report 7 new drops
        assert_eq!(tracker.record(100), Some((100, 100)));
        assert_eq!(tracker.record(107), Some((7, 107)));
        // identical sample: no event
        assert_eq!(tracker.record(107), None);
    }

    #[test]
    fn drop_tracker_handles_counter_wraparound() {
        let mut tracker = DropTracker::default();
        tracker.record(u32::MAX);
        assert_eq!(tracker.record(2), Some((3, 2)));
    }
}
