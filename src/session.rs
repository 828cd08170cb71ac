//! Capture session: socket-set setup and the public lifecycle surface.
//!
//! [`CaptureSession::start`] compiles every filter set, opens and configures
//! one raw CAN socket per requested interface, registers them with the
//! multiplexer and spawns the capture thread. If any step fails, sockets
//! already opened are closed before the error propagates — a partial
//! interface set is never left running.
//!
//! The running session exposes the embedding surface: a pull-based [`pop`]
//! draining the frame ring, an awaitable stream of reportable events, an
//! idempotent [`stop`] safe to call from any context, and a stats
//! snapshot.
//!
//! [`pop`]: CaptureSession::pop
//! [`stop`]: CaptureSession::stop

#[cfg(target_os = "linux")]
use {
    crate::capture::{CaptureWorker, SharedStats, SocketCounters, SocketHandle},
    crate::error::{CaptureError, Result},
    crate::events::{CaptureEvent, EventStream, StopReason},
    crate::filter::FilterSet,
    crate::poll::Epoll,
    crate::registry::{IfaceRegistry, SysResolver},
    crate::ring::{RingConsumer, frame_ring},
    crate::shutdown::ShutdownFlag,
    crate::socket::CanSocket,
    crate::types::{CaptureConfig, Frame, InterfaceSpec, TimestampMode},
    std::os::fd::AsRawFd,
    std::sync::Arc,
    std::sync::atomic::{AtomicU64, Ordering},
    std::thread::JoinHandle,
    std::time::Duration,
    tokio::sync::mpsc,
    tokio_stream::wrappers::UnboundedReceiverStream,
    tracing::{debug, info},
};

/// Snapshot of one socket's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceStats {
    /// Interface name as requested (may be the `any` wildcard).
    pub name: String,
    /// Frames received on this socket.
    pub frames: u64,
    /// Cumulative kernel-reported drops on this socket.
    pub dropped: u32,
}

/// Snapshot of a session's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStats {
    /// Total frames appended to the ring.
    pub frames_received: u64,
    /// Per-socket breakdown.
    pub interfaces: Vec<InterfaceStats>,
}

/// A running (or finished) capture session.
#[cfg(target_os = "linux")]
pub struct CaptureSession {
    consumer: RingConsumer,
    events: Option<mpsc::UnboundedReceiver<CaptureEvent>>,
    stop: ShutdownFlag,
    stats: Arc<SharedStats>,
    thread: Option<JoinHandle<StopReason>>,
}

#[cfg(target_os = "linux")]
impl CaptureSession {
    /// Open, configure and bind one socket per spec, then spawn the capture
    /// thread.
    pub(crate) fn start(specs: &[InterfaceSpec], config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        if specs.is_empty() {
            return Err(CaptureError::config("at least one interface must be given"));
        }
        if specs.len() > config.max_interfaces {
            return Err(CaptureError::TooManyInterfaces {
                requested: specs.len(),
                max: config.max_interfaces,
            });
        }

        // compile every filter set up front so a syntax error can never
        // leave a half-parsed set applied to a live socket
        let filter_sets = specs
            .iter()
            .map(|spec| FilterSet::compile(&spec.filters))
            .collect::<Result<Vec<_>>>()?;

        let epoll = Epoll::new()?;
        let mut sockets = Vec::with_capacity(specs.len());
        let mut counters = Vec::with_capacity(specs.len());

        for (index, (spec, filters)) in specs.iter().zip(&filter_sets).enumerate() {
            // sockets already collected close via OwnedFd drop if any step
            // below fails
            let socket = CanSocket::open(&spec.name)?;
            epoll
                .add(socket.as_raw_fd(), index as u64)
                .map_err(|e| CaptureError::socket("epoll_ctl", &spec.name, e))?;
            socket.apply_filters(filters)?;
            socket.enable_fd_frames();
            if config.rcvbuf_size > 0 {
                socket.set_rcvbuf(config.rcvbuf_size, index == 0)?;
            }
            socket.enable_timestamps(config.timestamps)?;
            if config.monitor_drops {
                socket.enable_drop_monitor()?;
            }
            socket.bind()?;

            debug!(
                interface = %spec.name,
                accept_rules = filters.rules.len(),
                err_mask = filters.err_mask,
                join = filters.join,
                "capture socket bound"
            );
            counters.push(SocketCounters::new(spec.name.clone()));
            sockets.push(SocketHandle { socket, drops: Default::default() });
        }

        let stop =
            if config.handle_signals { ShutdownFlag::new() } else { ShutdownFlag::manual() };
        let (producer, consumer) = frame_ring(config.ring_capacity);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(SharedStats { frames: AtomicU64::new(0), sockets: counters });

        let worker = CaptureWorker {
            sockets,
            epoll,
            registry: IfaceRegistry::new(config.registry_capacity, SysResolver),
            producer,
            events: event_tx,
            stop: stop.clone(),
            stats: Arc::clone(&stats),
            hardware_stamps: config.timestamps == TimestampMode::Hardware,
            down_is_fatal: config.down_is_fatal,
            frame_budget: (config.frame_limit > 0).then_some(config.frame_limit),
            idle_timeout: (config.idle_timeout_ms > 0)
                .then(|| Duration::from_millis(config.idle_timeout_ms)),
        };

        let thread = std::thread::Builder::new()
            .name("cantap-capture".into())
            .spawn(move || worker.run())
            .map_err(|e| CaptureError::config(format!("failed to spawn capture thread: {e}")))?;

        info!(interfaces = specs.len(), "capture session started");
        Ok(Self { consumer, events: Some(event_rx), stop, stats, thread: Some(thread) })
    }

    /// Remove and return the oldest unread frame, or `None` when the ring
    /// is currently drained. Never blocks.
    pub fn pop(&mut self) -> Option<Frame> {
        self.consumer.pop()
    }

    /// Number of frames currently waiting in the ring.
    pub fn buffered(&self) -> usize {
        self.consumer.len()
    }

    /// Request cooperative shutdown. Idempotent; the capture thread exits
    /// within one bounded wait interval.
    pub fn stop(&self) {
        self.stop.trigger();
    }

    /// A clonable handle that stops this session, usable from signal
    /// handlers or other threads.
    pub fn stop_handle(&self) -> ShutdownFlag {
        self.stop.clone()
    }

    /// Whether the capture thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Await the next reportable event. Returns `None` once the loop has
    /// stopped and all pending events (including the final
    /// [`CaptureEvent::Stopped`]) were consumed, or if the event stream was
    /// taken out with [`take_event_stream`](Self::take_event_stream).
    pub async fn next_event(&mut self) -> Option<CaptureEvent> {
        match &mut self.events {
            Some(events) => events.recv().await,
            None => None,
        }
    }

    /// Non-blocking event poll.
    pub fn try_event(&mut self) -> Option<CaptureEvent> {
        self.events.as_mut().and_then(|events| events.try_recv().ok())
    }

    /// Move the event channel out as a [`Stream`](futures::Stream), for
    /// consumers that want to process events on their own task.
    pub fn take_event_stream(&mut self) -> Option<EventStream> {
        self.events.take().map(UnboundedReceiverStream::new)
    }

    /// Snapshot the session counters.
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_received: self.stats.frames.load(Ordering::Relaxed),
            interfaces: self
                .stats
                .sockets
                .iter()
                .map(|counters| InterfaceStats {
                    name: counters.name.clone(),
                    frames: counters.frames.load(Ordering::Relaxed),
                    dropped: counters.dropped.load(Ordering::Relaxed),
                })
                .collect(),
        }
    }

    /// Wait for the capture thread to finish and return why it stopped.
    ///
    /// Call [`stop`](Self::stop) first unless a frame limit or idle timeout
    /// will end the loop on its own.
    pub fn join(mut self) -> StopReason {
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or(StopReason::Fatal),
            None => StopReason::Requested,
        }
    }
}

#[cfg(target_os = "linux")]
impl Drop for CaptureSession {
    fn drop(&mut self) {
        // stop the thread on drop; never block waiting for it
        self.stop.trigger();
    }
}

#[cfg(target_os = "linux")]
impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("running", &self.is_running())
            .field("buffered", &self.buffered())
            .finish()
    }
}

// Non-Linux stub: construction always fails, mirroring the platform gate.
#[cfg(not(target_os = "linux"))]
pub struct CaptureSession {
    _private: (),
}

#[cfg(not(target_os = "linux"))]
impl CaptureSession {
    pub(crate) fn start(
        _specs: &[crate::types::InterfaceSpec],
        _config: crate::types::CaptureConfig,
    ) -> crate::error::Result<Self> {
        Err(crate::error::CaptureError::unsupported_platform(
            "SocketCAN capture",
            "Linux",
        ))
    }
}
