//! Async frame stream facade.
//!
//! Wraps a [`CaptureSession`] in a [`Stream`] for embedding applications
//! that consume frames on an async runtime instead of calling
//! [`pop`](CaptureSession::pop) directly. The capture thread keeps its
//! pull contract — the stream is simply the single consumer, polling the
//! ring on a small interval and ending once the session has stopped and
//! the ring is drained.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use tokio::time::{Interval, MissedTickBehavior, interval};

use crate::session::CaptureSession;
use crate::types::Frame;

/// Default ring poll interval for [`FrameStream`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

pin_project! {
    /// Stream of captured frames, created by
    /// [`CaptureSession::into_frame_stream`].
    pub struct FrameStream {
        session: CaptureSession,
        interval: Interval,
    }
}

impl FrameStream {
    pub(crate) fn new(session: CaptureSession, poll_interval: Duration) -> Self {
        let mut interval = interval(poll_interval.max(Duration::from_micros(100)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { session, interval }
    }

    /// Stop the underlying session; the stream ends once the ring drains.
    pub fn stop(&self) {
        self.session.stop();
    }

    /// Access the wrapped session.
    pub fn session(&self) -> &CaptureSession {
        &self.session
    }
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        loop {
            // observe liveness before draining: frames pushed before the
            // thread finished are still delivered
            let was_running = this.session.is_running();
            if let Some(frame) = this.session.pop() {
                return Poll::Ready(Some(frame));
            }
            if !was_running {
                return Poll::Ready(None);
            }
            ready!(this.interval.poll_tick(cx));
        }
    }
}

impl CaptureSession {
    /// Consume the session into an async [`Stream`] of frames.
    ///
    /// Take the event stream out with
    /// [`take_event_stream`](CaptureSession::take_event_stream) first if
    /// events should keep flowing somewhere. A [`stop
    /// handle`](CaptureSession::stop_handle) obtained before the conversion
    /// remains valid.
    pub fn into_frame_stream(self, poll_interval: Duration) -> FrameStream {
        FrameStream::new(self, poll_interval)
    }
}
