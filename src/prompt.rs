//! Touch-prompt supervision
//!
//! Device commands that hit a touch policy block until the user touches the
//! device; the caller's thread is stuck in the transport meanwhile. A
//! [`TouchPrompt`] runs a single-shot timer on its own thread: if the scoped
//! operation has not finished within the grace period, the external observer
//! is told a touch is required. The notification is fire-and-forget and
//! never influences the operation's outcome; in-flight device commands
//! cannot be aborted, so the supervisor only signals.

use crossbeam_channel::{after, bounded, select, Sender};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

/// Grace period before a touch prompt is shown.
pub const DEFAULT_TOUCH_TIMEOUT: Duration = Duration::from_millis(500);

/// Notifications emitted for the external observer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    /// The device appears to be waiting for a physical touch.
    TouchRequired,

    /// The scoped operation ended; retract any touch prompt.
    TouchNotRequired,
}

/// Fire-and-forget notification sink.
pub trait EventSink: Send + Sync {
    /// Deliver an event to the observer.
    fn notify(&self, event: Event);
}

/// Scoped single-shot touch-prompt timer.
///
/// Armed on construction. On drop — success, error or panic of the scoped
/// code — the timer is cancelled, joined, and [`Event::TouchNotRequired`]
/// is emitted. The retraction is therefore always ordered after any
/// [`Event::TouchRequired`] for the same scope and before the scope's
/// result reaches the caller.
pub struct TouchPrompt {
    cancel: Option<Sender<()>>,
    timer: Option<JoinHandle<()>>,
    sink: Arc<dyn EventSink>,
}

impl TouchPrompt {
    /// Arm a timer that fires [`Event::TouchRequired`] after `timeout`
    /// unless the returned guard is dropped first.
    pub fn arm(sink: Arc<dyn EventSink>, timeout: Duration) -> Self {
        let (cancel, cancelled) = bounded::<()>(0);
        let timer_sink = Arc::clone(&sink);

        let timer = thread::spawn(move || {
            select! {
                recv(cancelled) -> _ => {}
                recv(after(timeout)) -> _ => timer_sink.notify(Event::TouchRequired),
            }
        });

        Self {
            cancel: Some(cancel),
            timer: Some(timer),
            sink,
        }
    }
}

impl Drop for TouchPrompt {
    fn drop(&mut self) {
        // dropping the sender disconnects the channel, waking the timer
        self.cancel.take();

        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }

        self.sink.notify(Event::TouchNotRequired);
    }
}

/// Run `operation` under a touch prompt scope.
pub fn with_touch_prompt<T>(
    sink: &Arc<dyn EventSink>,
    timeout: Duration,
    operation: impl FnOnce() -> T,
) -> T {
    let prompt = TouchPrompt::arm(Arc::clone(sink), timeout);
    let result = operation();
    drop(prompt);
    result
}
