use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use crate::models::JobState;

/// Event name for ordered log lines
pub const LOG_UPDATE: &str = "logUpdate";
/// Event name for manual password prompts
pub const NEED_PASSWORD: &str = "needPassword";
/// Event name for coordinator state transitions
pub const STATE_CHANGED: &str = "stateChanged";

/// Event pushed from the engine to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum EngineEvent {
    Log(String),
    NeedPassword,
    StateChanged(JobState),
}

impl EngineEvent {
    /// Name the event is emitted under
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Log(_) => LOG_UPDATE,
            EngineEvent::NeedPassword => NEED_PASSWORD,
            EngineEvent::StateChanged(_) => STATE_CHANGED,
        }
    }
}

/// Producer side of the event channel
///
/// The channel is bounded. When it is full, producers block until the
/// consumer catches up; events are never dropped while a consumer exists.
/// Once the [`EventStream`] is dropped, events are discarded.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<EngineEvent>,
    history: Arc<Mutex<Vec<String>>>,
    /// Held across record and send so history order matches stream order
    order: Arc<Mutex<()>>,
}

/// Consumer side of the event channel
pub struct EventStream {
    rx: Receiver<EngineEvent>,
}

/// Create a sink/stream pair holding at most `capacity` undelivered events
pub fn channel(capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = bounded(capacity.max(1));
    let sink = EventSink {
        tx,
        history: Arc::new(Mutex::new(Vec::new())),
        order: Arc::new(Mutex::new(())),
    };
    (sink, EventStream { rx })
}

impl EventSink {
    /// Push a log line, also keeping it in the history
    pub fn log(&self, message: impl Into<String>) {
        self.emit(EngineEvent::Log(message.into()));
    }

    /// Ask the presentation layer for a password
    pub fn need_password(&self) {
        self.emit(EngineEvent::NeedPassword);
    }

    pub fn state_changed(&self, state: JobState) {
        self.emit(EngineEvent::StateChanged(state));
    }

    /// Push any event; log lines are recorded in the history first
    ///
    /// The history lock is released before sending, so `history()` never
    /// waits on a full channel.
    pub fn emit(&self, event: EngineEvent) {
        let _order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        if let EngineEvent::Log(message) = &event {
            tracing::debug!(target: "unpick::log", "{}", message);
            self.history
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(message.clone());
        }
        if self.tx.send(event).is_err() {
            tracing::trace!("event stream closed; event discarded");
        }
    }

    /// All log lines produced so far, in order
    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventStream {
    /// Block until the next event; `None` once every sink is gone
    pub fn recv(&self) -> Option<EngineEvent> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take every event currently buffered without blocking
    pub fn drain(&self) -> Vec<EngineEvent> {
        self.rx.try_iter().collect()
    }
}

impl Iterator for EventStream {
    type Item = EngineEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}
