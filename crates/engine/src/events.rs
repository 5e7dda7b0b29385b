//! Progress event fan-out.
//!
//! Each running session owns one [`ProgressEmitter`]. Every subscriber gets its own unbounded
//! queue, so a slow reader never loses events: it sees everything emitted after it subscribed,
//! in emission order. A terminal event closes every queue; subscribing afterwards yields a
//! stream that is already ended.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use demoforge_types::ProgressEvent;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct Subscribers {
    queues: Vec<mpsc::UnboundedSender<ProgressEvent>>,
    closed: bool,
}

/// Sender side of a session's event queues.
pub struct ProgressEmitter {
    session_id: String,
    subscribers: Mutex<Subscribers>,
}

impl ProgressEmitter {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            subscribers: Mutex::new(Subscribers::default()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Deliver `event` to current subscribers. Terminal events close every queue; anything
    /// emitted after that is dropped.
    pub fn emit(&self, event: ProgressEvent) {
        let mut subscribers = self.subscribers.lock().expect("emitter lock poisoned");
        if subscribers.closed {
            return;
        }
        let terminal = event.is_terminal();
        subscribers.queues.retain(|queue| queue.send(event.clone()).is_ok());
        if terminal {
            debug!(session = %self.session_id, subscribers = subscribers.queues.len(), "closing progress stream");
            subscribers.closed = true;
            subscribers.queues.clear();
        }
    }

    pub fn subscribe(&self) -> EventStream {
        let mut subscribers = self.subscribers.lock().expect("emitter lock poisoned");
        if subscribers.closed {
            return EventStream::ended(self.session_id.clone());
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        subscribers.queues.push(sender);
        EventStream {
            session_id: self.session_id.clone(),
            receiver: Some(receiver),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.subscribers.lock().expect("emitter lock poisoned").closed
    }
}

/// Receiver side of one subscription.
pub struct EventStream {
    session_id: String,
    receiver: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
}

impl EventStream {
    /// A stream that yields nothing.
    pub fn ended(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            receiver: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        let receiver = self.receiver.as_mut()?;
        match receiver.recv().await {
            Some(event) => {
                if event.is_terminal() {
                    self.receiver = None;
                }
                Some(event)
            }
            None => {
                self.receiver = None;
                None
            }
        }
    }

    pub fn is_ended(&self) -> bool {
        self.receiver.is_none()
    }
}

/// Emitters of sessions started by this process.
#[derive(Default)]
pub struct EventHub {
    emitters: Mutex<HashMap<String, Arc<ProgressEmitter>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an emitter for `session_id`, dropping emitters of finished sessions.
    pub fn open(&self, session_id: &str) -> Arc<ProgressEmitter> {
        let emitter = Arc::new(ProgressEmitter::new(session_id));
        let mut emitters = self.emitters.lock().expect("event hub lock poisoned");
        emitters.retain(|_, existing| !existing.is_closed());
        emitters.insert(session_id.to_string(), Arc::clone(&emitter));
        emitter
    }

    /// Subscribe to a session. Unknown or finished sessions yield an ended stream.
    pub fn subscribe(&self, session_id: &str) -> EventStream {
        let emitters = self.emitters.lock().expect("event hub lock poisoned");
        match emitters.get(session_id) {
            Some(emitter) => emitter.subscribe(),
            None => EventStream::ended(session_id),
        }
    }
}
