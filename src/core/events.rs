//! Pipeline lifecycle events and the observer registry.
//!
//! Listeners are plain callbacks invoked synchronously by the engine, in
//! registration order, with no filtering beyond the event kind they were
//! registered for. `once` wraps a listener so it deregisters after the first
//! invocation.

use std::time::Duration;

/// Event kinds a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PipelineStart,
    StageStart,
    StageComplete,
    StageRecovered,
    PipelineComplete,
    PipelineError,
}

/// Payload handed to listeners.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Run is starting: stage count and size of the initial file list.
    PipelineStart { stages: usize, input_files: usize },
    StageStart {
        stage: &'static str,
        index: usize,
    },
    /// Stage finished normally.
    StageComplete {
        stage: &'static str,
        index: usize,
        elapsed: Duration,
        loaded_bytes_delta: i64,
    },
    /// Stage failed but its `on_error` hook produced a substitute context.
    StageRecovered {
        stage: &'static str,
        index: usize,
        error: String,
    },
    /// All stages settled; aggregate wall time.
    PipelineComplete { elapsed: Duration, files: usize },
    /// Run aborted; the error itself propagates to the caller separately.
    PipelineError { stage: &'static str, error: String },
}

impl PipelineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PipelineEvent::PipelineStart { .. } => EventKind::PipelineStart,
            PipelineEvent::StageStart { .. } => EventKind::StageStart,
            PipelineEvent::StageComplete { .. } => EventKind::StageComplete,
            PipelineEvent::StageRecovered { .. } => EventKind::StageRecovered,
            PipelineEvent::PipelineComplete { .. } => EventKind::PipelineComplete,
            PipelineEvent::PipelineError { .. } => EventKind::PipelineError,
        }
    }
}

type Callback = Box<dyn FnMut(&PipelineEvent)>;

struct Registration {
    id: u64,
    kind: EventKind,
    callback: Callback,
    once: bool,
}

/// Handle for deregistering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Ordered listener registry, owned by the engine.
#[derive(Default)]
pub struct EventBus {
    registrations: Vec<Registration>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind. Listeners for the same kind
    /// fire in registration order.
    pub fn on(
        &mut self,
        kind: EventKind,
        callback: impl FnMut(&PipelineEvent) + 'static,
    ) -> SubscriptionId {
        self.register(kind, Box::new(callback), false)
    }

    /// Register a listener that deregisters itself after its first fire.
    pub fn once(
        &mut self,
        kind: EventKind,
        callback: impl FnMut(&PipelineEvent) + 'static,
    ) -> SubscriptionId {
        self.register(kind, Box::new(callback), true)
    }

    fn register(&mut self, kind: EventKind, callback: Callback, once: bool) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.registrations.push(Registration {
            id,
            kind,
            callback,
            once,
        });
        SubscriptionId(id)
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn off(&mut self, id: SubscriptionId) {
        self.registrations.retain(|r| r.id != id.0);
    }

    /// Fire every listener registered for the event's kind, in order.
    pub fn emit(&mut self, event: &PipelineEvent) {
        let kind = event.kind();
        for reg in &mut self.registrations {
            if reg.kind == kind {
                (reg.callback)(event);
            }
        }
        self.registrations.retain(|r| !(r.once && r.kind == kind));
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registrations.iter().filter(|r| r.kind == kind).count()
    }
}
