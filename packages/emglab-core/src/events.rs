// Event bus between the core and the presentation layer
//
// Handlers run synchronously on the emitting thread (often a worker), so they
// should hand work off rather than block.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TrainingStateChanged,
    TrainingCompleted,
    PredictionUpdated,
    RecordingSaved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TrainingStateChanged {
        busy: bool,
    },
    TrainingCompleted {
        ok: bool,
        error: Option<String>,
    },
    PredictionUpdated {
        label: String,
    },
    RecordingSaved {
        ok: bool,
        path: PathBuf,
        rows: usize,
        error: Option<String>,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::TrainingStateChanged { .. } => EventKind::TrainingStateChanged,
            Event::TrainingCompleted { .. } => EventKind::TrainingCompleted,
            Event::PredictionUpdated { .. } => EventKind::PredictionUpdated,
            Event::RecordingSaved { .. } => EventKind::RecordingSaved,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Deliver `event` to every handler of its kind
    ///
    /// The handler list is copied first so a handler may subscribe without
    /// deadlocking.
    pub fn emit(&self, event: Event) {
        let kind = event.kind();
        let handlers = self.handlers.read().get(&kind).cloned();

        match handlers {
            Some(handlers) => {
                for handler in &handlers {
                    handler(&event);
                }
            }
            None => {
                log::trace!("No handlers for {:?}", kind);
            }
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_emit_reaches_matching_handlers_only() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventKind::PredictionUpdated, move |event| {
                seen.lock().push(event.clone());
            });
        }

        bus.emit(Event::PredictionUpdated {
            label: "fist".to_string(),
        });
        bus.emit(Event::TrainingStateChanged { busy: true });

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| e.kind() == EventKind::PredictionUpdated));
    }

    #[test]
    fn test_emit_without_handlers_is_noop() {
        let bus = EventBus::new();
        assert_eq!(bus.handler_count(EventKind::RecordingSaved), 0);
        bus.emit(Event::RecordingSaved {
            ok: true,
            path: PathBuf::from("out.csv"),
            rows: 3,
            error: None,
        });
    }

    #[test]
    fn test_handler_may_subscribe() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        bus.subscribe(EventKind::TrainingCompleted, move |_| {
            inner.subscribe(EventKind::TrainingCompleted, |_| {});
        });

        bus.emit(Event::TrainingCompleted {
            ok: true,
            error: None,
        });
        assert_eq!(bus.handler_count(EventKind::TrainingCompleted), 2);
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(Event::TrainingStateChanged { busy: false }).unwrap();
        assert_eq!(json["type"], "training_state_changed");
        assert_eq!(json["busy"], false);
    }
}
