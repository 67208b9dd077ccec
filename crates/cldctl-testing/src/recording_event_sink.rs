//! An [`EventSink`] that buffers everything it's given, so tests can
//! assert on the exact lifecycle sequence a run produced instead of
//! scraping `tracing` output.

use cldctl_core::events::{Event, EventSink};
use parking_lot::Mutex;

#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, node_id: &str) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.node_id() == node_id)
            .cloned()
            .collect()
    }

    pub fn was_skipped(&self, node_id: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| matches!(e, Event::Skipped { node_id: id, .. } if id == node_id))
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_events_in_order() {
        let sink = RecordingEventSink::new();
        sink.emit(Event::Started {
            node_id: "a".to_string(),
        });
        sink.emit(Event::OutputsReady {
            node_id: "a".to_string(),
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::Started { .. }));
        assert!(matches!(events[1], Event::OutputsReady { .. }));
    }

    #[test]
    fn filters_by_node_id() {
        let sink = RecordingEventSink::new();
        sink.emit(Event::Started {
            node_id: "a".to_string(),
        });
        sink.emit(Event::Started {
            node_id: "b".to_string(),
        });

        assert_eq!(sink.events_for("a").len(), 1);
        assert_eq!(sink.events_for("b").len(), 1);
    }

    #[test]
    fn tracks_skips() {
        let sink = RecordingEventSink::new();
        sink.emit(Event::Skipped {
            node_id: "a".to_string(),
            cause: "upstream failed".to_string(),
        });
        assert!(sink.was_skipped("a"));
        assert!(!sink.was_skipped("b"));
    }
}
