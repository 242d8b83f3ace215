use std::{
    collections::VecDeque,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

/// Audit-relevant things that happened on the workload channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Activation {
        marble_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        uuid: Option<String>,
        accepted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// A marble was admitted although its platform TCB is degraded.
    TcbRelaxed {
        marble_type: String,
        status: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Bounded in-memory event log. The oldest events are dropped first.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, kind: EventKind) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(Event { timestamp, kind });
    }

    /// Events currently retained, oldest first.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relaxed(marble_type: &str) -> EventKind {
        EventKind::TcbRelaxed {
            marble_type: marble_type.to_string(),
            status: "SWHardeningNeeded".to_string(),
        }
    }

    #[test]
    fn drops_oldest_events_beyond_capacity() {
        let log = EventLog::new(2);
        log.record(relaxed("a"));
        log.record(relaxed("b"));
        log.record(relaxed("c"));
        let kinds: Vec<_> = log.snapshot().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![relaxed("b"), relaxed("c")]);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let log = EventLog::new(4);
        log.record(relaxed("backend"));
        let json = serde_json::to_value(log.snapshot()).unwrap();
        assert_eq!(json[0]["type"], "tcb_relaxed");
        assert_eq!(json[0]["marble_type"], "backend");
    }
}
