//! The local event broker.

use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;

use super::EventType;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A registered event handler. Handlers run on the emitter thread and must
/// return promptly; long work belongs on the handler's own queue.
pub type Handler = Arc<dyn Fn(EventType, &str, &Value) + Send + Sync>;

/// The event broker capability surface.
pub trait EventBus: Send + Sync {
    /// Publishes `payload` on the `(event_type, session_id)` topic.
    /// Delivery is synchronous in emitter order within the topic; emitters on
    /// the same topic back-pressure each other while handlers run.
    fn emit(&self, event_type: EventType, session_id: &str, payload: Value);

    /// Registers `handler` for every future emission of `event_type`,
    /// across all sessions.
    fn on(&self, event_type: EventType, handler: Handler);
}

/// Process-wide in-memory [`EventBus`]. No persistence, no replay;
/// unpublished events are lost at process death.
#[derive(Default)]
pub struct LocalBroker {
    handlers: RwLock<HashMap<EventType, Vec<Handler>>>,

    /// One lock per live `(type, session)` topic, serializing emitters so
    /// per-topic delivery order equals emission order.
    topics: DashMap<(EventType, String), Arc<Mutex<()>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LocalBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn topic_lock(&self, event_type: EventType, session_id: &str) -> Arc<Mutex<()>> {
        self.topics
            .entry((event_type, session_id.to_string()))
            .or_default()
            .clone()
    }

    /// Drops the topic locks of a finished session.
    fn forget_session(&self, session_id: &str) {
        self.topics.retain(|(_, sid), _| sid != session_id);
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl EventBus for LocalBroker {
    fn emit(&self, event_type: EventType, session_id: &str, payload: Value) {
        let handlers: Vec<Handler> = {
            let registered = self.handlers.read().expect("broker lock poisoned");
            registered
                .get(&event_type)
                .map(|hs| hs.to_vec())
                .unwrap_or_default()
        };

        {
            let topic = self.topic_lock(event_type, session_id);
            let _ordered = topic.lock().expect("topic lock poisoned");

            for handler in &handlers {
                handler(event_type, session_id, &payload);
            }
        }

        // The session is gone; its topics will never fire again.
        if event_type == EventType::SessionEnd {
            self.forget_session(session_id);
        }
    }

    fn on(&self, event_type: EventType, handler: Handler) {
        self.handlers
            .write()
            .expect("broker lock poisoned")
            .entry(event_type)
            .or_default()
            .push(handler);
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_handlers_receive_session_and_payload() {
        let broker = LocalBroker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        broker.on(
            EventType::SessionNew,
            Arc::new(move |t: EventType, sid: &str, payload: &Value| {
                sink.lock()
                    .unwrap()
                    .push((t, sid.to_string(), payload.clone()));
            }),
        );

        broker.emit(EventType::SessionNew, "abcd1234", json!({"id": "abcd1234"}));
        broker.emit(EventType::SessionEnd, "abcd1234", json!({}));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, EventType::SessionNew);
        assert_eq!(seen[0].1, "abcd1234");
        assert_eq!(seen[0].2["id"], "abcd1234");
    }

    #[test]
    fn test_per_topic_order_is_emission_order() {
        let broker = Arc::new(LocalBroker::new());
        let seen: Arc<Mutex<HashMap<String, Vec<u64>>>> = Arc::new(Mutex::new(HashMap::new()));

        let sink = seen.clone();
        broker.on(
            EventType::InstanceStats,
            Arc::new(move |_: EventType, sid: &str, payload: &Value| {
                sink.lock()
                    .unwrap()
                    .entry(sid.to_string())
                    .or_default()
                    .push(payload["seq"].as_u64().unwrap());
            }),
        );

        // Random-ish interleaving: one emitter thread per session topic, all
        // racing. Order must hold within each topic.
        let mut threads = Vec::new();
        for sid in ["aaaa1111", "bbbb2222", "cccc3333"] {
            let broker = broker.clone();
            threads.push(thread::spawn(move || {
                for seq in 0..200u64 {
                    broker.emit(EventType::InstanceStats, sid, json!({ "seq": seq }));
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        for sid in ["aaaa1111", "bbbb2222", "cccc3333"] {
            let expected: Vec<u64> = (0..200).collect();
            assert_eq!(seen[sid], expected, "order broken for topic {}", sid);
        }
    }

    #[test]
    fn test_multiple_handlers_all_fire() {
        let broker = LocalBroker::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            broker.on(
                EventType::InstanceNew,
                Arc::new(move |_: EventType, _: &str, _: &Value| {
                    count.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        broker.emit(EventType::InstanceNew, "abcd1234", json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_session_end_drops_topic_state() {
        let broker = LocalBroker::new();
        broker.emit(EventType::InstanceStats, "abcd1234", json!({}));
        assert!(!broker.topics.is_empty());

        broker.emit(EventType::SessionEnd, "abcd1234", json!({}));
        assert!(broker.topics.is_empty());
    }
}
