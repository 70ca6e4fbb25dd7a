use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Handle returned by [`EventEmitter::on`], used to remove the listener.
///
/// Boxed closures have no usable identity, so removal is by token rather
/// than by comparing the callback itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Process-local publish/subscribe registry.
///
/// Listeners fire synchronously in registration order. Duplicate
/// registrations of the same callback are all retained. Emitting or
/// removing under an unknown topic is a no-op. A listener may call
/// [`emit`](Self::emit) again from inside its callback; the nested emit
/// sees the registrations as of its own call.
#[derive(Default)]
pub struct EventEmitter {
    next_id: AtomicU64,
    topics: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, topic: &str, listener: impl Fn(&Value) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_owned())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, topic: &str, id: ListenerId) {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(listeners) = topics.get_mut(topic) {
            listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }

    pub fn emit(&self, topic: &str, data: &Value) {
        // Snapshot outside the lock so listeners can re-enter the emitter.
        let listeners: Vec<Listener> = {
            let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
            match topics.get(topic) {
                Some(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return,
            }
        };

        for listener in listeners {
            listener(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_into(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> impl Fn(&Value) + Send + Sync + use<> {
        let log = Arc::clone(log);
        let tag = tag.to_owned();
        move |data| {
            let mut log = log.lock().unwrap();
            log.push(format!("{tag}:{data}"));
        }
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let emitter = EventEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        emitter.on("info", record_into(&log, "first"));
        emitter.on("info", record_into(&log, "second"));
        emitter.emit("info", &json!(1));

        assert_eq!(*log.lock().unwrap(), vec!["first:1", "second:1"]);
    }

    #[test]
    fn removal_leaves_the_other_listener() {
        let emitter = EventEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = emitter.on("info", record_into(&log, "first"));
        emitter.on("info", record_into(&log, "second"));
        emitter.remove_listener("info", first);
        emitter.emit("info", &json!(2));

        assert_eq!(*log.lock().unwrap(), vec!["second:2"]);
    }

    #[test]
    fn unknown_topic_is_a_no_op() {
        let emitter = EventEmitter::new();
        emitter.emit("missing", &json!(null));
        emitter.remove_listener("missing", ListenerId(99));
    }

    #[test]
    fn duplicate_registrations_are_retained() {
        let emitter = EventEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        emitter.on("info", record_into(&log, "dup"));
        emitter.on("info", record_into(&log, "dup"));
        emitter.emit("info", &json!("x"));

        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn listeners_may_emit_reentrantly() {
        let emitter = Arc::new(EventEmitter::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        emitter.on("outer", {
            let emitter = Arc::clone(&emitter);
            let log = Arc::clone(&log);
            move |_| {
                log.lock().unwrap().push("outer".to_owned());
                emitter.emit("inner", &json!(null));
            }
        });
        emitter.on("inner", record_into(&log, "inner"));
        emitter.emit("outer", &json!(null));

        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner:null"]);
    }
}
