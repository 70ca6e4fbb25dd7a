use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, oneshot};
use uuid::Uuid;

struct PendingEntry {
    id: Uuid,
    sender: oneshot::Sender<Value>,
}

/// Table of in-flight request-response calls, keyed by inbound event name.
///
/// Each call registers its own entry; responses resolve entries in
/// registration order, so overlapping calls of the same kind cannot steal
/// each other's response. A call that gives up (timeout, failed send)
/// cancels its entry by id so a later response goes to the next caller.
#[derive(Default)]
pub(crate) struct PendingRequests {
    queues: Mutex<HashMap<String, VecDeque<PendingEntry>>>,
}

impl PendingRequests {
    pub(crate) async fn register(&self, event: &str) -> (Uuid, oneshot::Receiver<Value>) {
        let (sender, receiver) = oneshot::channel();
        let id = Uuid::new_v4();

        let mut queues = self.queues.lock().await;
        queues
            .entry(event.to_owned())
            .or_default()
            .push_back(PendingEntry { id, sender });

        (id, receiver)
    }

    /// Hand `payload` to the oldest live entry for `event`. Entries whose
    /// receiver was dropped are discarded along the way. Returns whether
    /// anyone took the payload.
    pub(crate) async fn resolve_next(&self, event: &str, payload: &Value) -> bool {
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(event) else {
            return false;
        };

        while let Some(entry) = queue.pop_front() {
            if entry.sender.send(payload.clone()).is_ok() {
                return true;
            }
        }
        false
    }

    pub(crate) async fn cancel(&self, event: &str, id: Uuid) {
        let mut queues = self.queues.lock().await;
        if let Some(queue) = queues.get_mut(event) {
            queue.retain(|entry| entry.id != id);
        }
    }
}
