use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Duplex message channel between an application and a wallet agent.
///
/// Events are named; payloads are JSON values (`Value::Null` for events
/// that carry none). The concrete transport is injected so the
/// controller never depends on a specific host environment.
#[async_trait]
pub trait WalletChannel: Send + Sync {
    async fn send(&self, event: &str, payload: Value) -> Result<()>;
    fn subscribe(&self, event: &str) -> Subscription;
}

/// A live subscription to one event name.
///
/// Dropping the subscription unregisters it from the channel.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Value>,
    _guard: SubscriptionGuard,
}

impl Subscription {
    /// Wait for the next delivery. Returns `None` once the channel side
    /// has been dropped.
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }
}

struct SubscriptionGuard {
    registry: Weak<Registry>,
    event: String,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.event, self.id);
        }
    }
}

struct SubscriberEntry {
    id: u64,
    sender: mpsc::UnboundedSender<Value>,
}

#[derive(Default)]
struct Registry {
    topics: Mutex<HashMap<String, Vec<SubscriberEntry>>>,
}

impl Registry {
    fn add(&self, event: &str, id: u64, sender: mpsc::UnboundedSender<Value>) {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(event.to_owned())
            .or_default()
            .push(SubscriberEntry { id, sender });
    }

    fn remove(&self, event: &str, id: u64) {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = topics.get_mut(event) {
            entries.retain(|entry| entry.id != id);
        }
    }

    fn deliver(&self, event: &str, payload: &Value) {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = topics.get_mut(event) else {
            debug!(event, "no subscribers, dropping delivery");
            return;
        };

        entries.retain(|entry| {
            if entry.sender.send(payload.clone()).is_ok() {
                true
            } else {
                warn!(event, "pruning closed subscriber");
                false
            }
        });
    }
}

/// In-process duplex channel, built as a linked pair of endpoints.
///
/// A send on one endpoint is delivered to the peer endpoint's
/// subscribers for that event name; an event nobody subscribed to is
/// dropped silently, matching the fire-and-forget wire contract.
pub struct InProcChannel {
    local: Arc<Registry>,
    peer: Arc<Registry>,
    next_sub_id: AtomicU64,
}

impl InProcChannel {
    /// Create a linked (app side, wallet side) endpoint pair.
    pub fn pair() -> (InProcChannel, InProcChannel) {
        let app_side = Arc::new(Registry::default());
        let wallet_side = Arc::new(Registry::default());

        (
            InProcChannel {
                local: Arc::clone(&app_side),
                peer: Arc::clone(&wallet_side),
                next_sub_id: AtomicU64::new(0),
            },
            InProcChannel {
                local: wallet_side,
                peer: app_side,
                next_sub_id: AtomicU64::new(0),
            },
        )
    }
}

#[async_trait]
impl WalletChannel for InProcChannel {
    async fn send(&self, event: &str, payload: Value) -> Result<()> {
        self.peer.deliver(event, &payload);
        Ok(())
    }

    fn subscribe(&self, event: &str) -> Subscription {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.local.add(event, id, sender);

        Subscription {
            receiver,
            _guard: SubscriptionGuard {
                registry: Arc::downgrade(&self.local),
                event: event.to_owned(),
                id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn send_reaches_the_peer_not_the_sender() -> Result<()> {
        let (app, wallet) = InProcChannel::pair();
        let mut wallet_sub = wallet.subscribe("ping");
        let mut app_sub = app.subscribe("ping");

        app.send("ping", json!({"n": 1})).await?;

        assert_eq!(wallet_sub.recv().await, Some(json!({"n": 1})));
        assert!(app_sub.receiver.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn send_without_subscribers_is_a_no_op() -> Result<()> {
        let (app, _wallet) = InProcChannel::pair();
        app.send("nobody-listens", Value::Null).await
    }

    #[tokio::test]
    async fn all_subscribers_receive_each_delivery() -> Result<()> {
        let (app, wallet) = InProcChannel::pair();
        let mut first = wallet.subscribe("status");
        let mut second = wallet.subscribe("status");

        app.send("status", json!("pending")).await?;

        assert_eq!(first.recv().await, Some(json!("pending")));
        assert_eq!(second.recv().await, Some(json!("pending")));
        Ok(())
    }

    #[tokio::test]
    async fn dropped_subscription_stops_receiving() -> Result<()> {
        let (app, wallet) = InProcChannel::pair();
        let dropped = wallet.subscribe("status");
        let mut kept = wallet.subscribe("status");
        drop(dropped);

        app.send("status", json!("ok")).await?;

        assert_eq!(kept.recv().await, Some(json!("ok")));
        Ok(())
    }
}
