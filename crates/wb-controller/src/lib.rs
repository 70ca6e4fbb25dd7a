mod pending;

use anyhow::{Context, Result, bail};
use pending::PendingRequests;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wb_api_types::{
    CONNECT_EVENT, ConnectionRequest, GET_INFO_EVENT, NEW_INFO_TOPIC, SEND_TX_EVENT,
    TX_STATUS_EVENT, TX_STATUS_TOPIC, TransactionRequest, WALLET_INFO_EVENT, WalletInfo,
};
use wb_channel::WalletChannel;
use wb_events::EventEmitter;

/// Per-controller timeouts. Every request-response call carries one; the
/// install check keeps its historical 1-second default since its timeout
/// doubles as the "not installed" verdict.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub install_check_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            install_check_timeout: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Last-known wallet state, folded from inbound wallet-info events.
///
/// This is a cache, not a fresh read: a field stays at its previous value
/// until an event mentions it again, and `None` means never reported.
#[derive(Debug, Clone, Default)]
pub struct WalletSnapshot {
    pub installed: Option<bool>,
    pub locked: Option<bool>,
    pub wallet_address: Option<String>,
    pub approvals: HashMap<String, Value>,
}

/// Façade between the application and the wallet agent on the other end
/// of the channel.
///
/// Two listener tasks live as long as the controller: one folds inbound
/// wallet-info events into the cached [`WalletSnapshot`], resolves the
/// oldest pending request, and republishes the raw payload as `newInfo`;
/// the other republishes tx-status events as `txStatus`. Construction
/// must happen inside a tokio runtime.
pub struct WalletController {
    channel: Arc<dyn WalletChannel>,
    config: ControllerConfig,
    events: Arc<EventEmitter>,
    snapshot: Arc<RwLock<WalletSnapshot>>,
    pending: Arc<PendingRequests>,
    listener_tasks: Vec<JoinHandle<()>>,
}

impl WalletController {
    pub fn new(channel: Arc<dyn WalletChannel>) -> Self {
        Self::with_config(channel, ControllerConfig::default())
    }

    pub fn with_config(channel: Arc<dyn WalletChannel>, config: ControllerConfig) -> Self {
        let events = Arc::new(EventEmitter::new());
        let snapshot = Arc::new(RwLock::new(WalletSnapshot::default()));
        let pending = Arc::new(PendingRequests::default());

        let mut info_sub = channel.subscribe(WALLET_INFO_EVENT);
        let info_task = tokio::spawn({
            let events = Arc::clone(&events);
            let snapshot = Arc::clone(&snapshot);
            let pending = Arc::clone(&pending);
            async move {
                while let Some(payload) = info_sub.recv().await {
                    fold_wallet_info(&snapshot, &payload).await;
                    pending.resolve_next(WALLET_INFO_EVENT, &payload).await;
                    events.emit(NEW_INFO_TOPIC, &payload);
                }
            }
        });

        let mut status_sub = channel.subscribe(TX_STATUS_EVENT);
        let status_task = tokio::spawn({
            let events = Arc::clone(&events);
            async move {
                while let Some(payload) = status_sub.recv().await {
                    events.emit(TX_STATUS_TOPIC, &payload);
                }
            }
        });

        Self {
            channel,
            config,
            events,
            snapshot,
            pending,
            listener_tasks: vec![info_task, status_task],
        }
    }

    /// Emitter carrying the `newInfo` and `txStatus` republished events.
    pub fn events(&self) -> Arc<EventEmitter> {
        Arc::clone(&self.events)
    }

    pub async fn snapshot(&self) -> WalletSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn installed(&self) -> Option<bool> {
        self.snapshot.read().await.installed
    }

    pub async fn locked(&self) -> Option<bool> {
        self.snapshot.read().await.locked
    }

    pub async fn wallet_address(&self) -> Option<String> {
        self.snapshot.read().await.wallet_address.clone()
    }

    pub async fn approvals(&self) -> HashMap<String, Value> {
        self.snapshot.read().await.approvals.clone()
    }

    /// Ask the wallet agent for a fresh snapshot. Fire-and-forget: the
    /// answer arrives as a wallet-info event and surfaces as `newInfo`.
    pub async fn get_info(&self) -> Result<()> {
        self.channel
            .send(GET_INFO_EVENT, Value::Null)
            .await
            .context("failed to send get-info")
    }

    /// Probe for the wallet agent. Any wallet-info response before the
    /// configured deadline counts as installed; silence resolves `false`.
    ///
    /// A timed-out probe cancels its pending entry, so a response that
    /// arrives late only refreshes the snapshot and can no longer be
    /// mistaken for the answer to a newer request.
    pub async fn wallet_is_installed(&self) -> Result<bool> {
        let (id, receiver) = self.pending.register(WALLET_INFO_EVENT).await;

        if let Err(err) = self.get_info().await {
            self.pending.cancel(WALLET_INFO_EVENT, id).await;
            return Err(err);
        }

        match tokio::time::timeout(self.config.install_check_timeout, receiver).await {
            Ok(Ok(_payload)) => {
                self.snapshot.write().await.installed = Some(true);
                Ok(true)
            }
            Ok(Err(_closed)) => {
                debug!("wallet-info listener closed during install check");
                Ok(false)
            }
            Err(_elapsed) => {
                self.pending.cancel(WALLET_INFO_EVENT, id).await;
                Ok(false)
            }
        }
    }

    /// Submit a connection approval request and wait for the wallet's
    /// wallet-info response, which is also republished as `newInfo`.
    ///
    /// Invalid input fails synchronously with the structured validation
    /// error; an unanswered request fails after `request_timeout` instead
    /// of hanging forever.
    pub async fn send_connection(&self, request: &Value) -> Result<Value> {
        let connection = match ConnectionRequest::from_value(request) {
            Ok(connection) => connection,
            Err(err) => {
                warn!("rejected connection request: {err}");
                return Err(err.into());
            }
        };
        let payload = connection
            .to_payload()
            .context("failed to serialize connection request")?;

        let (id, receiver) = self.pending.register(WALLET_INFO_EVENT).await;

        if let Err(err) = self.channel.send(CONNECT_EVENT, Value::String(payload)).await {
            self.pending.cancel(WALLET_INFO_EVENT, id).await;
            return Err(err).context("failed to send connection request");
        }

        match tokio::time::timeout(self.config.request_timeout, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_closed)) => bail!("wallet-info listener closed before a connection response"),
            Err(_elapsed) => {
                self.pending.cancel(WALLET_INFO_EVENT, id).await;
                bail!(
                    "no connection response within {:?}",
                    self.config.request_timeout
                );
            }
        }
    }

    /// Submit a transaction. Fire-and-forget: progress and the final
    /// verdict arrive as `txStatus` emitter events.
    pub async fn send_transaction(&self, tx: &TransactionRequest) -> Result<()> {
        let payload = serde_json::to_string(tx).context("failed to serialize transaction")?;
        self.channel
            .send(SEND_TX_EVENT, Value::String(payload))
            .await
            .context("failed to send transaction")
    }
}

impl Drop for WalletController {
    fn drop(&mut self) {
        for task in &self.listener_tasks {
            task.abort();
        }
    }
}

/// Fold a wallet-info payload into the cached snapshot.
///
/// A payload carrying an `errors` field leaves the snapshot untouched;
/// so does one that does not parse. Each field updates only when present,
/// preserving last-known values for the rest.
async fn fold_wallet_info(snapshot: &RwLock<WalletSnapshot>, payload: &Value) {
    match serde_json::from_value::<WalletInfo>(payload.clone()) {
        Ok(info) if info.errors.is_none() => {
            let mut guard = snapshot.write().await;
            if let Some(installed) = info.installed {
                guard.installed = Some(installed);
            }
            if let Some(locked) = info.locked {
                guard.locked = Some(locked);
            }
            if let Some(address) = info.wallets.first() {
                guard.wallet_address = Some(address.clone());
            }
            if let Some(approvals) = info.approvals {
                guard.approvals = approvals;
            }
        }
        Ok(_) => debug!("wallet reported errors, snapshot left unchanged"),
        Err(err) => warn!("unparseable wallet-info payload: {err}"),
    }
}
