//! Simulated wallet agent wired to a `WalletController` over an
//! in-process channel pair. Runs one full get-info / connect / send-tx
//! round trip as executable documentation of the channel contract.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use wb_api_types::{
    CONNECT_EVENT, GET_INFO_EVENT, SEND_TX_EVENT, TX_STATUS_EVENT, TX_STATUS_TOPIC,
    TransactionRequest, WALLET_INFO_EVENT,
};
use wb_channel::{InProcChannel, WalletChannel};
use wb_controller::WalletController;

const WALLET_ADDRESS: &str = "9f8c1e2ab7d64d1d8c1f3a5e2b9d4c7f6e5a3b2c1d0e9f8a7b6c5d4e3f2a1b0c";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (app_side, wallet_side) = InProcChannel::pair();
    run_wallet_agent(Arc::new(wallet_side));

    let controller = WalletController::new(Arc::new(app_side));

    let (status_sender, mut statuses) = mpsc::unbounded_channel();
    controller.events().on(TX_STATUS_TOPIC, move |data| {
        let _ = status_sender.send(data.clone());
    });

    let installed = controller.wallet_is_installed().await?;
    info!(installed, "install check finished");

    let response = controller
        .send_connection(&json!({
            "appName": "Host Sim",
            "description": "Round-trip demo application",
            "contractName": "demo_contract",
            "networkType": "testnet",
            "logo": "logo.png",
            "preApproval": {"stampsToPreApprove": 100, "message": "skip per-tx prompts"},
        }))
        .await?;
    info!(%response, "connection approved");

    let mut kwargs = serde_json::Map::new();
    kwargs.insert("to".to_owned(), json!("recipient-address"));
    kwargs.insert("amount".to_owned(), json!(25));
    controller
        .send_transaction(&TransactionRequest {
            network_type: "testnet".to_owned(),
            stamp_limit: 50,
            method_name: "transfer".to_owned(),
            kwargs,
        })
        .await?;

    // The agent reports progress, then the final verdict.
    for _ in 0..2 {
        let status = tokio::time::timeout(Duration::from_secs(2), statuses.recv())
            .await
            .context("timed out waiting for tx status")?
            .context("txStatus stream closed")?;
        info!(%status, "transaction status");
    }

    let snapshot = controller.snapshot().await;
    info!(?snapshot, "final cached wallet state");
    Ok(())
}

/// Scripted wallet agent: answers snapshot reads, approves every
/// connection, and acknowledges transactions with two status events.
fn run_wallet_agent(channel: Arc<InProcChannel>) {
    let mut info_requests = channel.subscribe(GET_INFO_EVENT);
    tokio::spawn({
        let channel = Arc::clone(&channel);
        async move {
            while info_requests.recv().await.is_some() {
                let _ = channel
                    .send(
                        WALLET_INFO_EVENT,
                        json!({
                            "installed": true,
                            "locked": false,
                            "wallets": [WALLET_ADDRESS],
                        }),
                    )
                    .await;
            }
        }
    });

    let mut connects = channel.subscribe(CONNECT_EVENT);
    tokio::spawn({
        let channel = Arc::clone(&channel);
        async move {
            while let Some(payload) = connects.recv().await {
                let request: Value = payload
                    .as_str()
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or(Value::Null);
                let approval_key = format!(
                    "{}|{}",
                    request["networkType"].as_str().unwrap_or_default(),
                    request["contractName"].as_str().unwrap_or_default(),
                );
                let _ = channel
                    .send(
                        WALLET_INFO_EVENT,
                        json!({
                            "installed": true,
                            "locked": false,
                            "wallets": [WALLET_ADDRESS],
                            "approvals": {(approval_key.as_str()): {"approvalHash": "sim-approval"}},
                        }),
                    )
                    .await;
            }
        }
    });

    let mut submissions = channel.subscribe(SEND_TX_EVENT);
    tokio::spawn(async move {
        while let Some(payload) = submissions.recv().await {
            let tx: Value = payload
                .as_str()
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or(Value::Null);
            let _ = channel
                .send(TX_STATUS_EVENT, json!({"status": "pending", "tx": tx}))
                .await;
            let _ = channel
                .send(
                    TX_STATUS_EVENT,
                    json!({"status": "success", "txHash": "sim-tx-hash", "tx": tx}),
                )
                .await;
        }
    });
}
