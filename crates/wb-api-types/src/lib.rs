use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

// ── Channel event names ──────────────────────────────────────────────

/// Outbound: ask the wallet agent for its current snapshot. No payload.
pub const GET_INFO_EVENT: &str = "walletGetInfo";
/// Inbound: wallet snapshot / connection / install-check response.
pub const WALLET_INFO_EVENT: &str = "walletInfo";
/// Outbound: request an app-to-wallet connection approval.
pub const CONNECT_EVENT: &str = "walletConnect";
/// Outbound: submit a transaction.
pub const SEND_TX_EVENT: &str = "walletSendTx";
/// Inbound: transaction result or progress.
pub const TX_STATUS_EVENT: &str = "walletTxStatus";

// ── Internal emitter topics ──────────────────────────────────────────

/// Republished on every inbound wallet-info event, solicited or not.
pub const NEW_INFO_TOPIC: &str = "newInfo";
/// Republished on every inbound tx-status event.
pub const TX_STATUS_TOPIC: &str = "txStatus";

// ── Wire payload types ───────────────────────────────────────────────

/// A live data point the wallet agent displays alongside an approved account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Charm {
    pub name: String,
    pub variable_name: String,
    pub key: String,
    pub format_as: String,
    pub icon_path: String,
}

/// Asks the user to pre-approve a stamp budget for future transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreApproval {
    pub stamps_to_pre_approve: u64,
    pub message: String,
}

/// Snapshot payload carried by every inbound wallet-info event.
///
/// The wallet agent overloads this one channel for snapshot reads,
/// connection responses, and install checks, so every field is optional
/// and unknown keys are tolerated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub wallets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approvals: Option<HashMap<String, Value>>,
}

/// Payload of an outbound send-tx event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub network_type: String,
    pub stamp_limit: u64,
    pub method_name: String,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, Value>,
}

// ── Connection request ───────────────────────────────────────────────

/// A recognized field failed type validation during construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{field}` expects {expected}")]
pub struct FieldError {
    pub field: &'static str,
    pub expected: &'static str,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("connection request must be a JSON object")]
    NotAnObject,
    #[error("connection request has {} invalid field(s): {}", .0.len(), describe_fields(.0))]
    InvalidFields(Vec<FieldError>),
}

fn describe_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(FieldError::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A requested app-to-wallet connection, built fresh for each attempt.
///
/// Construction follows an allow-list: only the fields declared here can
/// be set from the input object, unrecognized keys are silently ignored,
/// and a recognized key of the wrong type is reported as a structured
/// [`ValidationError`] rather than a generic failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionRequest {
    pub app_name: String,
    pub description: String,
    pub contract_name: String,
    pub network_type: String,
    pub logo: String,
    pub background: String,
    pub approval_hash: String,
    pub reapprove: bool,
    pub new_keypair: bool,
    pub charms: Vec<Charm>,
    pub pre_approval: PreApproval,
}

/// Serialized view of a [`ConnectionRequest`]. Field order is part of the
/// wire contract: the five mandatory fields first, then the conditional
/// ones.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionPayload<'a> {
    app_name: &'a str,
    description: &'a str,
    contract_name: &'a str,
    network_type: &'a str,
    logo: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    background: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    charms: Option<&'a [Charm]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pre_approval: Option<&'a PreApproval>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reapprove: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_keypair: Option<bool>,
}

impl ConnectionRequest {
    /// Build a request from an untyped input object.
    pub fn from_value(input: &Value) -> Result<Self, ValidationError> {
        let map = input.as_object().ok_or(ValidationError::NotAnObject)?;

        let mut request = Self::default();
        let mut errors = Vec::new();

        copy_string(map, "appName", &mut request.app_name, &mut errors);
        copy_string(map, "description", &mut request.description, &mut errors);
        copy_string(map, "contractName", &mut request.contract_name, &mut errors);
        copy_string(map, "networkType", &mut request.network_type, &mut errors);
        copy_string(map, "logo", &mut request.logo, &mut errors);
        copy_string(map, "background", &mut request.background, &mut errors);
        copy_string(map, "approvalHash", &mut request.approval_hash, &mut errors);
        copy_bool(map, "reapprove", &mut request.reapprove, &mut errors);
        copy_bool(map, "newKeypair", &mut request.new_keypair, &mut errors);

        if let Some(value) = map.get("charms") {
            match serde_json::from_value::<Vec<Charm>>(value.clone()) {
                Ok(charms) => request.charms = charms,
                Err(_) => errors.push(FieldError {
                    field: "charms",
                    expected: "an array of charm objects",
                }),
            }
        }

        if let Some(value) = map.get("preApproval") {
            match serde_json::from_value::<PreApproval>(value.clone()) {
                Ok(pre_approval) => request.pre_approval = pre_approval,
                Err(_) => errors.push(FieldError {
                    field: "preApproval",
                    expected: "an object with stampsToPreApprove and message",
                }),
            }
        }

        if errors.is_empty() {
            Ok(request)
        } else {
            Err(ValidationError::InvalidFields(errors))
        }
    }

    /// Serialize the approval request for the connect event.
    ///
    /// Always includes the five mandatory fields. `background`, `charms`,
    /// and `preApproval` appear only when non-default; `reapprove` only
    /// when true; `newKeypair` only when `reapprove` is also true.
    /// `approval_hash` is held for correlation and never sent.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        let payload = ConnectionPayload {
            app_name: &self.app_name,
            description: &self.description,
            contract_name: &self.contract_name,
            network_type: &self.network_type,
            logo: &self.logo,
            background: (!self.background.is_empty()).then_some(self.background.as_str()),
            charms: (!self.charms.is_empty()).then_some(self.charms.as_slice()),
            pre_approval: (self.pre_approval.stamps_to_pre_approve > 0)
                .then_some(&self.pre_approval),
            reapprove: self.reapprove.then_some(true),
            new_keypair: (self.reapprove && self.new_keypair).then_some(true),
        };

        serde_json::to_string(&payload)
    }
}

fn copy_string(
    map: &serde_json::Map<String, Value>,
    field: &'static str,
    target: &mut String,
    errors: &mut Vec<FieldError>,
) {
    match map.get(field) {
        Some(Value::String(value)) => *target = value.clone(),
        Some(_) => errors.push(FieldError {
            field,
            expected: "a string",
        }),
        None => {}
    }
}

fn copy_bool(
    map: &serde_json::Map<String, Value>,
    field: &'static str,
    target: &mut bool,
    errors: &mut Vec<FieldError>,
) {
    match map.get(field) {
        Some(Value::Bool(value)) => *target = *value,
        Some(_) => errors.push(FieldError {
            field,
            expected: "a boolean",
        }),
        None => {}
    }
}
