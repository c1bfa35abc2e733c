//! RPC methods and their declared result shapes
//!
//! `bitcoin-cli` prints JSON for structured results and the bare value for
//! string results (addresses, txids). Which one a method returns is declared
//! here per method; output is never sniffed to guess.

use serde_json::Value;
use std::fmt;

/// How a method's stdout is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// JSON document (object, array, number)
    Json,
    /// Single bare string, e.g. an address or txid
    Text,
    /// Output is ignored
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcMethod {
    GetBlockchainInfo,
    CreateWallet,
    LoadWallet,
    GetNewAddress,
    GenerateToAddress,
    SendToAddress,
    GetBalance,
    /// Any other wallet RPC; the caller declares its shape.
    Custom { name: String, shape: ResultShape },
}

impl RpcMethod {
    /// Wallet-scoped method with a caller-declared result shape.
    pub fn custom(name: impl Into<String>, shape: ResultShape) -> Self {
        RpcMethod::Custom {
            name: name.into(),
            shape,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RpcMethod::GetBlockchainInfo => "getblockchaininfo",
            RpcMethod::CreateWallet => "createwallet",
            RpcMethod::LoadWallet => "loadwallet",
            RpcMethod::GetNewAddress => "getnewaddress",
            RpcMethod::GenerateToAddress => "generatetoaddress",
            RpcMethod::SendToAddress => "sendtoaddress",
            RpcMethod::GetBalance => "getbalance",
            RpcMethod::Custom { name, .. } => name,
        }
    }

    pub fn result_shape(&self) -> ResultShape {
        match self {
            RpcMethod::GetNewAddress | RpcMethod::SendToAddress => ResultShape::Text,
            RpcMethod::GetBlockchainInfo
            | RpcMethod::CreateWallet
            | RpcMethod::LoadWallet
            | RpcMethod::GenerateToAddress
            | RpcMethod::GetBalance => ResultShape::Json,
            RpcMethod::Custom { shape, .. } => *shape,
        }
    }

    /// Whether the request is sent with `-rpcwallet=<name>`.
    pub fn wallet_scoped(&self) -> bool {
        !matches!(
            self,
            RpcMethod::GetBlockchainInfo | RpcMethod::CreateWallet | RpcMethod::LoadWallet
        )
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded RPC result.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcValue {
    Json(Value),
    Text(String),
    Empty,
}

impl RpcValue {
    /// Decode stdout according to the declared shape.
    pub fn decode(shape: ResultShape, stdout: &str) -> Result<Self, String> {
        let trimmed = stdout.trim();
        match shape {
            ResultShape::Json => serde_json::from_str(trimmed)
                .map(RpcValue::Json)
                .map_err(|e| format!("invalid JSON ({}): {:?}", e, truncate(trimmed))),
            ResultShape::Text => {
                if trimmed.is_empty() {
                    Err("expected a value, got empty output".to_string())
                } else {
                    Ok(RpcValue::Text(trimmed.to_string()))
                }
            }
            ResultShape::Empty => Ok(RpcValue::Empty),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RpcValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            RpcValue::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Render a parameter as one CLI argument: strings verbatim, everything else
/// as JSON text.
pub fn render_param(param: &Value) -> String {
    match param {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(80) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
