//! Error taxonomy for contract reads, writes and wallet interaction.
//!
//! Every failure in this crate ends up as a [`ChainError`] stored in the
//! status field of the affected query, mutation or connect attempt. Nothing
//! here is fatal to the process.

use alloy_primitives::Bytes;
use alloy_sol_types::{Revert, SolError};
use serde::{Deserialize, Serialize};

/// EIP-1193: the user rejected the request.
pub const USER_REJECTED_CODE: i64 = 4001;
/// EIP-1193: the requested method and/or account has not been authorized.
pub const UNAUTHORIZED_CODE: i64 = 4100;
/// Geth/anvil code for a reverted `eth_call` / `eth_estimateGas`.
pub const EXECUTION_REVERTED_CODE: i64 = 3;
/// JSON-RPC 2.0 method not found.
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;

/// Broad error kind, used for routing and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UserRejected,
    Network,
    ExecutionReverted,
    Cancelled,
    Unknown,
}

/// Errors surfaced by the integration layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ChainError {
    /// Bad or missing local input, caught before any remote call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The wallet prompt was declined.
    #[error("User rejected the request: {0}")]
    UserRejected(String),

    /// The RPC node could not be reached or answered garbage.
    #[error("Network error: {0}")]
    Network(String),

    /// The contract rejected the call. `reason` is the contract's revert
    /// string, passed through untouched.
    #[error("Execution reverted: {reason}")]
    ExecutionReverted { reason: String },

    /// The local wait was cancelled. Any transaction already broadcast is
    /// unaffected.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ChainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::UserRejected(_) => ErrorKind::UserRejected,
            Self::Network(_) => ErrorKind::Network,
            Self::ExecutionReverted { .. } => ErrorKind::ExecutionReverted,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Only network failures are worth re-issuing, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Short message for the UI. Revert reasons are shown verbatim.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::UserRejected(_) => "Request rejected in wallet.".into(),
            Self::Network(_) => "Network error. Check your connection to the node.".into(),
            Self::ExecutionReverted { reason } => reason.clone(),
            Self::Cancelled(_) => "Cancelled.".into(),
            Self::Unknown(msg) => msg.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport-level failures
// ---------------------------------------------------------------------------

/// Raw failure from a JSON-RPC round trip, before classification.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcFailure {
    /// The request never produced a JSON-RPC response (connect, timeout,
    /// HTTP status, malformed body).
    #[error("transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
}

impl RpcFailure {
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_method_not_found(&self) -> bool {
        matches!(self, Self::Rpc { code, .. } if *code == METHOD_NOT_FOUND_CODE)
    }
}

impl From<RpcFailure> for ChainError {
    fn from(failure: RpcFailure) -> Self {
        match failure {
            RpcFailure::Transport(msg) => ChainError::Network(msg),
            RpcFailure::Rpc {
                code,
                message,
                data,
            } => classify_rpc_error(code, &message, data.as_ref()),
        }
    }
}

/// Map a JSON-RPC error object onto the taxonomy.
pub fn classify_rpc_error(code: i64, message: &str, data: Option<&serde_json::Value>) -> ChainError {
    let lower = message.to_lowercase();

    if code == USER_REJECTED_CODE
        || code == UNAUTHORIZED_CODE
        || lower.contains("user rejected")
        || lower.contains("user denied")
    {
        return ChainError::UserRejected(message.to_string());
    }

    if code == EXECUTION_REVERTED_CODE || lower.contains("execution reverted") {
        let reason = data
            .and_then(revert_data)
            .and_then(|bytes| Revert::abi_decode(&bytes).ok())
            .map(|revert| revert.reason)
            .unwrap_or_else(|| message.to_string());
        return ChainError::ExecutionReverted { reason };
    }

    ChainError::Unknown(format!("{message} (code {code})"))
}

/// Nodes put revert data either directly in `data` or in `data.data`.
fn revert_data(data: &serde_json::Value) -> Option<Bytes> {
    let raw = match data {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(map) => map.get("data")?.as_str()?,
        _ => return None,
    };
    raw.parse::<Bytes>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Error(string) with reason "Already registered".
    const ALREADY_REGISTERED: &str = "0x08c379a0\
        0000000000000000000000000000000000000000000000000000000000000020\
        0000000000000000000000000000000000000000000000000000000000000012\
        416c726561647920726567697374657265640000000000000000000000000000";

    #[test]
    fn test_transport_failure_is_network() {
        let err: ChainError = RpcFailure::Transport("connection refused".into()).into();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_user_rejection_by_code() {
        let err: ChainError = RpcFailure::rpc(4001, "MetaMask Tx Signature: denied").into();
        assert_eq!(err.kind(), ErrorKind::UserRejected);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_user_rejection_by_message() {
        let err = classify_rpc_error(-32603, "User denied transaction signature", None);
        assert_eq!(err.kind(), ErrorKind::UserRejected);
    }

    #[test]
    fn test_revert_reason_decoded_from_data() {
        let data = json!(ALREADY_REGISTERED);
        let err = classify_rpc_error(3, "execution reverted: Already registered", Some(&data));
        assert_eq!(
            err,
            ChainError::ExecutionReverted {
                reason: "Already registered".into()
            }
        );
        assert_eq!(err.user_message(), "Already registered");
    }

    #[test]
    fn test_revert_reason_decoded_from_nested_data() {
        let data = json!({ "data": ALREADY_REGISTERED });
        let err = classify_rpc_error(-32000, "execution reverted", Some(&data));
        assert_eq!(
            err,
            ChainError::ExecutionReverted {
                reason: "Already registered".into()
            }
        );
    }

    #[test]
    fn test_revert_without_data_keeps_message_verbatim() {
        let err = classify_rpc_error(3, "execution reverted: Not a seller", None);
        assert_eq!(
            err,
            ChainError::ExecutionReverted {
                reason: "execution reverted: Not a seller".into()
            }
        );
    }

    #[test]
    fn test_other_rpc_errors_are_unknown() {
        let err: ChainError = RpcFailure::rpc(-32000, "nonce too low").into();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.to_string().contains("nonce too low"));
    }

    #[test]
    fn test_method_not_found_detection() {
        assert!(RpcFailure::rpc(METHOD_NOT_FOUND_CODE, "no such method").is_method_not_found());
        assert!(!RpcFailure::rpc(-32000, "boom").is_method_not_found());
        assert!(!RpcFailure::Transport("down".into()).is_method_not_found());
    }
}
