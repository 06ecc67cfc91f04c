//! Contract Write Gateway.
//!
//! A [`MutationSlot`] runs one state-changing call at a time:
//! validate locally, ask the wallet to sign and broadcast, then wait for the
//! receipt. Each submission gets a fresh [`ContractMutation`] record whose
//! status only moves forward (`Idle -> Pending -> Success | Error`).

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::utils::parse_ether;
use alloy_primitives::{B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::abi::{CallArg, ContractSchema};
use crate::error::ChainError;
use crate::rpc::{EthClient, TransactionReceipt, TransactionRequest};
use crate::session::Session;
use crate::wallet::WalletProvider;

pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Mutation record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Idle,
    /// Covers both "awaiting signature" and "awaiting confirmation".
    Pending,
    Success,
    Error,
}

/// One invocation of a state-changing contract function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractMutation {
    pub id: String,
    pub function: String,
    pub args: Vec<CallArg>,
    pub value: Option<U256>,
    pub status: MutationStatus,
    pub transaction_hash: Option<B256>,
    pub error: Option<ChainError>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ContractMutation {
    /// Creates a new record in the `Idle` state.
    pub fn new(function: impl Into<String>, args: Vec<CallArg>, value: Option<U256>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            function: function.into(),
            args,
            value,
            status: MutationStatus::Idle,
            transaction_hash: None,
            error: None,
            created_at: Utc::now(),
            submitted_at: None,
            finished_at: None,
        }
    }

    /// `Idle -> Pending`. Returns `false` (and changes nothing) otherwise.
    pub fn start(&mut self) -> bool {
        if self.status != MutationStatus::Idle {
            return false;
        }
        self.status = MutationStatus::Pending;
        self.submitted_at = Some(Utc::now());
        true
    }

    /// Record the broadcast hash while still pending.
    pub fn broadcast(&mut self, hash: B256) -> bool {
        if self.status != MutationStatus::Pending {
            return false;
        }
        self.transaction_hash = Some(hash);
        true
    }

    /// `Pending -> Success`.
    pub fn succeed(&mut self, hash: B256) -> bool {
        if self.status != MutationStatus::Pending {
            return false;
        }
        self.status = MutationStatus::Success;
        self.transaction_hash = Some(hash);
        self.finished_at = Some(Utc::now());
        true
    }

    /// `Idle | Pending -> Error`. Failing from `Idle` is how local validation
    /// errors are recorded without a pending phase.
    pub fn fail(&mut self, error: ChainError) -> bool {
        if self.is_finished() {
            return false;
        }
        self.status = MutationStatus::Error;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn is_pending(&self) -> bool {
        self.status == MutationStatus::Pending
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, MutationStatus::Success | MutationStatus::Error)
    }

    /// Human-readable failure, if any.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ChainError::user_message)
    }
}

/// Parse an ether amount such as `"0.05"` into wei.
pub fn parse_value(ether: &str) -> Result<U256, ChainError> {
    parse_ether(ether.trim())
        .map_err(|e| ChainError::validation(format!("invalid amount `{ether}`: {e}")))
}

// ---------------------------------------------------------------------------
// WriteGateway
// ---------------------------------------------------------------------------

/// Builds, sends and confirms transactions to the marketplace contract.
#[derive(Clone)]
pub struct WriteGateway {
    eth: EthClient,
    wallet: Arc<dyn WalletProvider>,
    contract: Arc<ContractSchema>,
    session: watch::Receiver<Session>,
    receipt_poll_interval: Duration,
}

impl WriteGateway {
    pub fn new(
        eth: EthClient,
        wallet: Arc<dyn WalletProvider>,
        contract: Arc<ContractSchema>,
        session: watch::Receiver<Session>,
    ) -> Self {
        Self {
            eth,
            wallet,
            contract,
            session,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
        }
    }

    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    /// Validate a call locally and build the transaction. No I/O.
    pub fn prepare(
        &self,
        function: &str,
        args: &[CallArg],
        value: Option<U256>,
    ) -> Result<TransactionRequest, ChainError> {
        let schema = self.contract.function(function)?;
        if schema.is_read_only() {
            return Err(ChainError::validation(format!(
                "{} is read-only, use a query",
                schema.signature()
            )));
        }
        if value.is_some_and(|v| !v.is_zero()) && !schema.is_payable() {
            return Err(ChainError::validation(format!(
                "{} does not accept payment",
                schema.signature()
            )));
        }
        let data = schema.encode(args)?;

        let from = {
            let session = self.session.borrow();
            match session.address {
                Some(address) if session.connected => address,
                _ => return Err(ChainError::validation("connect a wallet first")),
            }
        };

        Ok(TransactionRequest {
            from: Some(from),
            to: self.contract.address(),
            data,
            value,
        })
    }

    async fn send(&self, tx: TransactionRequest) -> Result<B256, ChainError> {
        self.wallet.send_transaction(tx).await
    }

    /// Poll until the transaction is mined. A reverted receipt becomes
    /// `ExecutionReverted` carrying the contract's reason.
    async fn confirm(&self, hash: B256, tx: &TransactionRequest) -> Result<B256, ChainError> {
        let receipt = self.wait_for_receipt(hash).await?;
        if receipt.succeeded() {
            return Ok(hash);
        }
        Err(self.revert_reason(tx, &receipt).await)
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<TransactionReceipt, ChainError> {
        let mut ticker = tokio::time::interval(self.receipt_poll_interval);
        loop {
            ticker.tick().await;
            if let Some(receipt) = self.eth.transaction_receipt(hash).await? {
                return Ok(receipt);
            }
            trace!(%hash, "receipt not yet available");
        }
    }

    /// Replay the call at the mined block; nodes only return revert data for
    /// calls, not receipts.
    async fn revert_reason(&self, tx: &TransactionRequest, receipt: &TransactionReceipt) -> ChainError {
        let block = receipt
            .block_number
            .map(|b| format!("{b:#x}"))
            .unwrap_or_else(|| "latest".to_string());
        match self.eth.call_at(tx, &block).await {
            Err(e @ ChainError::ExecutionReverted { .. }) => e,
            other => {
                debug!(?other, "replay did not reproduce the revert");
                ChainError::ExecutionReverted {
                    reason: "transaction reverted".to_string(),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MutationSlot
// ---------------------------------------------------------------------------

/// Fails the published record with `Cancelled` if the submitting future is
/// dropped while it is still pending.
struct PendingGuard<'a> {
    state: &'a watch::Sender<ContractMutation>,
    id: String,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    fn new(state: &'a watch::Sender<ContractMutation>, id: &str) -> Self {
        Self {
            state,
            id: id.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let released = self.state.send_if_modified(|current| {
            current.id == self.id
                && current.fail(ChainError::Cancelled(
                    "submission dropped before completion".to_string(),
                ))
        });
        if released {
            warn!(id = %self.id, "pending mutation abandoned, marked cancelled");
        }
    }
}

/// Serializes submissions of one contract function and publishes the
/// current record to subscribers.
pub struct MutationSlot {
    gateway: WriteGateway,
    function: String,
    state: watch::Sender<ContractMutation>,
}

impl MutationSlot {
    pub fn new(gateway: WriteGateway, function: impl Into<String>) -> Self {
        let function = function.into();
        let (state, _) = watch::channel(ContractMutation::new(function.clone(), Vec::new(), None));
        Self {
            gateway,
            function,
            state,
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn current(&self) -> ContractMutation {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ContractMutation> {
        self.state.subscribe()
    }

    /// Replace a finished record with a fresh idle one. Refused while pending.
    pub fn reset(&self) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_pending() {
                return false;
            }
            *current = ContractMutation::new(self.function.clone(), Vec::new(), None);
            true
        })
    }

    pub async fn submit(&self, args: Vec<CallArg>) -> ContractMutation {
        self.submit_with_cancel(args, None, CancellationToken::new())
            .await
    }

    pub async fn submit_payable(&self, args: Vec<CallArg>, value: U256) -> ContractMutation {
        self.submit_with_cancel(args, Some(value), CancellationToken::new())
            .await
    }

    /// Submit and wait for the outcome. Cancelling `cancel` marks the record
    /// `Cancelled` locally; a transaction already broadcast stays on its way.
    ///
    /// A submission made while another is pending is rejected with a
    /// validation error and does not touch the published record.
    pub async fn submit_with_cancel(
        &self,
        args: Vec<CallArg>,
        value: Option<U256>,
        cancel: CancellationToken,
    ) -> ContractMutation {
        let mut record = ContractMutation::new(self.function.clone(), args, value);
        let mut busy = false;
        let mut prepared = None;

        self.state.send_if_modified(|current| {
            if current.is_pending() {
                busy = true;
                return false;
            }
            match self.gateway.prepare(&self.function, &record.args, value) {
                Ok(tx) => {
                    record.start();
                    prepared = Some(tx);
                }
                Err(e) => {
                    record.fail(e);
                }
            }
            *current = record.clone();
            true
        });

        if busy {
            warn!(function = %self.function, "submit rejected, a transaction is already pending");
            record.fail(ChainError::validation("a transaction is already pending"));
            return record;
        }
        let Some(tx) = prepared else {
            info!(function = %self.function, error = ?record.error, "mutation rejected locally");
            return record;
        };

        info!(function = %self.function, id = %record.id, "submitting transaction");
        let guard = PendingGuard::new(&self.state, &record.id);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChainError::Cancelled(
                "stopped waiting for the transaction".to_string(),
            )),
            result = self.send_and_confirm(&record.id, tx) => result,
        };

        match outcome {
            Ok(hash) => {
                record.succeed(hash);
                info!(function = %self.function, %hash, "transaction confirmed");
            }
            Err(e) => {
                if let Some(hash) = self.hash_of(&record.id) {
                    record.broadcast(hash);
                }
                warn!(function = %self.function, "transaction failed: {e}");
                record.fail(e);
            }
        }
        self.publish(&record);
        guard.disarm();
        record
    }

    async fn send_and_confirm(&self, id: &str, tx: TransactionRequest) -> Result<B256, ChainError> {
        let hash = self.gateway.send(tx.clone()).await?;
        info!(function = %self.function, %hash, "transaction broadcast");
        self.state.send_if_modified(|current| current.id == id && current.broadcast(hash));
        self.gateway.confirm(hash, &tx).await
    }

    fn hash_of(&self, id: &str) -> Option<B256> {
        let current = self.state.borrow();
        (current.id == id).then_some(current.transaction_hash).flatten()
    }

    fn publish(&self, record: &ContractMutation) {
        self.state.send_if_modified(|current| {
            if current.id != record.id {
                return false;
            }
            *current = record.clone();
            true
        });
    }
}
