//! Scripted transport and wallet doubles shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use alloy_primitives::{Address, B256, U256, address, b256};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, broadcast};

use crate::abi::ContractSchema;
use crate::error::{ChainError, RpcFailure};
use crate::rpc::{RpcTransport, TransactionRequest};
use crate::wallet::{WalletEvent, WalletProvider};

pub const CONTRACT: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
pub const ALICE: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
pub const BOB: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");
pub const TX_HASH: B256 =
    b256!("8a3f1c2e4b5d6a7980f1e2d3c4b5a69788f9e0d1c2b3a4958677f8e9d0c1b2a3");

pub fn schema() -> Arc<ContractSchema> {
    Arc::new(ContractSchema::bundled(CONTRACT).unwrap())
}

/// ABI word for a uint256, hex encoded with `0x`.
pub fn uint_word(v: u64) -> Value {
    json!(alloy_primitives::hex::encode_prefixed(U256::from(v).to_be_bytes::<32>()))
}

pub fn mined_receipt(status: &str) -> Value {
    json!({ "transactionHash": TX_HASH, "blockNumber": "0x2a", "status": status })
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

type Handler = dyn Fn(&str, &Value) -> Result<Value, RpcFailure> + Send + Sync;

/// Transport answering from a closure and recording every call.
pub struct MockTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockTransport {
    pub fn new(
        handler: impl Fn(&str, &Value) -> Result<Value, RpcFailure> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|(m, _)| m == method).count()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn last_params(&self, method: &str) -> Option<Value> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcFailure> {
        self.calls.lock().push((method.to_string(), params.clone()));
        (self.handler)(method, &params)
    }
}

// ---------------------------------------------------------------------------
// MockWallet
// ---------------------------------------------------------------------------

/// Wallet with canned answers, call counters and an optional gate that holds
/// requests in flight until [`MockWallet::release`] is called.
pub struct MockWallet {
    accounts: Mutex<Result<Vec<Address>, ChainError>>,
    send_result: Mutex<Result<B256, ChainError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    entered: Notify,
    request_calls: AtomicUsize,
    send_calls: AtomicUsize,
    sent: Mutex<Vec<TransactionRequest>>,
    events: broadcast::Sender<WalletEvent>,
}

impl MockWallet {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            accounts: Mutex::new(Ok(vec![ALICE])),
            send_result: Mutex::new(Ok(TX_HASH)),
            gate: Mutex::new(None),
            entered: Notify::new(),
            request_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn set_accounts(&self, result: Result<Vec<Address>, ChainError>) {
        *self.accounts.lock() = result;
    }

    pub fn set_send_result(&self, result: Result<B256, ChainError>) {
        *self.send_result.lock() = result;
    }

    /// Hold every subsequent request until `release`.
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Notify::new()));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.notify_waiters();
            gate.notify_one();
        }
    }

    /// Resolves once a request has reached the wallet.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn request_calls(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.sent.lock().clone()
    }

    pub fn emit(&self, event: WalletEvent) {
        let _ = self.events.send(event);
    }

    async fn pass_gate(&self) {
        self.entered.notify_one();
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, ChainError> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        self.accounts.lock().clone()
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, ChainError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().push(tx);
        self.pass_gate().await;
        self.send_result.lock().clone()
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(31337)
    }

    fn disconnect(&self) {}

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}
