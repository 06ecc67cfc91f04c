//! Wallet provider abstraction.
//!
//! The storefront never signs anything itself. It asks a [`WalletProvider`]
//! for authorized accounts and for signed, broadcast transactions, and
//! listens to its [`WalletEvent`] channel for account and chain changes.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ChainError;
use crate::rpc::{EthClient, TransactionRequest};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Notifications pushed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// The authorized account list changed. Empty means the user revoked access.
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    Disconnected,
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the user to authorize the storefront. May show a prompt.
    async fn request_accounts(&self) -> Result<Vec<Address>, ChainError>;

    /// Sign and broadcast `tx`, returning its hash.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, ChainError>;

    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Forget the local authorization. Never fails.
    fn disconnect(&self);

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

// ---------------------------------------------------------------------------
// NodeWallet
// ---------------------------------------------------------------------------

/// Wallet backed by accounts the node manages (`eth_sendTransaction`).
///
/// This matches what an injected browser provider does: it forwards EIP-1193
/// requests to a signer. Account and chain changes are detected by polling
/// in a background watcher.
pub struct NodeWallet {
    eth: EthClient,
    events: broadcast::Sender<WalletEvent>,
    last_seen: Arc<Mutex<WatchState>>,
    poll_interval: Duration,
    shutdown: Mutex<Option<broadcast::Sender<()>>>,
}

#[derive(Debug, Default)]
struct WatchState {
    accounts: Option<Vec<Address>>,
    chain_id: Option<u64>,
}

impl NodeWallet {
    pub fn new(eth: EthClient, poll_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            eth,
            events,
            last_seen: Arc::new(Mutex::new(WatchState::default())),
            poll_interval,
            shutdown: Mutex::new(None),
        }
    }

    /// Start polling `eth_accounts` / `eth_chainId`. Calling it again while a
    /// watcher is running returns `None`.
    pub fn start_watcher(&self) -> Option<JoinHandle<()>> {
        let mut guard = self.shutdown.lock();
        if guard.is_some() {
            return None;
        }
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        *guard = Some(shutdown_tx);

        let eth = self.eth.clone();
        let events = self.events.clone();
        let last_seen = Arc::clone(&self.last_seen);
        let period = self.poll_interval;

        info!(interval_ms = period.as_millis() as u64, "wallet watcher started");
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("wallet watcher stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        poll_once(&eth, &events, &last_seen).await;
                    }
                }
            }
        }))
    }

    pub fn stop_watcher(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
    }
}

/// One watcher iteration. Events fire only on change, never on the first
/// observation.
async fn poll_once(
    eth: &EthClient,
    events: &broadcast::Sender<WalletEvent>,
    last_seen: &Mutex<WatchState>,
) {
    match eth.accounts().await {
        Ok(accounts) => {
            let changed = {
                let mut state = last_seen.lock();
                let changed = state.accounts.as_ref().is_some_and(|prev| *prev != accounts);
                state.accounts = Some(accounts.clone());
                changed
            };
            if changed {
                info!(count = accounts.len(), "wallet accounts changed");
                let _ = events.send(WalletEvent::AccountsChanged(accounts));
            }
        }
        Err(e) => warn!("eth_accounts poll failed: {e}"),
    }

    match eth.chain_id().await {
        Ok(chain_id) => {
            let changed = {
                let mut state = last_seen.lock();
                let changed = state.chain_id.is_some_and(|prev| prev != chain_id);
                state.chain_id = Some(chain_id);
                changed
            };
            if changed {
                info!(chain_id, "wallet chain changed");
                let _ = events.send(WalletEvent::ChainChanged(chain_id));
            }
        }
        Err(e) => warn!("eth_chainId poll failed: {e}"),
    }
}

#[async_trait]
impl WalletProvider for NodeWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, ChainError> {
        let accounts = match self.eth.request_accounts().await {
            Ok(accounts) => accounts,
            // Plain nodes do not implement the EIP-1102 method.
            Err(e) if e.is_method_not_found() => {
                debug!("eth_requestAccounts unsupported, falling back to eth_accounts");
                self.eth.accounts().await?
            }
            Err(e) => return Err(e.into()),
        };
        self.last_seen.lock().accounts = Some(accounts.clone());
        Ok(accounts)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, ChainError> {
        Ok(self.eth.send_transaction(&tx).await?)
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.eth.chain_id().await?)
    }

    fn disconnect(&self) {
        self.last_seen.lock().accounts = None;
        let _ = self.events.send(WalletEvent::Disconnected);
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

impl Drop for NodeWallet {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, METHOD_NOT_FOUND_CODE, RpcFailure};
    use crate::test_support::MockTransport;
    use alloy_primitives::address;
    use serde_json::json;

    const ALICE: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    const BOB: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");

    #[tokio::test]
    async fn test_request_accounts_falls_back_to_eth_accounts() {
        let transport = MockTransport::new(|method, _| match method {
            "eth_requestAccounts" => Err(RpcFailure::rpc(METHOD_NOT_FOUND_CODE, "method not found")),
            "eth_accounts" => Ok(json!([ALICE])),
            other => panic!("unexpected {other}"),
        });
        let wallet = NodeWallet::new(EthClient::new(transport.clone()), Duration::from_secs(1));

        assert_eq!(wallet.request_accounts().await.unwrap(), vec![ALICE]);
        assert_eq!(transport.methods(), vec!["eth_requestAccounts", "eth_accounts"]);
    }

    #[tokio::test]
    async fn test_request_accounts_rejection_is_not_retried() {
        let transport = MockTransport::new(|_, _| Err(RpcFailure::rpc(4001, "User rejected the request.")));
        let wallet = NodeWallet::new(EthClient::new(transport.clone()), Duration::from_secs(1));

        let err = wallet.request_accounts().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserRejected);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_emits_event() {
        let transport = MockTransport::new(|_, _| Ok(json!([])));
        let wallet = NodeWallet::new(EthClient::new(transport), Duration::from_secs(1));
        let mut rx = wallet.subscribe();

        wallet.disconnect();
        assert_eq!(rx.recv().await.unwrap(), WalletEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_poll_reports_changes_only() {
        let accounts = Arc::new(Mutex::new(vec![ALICE]));
        let chain = Arc::new(Mutex::new(31337u64));
        let (a, c) = (Arc::clone(&accounts), Arc::clone(&chain));
        let transport = MockTransport::new(move |method, _| match method {
            "eth_accounts" => Ok(json!(*a.lock())),
            "eth_chainId" => Ok(json!(format!("{:#x}", *c.lock()))),
            other => panic!("unexpected {other}"),
        });
        let eth = EthClient::new(transport);
        let (events, mut rx) = broadcast::channel(8);
        let state = Mutex::new(WatchState::default());

        // First observation only records.
        poll_once(&eth, &events, &state).await;
        assert!(rx.try_recv().is_err());

        // No change, no event.
        poll_once(&eth, &events, &state).await;
        assert!(rx.try_recv().is_err());

        *accounts.lock() = vec![BOB];
        *chain.lock() = 1;
        poll_once(&eth, &events, &state).await;
        assert_eq!(rx.try_recv().unwrap(), WalletEvent::AccountsChanged(vec![BOB]));
        assert_eq!(rx.try_recv().unwrap(), WalletEvent::ChainChanged(1));
    }

    #[tokio::test]
    async fn test_watcher_starts_once_and_stops() {
        let transport = MockTransport::new(|method, _| match method {
            "eth_accounts" => Ok(json!([])),
            _ => Ok(json!("0x1")),
        });
        let wallet = NodeWallet::new(EthClient::new(transport), Duration::from_millis(5));

        let handle = wallet.start_watcher().expect("first start");
        assert!(wallet.start_watcher().is_none());

        wallet.stop_watcher();
        handle.await.unwrap();
    }
}
