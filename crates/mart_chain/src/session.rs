//! Wallet Session Manager.
//!
//! Owns the single [`Session`] record. Other components read it through
//! [`WalletSession::get`] or a [`watch::Receiver`]; only this module writes it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::display::shorten_address;
use crate::error::ChainError;
use crate::wallet::{WalletEvent, WalletProvider};

/// Connection state of the storefront's wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub address: Option<Address>,
    pub connected: bool,
    pub connecting: bool,
    pub chain_id: Option<u64>,
}

impl Session {
    /// `0xf39F...2266` style label, empty when no address is known.
    pub fn display_address(&self) -> String {
        self.address
            .map(|a| shorten_address(&a.to_string()))
            .unwrap_or_default()
    }

    fn clear(&mut self) {
        self.address = None;
        self.connected = false;
        self.connecting = false;
    }
}

/// Result of [`WalletSession::connect`]. Connecting never returns an error;
/// failures are reported here and leave the session disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected(Address),
    AlreadyConnected(Address),
    /// Another connect is in flight; no second prompt was shown.
    InProgress,
    Failed(ChainError),
    /// A disconnect arrived while the prompt was open; the result was dropped.
    Superseded,
}

pub struct WalletSession {
    wallet: Arc<dyn WalletProvider>,
    state: watch::Sender<Session>,
    /// Bumped on every reset. Only changed while holding the `state` lock.
    epoch: AtomicU64,
}

impl WalletSession {
    pub fn new(wallet: Arc<dyn WalletProvider>) -> Self {
        let (state, _) = watch::channel(Session::default());
        Self {
            wallet,
            state,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn wallet(&self) -> &Arc<dyn WalletProvider> {
        &self.wallet
    }

    /// Ask the wallet to authorize the storefront.
    pub async fn connect(&self) -> ConnectOutcome {
        let mut early = None;
        let mut started_at = 0;
        self.state.send_if_modified(|s| {
            if let (true, Some(address)) = (s.connected, s.address) {
                early = Some(ConnectOutcome::AlreadyConnected(address));
                return false;
            }
            if s.connecting {
                early = Some(ConnectOutcome::InProgress);
                return false;
            }
            started_at = self.epoch.load(Ordering::SeqCst);
            s.connecting = true;
            true
        });
        if let Some(outcome) = early {
            debug!(?outcome, "connect skipped");
            return outcome;
        }

        info!("requesting wallet authorization");
        let guard = ConnectGuard {
            session: self,
            started_at,
            armed: true,
        };
        let result = match self.wallet.request_accounts().await {
            Ok(accounts) => match accounts.first() {
                Some(address) => Ok(*address),
                None => Err(ChainError::UserRejected(
                    "wallet returned no authorized accounts".into(),
                )),
            },
            Err(e) => Err(e),
        };
        let chain_id = match &result {
            Ok(_) => self.wallet.chain_id().await.ok(),
            Err(_) => None,
        };

        guard.disarm();
        let mut superseded = false;
        self.state.send_if_modified(|s| {
            if self.epoch.load(Ordering::SeqCst) != started_at {
                superseded = true;
                return false;
            }
            s.connecting = false;
            if let Ok(address) = &result {
                s.address = Some(*address);
                s.connected = true;
                if chain_id.is_some() {
                    s.chain_id = chain_id;
                }
            }
            true
        });

        if superseded {
            info!("connect superseded by disconnect");
            return ConnectOutcome::Superseded;
        }
        match result {
            Ok(address) => {
                info!(%address, "wallet connected");
                ConnectOutcome::Connected(address)
            }
            Err(e) => {
                warn!("wallet connect failed: {e}");
                ConnectOutcome::Failed(e)
            }
        }
    }

    /// Clear the session locally. Always succeeds, even mid-connect.
    pub fn disconnect(&self) {
        self.reset();
        self.wallet.disconnect();
        info!("wallet disconnected");
    }

    fn reset(&self) {
        self.state.send_modify(|s| {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            s.clear();
        });
    }

    /// Re-derive the session from a provider notification.
    pub fn apply_event(&self, event: WalletEvent) {
        match event {
            WalletEvent::AccountsChanged(accounts) => match accounts.first() {
                None => {
                    info!("wallet revoked all accounts");
                    self.reset();
                }
                Some(&first) => {
                    self.state.send_if_modified(|s| {
                        if !s.connected || s.address == Some(first) {
                            return false;
                        }
                        info!(address = %first, "active account changed");
                        s.address = Some(first);
                        true
                    });
                }
            },
            WalletEvent::ChainChanged(chain_id) => {
                self.state.send_if_modified(|s| {
                    if s.chain_id == Some(chain_id) {
                        return false;
                    }
                    s.chain_id = Some(chain_id);
                    true
                });
            }
            WalletEvent::Disconnected => self.reset(),
        }
    }

    /// Apply wallet events until the provider goes away or the session is
    /// dropped.
    pub fn spawn_event_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.wallet.subscribe();
        let session: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(session) = session.upgrade() else {
                            break;
                        };
                        debug!(?event, "wallet event");
                        session.apply_event(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "wallet event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Clears `connecting` if a connect future is dropped mid-prompt, unless a
/// reset already happened.
struct ConnectGuard<'a> {
    session: &'a WalletSession,
    started_at: u64,
    armed: bool,
}

impl ConnectGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let session = self.session;
        let cleared = session.state.send_if_modified(|s| {
            if session.epoch.load(Ordering::SeqCst) != self.started_at || !s.connecting {
                return false;
            }
            s.connecting = false;
            true
        });
        if cleared {
            warn!("connect abandoned before the wallet answered");
        }
    }
}
