//! UI-facing surface: session actions, read queries and mutation slots
//! wired to one marketplace contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use mart_core::MartConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::abi::{CallArg, ContractSchema};
use crate::mutation::{ContractMutation, MutationSlot, WriteGateway};
use crate::query::{QueryResult, ReadGateway};
use crate::rpc::{EthClient, HttpTransport};
use crate::session::{ConnectOutcome, Session, WalletSession};
use crate::wallet::{NodeWallet, WalletProvider};

// ---------------------------------------------------------------------------
// Contract entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: U256,
    pub seller: Address,
    pub name: String,
    pub description: String,
    pub price: U256,
    pub stock: U256,
    pub is_active: bool,
}

impl Product {
    pub fn from_values(values: &[DynSolValue]) -> Option<Self> {
        let [id, seller, name, description, price, stock, is_active] = values else {
            return None;
        };
        Some(Self {
            id: uint(id)?,
            seller: seller.as_address()?,
            name: name.as_str()?.to_string(),
            description: description.as_str()?.to_string(),
            price: uint(price)?,
            stock: uint(stock)?,
            is_active: is_active.as_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: U256,
    pub product_id: U256,
    pub buyer: Address,
    pub seller: Address,
    pub quantity: U256,
    pub total_price: U256,
    /// Raw `OrderStatus` enum index as stored by the contract.
    pub status: u8,
    pub created_at: U256,
}

impl Order {
    pub fn from_values(values: &[DynSolValue]) -> Option<Self> {
        let [id, product_id, buyer, seller, quantity, total_price, status, created_at] = values
        else {
            return None;
        };
        Some(Self {
            id: uint(id)?,
            product_id: uint(product_id)?,
            buyer: buyer.as_address()?,
            seller: seller.as_address()?,
            quantity: uint(quantity)?,
            total_price: uint(total_price)?,
            status: uint(status)?.try_into().ok()?,
            created_at: uint(created_at)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerInfo {
    pub shop_name: String,
    pub shop_description: String,
    pub is_registered: bool,
    pub total_sales: U256,
}

impl SellerInfo {
    pub fn from_values(values: &[DynSolValue]) -> Option<Self> {
        let [shop_name, shop_description, is_registered, total_sales] = values else {
            return None;
        };
        Some(Self {
            shop_name: shop_name.as_str()?.to_string(),
            shop_description: shop_description.as_str()?.to_string(),
            is_registered: is_registered.as_bool()?,
            total_sales: uint(total_sales)?,
        })
    }
}

fn uint(value: &DynSolValue) -> Option<U256> {
    value.as_uint().map(|(v, _)| v)
}

// ---------------------------------------------------------------------------
// Storefront
// ---------------------------------------------------------------------------

pub struct Storefront {
    session: Arc<WalletSession>,
    reads: ReadGateway,
    writes: WriteGateway,
    slots: Mutex<HashMap<String, Arc<MutationSlot>>>,
    node_wallet: Option<Arc<NodeWallet>>,
    expected_chain_id: Option<u64>,
}

impl Storefront {
    pub fn new(eth: EthClient, wallet: Arc<dyn WalletProvider>, contract: Arc<ContractSchema>) -> Self {
        let session = Arc::new(WalletSession::new(wallet.clone()));
        let reads = ReadGateway::new(eth.clone(), contract.clone()).with_session(session.subscribe());
        let writes = WriteGateway::new(eth, wallet, contract, session.subscribe());
        Self {
            session,
            reads,
            writes,
            slots: Mutex::new(HashMap::new()),
            node_wallet: None,
            expected_chain_id: None,
        }
    }

    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.writes = self.writes.with_receipt_poll_interval(interval);
        self
    }

    pub fn with_expected_chain_id(mut self, chain_id: u64) -> Self {
        self.expected_chain_id = Some(chain_id);
        self
    }

    /// Wire transport, node wallet and contract schema from configuration.
    pub fn from_config(config: &MartConfig) -> Result<Self> {
        config.validate()?;
        let address: Address = config
            .contract_address
            .as_deref()
            .context("no contract address configured")?
            .trim()
            .parse()
            .context("invalid contract address")?;
        let contract = match &config.abi_path {
            Some(path) => ContractSchema::load(address, path)?,
            None => ContractSchema::bundled(address)?,
        };

        let transport = HttpTransport::new(
            config.rpc_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        let eth = EthClient::new(Arc::new(transport));
        let wallet = Arc::new(NodeWallet::new(
            eth.clone(),
            Duration::from_secs(config.account_poll_interval_secs),
        ));

        info!(rpc = %config.rpc_url, contract = %address, "storefront configured");
        let mut storefront = Self::new(eth, wallet.clone(), Arc::new(contract))
            .with_receipt_poll_interval(Duration::from_millis(config.receipt_poll_interval_ms))
            .with_expected_chain_id(config.chain_id);
        storefront.node_wallet = Some(wallet);
        Ok(storefront)
    }

    /// Start the account watcher (node wallets only) and the session's event
    /// listener. Abort the returned handles to stop them.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        if let Some(watcher) = self.node_wallet.as_ref().and_then(|w| w.start_watcher()) {
            tasks.push(watcher);
        }
        tasks.push(self.session.spawn_event_listener());
        tasks
    }

    // -- session ------------------------------------------------------------

    pub fn get_session(&self) -> Session {
        self.session.get()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub async fn connect(&self) -> ConnectOutcome {
        let outcome = self.session.connect().await;
        if self.is_wrong_network() {
            warn!(
                expected = ?self.expected_chain_id,
                actual = ?self.get_session().chain_id,
                "wallet is on a different chain"
            );
        }
        outcome
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    /// True when the wallet reports a chain other than the configured one.
    pub fn is_wrong_network(&self) -> bool {
        match (self.expected_chain_id, self.get_session().chain_id) {
            (Some(expected), Some(actual)) => expected != actual,
            _ => false,
        }
    }

    // -- generic surface ----------------------------------------------------

    pub async fn read_query(&self, function: &str, args: Vec<Option<CallArg>>) -> QueryResult {
        self.reads.read_query(function, args).await
    }

    /// Submit through the slot for `function`, creating it on first use.
    pub async fn submit_mutation(&self, function: &str, args: Vec<CallArg>) -> ContractMutation {
        self.slot(function).submit(args).await
    }

    pub fn slot(&self, function: &str) -> Arc<MutationSlot> {
        self.slots
            .lock()
            .entry(function.to_string())
            .or_insert_with(|| Arc::new(MutationSlot::new(self.writes.clone(), function)))
            .clone()
    }

    // -- typed queries ------------------------------------------------------

    pub async fn total_products(&self) -> QueryResult {
        self.read_query("getTotalProducts", vec![]).await
    }

    pub async fn total_orders(&self) -> QueryResult {
        self.read_query("getTotalOrders", vec![]).await
    }

    pub async fn product(&self, id: Option<U256>) -> QueryResult {
        self.read_query("getProduct", vec![id.map(CallArg::from)]).await
    }

    pub async fn order(&self, id: Option<U256>) -> QueryResult {
        self.read_query("getOrder", vec![id.map(CallArg::from)]).await
    }

    pub async fn seller_info(&self, seller: Option<Address>) -> QueryResult {
        self.read_query("getSellerInfo", vec![seller.map(CallArg::from)])
            .await
    }

    pub async fn seller_product_ids(&self, seller: Option<Address>) -> QueryResult {
        self.read_query("getSellerProductsIds", vec![seller.map(CallArg::from)])
            .await
    }

    pub async fn buyer_order_ids(&self, buyer: Option<Address>) -> QueryResult {
        self.read_query("getBuyerOrderIds", vec![buyer.map(CallArg::from)])
            .await
    }

    pub async fn platform_fee(&self) -> QueryResult {
        self.read_query("platformFeePercent", vec![]).await
    }

    /// Seller record of the connected account; unloaded while disconnected.
    pub async fn my_seller_info(&self) -> QueryResult {
        let session = self.get_session();
        self.seller_info(session.address.filter(|_| session.connected))
            .await
    }

    // -- typed mutations ----------------------------------------------------

    pub async fn register_seller(&self, shop_name: &str, shop_description: &str) -> ContractMutation {
        self.submit_mutation("registerSeller", vec![shop_name.into(), shop_description.into()])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mutation::MutationStatus;
    use crate::query::QueryState;
    use crate::test_support::{ALICE, BOB, MockTransport, MockWallet, TX_HASH, mined_receipt, schema};
    use alloy_primitives::hex;
    use serde_json::json;

    fn storefront(transport: Arc<MockTransport>, wallet: Arc<MockWallet>) -> Storefront {
        Storefront::new(EthClient::new(transport), wallet, schema())
            .with_receipt_poll_interval(Duration::from_millis(1))
    }

    fn product_output() -> String {
        hex::encode_prefixed(
            DynSolValue::Tuple(vec![
                DynSolValue::Uint(U256::from(1), 256),
                DynSolValue::Address(BOB),
                DynSolValue::String("Keyboard".into()),
                DynSolValue::String("Mechanical".into()),
                DynSolValue::Uint(U256::from(10u64.pow(17)), 256),
                DynSolValue::Uint(U256::from(5), 256),
                DynSolValue::Bool(true),
            ])
            .abi_encode_params(),
        )
    }

    #[tokio::test]
    async fn test_my_seller_info_waits_for_wallet() {
        let transport = MockTransport::new(|_, _| panic!("no call expected"));
        let shop = storefront(transport.clone(), MockWallet::new());

        let result = shop.my_seller_info().await;

        assert!(!result.is_enabled());
        assert_eq!(result.state, QueryState::Unloaded);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_product_query_decodes_entity() {
        let output = product_output();
        let transport = MockTransport::new(move |_, _| Ok(json!(output)));
        let shop = storefront(transport, MockWallet::new());

        let result = shop.product(Some(U256::from(1))).await;
        let product = Product::from_values(result.data().unwrap()).unwrap();

        assert_eq!(product.seller, BOB);
        assert_eq!(product.name, "Keyboard");
        assert_eq!(product.stock, U256::from(5));
        assert!(product.is_active);
    }

    #[tokio::test]
    async fn test_product_without_id_is_unloaded() {
        let transport = MockTransport::new(|_, _| panic!("no call expected"));
        let shop = storefront(transport.clone(), MockWallet::new());

        assert_eq!(shop.product(None).await.state, QueryState::Unloaded);
        assert_eq!(shop.order(None).await.state, QueryState::Unloaded);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_register_seller_after_connect() {
        let transport = MockTransport::new(|method, _| match method {
            "eth_getTransactionReceipt" => Ok(mined_receipt("0x1")),
            other => panic!("unexpected {other}"),
        });
        let wallet = MockWallet::new();
        let shop = storefront(transport, wallet.clone());

        let before = shop.register_seller("Shop A", "Desc").await;
        assert_eq!(before.error.unwrap().kind(), ErrorKind::Validation);
        assert_eq!(wallet.send_calls(), 0);

        assert_eq!(shop.connect().await, ConnectOutcome::Connected(ALICE));
        let done = shop.register_seller("Shop A", "Desc").await;

        assert_eq!(done.status, MutationStatus::Success);
        assert_eq!(done.transaction_hash, Some(TX_HASH));
        assert_eq!(shop.slot("registerSeller").current(), done);
    }

    #[tokio::test]
    async fn test_register_seller_with_empty_name() {
        let transport = MockTransport::new(|_, _| panic!("no call expected"));
        let wallet = MockWallet::new();
        let shop = storefront(transport, wallet.clone());
        shop.connect().await;

        let done = shop.register_seller("", "Desc").await;

        assert_eq!(done.status, MutationStatus::Error);
        assert_eq!(done.error.unwrap().kind(), ErrorKind::Validation);
        assert_eq!(wallet.send_calls(), 0);
    }

    #[tokio::test]
    async fn test_slots_are_shared_per_function() {
        let shop = storefront(MockTransport::new(|_, _| Ok(json!(null))), MockWallet::new());
        assert!(Arc::ptr_eq(&shop.slot("registerSeller"), &shop.slot("registerSeller")));
    }

    #[tokio::test]
    async fn test_wrong_network_detection() {
        let shop = storefront(MockTransport::new(|_, _| Ok(json!(null))), MockWallet::new())
            .with_expected_chain_id(1);
        assert!(!shop.is_wrong_network());

        shop.connect().await;
        assert!(shop.is_wrong_network());

        shop.disconnect();
        assert!(!shop.get_session().connected);
    }

    #[test]
    fn test_entities_reject_wrong_shape() {
        assert!(Product::from_values(&[]).is_none());
        assert!(SellerInfo::from_values(&[DynSolValue::Bool(true)]).is_none());
    }

    #[test]
    fn test_from_config_requires_contract_address() {
        let err = Storefront::from_config(&MartConfig::default()).err().unwrap();
        assert!(err.to_string().contains("contract address"));
    }
}
