//! Text renderings of the storefront pages.

use std::fmt::Write as _;
use std::ops::RangeInclusive;

use alloy_primitives::U256;
use alloy_primitives::utils::format_ether;
use anyhow::Result;
use futures::stream::{self, StreamExt};
use mart_chain::{
    ConnectOutcome, ContractMutation, MutationStatus, Product, QueryResult, SellerInfo, Session,
    Storefront,
};
use tracing::debug;

/// Products page lists at most this many ids.
const MAX_LISTED_PRODUCTS: u64 = 100;
/// `getProduct` calls in flight at once.
const PRODUCT_FETCH_CONCURRENCY: usize = 8;

const TAGLINE: &str = "Buy and sell products with crypto. No middleman, just peer to peer ecommerce.";

pub async fn home(shop: &Storefront) -> Result<String> {
    let (products, orders, fee) =
        tokio::join!(shop.total_products(), shop.total_orders(), shop.platform_fee());

    let mut out = String::new();
    writeln!(out, "DecentralMart  [{}]", wallet_badge(&shop.get_session()))?;
    writeln!(out, "Decentralized eCommerce Platform")?;
    writeln!(out, "{TAGLINE}")?;
    writeln!(out)?;
    writeln!(out, "Products:     {}", count_or_status(&products))?;
    writeln!(out, "Orders:       {}", count_or_status(&orders))?;
    writeln!(out, "Platform fee: {}%", count_or_status(&fee))?;
    Ok(out)
}

pub async fn products(shop: &Storefront) -> Result<String> {
    let total = shop.total_products().await;
    let Some(count) = total.as_uint() else {
        return Ok(format!("Could not load products: {}\n", status_text(&total)));
    };
    let ids = listed_ids(count);
    debug!(total = %count, listed = ids.clone().count(), "loading products");

    let results: Vec<QueryResult> = stream::iter(ids)
        .map(|id| shop.product(Some(U256::from(id))))
        .buffered(PRODUCT_FETCH_CONCURRENCY)
        .collect()
        .await;

    let mut shown = 0;
    let mut lines = Vec::new();
    for result in &results {
        match result.data().and_then(Product::from_values) {
            Some(product) if product.is_active => {
                shown += 1;
                lines.push(product_line(&product));
            }
            Some(_) => {}
            None => lines.push(format!("  (unavailable: {})", status_text(result))),
        }
    }

    let mut out = String::new();
    if U256::from(results.len()) < count {
        writeln!(out, "{shown} active product(s) in the first {} of {count}", results.len())?;
    } else {
        writeln!(out, "{shown} active product(s) of {count} total")?;
    }
    for line in lines {
        writeln!(out, "{line}")?;
    }
    Ok(out)
}

/// Product ids to list: `1..=count`, capped at [`MAX_LISTED_PRODUCTS`].
fn listed_ids(count: U256) -> RangeInclusive<u64> {
    let last = count.min(U256::from(MAX_LISTED_PRODUCTS)).to::<u64>();
    1..=last
}

pub async fn register_seller(shop: &Storefront, name: &str, description: &str) -> Result<String> {
    let mut out = String::new();
    if let ConnectOutcome::Failed(e) = shop.connect().await {
        writeln!(out, "Connect a wallet first: {}", e.user_message())?;
        return Ok(out);
    }

    let existing = shop.my_seller_info().await;
    let registered = existing
        .data()
        .and_then(SellerInfo::from_values)
        .filter(|info| info.is_registered);
    if let Some(info) = registered {
        writeln!(out, "Already registered as \"{}\".", info.shop_name)?;
        return Ok(out);
    }

    writeln!(out, "Registering \"{}\"...", name.trim())?;
    let mutation = shop.register_seller(name, description).await;
    writeln!(out, "{}", mutation_line(&mutation))?;
    Ok(out)
}

pub async fn dashboard(shop: &Storefront) -> Result<String> {
    let mut out = String::new();
    if let ConnectOutcome::Failed(e) = shop.connect().await {
        writeln!(out, "Connect a wallet first: {}", e.user_message())?;
        return Ok(out);
    }
    let session = shop.get_session();
    let address = session.address.filter(|_| session.connected);

    let (seller, products, orders) = tokio::join!(
        shop.my_seller_info(),
        shop.seller_product_ids(address),
        shop.buyer_order_ids(address),
    );

    writeln!(out, "Dashboard for {}", session.display_address())?;
    match seller.data().and_then(SellerInfo::from_values) {
        Some(info) if info.is_registered => {
            writeln!(out, "Shop:        {}", info.shop_name)?;
            writeln!(out, "About:       {}", info.shop_description)?;
            writeln!(out, "Total sales: {}", info.total_sales)?;
        }
        Some(_) => writeln!(out, "Not registered as a seller.")?,
        None => writeln!(out, "Seller info: {}", status_text(&seller))?,
    }
    writeln!(out, "My products: {}", id_list(&products))?;
    writeln!(out, "My orders:   {}", id_list(&orders))?;
    Ok(out)
}

pub async fn connect(shop: &Storefront) -> Result<String> {
    let mut out = String::new();
    match shop.connect().await {
        ConnectOutcome::Connected(_) | ConnectOutcome::AlreadyConnected(_) => {
            let session = shop.get_session();
            writeln!(out, "Connected: {}", session.display_address())?;
            if let Some(chain_id) = session.chain_id {
                writeln!(out, "Chain:     {chain_id}")?;
            }
            if shop.is_wrong_network() {
                writeln!(out, "Warning: wallet is on a different network than configured.")?;
            }
        }
        ConnectOutcome::Failed(e) => writeln!(out, "Connection failed: {}", e.user_message())?,
        ConnectOutcome::InProgress => writeln!(out, "Connecting...")?,
        ConnectOutcome::Superseded => writeln!(out, "Disconnected.")?,
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn wallet_badge(session: &Session) -> String {
    if session.connected {
        session.display_address()
    } else if session.connecting {
        "Connecting...".into()
    } else {
        "Connect Wallet".into()
    }
}

fn status_text(result: &QueryResult) -> String {
    match result.error() {
        Some(e) => e.user_message(),
        None if !result.is_enabled() => "not loaded".into(),
        None => "no data".into(),
    }
}

fn count_or_status(result: &QueryResult) -> String {
    result
        .as_uint()
        .map(|v| v.to_string())
        .unwrap_or_else(|| status_text(result))
}

fn id_list(result: &QueryResult) -> String {
    match result.as_uint_array() {
        Some(ids) if ids.is_empty() => "none".into(),
        Some(ids) => ids
            .iter()
            .map(|id| format!("#{id}"))
            .collect::<Vec<_>>()
            .join(", "),
        None => status_text(result),
    }
}

fn product_line(product: &Product) -> String {
    format!(
        "  #{} {} - {} ETH ({} in stock) by {}",
        product.id,
        product.name,
        format_ether(product.price),
        product.stock,
        mart_chain::shorten_address(&product.seller.to_string()),
    )
}

fn mutation_line(mutation: &ContractMutation) -> String {
    match mutation.status {
        MutationStatus::Idle => "Not submitted.".into(),
        MutationStatus::Pending => "Waiting for confirmation...".into(),
        MutationStatus::Success => match mutation.transaction_hash {
            Some(hash) => format!("Success! Transaction: {hash}"),
            None => "Success!".into(),
        },
        MutationStatus::Error => format!(
            "Error: {}",
            mutation.error_message().unwrap_or_else(|| "unknown error".into())
        ),
    }
}
