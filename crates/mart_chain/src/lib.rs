// Wallet session + contract read/write gateways for the marketplace

pub mod abi;
pub mod display;
pub mod error;
pub mod mutation;
pub mod query;
pub mod rpc;
pub mod session;
pub mod storefront;
pub mod wallet;

#[cfg(test)]
mod test_support;

// Re-export primary types for convenient access.
pub use abi::{BUNDLED_ABI, CallArg, ContractSchema, FunctionSchema};
pub use display::shorten_address;
pub use error::{ChainError, ErrorKind, RpcFailure};
pub use mutation::{ContractMutation, MutationSlot, MutationStatus, WriteGateway, parse_value};
pub use query::{ContractQuery, QueryResult, QueryState, ReadGateway};
pub use rpc::{EthClient, HttpTransport, RpcTransport, TransactionReceipt, TransactionRequest};
pub use session::{ConnectOutcome, Session, WalletSession};
pub use storefront::{Order, Product, SellerInfo, Storefront};
pub use wallet::{NodeWallet, WalletEvent, WalletProvider};
