//! Contract Read Gateway.
//!
//! Read-only contract calls, parameterized and conditionally enabled: a query
//! with a missing argument stays [`QueryState::Unloaded`] and never touches
//! the node.

use std::sync::Arc;

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::abi::{CallArg, ContractSchema};
use crate::error::ChainError;
use crate::rpc::{EthClient, TransactionRequest};
use crate::session::Session;

/// One read request. Built per invocation, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractQuery {
    pub function: String,
    pub args: Vec<Option<CallArg>>,
    pub enabled: bool,
}

impl ContractQuery {
    /// `enabled` is false when any argument is absent or blank.
    pub fn new(function: impl Into<String>, args: Vec<Option<CallArg>>) -> Self {
        let enabled = args
            .iter()
            .all(|arg| arg.as_ref().is_some_and(|a| !a.is_blank()));
        Self {
            function: function.into(),
            args,
            enabled,
        }
    }

    /// All arguments, or `None` while the query is disabled.
    pub fn resolved_args(&self) -> Option<Vec<CallArg>> {
        if !self.enabled {
            return None;
        }
        self.args.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum QueryState {
    /// Disabled query; nothing was fetched.
    #[default]
    Unloaded,
    Ready(Vec<DynSolValue>),
    Failed(ChainError),
}

/// A query together with its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub query: ContractQuery,
    pub state: QueryState,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl QueryResult {
    fn unloaded(query: ContractQuery) -> Self {
        Self {
            query,
            state: QueryState::Unloaded,
            fetched_at: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.query.enabled
    }

    pub fn data(&self) -> Option<&[DynSolValue]> {
        match &self.state {
            QueryState::Ready(values) => Some(values),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ChainError> {
        match &self.state {
            QueryState::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// First return value, for single-output functions.
    pub fn value(&self) -> Option<&DynSolValue> {
        self.data().and_then(<[DynSolValue]>::first)
    }

    pub fn as_uint(&self) -> Option<U256> {
        self.value().and_then(|v| v.as_uint()).map(|(v, _)| v)
    }

    /// Elements of a `uint256[]` return value.
    pub fn as_uint_array(&self) -> Option<Vec<U256>> {
        self.value()?
            .as_array()?
            .iter()
            .map(|v| v.as_uint().map(|(v, _)| v))
            .collect()
    }
}

/// Issues [`ContractQuery`]s against the marketplace contract.
#[derive(Clone)]
pub struct ReadGateway {
    eth: EthClient,
    contract: Arc<ContractSchema>,
    session: Option<watch::Receiver<Session>>,
}

impl ReadGateway {
    pub fn new(eth: EthClient, contract: Arc<ContractSchema>) -> Self {
        Self {
            eth,
            contract,
            session: None,
        }
    }

    /// Send reads `from` the connected account, as a browser provider does.
    pub fn with_session(mut self, session: watch::Receiver<Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn contract(&self) -> &Arc<ContractSchema> {
        &self.contract
    }

    pub async fn read_query(&self, function: &str, args: Vec<Option<CallArg>>) -> QueryResult {
        self.read(ContractQuery::new(function, args)).await
    }

    /// Run `query`. Failures are returned in the result, never raised.
    pub async fn read(&self, query: ContractQuery) -> QueryResult {
        // Name, arity and mutability are checked even for disabled queries.
        if let Err(e) = self.check_shape(&query) {
            warn!(function = %query.function, "invalid query: {e}");
            return QueryResult {
                query,
                state: QueryState::Failed(e),
                fetched_at: None,
            };
        }

        let Some(args) = query.resolved_args() else {
            debug!(function = %query.function, "query disabled, argument missing");
            return QueryResult::unloaded(query);
        };

        let state = match self.fetch(&query.function, &args).await {
            Ok(values) => QueryState::Ready(values),
            Err(e) => {
                warn!(function = %query.function, "query failed: {e}");
                QueryState::Failed(e)
            }
        };
        QueryResult {
            query,
            state,
            fetched_at: Some(Utc::now()),
        }
    }

    fn check_shape(&self, query: &ContractQuery) -> Result<(), ChainError> {
        let function = self.contract.function(&query.function)?;
        if !function.is_read_only() {
            return Err(ChainError::validation(format!(
                "{} changes state, submit it as a mutation",
                function.signature()
            )));
        }
        if query.args.len() != function.arity() {
            return Err(ChainError::validation(format!(
                "{} expects {} argument(s), got {}",
                function.signature(),
                function.arity(),
                query.args.len()
            )));
        }
        Ok(())
    }

    async fn fetch(&self, function: &str, args: &[CallArg]) -> Result<Vec<DynSolValue>, ChainError> {
        let data = self.contract.encode_call(function, args)?;
        let tx = TransactionRequest {
            from: self.caller(),
            to: self.contract.address(),
            data,
            value: None,
        };
        let output = self.eth.call(&tx).await?;
        self.contract.decode_output(function, &output)
    }

    fn caller(&self) -> Option<Address> {
        let rx = self.session.as_ref()?;
        let session = rx.borrow();
        session.address.filter(|_| session.connected)
    }
}
