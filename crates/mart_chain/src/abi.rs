//! Contract interface schema.
//!
//! Every callable function of the marketplace contract is described by a
//! [`FunctionSchema`] built from the JSON ABI. Argument lists are checked
//! against the schema (name, arity, types, non-empty strings) before
//! anything is sent to the node or the wallet.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use alloy_dyn_abi::{DynSolType, DynSolValue, FunctionExt, JsonAbiExt, Specifier};
use alloy_json_abi::{Function, JsonAbi, StateMutability};
use alloy_primitives::{Address, Bytes, U256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChainError;

/// ABI of the DecentralMart contract, used when no `abi_path` is configured.
pub const BUNDLED_ABI: &str = include_str!("../abi/decentralmart.json");

// ---------------------------------------------------------------------------
// Call arguments
// ---------------------------------------------------------------------------

/// A positional argument supplied by presentation code.
///
/// Strings are trimmed and coerced to the declared parameter type, so a form
/// field holding `"42"` or `"0xabc..."` can feed a `uint256` or `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CallArg {
    Str(String),
    Uint(U256),
    Address(Address),
    Bool(bool),
}

impl CallArg {
    /// Blank strings count as "not supplied".
    pub fn is_blank(&self) -> bool {
        matches!(self, CallArg::Str(s) if s.trim().is_empty())
    }
}

impl fmt::Display for CallArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallArg::Str(s) => write!(f, "{s:?}"),
            CallArg::Uint(v) => write!(f, "{v}"),
            CallArg::Address(a) => write!(f, "{a}"),
            CallArg::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for CallArg {
    fn from(s: &str) -> Self {
        CallArg::Str(s.to_string())
    }
}

impl From<String> for CallArg {
    fn from(s: String) -> Self {
        CallArg::Str(s)
    }
}

impl From<U256> for CallArg {
    fn from(v: U256) -> Self {
        CallArg::Uint(v)
    }
}

impl From<u64> for CallArg {
    fn from(v: u64) -> Self {
        CallArg::Uint(U256::from(v))
    }
}

impl From<Address> for CallArg {
    fn from(a: Address) -> Self {
        CallArg::Address(a)
    }
}

impl From<bool> for CallArg {
    fn from(b: bool) -> Self {
        CallArg::Bool(b)
    }
}

/// Convert one argument to the declared type, or `None` on mismatch.
fn coerce(ty: &DynSolType, arg: &CallArg) -> Option<DynSolValue> {
    match (ty, arg) {
        (DynSolType::String, CallArg::Str(s)) => Some(DynSolValue::String(s.trim().to_string())),
        (_, CallArg::Str(s)) => ty.coerce_str(s.trim()).ok(),
        (DynSolType::Uint(bits), CallArg::Uint(v)) if v.bit_len() <= *bits => {
            Some(DynSolValue::Uint(*v, *bits))
        }
        (DynSolType::Address, CallArg::Address(a)) => Some(DynSolValue::Address(*a)),
        (DynSolType::Bool, CallArg::Bool(b)) => Some(DynSolValue::Bool(*b)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// FunctionSchema
// ---------------------------------------------------------------------------

/// Name, ordered parameter types and mutability of one contract function.
#[derive(Debug, Clone)]
pub struct FunctionSchema {
    function: Function,
    inputs: Vec<(String, DynSolType)>,
}

impl FunctionSchema {
    fn from_function(function: &Function) -> Result<Self> {
        let inputs = function
            .inputs
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let ty = param
                    .resolve()
                    .with_context(|| format!("unsupported type `{}` in {}", param.ty, function.name))?;
                let name = if param.name.is_empty() {
                    format!("arg{i}")
                } else {
                    param.name.trim_start_matches('_').to_string()
                };
                Ok((name, ty))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            function: function.clone(),
            inputs,
        })
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Full signature, e.g. `registerSeller(string,string)`.
    pub fn signature(&self) -> String {
        self.function.signature()
    }

    pub fn inputs(&self) -> &[(String, DynSolType)] {
        &self.inputs
    }

    pub fn arity(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_read_only(&self) -> bool {
        matches!(
            self.function.state_mutability,
            StateMutability::View | StateMutability::Pure
        )
    }

    pub fn is_payable(&self) -> bool {
        self.function.state_mutability == StateMutability::Payable
    }

    /// Validate `args` and produce calldata (selector + encoded arguments).
    pub fn encode(&self, args: &[CallArg]) -> Result<Bytes, ChainError> {
        let values = self.coerce_args(args)?;
        let data = self
            .function
            .abi_encode_input(&values)
            .map_err(|e| ChainError::validation(format!("cannot encode {}: {e}", self.name())))?;
        Ok(data.into())
    }

    /// Decode the return data of a call to this function.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<DynSolValue>, ChainError> {
        self.function.abi_decode_output(data).map_err(|e| {
            ChainError::Unknown(format!("cannot decode {} output: {e}", self.name()))
        })
    }

    fn coerce_args(&self, args: &[CallArg]) -> Result<Vec<DynSolValue>, ChainError> {
        if args.len() != self.arity() {
            return Err(ChainError::validation(format!(
                "{} expects {} argument(s), got {}",
                self.signature(),
                self.arity(),
                args.len()
            )));
        }

        self.inputs
            .iter()
            .zip(args)
            .map(|((name, ty), arg)| {
                if arg.is_blank() {
                    return Err(ChainError::validation(format!(
                        "{name} must not be empty"
                    )));
                }
                coerce(ty, arg).ok_or_else(|| {
                    ChainError::validation(format!(
                        "{name}: expected {}, got {arg}",
                        ty.sol_type_name()
                    ))
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ContractSchema
// ---------------------------------------------------------------------------

/// Address plus per-function schemas of the marketplace contract.
#[derive(Debug, Clone)]
pub struct ContractSchema {
    address: Address,
    functions: HashMap<String, FunctionSchema>,
}

impl ContractSchema {
    pub fn from_abi(address: Address, abi: &JsonAbi) -> Result<Self> {
        let mut functions = HashMap::new();
        for (name, overloads) in &abi.functions {
            let Some(first) = overloads.first() else {
                continue;
            };
            if overloads.len() > 1 {
                warn!(function = %name, count = overloads.len(), "overloaded function, using first definition");
            }
            functions.insert(name.clone(), FunctionSchema::from_function(first)?);
        }
        debug!(%address, functions = functions.len(), "contract schema loaded");
        Ok(Self { address, functions })
    }

    pub fn from_json(address: Address, json: &str) -> Result<Self> {
        let abi: JsonAbi = serde_json::from_str(json).context("failed to parse contract ABI")?;
        Self::from_abi(address, &abi)
    }

    /// Schema built from [`BUNDLED_ABI`].
    pub fn bundled(address: Address) -> Result<Self> {
        Self::from_json(address, BUNDLED_ABI)
    }

    pub fn load(address: Address, path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read ABI file {}", path.display()))?;
        Self::from_json(address, &json)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn function(&self, name: &str) -> Result<&FunctionSchema, ChainError> {
        self.functions
            .get(name)
            .ok_or_else(|| ChainError::validation(format!("unknown contract function `{name}`")))
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn encode_call(&self, name: &str, args: &[CallArg]) -> Result<Bytes, ChainError> {
        self.function(name)?.encode(args)
    }

    pub fn decode_output(&self, name: &str, data: &[u8]) -> Result<Vec<DynSolValue>, ChainError> {
        self.function(name)?.decode(data)
    }
}
