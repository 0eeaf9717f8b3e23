//! eth_call plumbing
//!
//! Every chain read goes through [`ContractCaller`] so the readers can be
//! exercised against a scripted caller in tests. Reverts are kept apart from
//! transport failures, which is what burn detection relies on.

use alloy_primitives::{Address, Bytes};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::{decode_revert_reason, SolCall, SolError};
use alloy_transport::TransportError;
use async_trait::async_trait;
use std::fmt;
use tracing::trace;

use super::abi::ERC721NonexistentToken;
use crate::error::Error;

/// Revert strings emitted by position managers for ids that do not exist.
/// Matching on them is a heuristic; decoded custom errors take precedence.
const BURNED_REVERT_MARKERS: &[&str] = &[
    "!VALID ID",
    "Invalid token ID",
    "nonexistent token",
    "ERC721NonexistentToken",
];

#[derive(Debug, Clone)]
pub enum CallError {
    /// The call executed and reverted
    Reverted { reason: Option<String>, data: Bytes },

    /// The node could not be reached or answered garbage
    Transport(String),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Reverted { reason: Some(reason), .. } => write!(f, "execution reverted: {}", reason),
            CallError::Reverted { data, .. } => write!(f, "execution reverted (data 0x{})", hex::encode(data)),
            CallError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl CallError {
    /// Build from revert data returned by the node, decoding `Error(string)`
    /// and `Panic(uint256)` payloads when present.
    pub fn from_revert_data(data: Bytes) -> Self {
        let reason = decode_revert_reason(&data);
        CallError::Reverted { reason, data }
    }

    /// True if the failure means the NFT id does not resolve to a token.
    pub fn is_nonexistent_token(&self) -> bool {
        match self {
            CallError::Reverted { reason, data } => {
                if data.len() >= 4 && data[..4] == ERC721NonexistentToken::SELECTOR {
                    return true;
                }
                reason.as_deref().is_some_and(contains_burn_marker)
            }
            // Some nodes only surface the revert inside the error message
            CallError::Transport(msg) => contains_burn_marker(msg),
        }
    }

    pub fn into_transient(self, context: &str) -> Error {
        Error::transient(format!("{}: {}", context, self))
    }
}

fn contains_burn_marker(text: &str) -> bool {
    BURNED_REVERT_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Read-only contract access
#[async_trait]
pub trait ContractCaller: Send + Sync {
    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, CallError>;
}

/// Encode `call`, send it to `to`, decode the return value.
pub async fn call_typed<C, T>(caller: &C, to: Address, call: T) -> Result<T::Return, CallError>
where
    C: ContractCaller + ?Sized,
    T: SolCall + Send,
{
    let output = caller.call(to, call.abi_encode().into()).await?;
    T::abi_decode_returns(&output)
        .map_err(|e| CallError::Transport(format!("failed to decode {} output: {}", T::SIGNATURE, e)))
}

/// `eth_call` against a JSON-RPC HTTP endpoint at the latest block
pub struct RpcCaller {
    rpc_url: String,
}

impl RpcCaller {
    pub fn new(rpc_url: String) -> Self {
        Self { rpc_url }
    }
}

#[async_trait]
impl ContractCaller for RpcCaller {
    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, CallError> {
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| CallError::Transport(format!("bad rpc url {}: {}", self.rpc_url, e)))?;
        let provider = ProviderBuilder::new().connect_http(url);

        let tx = TransactionRequest::default().to(to).input(calldata.into());

        trace!("eth_call to {} via {}", to, self.rpc_url);

        Ok(provider.call(tx).await?)
    }
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        match err.as_error_resp().and_then(|payload| payload.as_revert_data()) {
            Some(data) => CallError::from_revert_data(data),
            None => CallError::Transport(err.to_string()),
        }
    }
}
