//! Batched calls through the Multicall3 `aggregate3` entry point.
//!
//! Calls are split into chunks of at most `max_batch_size`; each chunk is one `eth_call`.
//! Results come back in call order.

use crate::rpc::{RpcClient, RpcError};
use alloy::primitives::{Address, Bytes};
use alloy::sol_types::SolCall;
use thiserror::Error;

alloy::sol! {
    struct Call3 {
        address target;
        bool allowFailure;
        bytes callData;
    }

    struct Result3 {
        bool success;
        bytes returnData;
    }

    function aggregate3(Call3[] calls) external payable returns (Result3[] returnData);

    function getBlockNumber() external view returns (uint256 blockNumber);
}

#[derive(Debug, Error)]
pub enum MulticallError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("decode aggregate3 return: {0}")]
    Decode(String),
    #[error("aggregate3 returned {got} results for {expected} calls")]
    LengthMismatch { expected: usize, got: usize },
}

/// One logical call inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: [u8; 20],
    pub data: Vec<u8>,
    /// When false, a revert in this call reverts the whole batch.
    pub allow_failure: bool,
}

impl Call {
    pub fn new(target: [u8; 20], data: Vec<u8>) -> Self {
        Self {
            target,
            data,
            allow_failure: true,
        }
    }

    pub fn strict(target: [u8; 20], data: Vec<u8>) -> Self {
        Self {
            target,
            data,
            allow_failure: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub success: bool,
    pub return_data: Vec<u8>,
}

/// Batched-call client bound to one endpoint URL and one Multicall3 address.
#[derive(Debug)]
pub struct MulticallClient {
    rpc: RpcClient,
    contract: [u8; 20],
    max_batch_size: usize,
}

impl MulticallClient {
    pub fn new(rpc: RpcClient, contract: [u8; 20], max_batch_size: u64) -> Self {
        let max_batch_size = usize::try_from(max_batch_size).unwrap_or(usize::MAX).max(1);
        Self {
            rpc,
            contract,
            max_batch_size,
        }
    }

    /// URL the batches are sent to.
    pub fn url(&self) -> &str {
        self.rpc.url()
    }

    pub fn contract_address(&self) -> &[u8; 20] {
        &self.contract
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn is_authenticated(&self) -> bool {
        self.rpc.is_authenticated()
    }

    pub async fn aggregate(&self, calls: &[Call]) -> Result<Vec<CallResult>, MulticallError> {
        let mut out = Vec::with_capacity(calls.len());
        for chunk in calls.chunks(self.max_batch_size) {
            let raw = self.rpc.call(&self.contract, &encode_aggregate3(chunk)).await?;
            let results = decode_aggregate3(&raw)?;
            if results.len() != chunk.len() {
                return Err(MulticallError::LengthMismatch {
                    expected: chunk.len(),
                    got: results.len(),
                });
            }
            tracing::trace!(
                chain_id = %self.rpc.endpoint(),
                calls = chunk.len(),
                "aggregate3 batch"
            );
            out.extend(results);
        }
        Ok(out)
    }

    /// Block number as seen by the Multicall3 contract itself.
    pub async fn block_number(&self) -> Result<u64, MulticallError> {
        let results = self.aggregate(&[block_number_call(self.contract)]).await?;
        match results.first() {
            Some(r) if r.success => decode_block_number(&r.return_data),
            _ => Err(MulticallError::Decode("getBlockNumber() failed".into())),
        }
    }
}

/// Calldata for `aggregate3(calls)`.
pub fn encode_aggregate3(calls: &[Call]) -> Vec<u8> {
    aggregate3Call {
        calls: calls
            .iter()
            .map(|c| Call3 {
                target: Address::from(c.target),
                allowFailure: c.allow_failure,
                callData: Bytes::from(c.data.clone()),
            })
            .collect(),
    }
    .abi_encode()
}

pub fn decode_aggregate3(data: &[u8]) -> Result<Vec<CallResult>, MulticallError> {
    let decoded = aggregate3Call::abi_decode_returns(data, true)
        .map_err(|e| MulticallError::Decode(e.to_string()))?;
    Ok(decoded
        .returnData
        .into_iter()
        .map(|r| CallResult {
            success: r.success,
            return_data: r.returnData.to_vec(),
        })
        .collect())
}

/// `getBlockNumber()` on the Multicall3 contract.
pub fn block_number_call(contract: [u8; 20]) -> Call {
    Call::strict(contract, getBlockNumberCall {}.abi_encode())
}

pub fn decode_block_number(data: &[u8]) -> Result<u64, MulticallError> {
    let decoded = getBlockNumberCall::abi_decode_returns(data, true)
        .map_err(|e| MulticallError::Decode(e.to_string()))?;
    u64::try_from(decoded.blockNumber).map_err(|e| MulticallError::Decode(e.to_string()))
}
