//! Chain abstraction (C2): the RPC surface the engine loops are written against, plus its
//! EVM implementation (`evm_rpc`) and an EOS stub (`eos_rpc`).
//!
//! Everything above this module — the store, the keyring, the engine loops — is written
//! only against [`ChainRpc`], never against a specific chain's transport or wire format.

pub mod eos_rpc;
pub mod evm_rpc;

use alloy_primitives::Log;
use async_trait::async_trait;

/// Errors a [`ChainRpc`] backend may surface. `Transport` is always retryable; `Protocol`
/// and `NotFound` are surfaced to the caller for classification.
#[derive(Debug, thiserror::Error)]
pub enum ChainRpcError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("contract birth block not found for {address}")]
    NotFound { address: String },
    #[error("operation unsupported by this chain backend")]
    Unsupported,
}

/// Abstract client to a target chain (C2), hiding EOS-vs-EVM quirks behind one surface.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Current chain head height.
    async fn get_block_height(&self) -> Result<u64, ChainRpcError>;

    /// The block at which `address` first had `code_hash`; `NotFound` if it never did.
    async fn get_contract_birth_block(
        &self,
        address: &[u8],
        code_hash: &[u8],
    ) -> Result<u64, ChainRpcError>;

    /// Logs emitted by `address` matching `topic` within `[from_block, to_block]`
    /// (inclusive), returned in chain order.
    async fn get_logs(
        &self,
        address: &[u8],
        topic: &[u8; 32],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainRpcError>;

    /// Current balance of `address`, in the chain's smallest integer unit.
    async fn get_address_balance(&self, address: &[u8]) -> Result<u128, ChainRpcError>;

    /// Next transaction nonce for `address`.
    async fn get_address_nonce(&self, address: &[u8]) -> Result<u64, ChainRpcError>;

    /// Submits `raw` as a signed transaction. Idempotent with respect to `raw`'s bytes: a
    /// duplicate submission of already-mined bytes must not be treated as a hard failure.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Vec<u8>, ChainRpcError>;
}

