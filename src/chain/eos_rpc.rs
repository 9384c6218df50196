//! EOS-family [`ChainRpc`] stub.
//!
//! There is persistence groundwork for an EOS backend but no live RPC engine for it yet;
//! this exercises the engine's generic loop code against a second backend shape without
//! pretending to support a chain this crate cannot talk to.

use async_trait::async_trait;

use super::{ChainRpc, ChainRpcError};

/// A [`ChainRpc`] that returns [`ChainRpcError::Unsupported`] for every operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct EosChainRpc;

#[async_trait]
impl ChainRpc for EosChainRpc {
    async fn get_block_height(&self) -> Result<u64, ChainRpcError> {
        Err(ChainRpcError::Unsupported)
    }

    async fn get_contract_birth_block(
        &self,
        _address: &[u8],
        _code_hash: &[u8],
    ) -> Result<u64, ChainRpcError> {
        Err(ChainRpcError::Unsupported)
    }

    async fn get_logs(
        &self,
        _address: &[u8],
        _topic: &[u8; 32],
        _from_block: u64,
        _to_block: u64,
    ) -> Result<Vec<alloy_primitives::Log>, ChainRpcError> {
        Err(ChainRpcError::Unsupported)
    }

    async fn get_address_balance(&self, _address: &[u8]) -> Result<u128, ChainRpcError> {
        Err(ChainRpcError::Unsupported)
    }

    async fn get_address_nonce(&self, _address: &[u8]) -> Result<u64, ChainRpcError> {
        Err(ChainRpcError::Unsupported)
    }

    async fn send_raw_transaction(&self, _raw: &[u8]) -> Result<Vec<u8>, ChainRpcError> {
        Err(ChainRpcError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_operation_reports_unsupported() {
        let rpc = EosChainRpc;
        assert!(matches!(
            rpc.get_block_height().await,
            Err(ChainRpcError::Unsupported)
        ));
        assert!(matches!(
            rpc.get_address_balance(b"x").await,
            Err(ChainRpcError::Unsupported)
        ));
    }
}
