//! Alloy-backed [`ChainRpc`] implementation for EVM chains.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{BlockId, BlockNumberOrTag, Filter};
use alloy_transport_http::Http;
use async_trait::async_trait;
use url::Url;

use super::{ChainRpc, ChainRpcError};

/// `ChainRpc` over a single HTTP JSON-RPC endpoint, built on Alloy's `ProviderBuilder`/
/// `RootProvider` but without wallet/filler layers — this engine signs raw transactions
/// itself (see `engine::egress`) and only uses the provider for reads and broadcast.
pub struct AlloyChainRpc {
    provider: RootProvider,
}

impl AlloyChainRpc {
    /// Connects to `rpc_url` over plain HTTP(S), no retry/fallback layering: one endpoint
    /// per configured chain.
    pub fn connect(rpc_url: &Url) -> Self {
        let client = RpcClient::new(Http::new(rpc_url.clone()), false);
        let provider = ProviderBuilder::default().connect_client(client);
        AlloyChainRpc { provider }
    }

    fn address_from_slice(bytes: &[u8]) -> Result<Address, ChainRpcError> {
        if bytes.len() != 20 {
            return Err(ChainRpcError::Protocol(format!(
                "expected a 20-byte EVM address, got {} byte(s)",
                bytes.len()
            )));
        }
        Ok(Address::from_slice(bytes))
    }

    async fn code_at(&self, address: Address, block: u64) -> Result<Bytes, ChainRpcError> {
        self.provider
            .get_code_at(address)
            .block_id(BlockId::number(block))
            .await
            .map_err(|e| ChainRpcError::Transport(e.to_string()))
    }

    /// Whether `address`'s deployed code at `block` hashes to `expected`.
    async fn code_matches_at(
        &self,
        address: Address,
        expected: B256,
        block: u64,
    ) -> Result<bool, ChainRpcError> {
        let code = self.code_at(address, block).await?;
        Ok(keccak256(&code) == expected)
    }

    /// EIP-155 chain ID for this endpoint. Kept outside the `ChainRpc` trait since only
    /// EVM egress signing needs it; queried once at startup and passed into `EgressLoop`/
    /// `EngineSupervisor`.
    pub async fn chain_id(&self) -> Result<u64, ChainRpcError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| ChainRpcError::Transport(e.to_string()))
    }
}

#[async_trait]
impl ChainRpc for AlloyChainRpc {
    async fn get_block_height(&self) -> Result<u64, ChainRpcError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainRpcError::Transport(e.to_string()))
    }

    /// Finds the block at which `address` first carried code hashing to `code_hash`, via
    /// binary search over `eth_getCode` at historical block tags: code deployment is
    /// monotonic (once present, a given byte sequence stays at that address), so the set of
    /// blocks where the hash matches is a suffix of `[0, tip]` and bisects cleanly. Requires
    /// an archive node for any contract older than the endpoint's pruning window.
    async fn get_contract_birth_block(
        &self,
        address: &[u8],
        code_hash: &[u8],
    ) -> Result<u64, ChainRpcError> {
        let address = Self::address_from_slice(address)?;
        let expected: [u8; 32] = code_hash.try_into().map_err(|_| {
            ChainRpcError::Protocol(format!(
                "expected a 32-byte code hash, got {} byte(s)",
                code_hash.len()
            ))
        })?;
        let expected = B256::from(expected);

        let tip = self.get_block_height().await?;
        if !self.code_matches_at(address, expected, tip).await? {
            return Err(ChainRpcError::NotFound {
                address: hex::encode(address),
            });
        }
        if self.code_matches_at(address, expected, 0).await? {
            return Ok(0);
        }

        let mut lo = 0u64;
        let mut hi = tip;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.code_matches_at(address, expected, mid).await? {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(hi)
    }

    async fn get_logs(
        &self,
        address: &[u8],
        topic: &[u8; 32],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<alloy_primitives::Log>, ChainRpcError> {
        let address = Self::address_from_slice(address)?;
        let filter = Filter::new()
            .address(address)
            .event_signature(B256::from_slice(topic))
            .from_block(BlockNumberOrTag::Number(from_block))
            .to_block(BlockNumberOrTag::Number(to_block));
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainRpcError::Transport(e.to_string()))?;
        Ok(logs.into_iter().map(|l| l.inner).collect())
    }

    async fn get_address_balance(&self, address: &[u8]) -> Result<u128, ChainRpcError> {
        let address = Self::address_from_slice(address)?;
        let balance: U256 = self
            .provider
            .get_balance(address)
            .await
            .map_err(|e| ChainRpcError::Transport(e.to_string()))?;
        balance
            .try_into()
            .map_err(|_| ChainRpcError::Protocol("balance overflows u128".into()))
    }

    async fn get_address_nonce(&self, address: &[u8]) -> Result<u64, ChainRpcError> {
        let address = Self::address_from_slice(address)?;
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(|e| ChainRpcError::Transport(e.to_string()))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Vec<u8>, ChainRpcError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| ChainRpcError::Transport(e.to_string()))?;
        Ok(pending.tx_hash().as_slice().to_vec())
    }
}
