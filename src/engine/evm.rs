//! `EvmEngine`: the [`Engine`] implementation for EVM-compatible chains, tying together
//! [`ContractStore`], a [`ChainRpc`] backend, and this node's optional master key.

use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::ChainRpc;
use crate::codec::Event;
use crate::keyring;
use crate::store::{ContractStore, KvStore};

use super::config::{AGE_LIMIT, GAS_LIMIT, GAS_PRICE};
use super::{Engine, EngineError};

/// Ties persistence, chain access, and this node's signing identity into the [`Engine`]
/// surface the outer MTG worker consumes.
pub struct EvmEngine<S: KvStore> {
    store: Arc<ContractStore<S>>,
    rpc: Arc<dyn ChainRpc>,
    master_key: Option<[u8; 32]>,
    publisher: bool,
}

impl<S: KvStore> EvmEngine<S> {
    pub fn new(
        store: Arc<ContractStore<S>>,
        rpc: Arc<dyn ChainRpc>,
        master_key: Option<[u8; 32]>,
        publisher: bool,
    ) -> Self {
        EvmEngine {
            store,
            rpc,
            master_key,
            publisher: publisher && master_key.is_some(),
        }
    }
}

#[async_trait]
impl<S: KvStore + Send + Sync> Engine for EvmEngine<S> {
    async fn verify_address(&self, address: &[u8], code_hash: &[u8]) -> Result<(), EngineError> {
        if address.len() != 20 {
            return Err(EngineError::InvalidAddress);
        }
        let birth = self.rpc.get_contract_birth_block(address, code_hash).await?;
        let height = self.rpc.get_block_height().await?;
        if height < birth.saturating_add(AGE_LIMIT) {
            return Err(EngineError::ContractTooYoung { birth, height });
        }
        self.store.write_log_cursor(address, birth)?;
        Ok(())
    }

    fn setup_notifier(&self, address: &[u8]) -> Result<(), EngineError> {
        let master_key = self.master_key.ok_or(EngineError::NoMasterKey)?;
        keyring::register(&self.store, &master_key, address)?;
        Ok(())
    }

    fn receive_group_events(
        &self,
        address: &[u8],
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Event>, EngineError> {
        Ok(self.store.list_inbound(address, offset, limit)?)
    }

    fn ensure_send_group_events(&self, address: &[u8], events: &[Event]) -> Result<(), EngineError> {
        for event in events {
            self.store.append_outbound(address, event)?;
        }
        Ok(())
    }

    fn estimate_cost(&self, events: &[Event]) -> Result<u128, EngineError> {
        Ok(GAS_LIMIT as u128 * GAS_PRICE * events.len() as u128)
    }

    fn is_publisher(&self) -> bool {
        self.publisher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainRpcError;
    use crate::codec::MixinId;
    use crate::store::MemKv;
    use alloy_primitives::PrimitiveSignature as Signature;

    struct FakeRpc {
        birth: u64,
        height: u64,
    }

    #[async_trait]
    impl ChainRpc for FakeRpc {
        async fn get_block_height(&self) -> Result<u64, ChainRpcError> {
            Ok(self.height)
        }
        async fn get_contract_birth_block(
            &self,
            _address: &[u8],
            _code_hash: &[u8],
        ) -> Result<u64, ChainRpcError> {
            Ok(self.birth)
        }
        async fn get_logs(
            &self,
            _address: &[u8],
            _topic: &[u8; 32],
            _from_block: u64,
            _to_block: u64,
        ) -> Result<Vec<alloy_primitives::Log>, ChainRpcError> {
            Ok(vec![])
        }
        async fn get_address_balance(&self, _address: &[u8]) -> Result<u128, ChainRpcError> {
            Ok(0)
        }
        async fn get_address_nonce(&self, _address: &[u8]) -> Result<u64, ChainRpcError> {
            Ok(0)
        }
        async fn send_raw_transaction(&self, _raw: &[u8]) -> Result<Vec<u8>, ChainRpcError> {
            Ok(vec![])
        }
    }

    fn sample_event(nonce: u64) -> Event {
        Event {
            nonce,
            process: MixinId::from_bytes([1u8; 16]),
            asset: MixinId::from_bytes([2u8; 16]),
            members: vec![MixinId::from_bytes([3u8; 16])],
            threshold: 1,
            amount: 1,
            extra: vec![],
            timestamp: 1,
            signatures: vec![Signature::from_raw(&[9u8; 65]).unwrap()],
        }
    }

    fn engine(birth: u64, height: u64, master_key: Option<[u8; 32]>) -> EvmEngine<MemKv> {
        EvmEngine::new(
            Arc::new(ContractStore::new(MemKv::new())),
            Arc::new(FakeRpc { birth, height }),
            master_key,
            master_key.is_some(),
        )
    }

    #[tokio::test]
    async fn verify_address_rejects_a_contract_younger_than_the_age_limit() {
        let engine = engine(100, 100, None);
        let err = engine
            .verify_address(&[0x11; 20], &[0u8; 32])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ContractTooYoung { .. }));
    }

    #[tokio::test]
    async fn verify_address_rejects_a_malformed_address() {
        let engine = engine(0, 100, None);
        let err = engine.verify_address(&[0x11; 19], &[0u8; 32]).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidAddress));
    }

    #[tokio::test]
    async fn verify_address_seeds_the_log_cursor_at_the_birth_block() {
        let engine = engine(42, 100, None);
        engine.verify_address(&[0x11; 20], &[0u8; 32]).await.unwrap();
        assert_eq!(engine.store.read_log_cursor(&[0x11; 20]).unwrap(), 42);
    }

    #[test]
    fn setup_notifier_without_a_master_key_fails() {
        let engine = engine(0, 100, None);
        let err = engine.setup_notifier(&[0x11; 20]).unwrap_err();
        assert!(matches!(err, EngineError::NoMasterKey));
    }

    #[test]
    fn ensure_send_group_events_is_visible_via_receive_on_the_outbound_side() {
        let engine = engine(0, 100, Some([7u8; 32]));
        engine
            .ensure_send_group_events(&[0x11; 20], &[sample_event(1), sample_event(2)])
            .unwrap();
        let listed = engine.store.list_outbound(&[0x11; 20], 0, 10).unwrap();
        assert_eq!(listed.iter().map(|e| e.nonce).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn estimate_cost_scales_with_event_count() {
        let engine = engine(0, 100, None);
        let one = engine.estimate_cost(&[sample_event(1)]).unwrap();
        let two = engine.estimate_cost(&[sample_event(1), sample_event(2)]).unwrap();
        assert_eq!(two, one * 2);
    }
}
