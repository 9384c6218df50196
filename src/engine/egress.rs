//! EgressLoop: drains a contract's outbound queue into signed transactions submitted
//! from its notifier account.
//!
//! The on-chain transaction nonce doubles as the outbound queue's read cursor: a batch is
//! listed starting at the notifier's current chain nonce, so a transaction already mined
//! at nonce `n` can never be resubmitted — at-most-once delivery without a separate
//! delivery-confirmation record.

use std::sync::Arc;

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, TxKind, U256};
use alloy_signer::{Signer, SignerSync};
use alloy_signer_local::PrivateKeySigner;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainRpc;
use crate::codec::evm::build_ingress_calldata;
use crate::store::{ContractStore, KvStore};

use super::config::{BALANCE_WAIT, CLOCK_TICK, EGRESS_BATCH_LIMIT, GAS_LIMIT, GAS_PRICE, MIN_NOTIFIER_BALANCE};
use super::{EngineError, Severity};

/// One instance per contract. Only runs while this node holds the publisher role (the
/// supervisor does not construct one otherwise).
pub struct EgressLoop<S: KvStore> {
    store: Arc<ContractStore<S>>,
    rpc: Arc<dyn ChainRpc>,
    address: Vec<u8>,
    notifier: PrivateKeySigner,
    chain_id: u64,
}

impl<S: KvStore> EgressLoop<S> {
    pub fn new(
        store: Arc<ContractStore<S>>,
        rpc: Arc<dyn ChainRpc>,
        address: Vec<u8>,
        notifier: PrivateKeySigner,
        chain_id: u64,
    ) -> Self {
        EgressLoop {
            store,
            rpc,
            address,
            notifier,
            chain_id,
        }
    }

    fn sign_ingress_tx(&self, to: Address, nonce: u64, calldata: Bytes) -> Result<Bytes, EngineError> {
        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price: GAS_PRICE,
            gas_limit: GAS_LIMIT,
            to: TxKind::Call(to),
            value: U256::ZERO,
            input: calldata,
        };
        let signature_hash = tx.signature_hash();
        let signature = self
            .notifier
            .sign_hash_sync(&signature_hash)
            .map_err(|e| EngineError::Sign(e.to_string()))?;
        let signed = tx.into_signed(signature);
        let envelope = TxEnvelope::Legacy(signed);
        let mut raw = Vec::new();
        envelope.encode_2718(&mut raw);
        Ok(Bytes::from(raw))
    }

    /// Runs one outer step. Returns `true` if nothing was sent this step
    /// (either because the batch was empty or the notifier balance is too low), so the
    /// caller can decide whether to sleep at the idle rate.
    pub async fn step(&self) -> Result<bool, EngineError> {
        let notifier_address = self.notifier.address();
        let balance = self
            .rpc
            .get_address_balance(notifier_address.as_slice())
            .await?;
        if balance < MIN_NOTIFIER_BALANCE {
            tokio::time::sleep(BALANCE_WAIT).await;
            return Ok(true);
        }

        let chain_nonce = self
            .rpc
            .get_address_nonce(notifier_address.as_slice())
            .await?;
        let batch = self
            .store
            .list_outbound(&self.address, chain_nonce, EGRESS_BATCH_LIMIT)?;
        if batch.is_empty() {
            return Ok(true);
        }

        let to = Address::from_slice(&self.address);
        for event in &batch {
            let calldata = build_ingress_calldata(event);
            let raw = self.sign_ingress_tx(to, event.nonce, calldata)?;
            if let Err(err) = self.rpc.send_raw_transaction(&raw).await {
                // Transient send failure: log and move on, the next step re-lists from the
                // notifier's still-unchanged chain nonce and resends.
                tracing::warn!(
                    address = %hex::encode(&self.address),
                    nonce = event.nonce,
                    error = %err,
                    "egress send failed, will retry next step"
                );
            }
        }
        Ok(false)
    }

    /// Runs this contract's egress loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.step().await {
                Ok(_) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(CLOCK_TICK) => {}
                    }
                }
                Err(err) => {
                    let severity = err.severity();
                    match severity {
                        Severity::Retry => {
                            tracing::warn!(
                                address = %hex::encode(&self.address),
                                error = %err,
                                severity = ?severity,
                                "egress step failed transiently, retrying next tick"
                            );
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                _ = tokio::time::sleep(CLOCK_TICK) => {}
                            }
                        }
                        Severity::Reject | Severity::Fatal => {
                            tracing::error!(
                                address = %hex::encode(&self.address),
                                error = %err,
                                severity = ?severity,
                                "egress step failed, loop ending for supervisor restart"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainRpcError;
    use crate::codec::MixinId;
    use crate::codec::Event;
    use crate::store::MemKv;
    use alloy_primitives::PrimitiveSignature as Signature;
    use async_trait::async_trait;
    use std::sync::Mutex;

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

    struct FakeRpc {
        balance: u128,
        chain_nonce: u64,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl ChainRpc for FakeRpc {
        async fn get_block_height(&self) -> Result<u64, ChainRpcError> {
            Ok(0)
        }
        async fn get_contract_birth_block(
            &self,
            _address: &[u8],
            _code_hash: &[u8],
        ) -> Result<u64, ChainRpcError> {
            Ok(0)
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
            Ok(self.balance)
        }
        async fn get_address_nonce(&self, _address: &[u8]) -> Result<u64, ChainRpcError> {
            Ok(self.chain_nonce)
        }
        async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Vec<u8>, ChainRpcError> {
            self.sent.lock().unwrap().push(raw.to_vec());
            Ok(vec![1])
        }
    }

    #[tokio::test]
    async fn egress_lists_from_the_notifiers_chain_nonce_not_from_zero() {
        let store = Arc::new(ContractStore::new(MemKv::new()));
        for nonce in [5, 6, 7] {
            store
                .append_outbound(&[0x11; 20], &sample_event(nonce))
                .unwrap();
        }
        let rpc = Arc::new(FakeRpc {
            balance: 100,
            chain_nonce: 6,
            sent: Mutex::new(vec![]),
        });
        let notifier = PrivateKeySigner::random();
        let loop_ = EgressLoop::new(store, rpc.clone(), vec![0x11; 20], notifier, 1337);
        loop_.step().await.unwrap();
        // Nonce 5 is already mined (chain nonce is 6); only 6 and 7 are sent.
        assert_eq!(rpc.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn low_balance_skips_sending_without_erroring() {
        let store = Arc::new(ContractStore::new(MemKv::new()));
        store
            .append_outbound(&[0x22; 20], &sample_event(1))
            .unwrap();
        let rpc = Arc::new(FakeRpc {
            balance: 0,
            chain_nonce: 1,
            sent: Mutex::new(vec![]),
        });
        let notifier = PrivateKeySigner::random();
        let loop_ = EgressLoop::new(store, rpc.clone(), vec![0x22; 20], notifier, 1337);
        let empty = loop_.step().await.unwrap();
        assert!(empty);
        assert!(rpc.sent.lock().unwrap().is_empty());
    }
}
