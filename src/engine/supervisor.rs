//! EngineSupervisor: spawns ingress/egress loops for newly registered contracts and runs
//! the funding top-up pass that refills low notifier balances from the master account.
//!
//! Every spawned task's `JoinHandle` is tracked so a shared [`CancellationToken`] can abort
//! them all on shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Bytes, TxKind, U256};
use alloy_signer::{Signer, SignerSync};
use alloy_signer_local::PrivateKeySigner;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainRpc;
use crate::store::{ContractStore, KvStore};

use super::EngineError;
use super::config::{CLOCK_TICK, LOW_WATER_MARK, TOPUP_AMOUNT, TRANSFER_GAS_LIMIT, GAS_PRICE};
use super::egress::EgressLoop;
use super::ingress::IngressLoop;

struct ContractHandles {
    ingress: JoinHandle<()>,
    egress: Option<JoinHandle<()>>,
}

/// Starts and tracks per-contract loops, and runs the notifier funding pass.
pub struct EngineSupervisor<S: KvStore> {
    store: Arc<ContractStore<S>>,
    rpc: Arc<dyn ChainRpc>,
    master_key: Option<[u8; 32]>,
    publisher: bool,
    chain_id: u64,
    handles: Mutex<HashMap<Vec<u8>, ContractHandles>>,
}

impl<S: KvStore + 'static> EngineSupervisor<S> {
    pub fn new(
        store: Arc<ContractStore<S>>,
        rpc: Arc<dyn ChainRpc>,
        master_key: Option<[u8; 32]>,
        publisher: bool,
        chain_id: u64,
    ) -> Self {
        EngineSupervisor {
            store,
            rpc,
            master_key,
            publisher: publisher && master_key.is_some(),
            chain_id,
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn notifier_signer(&self, address: &[u8]) -> Result<Option<PrivateKeySigner>, EngineError> {
        let Some(key_bytes) = self.store.read_notifier(address)? else {
            return Ok(None);
        };
        let array: [u8; 32] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| EngineError::Sign("stored notifier key is not 32 bytes".into()))?;
        PrivateKeySigner::from_bytes(&array.into())
            .map(Some)
            .map_err(|e| EngineError::Sign(e.to_string()))
    }

    /// Removes entries whose ingress or egress task has already ended — a step failure
    /// classified `Reject`/`Fatal` (see `EngineError::severity`) returns from `run()`, so the
    /// `JoinHandle` finishes while the contract is still registered. Aborts whichever sibling
    /// task (if any) is still running so the next `spawn_missing` pass restarts the pair
    /// together from the persisted cursor/nonce, rather than leaving a stale half-dead entry
    /// that blocks `contains_key` forever.
    fn sweep_dead_handles(&self, handles: &mut HashMap<Vec<u8>, ContractHandles>) {
        let dead: Vec<Vec<u8>> = handles
            .iter()
            .filter(|(_, h)| h.ingress.is_finished() || h.egress.as_ref().map_or(false, |e| e.is_finished()))
            .map(|(address, _)| address.clone())
            .collect();
        for address in dead {
            if let Some(h) = handles.remove(&address) {
                if !h.ingress.is_finished() {
                    h.ingress.abort();
                }
                if let Some(egress) = h.egress {
                    if !egress.is_finished() {
                        egress.abort();
                    }
                }
                tracing::warn!(
                    address = %hex::encode(&address),
                    "contract loop task ended, will respawn next supervisor pass"
                );
            }
        }
    }

    /// Spawns ingress (and, if publisher, egress) loops for every registered contract that
    /// doesn't already have one running.
    fn spawn_missing(self: &Arc<Self>, cancel: &CancellationToken) -> Result<(), EngineError> {
        let addresses = self.store.list_contract_addresses()?;
        let mut handles = self.handles.lock().unwrap();
        self.sweep_dead_handles(&mut handles);
        for address in addresses {
            if handles.contains_key(&address) {
                continue;
            }
            let ingress_loop = IngressLoop::new(self.store.clone(), self.rpc.clone(), address.clone());
            let ingress_cancel = cancel.clone();
            let ingress = tokio::spawn(async move { ingress_loop.run(ingress_cancel).await });

            let egress = if self.publisher {
                match self.notifier_signer(&address)? {
                    Some(notifier) => {
                        let egress_loop = EgressLoop::new(
                            self.store.clone(),
                            self.rpc.clone(),
                            address.clone(),
                            notifier,
                            self.chain_id,
                        );
                        let egress_cancel = cancel.clone();
                        Some(tokio::spawn(async move { egress_loop.run(egress_cancel).await }))
                    }
                    None => {
                        tracing::warn!(
                            address = %hex::encode(&address),
                            "publisher node but no notifier registered yet; egress loop not started"
                        );
                        None
                    }
                }
            } else {
                None
            };

            tracing::info!(address = %hex::encode(&address), "spawned contract loops");
            handles.insert(address, ContractHandles { ingress, egress });
        }
        Ok(())
    }

    /// Refills any notifier below [`LOW_WATER_MARK`] from the master account, using the
    /// master's next chain nonce incremented locally across the pass.
    async fn fund_pass(&self) -> Result<(), EngineError> {
        let Some(master_key) = self.master_key else {
            return Ok(());
        };
        if !self.publisher {
            return Ok(());
        }
        let master = PrivateKeySigner::from_bytes(&master_key.into())
            .map_err(|e| EngineError::Sign(e.to_string()))?;
        let master_address = master.address();
        let mut nonce = self.rpc.get_address_nonce(master_address.as_slice()).await?;

        for address in self.store.list_contract_addresses()? {
            let Some(notifier) = self.notifier_signer(&address)? else {
                continue;
            };
            let notifier_address = notifier.address();
            let balance = self
                .rpc
                .get_address_balance(notifier_address.as_slice())
                .await?;
            if balance >= LOW_WATER_MARK {
                continue;
            }

            let tx = TxLegacy {
                chain_id: Some(self.chain_id),
                nonce,
                gas_price: GAS_PRICE,
                gas_limit: TRANSFER_GAS_LIMIT,
                to: TxKind::Call(notifier_address),
                value: U256::from(TOPUP_AMOUNT),
                input: Bytes::new(),
            };
            let signature_hash = tx.signature_hash();
            let signature = master
                .sign_hash_sync(&signature_hash)
                .map_err(|e| EngineError::Sign(e.to_string()))?;
            let signed = tx.into_signed(signature);
            let envelope = TxEnvelope::Legacy(signed);
            let mut raw = Vec::new();
            envelope.encode_2718(&mut raw);

            if let Err(err) = self.rpc.send_raw_transaction(&raw).await {
                tracing::warn!(
                    notifier = %hex::encode(notifier_address.as_slice()),
                    error = %err,
                    "notifier top-up transaction failed to send"
                );
            } else {
                tracing::info!(
                    notifier = %hex::encode(notifier_address.as_slice()),
                    balance,
                    "topped up low notifier balance"
                );
            }
            nonce += 1;
        }
        Ok(())
    }

    /// Refreshes the cached current chain head (spec §3's `GlobalBlockCursor`), shared
    /// across every contract so a caller can read "current known head" without its own
    /// round trip.
    async fn refresh_block_cursor(&self) -> Result<(), EngineError> {
        let height = self.rpc.get_block_height().await?;
        self.store.write_global_block_cursor(height)?;
        Ok(())
    }

    /// Runs the supervisor pass (refresh + spawn + fund) on every tick until `cancel`
    /// fires, then aborts every tracked loop task.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                self.shutdown();
                return;
            }
            if let Err(err) = self.refresh_block_cursor().await {
                tracing::error!(error = %err, "supervisor failed to refresh the global block cursor");
            }
            if let Err(err) = self.spawn_missing(&cancel) {
                tracing::error!(error = %err, "supervisor failed to spawn loops for new contracts");
            }
            if let Err(err) = self.fund_pass().await {
                tracing::error!(error = %err, "supervisor funding pass failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.shutdown();
                    return;
                }
                _ = tokio::time::sleep(CLOCK_TICK) => {}
            }
        }
    }

    fn shutdown(&self) {
        let mut handles = self.handles.lock().unwrap();
        for (address, contract_handles) in handles.drain() {
            tracing::info!(address = %hex::encode(&address), "aborting contract loops on shutdown");
            contract_handles.ingress.abort();
            if let Some(egress) = contract_handles.egress {
                egress.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainRpcError;
    use crate::store::MemKv;
    use async_trait::async_trait;

    struct NullRpc;

    #[async_trait]
    impl ChainRpc for NullRpc {
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
            Ok(1_000)
        }
        async fn get_address_nonce(&self, _address: &[u8]) -> Result<u64, ChainRpcError> {
            Ok(0)
        }
        async fn send_raw_transaction(&self, _raw: &[u8]) -> Result<Vec<u8>, ChainRpcError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn non_publisher_supervisor_spawns_only_ingress_loops() {
        let store = Arc::new(ContractStore::new(MemKv::new()));
        crate::keyring::register(&store, &[1u8; 32], b"contract-a").unwrap();
        let supervisor = Arc::new(EngineSupervisor::new(
            store,
            Arc::new(NullRpc),
            None,
            false,
            1337,
        ));
        let cancel = CancellationToken::new();
        supervisor.spawn_missing(&cancel).unwrap();
        let handles = supervisor.handles.lock().unwrap();
        let entry = handles.get(b"contract-a".as_slice()).unwrap();
        assert!(entry.egress.is_none());
        drop(handles);
        cancel.cancel();
        supervisor.shutdown();
    }

    struct HeightRpc(u64);

    #[async_trait]
    impl ChainRpc for HeightRpc {
        async fn get_block_height(&self) -> Result<u64, ChainRpcError> {
            Ok(self.0)
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
            Ok(0)
        }
        async fn get_address_nonce(&self, _address: &[u8]) -> Result<u64, ChainRpcError> {
            Ok(0)
        }
        async fn send_raw_transaction(&self, _raw: &[u8]) -> Result<Vec<u8>, ChainRpcError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn refresh_block_cursor_caches_the_current_chain_head() {
        let store = Arc::new(ContractStore::new(MemKv::new()));
        let supervisor = EngineSupervisor::new(store.clone(), Arc::new(HeightRpc(555)), None, false, 1337);
        assert_eq!(store.read_global_block_cursor().unwrap(), 0);
        supervisor.refresh_block_cursor().await.unwrap();
        assert_eq!(store.read_global_block_cursor().unwrap(), 555);
    }

    #[tokio::test]
    async fn publisher_flag_without_master_key_is_forced_off() {
        let store = Arc::new(ContractStore::new(MemKv::new()));
        let supervisor = EngineSupervisor::new(store, Arc::new(NullRpc), None, true, 1337);
        assert!(!supervisor.publisher);
    }

    struct FailingRpc;

    #[async_trait]
    impl ChainRpc for FailingRpc {
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
            // A `Protocol` error is `Reject`-severity: the ingress loop's `run()` ends the
            // task on the very first step rather than retrying.
            Err(ChainRpcError::Protocol("boom".into()))
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

    #[tokio::test]
    async fn a_dead_ingress_task_is_swept_and_respawned_on_the_next_pass() {
        let store = Arc::new(ContractStore::new(MemKv::new()));
        crate::keyring::register(&store, &[1u8; 32], b"contract-a").unwrap();
        let supervisor = Arc::new(EngineSupervisor::new(
            store,
            Arc::new(FailingRpc),
            None,
            false,
            1337,
        ));
        let cancel = CancellationToken::new();
        supervisor.spawn_missing(&cancel).unwrap();

        // Let the spawned ingress task hit the rejected `get_logs` call and return.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        {
            let handles = supervisor.handles.lock().unwrap();
            assert!(handles.get(b"contract-a".as_slice()).unwrap().ingress.is_finished());
        }

        // Without a sweep this contract would be permanently stuck: `contains_key` would
        // keep skipping it forever despite its task having already ended.
        supervisor.spawn_missing(&cancel).unwrap();
        {
            let handles = supervisor.handles.lock().unwrap();
            assert!(!handles.get(b"contract-a".as_slice()).unwrap().ingress.is_finished());
        }
        cancel.cancel();
        supervisor.shutdown();
    }
}
