//! Black-box property test for invariant I1 (spec §4.4, §8 P1): whatever order logs arrive
//! in, however many times they're duplicated, and however many steps it takes to close a
//! gap, the inbound queue ends up gap-free and in ascending nonce order.

use std::sync::{Arc, Mutex};

use alloy_primitives::{Log, LogData, PrimitiveSignature as Signature};
use async_trait::async_trait;

use mvm_relay::chain::{ChainRpc, ChainRpcError};
use mvm_relay::codec::evm::EVENT_TOPIC;
use mvm_relay::codec::{encode, Event, MixinId};
use mvm_relay::engine::ingress::IngressLoop;
use mvm_relay::store::{ContractStore, MemKv};

const CONTRACT: &[u8] = b"contract-under-test";

fn sample_event(nonce: u64) -> Event {
    Event {
        nonce,
        process: MixinId::from_bytes([1u8; 16]),
        asset: MixinId::from_bytes([2u8; 16]),
        members: vec![MixinId::from_bytes([3u8; 16]), MixinId::from_bytes([4u8; 16])],
        threshold: 1,
        amount: 42,
        extra: vec![],
        timestamp: 7,
        signatures: vec![Signature::from_raw(&[9u8; 65]).unwrap()],
    }
}

fn log_for(nonce: u64) -> Log {
    let event = sample_event(nonce);
    let data = LogData::new(vec![EVENT_TOPIC], encode(&event).into()).unwrap();
    Log {
        address: Default::default(),
        data,
    }
}

/// A `ChainRpc` whose `get_logs` replays one scripted batch per call, ignoring the
/// requested block range — only the ingress loop's own gating matters here.
struct ScriptedRpc {
    batches: Mutex<Vec<Vec<Log>>>,
}

#[async_trait]
impl ChainRpc for ScriptedRpc {
    async fn get_block_height(&self) -> Result<u64, ChainRpcError> {
        Ok(u64::MAX)
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
    ) -> Result<Vec<Log>, ChainRpcError> {
        let mut batches = self.batches.lock().unwrap();
        if batches.is_empty() {
            Ok(vec![])
        } else {
            Ok(batches.remove(0))
        }
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
async fn reordered_and_duplicated_logs_settle_into_a_gap_free_queue() {
    let store = Arc::new(ContractStore::new(MemKv::new()));
    let rpc = Arc::new(ScriptedRpc {
        batches: Mutex::new(vec![
            // Step 1: 1 and 3 arrive, 3 duplicated, 2 missing entirely.
            vec![log_for(1), log_for(3), log_for(3)],
            // Step 2: nothing new.
            vec![],
            // Step 3: the missing middle log (2) finally shows up, reordered after a
            // duplicate of 1.
            vec![log_for(1), log_for(2)],
            // Step 4: 4 and 5 arrive in reverse order.
            vec![log_for(5), log_for(4)],
        ]),
    });

    let ingress = IngressLoop::new(store.clone(), rpc, CONTRACT.to_vec());
    let mut state = ingress.initial_state().unwrap();

    for _ in 0..4 {
        ingress.step(&mut state).await.unwrap();
    }

    let listed = store.list_inbound(CONTRACT, 0, 10).unwrap();
    let nonces: Vec<u64> = listed.iter().map(|e| e.nonce).collect();
    assert_eq!(nonces, vec![1, 2, 3, 4, 5], "queue must be gap-free and ascending");

    for window in nonces.windows(2) {
        assert_eq!(window[1], window[0] + 1, "no gaps and no duplicates allowed");
    }
}

#[tokio::test]
async fn an_unresolved_gap_never_lets_later_events_jump_ahead() {
    let store = Arc::new(ContractStore::new(MemKv::new()));
    let rpc = Arc::new(ScriptedRpc {
        batches: Mutex::new(vec![
            vec![log_for(1), log_for(2), log_for(4), log_for(5)],
            vec![],
        ]),
    });

    let ingress = IngressLoop::new(store.clone(), rpc, CONTRACT.to_vec());
    let mut state = ingress.initial_state().unwrap();

    ingress.step(&mut state).await.unwrap();
    let listed = store.list_inbound(CONTRACT, 0, 10).unwrap();
    assert_eq!(
        listed.iter().map(|e| e.nonce).collect::<Vec<_>>(),
        vec![1, 2],
        "4 and 5 must stay buffered until 3 closes the gap"
    );

    ingress.step(&mut state).await.unwrap();
    let listed = store.list_inbound(CONTRACT, 0, 10).unwrap();
    assert_eq!(
        listed.iter().map(|e| e.nonce).collect::<Vec<_>>(),
        vec![1, 2],
        "still gapped after an empty step"
    );
}
