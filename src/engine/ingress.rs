//! IngressLoop: advances one contract's log cursor in fixed windows, decodes logs into
//! canonical `Event`s, and appends them to the inbound queue in gap-free nonce order.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::chain::ChainRpc;
use crate::codec::evm::{EVENT_TOPIC, decode_event_log};
use crate::codec::{verify_signatures, Event};
use crate::store::{ContractStore, KvStore};

use super::config::{CLOCK_TICK, INGRESS_WINDOW};
use super::{EngineError, Severity};

/// The next expected nonce plus the set of decoded-but-not-yet-appended events a prior step
/// saw ahead of a gap. The log range a step scans never repeats on a later step once the
/// cursor has advanced past it, so an event seen ahead of a gap must be held here rather
/// than re-fetched — this buffer is process-local and does not survive a restart (see
/// DESIGN.md, "gap monitoring").
#[derive(Default)]
pub struct IngressState {
    next_nonce: u64,
    pending: BTreeMap<u64, Event>,
}

/// One instance per contract.
pub struct IngressLoop<S: KvStore> {
    store: Arc<ContractStore<S>>,
    rpc: Arc<dyn ChainRpc>,
    address: Vec<u8>,
}

impl<S: KvStore> IngressLoop<S> {
    pub fn new(store: Arc<ContractStore<S>>, rpc: Arc<dyn ChainRpc>, address: Vec<u8>) -> Self {
        IngressLoop { store, rpc, address }
    }

    /// Seeds an [`IngressState`] with the next expected nonce one past the highest nonce
    /// already in the inbound queue, or `1` if the queue is empty.
    pub fn initial_state(&self) -> Result<IngressState, EngineError> {
        let next_nonce = self
            .store
            .last_inbound_nonce(&self.address)?
            .map_or(1, |n| n + 1);
        Ok(IngressState {
            next_nonce,
            pending: BTreeMap::new(),
        })
    }

    /// Runs one outer step. Returns `true` if the step appended no events, so the caller
    /// can choose the idle-vs-active sleep duration.
    pub async fn step(&self, state: &mut IngressState) -> Result<bool, EngineError> {
        let offset = self.store.read_log_cursor(&self.address)?;
        let to_block = offset.saturating_add(INGRESS_WINDOW);
        let topic = EVENT_TOPIC.0;
        let logs = self
            .rpc
            .get_logs(&self.address, &topic, offset, to_block)
            .await?;

        let mut highest_seen = state.pending.keys().next_back().copied();
        for log in &logs {
            match decode_event_log(log) {
                Ok(event) => {
                    if let Err(err) = verify_signatures(&event) {
                        // Signature verification failure is a format error (spec §7), same
                        // class as a malformed log: drop the event and keep going.
                        tracing::warn!(
                            address = %hex::encode(&self.address),
                            nonce = event.nonce,
                            error = %err,
                            "dropping ingress log with an unverifiable signature"
                        );
                        continue;
                    }
                    highest_seen = Some(highest_seen.map_or(event.nonce, |h| h.max(event.nonce)));
                    if event.nonce >= state.next_nonce {
                        // First decode for a nonce wins; a duplicate or already-queued
                        // value is discarded.
                        state.pending.entry(event.nonce).or_insert(event);
                    }
                }
                Err(err) => {
                    // A malformed log is a format error, not a transport failure: drop it
                    // and keep going.
                    tracing::warn!(
                        address = %hex::encode(&self.address),
                        error = %err,
                        "dropping malformed ingress log"
                    );
                }
            }
        }

        let mut appended = 0usize;
        while let Some(event) = state.pending.remove(&state.next_nonce) {
            self.store.append_inbound(&self.address, &event)?;
            state.next_nonce += 1;
            appended += 1;
        }

        // The cursor advances even on an empty window so the loop makes progress past
        // idle block ranges.
        self.store.write_log_cursor(&self.address, to_block)?;

        tracing::debug!(
            address = %hex::encode(&self.address),
            last_ingested_nonce = state.next_nonce.saturating_sub(1),
            highest_seen_nonce = highest_seen.unwrap_or(0),
            appended,
            pending = state.pending.len(),
            log_cursor = to_block,
            "ingress step complete"
        );

        Ok(appended == 0)
    }

    /// Runs this contract's ingress loop until `cancel` fires. A fatal step error ends the
    /// task; the supervisor's next pass restarts it from the persisted cursor and nonce.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut state = match self.initial_state() {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(
                    address = %hex::encode(&self.address),
                    error = %err,
                    "ingress loop failed to initialize"
                );
                return;
            }
        };
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.step(&mut state).await {
                Ok(empty) => {
                    let sleep = if empty { CLOCK_TICK * 5 } else { CLOCK_TICK };
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(sleep) => {}
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
                                "ingress step failed transiently, retrying next tick"
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
                                "ingress step failed, loop ending for supervisor restart"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }
}
