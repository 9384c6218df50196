//! ContractStore: the namespaced KV layout holding, per contract, its notifier
//! registration, log cursor, inbound/outbound event queues, plus one global block cursor
//! shared by every contract on a chain backend.
//!
//! Key layout:
//! - `N:<address>` → notifier public key bytes
//! - `L:<address>` → log cursor, `BE64(block_height)`
//! - `I:<address>\0<BE64(nonce)>` → inbound queue entry (chain → MTG), canonical event bytes
//! - `O:<address>\0<BE64(nonce)>` → outbound queue entry (MTG → chain), canonical event bytes
//! - `B` → global block cursor, `BE64(block_height)`, shared across every contract

use crate::codec::event::{decode, encode, Event};
use crate::store::kv::{KvError, KvStore, Transaction};

const PREFIX_NOTIFIER: &[u8] = b"N:";
const PREFIX_LOG_CURSOR: &[u8] = b"L:";
const PREFIX_INBOUND: &[u8] = b"I:";
const PREFIX_OUTBOUND: &[u8] = b"O:";
const GLOBAL_BLOCK_KEY: &[u8] = b"B";
const SEP: u8 = 0x00;

/// Errors raised by [`ContractStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ContractStoreError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("corrupt event record under contract {address}: {source}")]
    CorruptEvent {
        address: String,
        #[source]
        source: crate::codec::CodecError,
    },
    #[error("notifier already registered for contract {address}")]
    NotifierAlreadyRegistered { address: String },
}

fn notifier_key(address: &[u8]) -> Vec<u8> {
    [PREFIX_NOTIFIER, address].concat()
}

fn log_cursor_key(address: &[u8]) -> Vec<u8> {
    [PREFIX_LOG_CURSOR, address].concat()
}

fn queue_prefix(prefix: &[u8], address: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(prefix.len() + address.len() + 1);
    k.extend_from_slice(prefix);
    k.extend_from_slice(address);
    k.push(SEP);
    k
}

fn queue_key(prefix: &[u8], address: &[u8], nonce: u64) -> Vec<u8> {
    let mut k = queue_prefix(prefix, address);
    k.extend_from_slice(&nonce.to_be_bytes());
    k
}

/// The namespaced KV layout described in spec §4.4, built over any [`KvStore`].
pub struct ContractStore<S: KvStore> {
    kv: S,
}

impl<S: KvStore> ContractStore<S> {
    pub fn new(kv: S) -> Self {
        ContractStore { kv }
    }

    /// Registers a notifier public key for `address`, enforcing invariant I3 (immutable
    /// once set): a second registration with a *different* key is rejected; re-registering
    /// the same key is treated as a no-op so retried setup calls stay idempotent.
    pub fn register_notifier(
        &self,
        address: &[u8],
        notifier_key_bytes: &[u8],
    ) -> Result<(), ContractStoreError> {
        let key = notifier_key(address);
        let mut result = Ok(());
        self.kv.transact(&mut |txn| {
            match txn.get(&key)? {
                Some(existing) if existing == notifier_key_bytes => Ok(()),
                Some(_) => {
                    result = Err(ContractStoreError::NotifierAlreadyRegistered {
                        address: hex::encode(address),
                    });
                    Ok(())
                }
                None => txn.put(&key, notifier_key_bytes),
            }
        })?;
        result
    }

    pub fn read_notifier(&self, address: &[u8]) -> Result<Option<Vec<u8>>, ContractStoreError> {
        Ok(self.kv.get(&notifier_key(address))?)
    }

    /// Lists every contract address with a registered notifier.
    pub fn list_contract_addresses(&self) -> Result<Vec<Vec<u8>>, ContractStoreError> {
        let entries = self.kv.prefix_iter(PREFIX_NOTIFIER, false)?;
        Ok(entries
            .into_iter()
            .map(|(k, _)| k[PREFIX_NOTIFIER.len()..].to_vec())
            .collect())
    }

    pub fn read_log_cursor(&self, address: &[u8]) -> Result<u64, ContractStoreError> {
        match self.kv.get(&log_cursor_key(address))? {
            Some(bytes) => Ok(u64::from_be_bytes(bytes.as_slice().try_into().unwrap_or([0; 8]))),
            None => Ok(0),
        }
    }

    /// Advances the log cursor for `address`, enforcing invariant I2: the cursor never
    /// moves backward.
    pub fn write_log_cursor(&self, address: &[u8], height: u64) -> Result<(), ContractStoreError> {
        let key = log_cursor_key(address);
        self.kv.transact(&mut |txn| {
            let current = txn
                .get(&key)?
                .map(|b| u64::from_be_bytes(b.as_slice().try_into().unwrap_or([0; 8])))
                .unwrap_or(0);
            if height < current {
                return Ok(());
            }
            txn.put(&key, &height.to_be_bytes())
        })?;
        Ok(())
    }

    pub fn read_global_block_cursor(&self) -> Result<u64, ContractStoreError> {
        match self.kv.get(GLOBAL_BLOCK_KEY)? {
            Some(bytes) => Ok(u64::from_be_bytes(bytes.as_slice().try_into().unwrap_or([0; 8]))),
            None => Ok(0),
        }
    }

    pub fn write_global_block_cursor(&self, height: u64) -> Result<(), ContractStoreError> {
        self.kv.transact(&mut |txn| {
            txn.put(GLOBAL_BLOCK_KEY, &height.to_be_bytes())
        })?;
        Ok(())
    }

    /// Appends `event` to the inbound (chain → MTG) queue for `address`, idempotently: a
    /// nonce already present keeps its first-written value untouched.
    pub fn append_inbound(&self, address: &[u8], event: &Event) -> Result<(), ContractStoreError> {
        self.append_queue(PREFIX_INBOUND, address, event)
    }

    /// Appends `event` to the outbound (MTG → chain) queue for `address`, same idempotence
    /// rule as [`Self::append_inbound`].
    pub fn append_outbound(&self, address: &[u8], event: &Event) -> Result<(), ContractStoreError> {
        self.append_queue(PREFIX_OUTBOUND, address, event)
    }

    fn append_queue(
        &self,
        prefix: &[u8],
        address: &[u8],
        event: &Event,
    ) -> Result<(), ContractStoreError> {
        let key = queue_key(prefix, address, event.nonce);
        let value = encode(event);
        self.kv.transact(&mut |txn| match txn.get(&key)? {
            Some(_) => Ok(()),
            None => txn.put(&key, &value),
        })?;
        Ok(())
    }

    /// Returns the highest nonce present in the inbound queue for `address`, or `None` if
    /// the queue is empty. Used by the ingress loop to resume without re-scanning from
    /// genesis.
    pub fn last_inbound_nonce(&self, address: &[u8]) -> Result<Option<u64>, ContractStoreError> {
        self.last_queue_nonce(PREFIX_INBOUND, address)
    }

    pub fn last_outbound_nonce(&self, address: &[u8]) -> Result<Option<u64>, ContractStoreError> {
        self.last_queue_nonce(PREFIX_OUTBOUND, address)
    }

    fn last_queue_nonce(
        &self,
        prefix: &[u8],
        address: &[u8],
    ) -> Result<Option<u64>, ContractStoreError> {
        let scan_prefix = queue_prefix(prefix, address);
        let entries = self.kv.prefix_iter(&scan_prefix, true)?;
        match entries.first() {
            Some((key, _)) => {
                let nonce_bytes = &key[scan_prefix.len()..];
                Ok(Some(u64::from_be_bytes(nonce_bytes.try_into().unwrap())))
            }
            None => Ok(None),
        }
    }

    /// Lists up to `limit` inbound-queue events for `address` starting at `offset`
    /// (inclusive), in ascending nonce order — mirrors the Go original's
    /// `storeListContractEvents` pagination contract.
    pub fn list_inbound(
        &self,
        address: &[u8],
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Event>, ContractStoreError> {
        self.list_queue(PREFIX_INBOUND, address, offset, limit)
    }

    pub fn list_outbound(
        &self,
        address: &[u8],
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Event>, ContractStoreError> {
        self.list_queue(PREFIX_OUTBOUND, address, offset, limit)
    }

    fn list_queue(
        &self,
        prefix: &[u8],
        address: &[u8],
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Event>, ContractStoreError> {
        let scan_prefix = queue_prefix(prefix, address);
        let entries = self.kv.prefix_iter(&scan_prefix, false)?;
        let mut out = Vec::new();
        for (key, value) in entries {
            let nonce_bytes = &key[scan_prefix.len()..];
            let nonce = u64::from_be_bytes(nonce_bytes.try_into().unwrap());
            if nonce < offset {
                continue;
            }
            let event = decode(&value).map_err(|source| ContractStoreError::CorruptEvent {
                address: hex::encode(address),
                source,
            })?;
            out.push(event);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}
