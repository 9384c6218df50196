//! The ordered key-value layer (C1) underneath [`super::contract::ContractStore`].
//!
//! `KvStore` is kept free of RocksDB types in its public surface (no `rocksdb::Error` or
//! column-family handle ever leaks out) so `store::contract` can run its tests against
//! [`MemKv`] as well as a real [`RocksKv`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rocksdb::{Options, TransactionDB, TransactionDBOptions, TransactionOptions, WriteOptions};

/// Errors surfaced by a [`KvStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("key-value backend error: {0}")]
    Backend(String),
}

/// A single read/write unit of work. Reads inside a transaction observe the transaction's
/// own uncommitted writes (read-your-writes), which `store::contract`'s idempotent-append
/// rule depends on.
pub trait Transaction {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;
    fn delete(&self, key: &[u8]) -> Result<(), KvError>;
}

/// The ordered key-value store abstraction backing [`super::contract::ContractStore`].
pub trait KvStore: Send + Sync {
    /// Reads `key` outside of any transaction.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Runs `f` inside a single atomic transaction, committing on `Ok` and rolling back on
    /// `Err`. `f` observes its own writes via the passed [`Transaction`].
    fn transact(
        &self,
        f: &mut dyn FnMut(&dyn Transaction) -> Result<(), KvError>,
    ) -> Result<(), KvError>;

    /// Iterates over every key with prefix `prefix`, in forward or reverse lexicographic
    /// order, yielding `(key, value)` pairs with `prefix` stripped from neither.
    fn prefix_iter(
        &self,
        prefix: &[u8],
        reverse: bool,
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, KvError>;
}

/// Smallest byte string greater than every string prefixed by `prefix`, used to seek a
/// reverse scan to just past the end of `prefix`'s range. `None` if `prefix` is all
/// `0xFF` bytes (no such bound exists; the range extends to the end of the keyspace).
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    for i in (0..bound.len()).rev() {
        if bound[i] != 0xFF {
            bound[i] += 1;
            bound.truncate(i + 1);
            return Some(bound);
        }
    }
    None
}

/// RocksDB-backed [`KvStore`]. Uses `TransactionDB` rather than a plain `DB` so a
/// transaction's own writes are visible to its own reads before commit.
pub struct RocksKv {
    db: TransactionDB,
    /// `sync = true`: every commit fsyncs its WAL write before returning, per spec §4.1's
    /// durability requirement. Without this, rocksdb's default `WriteOptions` is async and a
    /// crash right after a commit can lose it.
    write_opts: WriteOptions,
}

impl RocksKv {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let txn_opts = TransactionDBOptions::default();
        let db = TransactionDB::open(&opts, &txn_opts, path)
            .map_err(|e| KvError::Backend(e.to_string()))?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        Ok(RocksKv { db, write_opts })
    }
}

struct RocksTransaction<'a> {
    inner: rocksdb::Transaction<'a, TransactionDB>,
}

impl Transaction for RocksTransaction<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.inner
            .get(key)
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.inner
            .put(key, value)
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.inner
            .delete(key)
            .map_err(|e| KvError::Backend(e.to_string()))
    }
}

impl KvStore for RocksKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.db.get(key).map_err(|e| KvError::Backend(e.to_string()))
    }

    fn transact(
        &self,
        f: &mut dyn FnMut(&dyn Transaction) -> Result<(), KvError>,
    ) -> Result<(), KvError> {
        let txn = self
            .db
            .transaction_opt(&self.write_opts, &TransactionOptions::default());
        let wrapped = RocksTransaction { inner: txn };
        f(&wrapped)?;
        wrapped
            .inner
            .commit()
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    fn prefix_iter(
        &self,
        prefix: &[u8],
        reverse: bool,
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, KvError> {
        use rocksdb::{Direction, IteratorMode};

        if !reverse {
            let mut out = Vec::new();
            for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
                let (key, value) = item.map_err(|e| KvError::Backend(e.to_string()))?;
                if !key.starts_with(prefix) {
                    break;
                }
                out.push((key, value));
            }
            return Ok(out);
        }

        // Every key carrying `prefix` is strictly longer than (and thus greater than) the
        // bare prefix bytes, so seeking `From(prefix, Reverse)` lands *before* the whole
        // range and never reaches it. Seek instead from the prefix's upper bound (the
        // smallest byte string that is not itself prefixed by `prefix`), which sits right
        // past the last matching key.
        let mut out = Vec::new();
        let iter = match prefix_upper_bound(prefix) {
            Some(upper) => self.db.iterator(IteratorMode::From(&upper, Direction::Reverse)),
            None => self.db.iterator(IteratorMode::End),
        };
        for item in iter {
            let (key, value) = item.map_err(|e| KvError::Backend(e.to_string()))?;
            if !key.starts_with(prefix) {
                if key.as_ref() < prefix {
                    break;
                }
                continue;
            }
            out.push((key, value));
        }
        Ok(out)
    }
}

/// In-memory [`KvStore`] fake used only by tests.
#[derive(Default)]
pub struct MemKv {
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemKv {
    pub fn new() -> Self {
        MemKv::default()
    }
}

/// `None` is a tombstone: a key deleted within the transaction but not yet committed must
/// still shadow the base map on a read-your-writes `get`, not fall through to it.
struct MemTransaction<'a> {
    base: &'a Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    overlay: Mutex<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl Transaction for MemTransaction<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        if let Some(v) = self.overlay.lock().unwrap().get(key) {
            return Ok(v.clone());
        }
        Ok(self.base.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.overlay
            .lock()
            .unwrap()
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.overlay.lock().unwrap().insert(key.to_vec(), None);
        Ok(())
    }
}

impl KvStore for MemKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    fn transact(
        &self,
        f: &mut dyn FnMut(&dyn Transaction) -> Result<(), KvError>,
    ) -> Result<(), KvError> {
        let txn = MemTransaction {
            base: &self.data,
            overlay: Mutex::new(BTreeMap::new()),
        };
        f(&txn)?;
        let mut data = self.data.lock().unwrap();
        for (k, v) in txn.overlay.into_inner().unwrap() {
            match v {
                Some(v) => {
                    data.insert(k, v);
                }
                None => {
                    data.remove(&k);
                }
            }
        }
        Ok(())
    }

    fn prefix_iter(
        &self,
        prefix: &[u8],
        reverse: bool,
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, KvError> {
        let data = self.data.lock().unwrap();
        let mut out: Vec<(Box<[u8]>, Box<[u8]>)> = data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone().into_boxed_slice(), v.clone().into_boxed_slice()))
            .collect();
        if reverse {
            out.reverse();
        }
        Ok(out)
    }
}
