//! Persistence layer: the ordered key-value abstraction (C1) and the namespaced contract
//! layout built on top of it (C4).

pub mod contract;
pub mod kv;

pub use contract::{ContractStore, ContractStoreError};
pub use kv::{KvError, KvStore, MemKv, RocksKv, Transaction};
