//! The relay engine: the public surface the MTG group worker consumes, and the
//! per-contract loops and supervisor that implement it.

pub mod config;
pub mod egress;
pub mod evm;
pub mod ingress;
pub mod supervisor;

use async_trait::async_trait;

use crate::chain::ChainRpcError;
use crate::codec::Event;
use crate::keyring::KeyringError;
use crate::store::ContractStoreError;

/// Errors surfaced at the public engine API: every fallible call returns one of these
/// rather than panicking.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("address must be exactly 20 bytes for the EVM backend")]
    InvalidAddress,
    #[error("contract at birth block {birth} is younger than the age limit (height {height})")]
    ContractTooYoung { birth: u64, height: u64 },
    #[error("this node has no master key configured and cannot register notifiers or sign")]
    NoMasterKey,
    #[error("failed to sign an outbound transaction: {0}")]
    Sign(String),
    #[error(transparent)]
    Rpc(#[from] ChainRpcError),
    #[error(transparent)]
    Store(#[from] ContractStoreError),
    #[error(transparent)]
    Keyring(#[from] KeyringError),
}

/// Error classification for loop-internal failures: `Retry` re-tries on the next tick,
/// `Reject` drops the offending item and advances, `Fatal` ends the loop task (recovered
/// by a supervisor restart against persisted state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Retry,
    Reject,
    Fatal,
}

impl EngineError {
    pub fn severity(&self) -> Severity {
        match self {
            EngineError::Rpc(ChainRpcError::Transport(_)) => Severity::Retry,
            EngineError::Rpc(ChainRpcError::Protocol(_))
            | EngineError::Rpc(ChainRpcError::NotFound { .. })
            | EngineError::Rpc(ChainRpcError::Unsupported)
            | EngineError::InvalidAddress
            | EngineError::ContractTooYoung { .. } => Severity::Reject,
            EngineError::NoMasterKey | EngineError::Sign(_) => Severity::Fatal,
            EngineError::Store(ContractStoreError::NotifierAlreadyRegistered { .. }) => {
                Severity::Fatal
            }
            EngineError::Store(_) => Severity::Fatal,
            EngineError::Keyring(_) => Severity::Fatal,
        }
    }
}

/// The pluggable engine contract the outer MTG worker consumes.
///
/// One implementation exists per chain backend (`evm::EvmEngine` for EVM-compatible
/// chains); EOS-family support is abstracted identically but not implemented.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Validates `address`'s format, confirms it has run `code_hash` for long enough
    /// (the contract age gate), and initializes its log cursor at the contract's birth
    /// block.
    async fn verify_address(&self, address: &[u8], code_hash: &[u8]) -> Result<(), EngineError>;

    /// Derives and persists `address`'s notifier key; idempotent.
    fn setup_notifier(&self, address: &[u8]) -> Result<(), EngineError>;

    /// Reads events bound for the MTG from `address`'s inbound queue (chain → MTG).
    fn receive_group_events(
        &self,
        address: &[u8],
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Event>, EngineError>;

    /// Appends events the MTG wants delivered on-chain to `address`'s outbound queue
    /// (MTG → chain); idempotent per event nonce (spec P3).
    fn ensure_send_group_events(&self, address: &[u8], events: &[Event]) -> Result<(), EngineError>;

    /// Upper-bounds the on-chain cost of delivering `events`.
    fn estimate_cost(&self, events: &[Event]) -> Result<u128, EngineError>;

    /// Whether this node holds the master key and will sign/submit outbound transactions.
    fn is_publisher(&self) -> bool;
}
