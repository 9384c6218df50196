//! NotifierKeyring (C5): deterministic derivation of a per-contract notifier key from the
//! engine's master key, and the registration rule that makes that derivation immutable
//! once observed (invariant I3).

use alloy_primitives::{keccak256, B256};
use alloy_signer_local::PrivateKeySigner;

use crate::store::{ContractStore, ContractStoreError, KvStore};

/// Secp256k1 group order, used to bound the rejection-sampling loop in [`derive`].
const SECP256K1_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe,
    0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36, 0x41, 0x41,
];

/// Upper bound on rejection-sampling attempts in [`derive`]. Past this point a digest
/// landing outside the curve order on every attempt indicates a broken hash, not bad luck —
/// the chance of exhausting this is negligible in practice.
const MAX_DERIVE_ATTEMPTS: u32 = 8;

/// Errors raised by keyring operations.
#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    #[error("failed to derive a valid secp256k1 key within {0} attempt(s)")]
    DerivationExhausted(u32),
    #[error(transparent)]
    Store(#[from] ContractStoreError),
}

fn less_than_order(candidate: &[u8; 32]) -> bool {
    candidate.as_slice() < SECP256K1_ORDER.as_slice() && *candidate != [0u8; 32]
}

/// Derives the notifier private key for `address` from `master_key`, per spec §4.5:
/// `H(masterKey ‖ address)` interpreted as a secp256k1 scalar, rejection-sampled against
/// the curve order by re-hashing with an appended counter on collision.
pub fn derive(master_key: &[u8; 32], address: &[u8]) -> Result<PrivateKeySigner, KeyringError> {
    let mut input = Vec::with_capacity(32 + address.len() + 4);
    input.extend_from_slice(master_key);
    input.extend_from_slice(address);
    for attempt in 0..MAX_DERIVE_ATTEMPTS {
        if attempt > 0 {
            input.extend_from_slice(&attempt.to_be_bytes());
        }
        let digest: B256 = keccak256(&input);
        let candidate: [u8; 32] = digest.into();
        if less_than_order(&candidate) {
            return PrivateKeySigner::from_bytes(&digest)
                .map_err(|_| KeyringError::DerivationExhausted(MAX_DERIVE_ATTEMPTS));
        }
    }
    Err(KeyringError::DerivationExhausted(MAX_DERIVE_ATTEMPTS))
}

/// Registers the notifier derived for `address` against `store`, enforcing invariant I3:
/// absent → persist; present and equal → no-op; present and different → fatal error.
pub fn register<S: KvStore>(
    store: &ContractStore<S>,
    master_key: &[u8; 32],
    address: &[u8],
) -> Result<PrivateKeySigner, KeyringError> {
    let signer = derive(master_key, address)?;
    let key_bytes = signer.to_bytes();
    store.register_notifier(address, key_bytes.as_slice())?;
    Ok(signer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemKv;

    #[test]
    fn derive_is_deterministic() {
        let master = [7u8; 32];
        let a = derive(&master, b"contract-a").unwrap();
        let b = derive(&master, b"contract-a").unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn derive_differs_per_address() {
        let master = [7u8; 32];
        let a = derive(&master, b"contract-a").unwrap();
        let b = derive(&master, b"contract-b").unwrap();
        assert_ne!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn register_is_idempotent_for_the_same_master_key() {
        let store = ContractStore::new(MemKv::new());
        let master = [9u8; 32];
        register(&store, &master, b"contract-a").unwrap();
        register(&store, &master, b"contract-a").unwrap();
    }

    #[test]
    fn register_rejects_a_different_master_key_for_the_same_address() {
        let store = ContractStore::new(MemKv::new());
        register(&store, &[1u8; 32], b"contract-a").unwrap();
        let err = register(&store, &[2u8; 32], b"contract-a").unwrap_err();
        assert!(matches!(
            err,
            KeyringError::Store(ContractStoreError::NotifierAlreadyRegistered { .. })
        ));
    }
}
