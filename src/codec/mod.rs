//! Canonical encoding of the MTG/contract bridge's [`event::Event`] record (C3 in the
//! design), plus the EVM-specific framing layered on top of it.

pub mod event;
pub mod evm;

pub use event::{decode, encode, signing_payload, verify_signatures, CodecError, Event, MixinId};
