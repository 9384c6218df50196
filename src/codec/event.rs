//! Canonical wire encoding for [`Event`], the transfer-request/notification record bridged
//! between the MTG and a chain contract.
//!
//! Fields are laid out in a fixed order with length-prefixed variable fields, matching the
//! framing a contract emits in its `MixinTransaction(bytes)` log and the payload a notifier
//! transaction submits back on-chain. `signatures` is bound to the encoding of every other
//! field: the signing payload always encodes a zero-length signature list, never omits the
//! field, so a verifier can recompute it without first knowing how many signatures to expect.

use std::collections::HashSet;
use std::fmt;

use alloy_primitives::{keccak256, Address, PrimitiveSignature as Signature};

/// A 128-bit opaque identifier, used for a Mixin process or asset ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MixinId(pub [u8; 16]);

impl MixinId {
    pub const ZERO: MixinId = MixinId([0u8; 16]);

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        MixinId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for MixinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Maximum length in bytes of the `extra` opaque payload.
pub const MAX_EXTRA_LEN: usize = 512;
/// Maximum number of members (and thus signatures) an event may declare.
pub const MAX_MEMBERS: usize = u16::MAX as usize;

/// The canonical transfer-request/notification record bridged in both directions.
///
/// This type only carries data; invariant enforcement (threshold bounds,
/// signature-count/member-count matching) happens at decode time in [`decode`], so that a
/// value of this type in memory is always valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub nonce: u64,
    pub process: MixinId,
    pub asset: MixinId,
    pub members: Vec<MixinId>,
    pub threshold: i32,
    pub amount: u128,
    pub extra: Vec<u8>,
    pub timestamp: u64,
    pub signatures: Vec<Signature>,
}

/// Errors produced while decoding a canonical [`Event`] from bytes.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated event encoding: needed {needed} more byte(s)")]
    Truncated { needed: usize },
    #[error("{0} trailing byte(s) after a complete event encoding")]
    TrailingBytes(usize),
    #[error("{field} exceeds the maximum length of {max} byte(s) ({actual} given)")]
    FieldTooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },
    #[error("threshold {threshold} is out of bounds for {member_count} member(s)")]
    InvalidThreshold { threshold: i32, member_count: usize },
    #[error("{signature_count} signature(s) present but threshold is {threshold}")]
    SignatureCountBelowThreshold {
        signature_count: usize,
        threshold: i32,
    },
    #[error("malformed signature at index {index}")]
    InvalidSignature { index: usize },
    #[error("signature at index {index} does not recover to a valid secp256k1 signer")]
    UnrecoverableSignature { index: usize },
    #[error("signature at index {index} recovers to the same signer as an earlier one")]
    DuplicateSigner { index: usize },
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(CodecError::Truncated {
                needed: end - self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn u128(&mut self) -> Result<u128, CodecError> {
        Ok(u128::from_be_bytes(self.take(16)?.try_into().unwrap()))
    }

    fn id(&mut self) -> Result<MixinId, CodecError> {
        Ok(MixinId(self.take(16)?.try_into().unwrap()))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u128(buf: &mut Vec<u8>, v: u128) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_id(buf: &mut Vec<u8>, id: &MixinId) {
    buf.extend_from_slice(&id.0);
}

const SIGNATURE_LEN: usize = 65;

fn put_signature(buf: &mut Vec<u8>, sig: &Signature) {
    buf.extend_from_slice(&sig.as_bytes());
}

/// Encodes `event` in canonical wire form, including its signatures.
pub fn encode(event: &Event) -> Vec<u8> {
    encode_inner(event, true)
}

/// Encodes `event` the way signers see it: with the signature list forced to empty.
///
/// This is the payload every member signs; it is never a prefix/suffix trick, it is the
/// exact same framing with a zero count in the signatures field.
pub fn signing_payload(event: &Event) -> Vec<u8> {
    encode_inner(event, false)
}

fn encode_inner(event: &Event, with_signatures: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + event.extra.len() + event.members.len() * 16);
    put_u64(&mut buf, event.nonce);
    put_id(&mut buf, &event.process);
    put_id(&mut buf, &event.asset);
    put_u16(&mut buf, event.members.len() as u16);
    for m in &event.members {
        put_id(&mut buf, m);
    }
    put_u32(&mut buf, event.threshold as u32);
    put_u128(&mut buf, event.amount);
    put_u16(&mut buf, event.extra.len() as u16);
    buf.extend_from_slice(&event.extra);
    put_u64(&mut buf, event.timestamp);
    if with_signatures {
        put_u16(&mut buf, event.signatures.len() as u16);
        for sig in &event.signatures {
            put_signature(&mut buf, sig);
        }
    } else {
        put_u16(&mut buf, 0);
    }
    buf
}

/// Decodes a canonical [`Event`] from `bytes`, validating field length bounds,
/// `1 <= threshold <= members.len()`, and `signatures.len() >= threshold`.
///
/// This does *not* verify the signatures themselves — call [`verify_signatures`] on the
/// result before trusting it.
pub fn decode(bytes: &[u8]) -> Result<Event, CodecError> {
    let mut r = Reader::new(bytes);
    let nonce = r.u64()?;
    let process = r.id()?;
    let asset = r.id()?;
    let member_count = r.u16()? as usize;
    let mut members = Vec::with_capacity(member_count);
    for _ in 0..member_count {
        members.push(r.id()?);
    }
    let threshold = r.u32()? as i32;
    let amount = r.u128()?;
    let extra_len = r.u16()? as usize;
    if extra_len > MAX_EXTRA_LEN {
        return Err(CodecError::FieldTooLong {
            field: "extra",
            max: MAX_EXTRA_LEN,
            actual: extra_len,
        });
    }
    let extra = r.take(extra_len)?.to_vec();
    let timestamp = r.u64()?;
    let signature_count = r.u16()? as usize;
    let mut signatures = Vec::with_capacity(signature_count);
    for index in 0..signature_count {
        let raw = r.take(SIGNATURE_LEN)?;
        let sig = Signature::from_raw(raw).map_err(|_| CodecError::InvalidSignature { index })?;
        signatures.push(sig);
    }
    if r.remaining() != 0 {
        return Err(CodecError::TrailingBytes(r.remaining()));
    }
    if threshold < 1 || threshold as usize > members.len() {
        return Err(CodecError::InvalidThreshold {
            threshold,
            member_count: members.len(),
        });
    }
    if signatures.len() < threshold as usize {
        return Err(CodecError::SignatureCountBelowThreshold {
            signature_count: signatures.len(),
            threshold,
        });
    }
    Ok(Event {
        nonce,
        process,
        asset,
        members,
        threshold,
        amount,
        extra,
        timestamp,
        signatures,
    })
}

/// Verifies every signature in `event.signatures` recovers to a distinct secp256k1 signer
/// over the keccak256 hash of `signing_payload(event)`.
///
/// Binding a recovered signer to a specific entry in `event.members` is the MTG group
/// worker's job, not this engine's (consensus among members is explicitly out of scope) —
/// this call enforces the part that is this engine's responsibility: every declared
/// signature is a real, distinct ECDSA signature over this exact event, so a malformed or
/// replayed signature can't be smuggled past the threshold count check in [`decode`].
pub fn verify_signatures(event: &Event) -> Result<(), CodecError> {
    let hash = keccak256(signing_payload(event));
    let mut seen = HashSet::with_capacity(event.signatures.len());
    for (index, sig) in event.signatures.iter().enumerate() {
        let signer: Address = sig
            .recover_address_from_prehash(&hash)
            .map_err(|_| CodecError::UnrecoverableSignature { index })?;
        if !seen.insert(signer) {
            return Err(CodecError::DuplicateSigner { index });
        }
    }
    Ok(())
}
