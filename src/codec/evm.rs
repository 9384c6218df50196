//! EVM-specific framing around the canonical [`Event`] bytes: the log topic a contract
//! emits on egress, and the calldata a notifier submits on ingress.

use alloy_primitives::{keccak256, Bytes, FixedBytes, Log, B256};
use alloy_sol_types::{sol, SolCall};

use super::event::{decode, encode, CodecError, Event};

/// keccak256("MixinTransaction(bytes)"), the topic0 of the log a contract emits when it
/// records an outbound-to-MTG event.
pub const EVENT_TOPIC: B256 = FixedBytes([
    0xdb, 0x53, 0xe7, 0x51, 0xd2, 0x8e, 0xd0, 0xd6, 0xe3, 0x68, 0x28, 0x14, 0xbf, 0x8d, 0x23,
    0xf7, 0xdd, 0x7b, 0x29, 0xc9, 0x4f, 0x74, 0xa5, 0x6f, 0xbb, 0x7f, 0x88, 0xe9, 0xdc, 0xa9,
    0xf3, 0x9b,
]);

sol! {
    function notifyGroupEvent(bytes eventData) external;
}

/// Fixed 4-byte selector the ingress contract call expects, independent of the
/// human-readable signature encoded above (the deployed contract's real signature is not
/// reconstructible from a name guess, so the selector is pinned as a constant and the
/// `sol!`-generated encoder is used only for its ABI tail, with the selector overwritten).
pub const INGRESS_SELECTOR: [u8; 4] = [0x5c, 0xae, 0x80, 0x05];

/// Errors building or parsing EVM-specific framing around an [`Event`].
#[derive(Debug, thiserror::Error)]
pub enum EvmCodecError {
    #[error("log has no topics (expected topic0 == MixinTransaction(bytes))")]
    MissingTopic,
    #[error("log topic0 {found} does not match the expected MixinTransaction(bytes) topic")]
    TopicMismatch { found: B256 },
    #[error(transparent)]
    Event(#[from] CodecError),
}

/// Builds the calldata for a call to the fixed ingress selector, wrapping `event`'s
/// canonical bytes as the sole `bytes` argument.
pub fn build_ingress_calldata(event: &Event) -> Bytes {
    let event_data = encode(event);
    let call = notifyGroupEventCall {
        eventData: event_data.into(),
    };
    let mut encoded = call.abi_encode();
    // `sol!` derives its own (unrelated) selector from the declared signature; the
    // deployed contract's real selector is fixed and externally given, so it replaces
    // the first four bytes here rather than being guessed from a signature string.
    encoded[..4].copy_from_slice(&INGRESS_SELECTOR);
    Bytes::from(encoded)
}

/// Extracts the canonical [`Event`] bytes from a contract log, verifying `topic0` first.
pub fn decode_event_log(log: &Log) -> Result<Event, EvmCodecError> {
    let topic0 = log
        .data
        .topics()
        .first()
        .copied()
        .ok_or(EvmCodecError::MissingTopic)?;
    if topic0 != EVENT_TOPIC {
        return Err(EvmCodecError::TopicMismatch { found: topic0 });
    }
    let event = decode(log.data.data.as_ref())?;
    Ok(event)
}

/// Recomputes the topic a contract would emit for `MixinTransaction(bytes)`; used by a
/// const-equality test to keep [`EVENT_TOPIC`] honest against its published value.
pub fn event_topic_from_signature() -> B256 {
    keccak256(b"MixinTransaction(bytes)")
}
