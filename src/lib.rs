//! A relay engine bridging a Mixin Trusted Group (MTG) and an EVM-compatible smart
//! contract: it watches the chain for events addressed to the group (ingress) and
//! delivers events the group wants to publish back on-chain (egress).
//!
//! # Modules
//!
//! - [`store`] — the ordered key-value abstraction (`store::kv`) and the namespaced
//!   per-contract layout built on it (`store::contract`).
//! - [`codec`] — the canonical event wire format and its EVM log/calldata framing.
//! - [`keyring`] — deterministic per-contract notifier key derivation and registration.
//! - [`chain`] — the [`chain::ChainRpc`] trait and its EVM and EOS backends.
//! - [`engine`] — the ingress/egress loops, the supervisor that runs them, and the
//!   public [`engine::Engine`] trait the outer group worker consumes.
//! - [`config`] — on-disk TOML configuration and the CLI surface.
//! - [`telemetry`] — structured logging setup.
//! - [`util`] — signal handling for graceful shutdown.

pub mod chain;
pub mod codec;
pub mod config;
pub mod engine;
pub mod keyring;
pub mod store;
pub mod telemetry;
pub mod util;
