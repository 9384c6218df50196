//! Small ambient utilities shared across the engine.
//!
//! - [`sig_down`] - graceful shutdown signal handling, shared by every per-contract loop.

pub mod sig_down;

pub use sig_down::SigDown;
