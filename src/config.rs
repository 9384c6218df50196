//! Configuration for the relay engine binary.
//!
//! `store`, `rpc`, `key` and `publisher` are read from a TOML config file.

use std::path::{Path, PathBuf};

use alloy_primitives::hex;
use clap::Parser;
use serde::Deserialize;
use url::Url;

/// CLI arguments for the `mvm-relay` binary.
///
/// Only the `boot` subcommand is implemented; publishing MTG applications belongs to the
/// MTG group worker, an external collaborator, not this engine.
#[derive(Parser, Debug)]
#[command(name = "mvm-relay")]
#[command(about = "Bidirectional relay engine between a Mixin Trusted Group and a chain")]
pub enum Cli {
    /// Boot a relay engine node.
    Boot {
        /// Path to the TOML configuration file.
        #[arg(long, short, env = "MVM_RELAY_CONFIG", default_value = "config.toml")]
        config: PathBuf,
    },
}

/// Errors loading or validating [`Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path} as TOML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("`key` is not valid hex or is not 32 bytes: {0}")]
    InvalidKey(String),
    #[error("`publisher = true` requires `key` to be set")]
    PublisherWithoutKey,
}

/// Engine configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Filesystem path for the KV store.
    pub store: PathBuf,
    /// Chain JSON-RPC endpoint URL.
    pub rpc: Url,
    /// Hex-encoded master secp256k1 private key. Absent means a non-publisher node: it
    /// still runs ingress loops but never signs or submits outbound transactions.
    #[serde(default)]
    pub key: Option<String>,
    /// Whether this node is allowed to act as the publisher, i.e. to fund notifiers and
    /// submit outbound transactions. Kept as a separate flag alongside `key` rather than
    /// deriving it purely from key presence (see DESIGN.md, "publisher flag vs key
    /// presence").
    #[serde(default)]
    pub publisher: bool,
}

impl Config {
    /// Loads and validates configuration from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.key.is_some() {
            let _ = self.master_key()?;
        } else if self.publisher {
            return Err(ConfigError::PublisherWithoutKey);
        }
        Ok(())
    }

    /// Decodes `key` into a 32-byte master key, if present.
    pub fn master_key(&self) -> Result<Option<[u8; 32]>, ConfigError> {
        let Some(key) = &self.key else {
            return Ok(None);
        };
        let bytes = hex::decode(key.strip_prefix("0x").unwrap_or(key))
            .map_err(|_| ConfigError::InvalidKey(key.clone()))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ConfigError::InvalidKey(key.clone()))?;
        Ok(Some(array))
    }

    /// Whether this node signs and submits outbound transactions.
    ///
    /// An AND of "holds key material" and "opted in via the `publisher` flag" — an operator
    /// can hold a master key without enrolling the node into transaction submission (see
    /// DESIGN.md).
    pub fn is_publisher(&self) -> bool {
        self.key.is_some() && self.publisher
    }
}
