//! `mvm-relay`: the bidirectional relay engine binary.
//!
//! Boots against a TOML config file, opens the embedded KV store, connects to the
//! configured chain endpoint, and runs the supervisor until a shutdown signal arrives.

use std::sync::Arc;

use clap::Parser;

use mvm_relay::chain::evm_rpc::AlloyChainRpc;
use mvm_relay::chain::ChainRpc;
use mvm_relay::config::{Cli, Config};
use mvm_relay::engine::supervisor::EngineSupervisor;
use mvm_relay::store::{ContractStore, RocksKv};
use mvm_relay::util::SigDown;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mvm_relay::telemetry::init();

    let Cli::Boot { config } = Cli::parse();
    let config = Config::load(&config)?;
    let master_key = config.master_key()?;

    let kv = RocksKv::open(&config.store)?;
    let store = Arc::new(ContractStore::new(kv));

    let rpc = AlloyChainRpc::connect(&config.rpc);
    let chain_id = rpc.chain_id().await?;
    let rpc: Arc<dyn ChainRpc> = Arc::new(rpc);

    tracing::info!(
        store = %config.store.display(),
        rpc = %config.rpc,
        chain_id,
        publisher = config.is_publisher(),
        "starting relay engine"
    );

    let supervisor = Arc::new(EngineSupervisor::new(
        store,
        rpc,
        master_key,
        config.is_publisher(),
        chain_id,
    ));

    let sig_down = SigDown::try_new()?;
    let cancel = sig_down.cancellation_token();
    supervisor.run(cancel).await;

    tracing::info!("relay engine shut down");
    Ok(())
}
