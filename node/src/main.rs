use anyhow::Error;
use l1_sentinel_node::{ethereum_l1, manager, metrics, metrics::Metrics, utils};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use l1_sentinel_node::utils::logging::init_logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging();

    info!("🚀 Starting L1 Sentinel v{}", env!("CARGO_PKG_VERSION"));

    let config = utils::config::Config::read_env_variables();
    let cancel_token = CancellationToken::new();

    let metrics = Arc::new(Metrics::new());

    // Set up panic hook to cancel token on panic
    let panic_cancel_token = cancel_token.clone();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!("Panic occurred: {:?}", panic_info);
        panic_cancel_token.cancel();
        info!("Cancellation token triggered, initiating shutdown...");
    }));

    let execution_layer = ethereum_l1::ExecutionLayer::new(ethereum_l1::config::EthereumL1Config {
        rpc_url: config.l1_rpc_url.clone(),
        private_keys: config.l1_private_keys.clone(),
    })
    .await
    .map_err(|e| anyhow::anyhow!("Failed to create execution layer: {e}"))?;

    let from = execution_layer
        .sender_addresses()
        .first()
        .copied()
        .ok_or_else(|| anyhow::anyhow!("No L1 sender private key configured"))?;

    let manager = Arc::new(
        manager::Manager::new(
            manager::Config {
                frequency_to_monitor_txs: config.frequency_to_monitor_txs,
                wait_tx_to_be_mined: config.wait_tx_to_be_mined,
                get_receipt_max_time: config.get_receipt_max_time,
                get_receipt_wait_interval: config.get_receipt_wait_interval,
                forced_gas: config.forced_gas,
                gas_price_margin_factor: config.gas_price_margin_factor,
                max_gas_price_limit: config.max_gas_price_limit,
                storage_path: config.storage_path.clone(),
                persistence_file: config.persistence_file.clone(),
                read_pending_l1_txs: config.read_pending_l1_txs,
                rpc_url: config.l1_rpc_url.clone(),
                safe_status_l1_number_of_blocks: config.safe_status_l1_number_of_blocks,
                finalized_status_l1_number_of_blocks: config.finalized_status_l1_number_of_blocks,
            },
            from,
            Arc::new(execution_layer),
            metrics.clone(),
            cancel_token.clone(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create monitored tx manager: {e}"))?,
    );

    manager.start();

    metrics::server::serve_metrics(metrics.clone(), config.metrics_port, cancel_token.clone());

    wait_for_the_termination(cancel_token).await;

    Ok(())
}

async fn wait_for_the_termination(cancel_token: CancellationToken) {
    info!("Starting signal handler...");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to set up SIGTERM handler");
    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
            cancel_token.cancel();
            // Give tasks a little time to finish
            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            cancel_token.cancel();
            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
        }
        _ = cancel_token.cancelled() => {
            info!("Shutdown signal received, exiting...");
        }
    }
}
