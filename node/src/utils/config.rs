use std::time::Duration;
use tracing::warn;

/// Runtime configuration of the submitter node, read from environment
/// variables.
pub struct Config {
    pub l1_rpc_url: String,
    /// Hex-encoded private keys of the managed senders, comma separated in
    /// the environment.
    pub l1_private_keys: Vec<String>,
    /// SQLite database path; empty selects the in-memory store.
    pub storage_path: String,
    /// Optional JSON snapshot file for the in-memory store.
    pub persistence_file: Option<String>,
    pub frequency_to_monitor_txs: Duration,
    pub wait_tx_to_be_mined: Duration,
    pub get_receipt_max_time: Duration,
    pub get_receipt_wait_interval: Duration,
    pub forced_gas: u64,
    pub gas_price_margin_factor: f64,
    pub max_gas_price_limit: u64,
    pub read_pending_l1_txs: bool,
    pub safe_status_l1_number_of_blocks: u64,
    pub finalized_status_l1_number_of_blocks: u64,
    pub metrics_port: u16,
}

impl Config {
    pub fn read_env_variables() -> Self {
        // Load environment variables from .env file
        dotenvy::dotenv().ok();

        const L1_RPC_URL: &str = "L1_RPC_URL";
        let l1_rpc_url = std::env::var(L1_RPC_URL).unwrap_or_else(|_| {
            warn!("No L1 RPC URL found in {} env var, using default", L1_RPC_URL);
            "http://127.0.0.1:8545".to_string()
        });

        const L1_PRIVATE_KEYS: &str = "L1_PRIVATE_KEYS";
        let l1_private_keys = std::env::var(L1_PRIVATE_KEYS)
            .unwrap_or_else(|_| {
                warn!(
                    "No L1 sender private keys found in {} env var, using default",
                    L1_PRIVATE_KEYS
                );
                "0x4c0883a69102937d6231471b5dbb6204fe512961708279f2e3e8a5d4b8e3e3e8".to_string()
            })
            .split(',')
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();

        let storage_path = std::env::var("STORAGE_PATH").unwrap_or_default();
        let persistence_file = std::env::var("PERSISTENCE_FILE").ok().filter(|p| !p.is_empty());

        let frequency_to_monitor_txs =
            Duration::from_secs(read_env_number("FREQUENCY_TO_MONITOR_TXS_SEC", 15));
        let wait_tx_to_be_mined =
            Duration::from_secs(read_env_number("WAIT_TX_TO_BE_MINED_SEC", 120));
        let get_receipt_max_time =
            Duration::from_secs(read_env_number("GET_RECEIPT_MAX_TIME_SEC", 60));
        let get_receipt_wait_interval =
            Duration::from_secs(read_env_number("GET_RECEIPT_WAIT_INTERVAL_SEC", 1));

        let forced_gas = read_env_number("FORCED_GAS", 0);
        let max_gas_price_limit = read_env_number("MAX_GAS_PRICE_LIMIT", 0);

        const GAS_PRICE_MARGIN_FACTOR: &str = "GAS_PRICE_MARGIN_FACTOR";
        let gas_price_margin_factor = std::env::var(GAS_PRICE_MARGIN_FACTOR)
            .unwrap_or("1.0".to_string())
            .parse::<f64>()
            .expect("GAS_PRICE_MARGIN_FACTOR must be a number");

        let read_pending_l1_txs = std::env::var("READ_PENDING_L1_TXS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let safe_status_l1_number_of_blocks =
            read_env_number("SAFE_STATUS_L1_NUMBER_OF_BLOCKS", 0);
        let finalized_status_l1_number_of_blocks =
            read_env_number("FINALIZED_STATUS_L1_NUMBER_OF_BLOCKS", 0);

        let metrics_port = read_env_number("METRICS_PORT", 9898) as u16;

        Self {
            l1_rpc_url,
            l1_private_keys,
            storage_path,
            persistence_file,
            frequency_to_monitor_txs,
            wait_tx_to_be_mined,
            get_receipt_max_time,
            get_receipt_wait_interval,
            forced_gas,
            gas_price_margin_factor,
            max_gas_price_limit,
            read_pending_l1_txs,
            safe_status_l1_number_of_blocks,
            finalized_status_l1_number_of_blocks,
            metrics_port,
        }
    }
}

fn read_env_number(var: &str, default: u64) -> u64 {
    match std::env::var(var) {
        Ok(value) => value
            .parse::<u64>()
            .unwrap_or_else(|_| panic!("{var} must be a number")),
        Err(_) => default,
    }
}
