use std::time::Duration;

/// Tuning knobs of the monitored transaction engine.
#[derive(Clone, Debug)]
pub struct Config {
    /// Pause between monitoring cycles.
    pub frequency_to_monitor_txs: Duration,
    /// How long one cycle waits for a broadcast tx to be mined before giving
    /// the slot back to the loop.
    pub wait_tx_to_be_mined: Duration,
    /// Total time to poll for the receipt of a mined tx.
    pub get_receipt_max_time: Duration,
    /// Sleep between receipt polls.
    pub get_receipt_wait_interval: Duration,
    /// Gas limit to fall back to when estimation fails; 0 disables the
    /// fallback and estimation errors are surfaced.
    pub forced_gas: u64,
    /// Multiplier applied to the network's suggested gas price. Default 1.0.
    pub gas_price_margin_factor: f64,
    /// Upper bound for the adjusted gas price; 0 means no limit.
    pub max_gas_price_limit: u64,
    /// SQLite database path; empty selects the in-memory store.
    pub storage_path: String,
    /// Optional JSON snapshot file for the in-memory store.
    pub persistence_file: Option<String>,
    /// Ingest the managed sender's mempool txs on startup. Only honoured by
    /// the in-memory store.
    pub read_pending_l1_txs: bool,
    /// RPC endpoint used for the raw `txpool_content` call.
    pub rpc_url: String,
    /// Depth below the latest block at which a mined tx becomes safe; 0 uses
    /// the network's own safe block.
    pub safe_status_l1_number_of_blocks: u64,
    /// Depth below the latest block at which a safe tx becomes finalized; 0
    /// uses the network's own finalized block.
    pub finalized_status_l1_number_of_blocks: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frequency_to_monitor_txs: Duration::from_secs(15),
            wait_tx_to_be_mined: Duration::from_secs(120),
            get_receipt_max_time: Duration::from_secs(60),
            get_receipt_wait_interval: Duration::from_secs(1),
            forced_gas: 0,
            gas_price_margin_factor: 1.0,
            max_gas_price_limit: 0,
            storage_path: String::new(),
            persistence_file: None,
            read_pending_l1_txs: false,
            rpc_url: String::new(),
            safe_status_l1_number_of_blocks: 0,
            finalized_status_l1_number_of_blocks: 0,
        }
    }
}
