pub mod config;
mod iteration;
pub mod monitored_tx;

pub use config::Config;
pub use monitored_tx::{MonitoredTx, MonitoredTxResult, MonitoredTxStatus, TxResult};

use crate::{
    crypto::kzg,
    ethereum_l1::SharedL1Client,
    metrics::Metrics,
    storage::{MemoryStorage, SharedStorage, SqlStorage, StorageError},
    utils::{blob, rpc_client::JsonRpcClient},
};
use alloy::{
    consensus::{Blob, BlobTransactionSidecar, BlockHeader},
    eips::eip4844::{calc_blob_gasprice, calc_excess_blob_gas},
    network::ReceiptResponse,
    primitives::{Address, Bytes, B256, U256},
    rpc::types::{Header, TransactionReceipt},
};
use anyhow::{anyhow, Context};
use iteration::MonitoredTxIteration;
use serde::Deserialize;
use std::{
    collections::HashMap,
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::{
    task::{JoinHandle, JoinSet},
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed monitoring sweep before the next cycle.
const FAILURE_INTERVAL: Duration = Duration::from_secs(5);

/// Fee margin applied to blob transactions at creation time.
const BLOB_FEE_MARGIN: u128 = 10;

/// The monitored transaction engine.
///
/// Callers register transaction intents with [`Manager::add`]; the monitoring
/// loop signs, broadcasts, re-prices and tracks every intent until it is
/// finalized on L1 or fails with an unrecoverable revert.
#[derive(Clone)]
pub struct Manager {
    cfg: Config,
    from: Address,
    l1: SharedL1Client,
    storage: SharedStorage,
    metrics: Arc<Metrics>,
    cancel_token: CancellationToken,
}

impl Manager {
    /// Creates the engine with the storage selected by the configuration: a
    /// SQLite database when `storage_path` is set, the in-memory store (with
    /// its optional snapshot file) otherwise.
    pub async fn new(
        cfg: Config,
        from: Address,
        l1: SharedL1Client,
        metrics: Arc<Metrics>,
        cancel_token: CancellationToken,
    ) -> Result<Self, anyhow::Error> {
        let storage: SharedStorage = if cfg.storage_path.is_empty() {
            Arc::new(MemoryStorage::new(cfg.persistence_file.clone())?)
        } else {
            Arc::new(SqlStorage::new(&cfg.storage_path).await?)
        };
        Ok(Self::with_storage(cfg, from, l1, storage, metrics, cancel_token))
    }

    pub fn with_storage(
        cfg: Config,
        from: Address,
        l1: SharedL1Client,
        storage: SharedStorage,
        metrics: Arc<Metrics>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            from,
            l1,
            storage,
            metrics,
            cancel_token,
        }
    }

    /// Registers a transaction to be sent and monitored. Returns the id the
    /// caller uses to query or drop the record later.
    pub async fn add(
        &self,
        to: Option<Address>,
        value: U256,
        data: Bytes,
        gas_offset: u64,
        sidecar: Option<BlobTransactionSidecar>,
    ) -> Result<B256, anyhow::Error> {
        self.add_tx(to, value, data, gas_offset, sidecar, None).await
    }

    /// Like [`Manager::add`], but with a caller-pinned gas limit; the engine
    /// will never re-estimate it.
    pub async fn add_with_gas(
        &self,
        to: Option<Address>,
        value: U256,
        data: Bytes,
        gas_offset: u64,
        sidecar: Option<BlobTransactionSidecar>,
        gas: u64,
    ) -> Result<B256, anyhow::Error> {
        self.add_tx(to, value, data, gas_offset, sidecar, Some(gas))
            .await
    }

    async fn add_tx(
        &self,
        to: Option<Address>,
        value: U256,
        data: Bytes,
        gas_offset: u64,
        sidecar: Option<BlobTransactionSidecar>,
        pinned_gas: Option<u64>,
    ) -> Result<B256, anyhow::Error> {
        // Provisional nonce; the monitoring loop re-assigns it on the first
        // dispatch cycle. Using the pending nonce here keeps the id of a
        // replayed payload stable so duplicates collide in storage.
        let nonce = self
            .l1
            .pending_nonce(self.from)
            .await
            .context("failed to get pending nonce")?;

        let mut gas_price = self.suggested_gas_price().await?;
        let mut gas_tip_cap = 0u128;
        let mut blob_gas_price = 0u128;

        let gas = if sidecar.is_some() {
            let parent_header = self
                .l1
                .get_header(None)
                .await
                .context("failed to get parent header")?;
            let mut blob_fee_cap = blob_fee_from_parent(&parent_header);
            let mut tip = self
                .l1
                .suggested_gas_tip_cap()
                .await
                .context("failed to get gas tip cap")?;

            let gas = match pinned_gas {
                Some(gas) => gas,
                None => {
                    let estimate = self
                        .l1
                        .estimate_gas_blob_tx(self.from, to, gas_price, tip, value, data.clone())
                        .await
                        .map_err(|e| anyhow!("failed to estimate gas for blob tx: {e}"))?;
                    estimate * 12 / 10
                }
            };

            // blob txs are priced aggressively so a re-priced replacement is
            // rarely needed
            tip *= BLOB_FEE_MARGIN;
            gas_price *= BLOB_FEE_MARGIN;
            blob_fee_cap *= BLOB_FEE_MARGIN;

            gas_tip_cap = tip;
            blob_gas_price = blob_fee_cap;
            gas
        } else {
            match pinned_gas {
                Some(gas) => gas,
                None => match self.l1.estimate_gas(self.from, to, value, data.clone()).await {
                    Ok(gas) => gas,
                    Err(e) => {
                        error!("failed to estimate gas: {e}");
                        if self.cfg.forced_gas > 0 {
                            self.cfg.forced_gas
                        } else {
                            return Err(anyhow!("failed to estimate gas: {e}"));
                        }
                    }
                },
            }
        };

        let id = monitored_tx::fingerprint(to, nonce, value, &data, sidecar.as_ref());
        let blob_gas = sidecar
            .as_ref()
            .map(MonitoredTx::sidecar_blob_gas)
            .unwrap_or_default();

        let mtx = MonitoredTx {
            id,
            from: self.from,
            to,
            nonce,
            value,
            data,
            gas,
            gas_offset,
            gas_price,
            blob_sidecar: sidecar,
            blob_gas,
            blob_gas_price,
            gas_tip_cap,
            status: MonitoredTxStatus::Created,
            block_number: None,
            history: HashMap::new(),
            created_at: Default::default(),
            updated_at: Default::default(),
            estimate_gas: pinned_gas.is_none(),
        };

        self.storage
            .add(mtx)
            .await
            .context("failed to add tx to get monitored")?;
        self.metrics.inc_created();
        info!(monitored_tx = %id, "created");

        Ok(id)
    }

    /// Drops a monitored tx; typically called once the caller has consumed a
    /// finalized or failed result.
    pub async fn remove(&self, id: B256) -> Result<(), StorageError> {
        self.storage.remove(id).await
    }

    pub async fn remove_all(&self) -> Result<(), StorageError> {
        self.storage.empty().await
    }

    /// The current result of a monitored tx with the on-chain details of
    /// every attempt.
    pub async fn result(&self, id: B256) -> Result<MonitoredTxResult, anyhow::Error> {
        let mtx = self.storage.get(id).await?;
        self.build_result(mtx).await
    }

    /// Results of all monitored txs matching the provided statuses, ordered
    /// by creation. An empty filter selects every status.
    pub async fn results_by_status(
        &self,
        statuses: &[MonitoredTxStatus],
    ) -> Result<Vec<MonitoredTxResult>, anyhow::Error> {
        let mtxs = self.storage.get_by_status(statuses).await?;
        let mut results = Vec::with_capacity(mtxs.len());
        for mtx in mtxs {
            results.push(self.build_result(mtx).await?);
        }
        Ok(results)
    }

    async fn build_result(&self, mtx: MonitoredTx) -> Result<MonitoredTxResult, anyhow::Error> {
        let mut txs = HashMap::with_capacity(mtx.history.len());

        for tx_hash in mtx.history_hashes() {
            let tx = match self.l1.get_tx(tx_hash).await {
                Ok((tx, _)) => Some(tx),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };
            let receipt = match self.l1.get_receipt(tx_hash).await {
                Ok(receipt) => Some(receipt),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };
            let revert_message = match &tx {
                Some(tx) => match self.l1.get_revert_reason(tx.clone()).await {
                    Ok(reason) if !reason.is_empty() => Some(reason),
                    Ok(_) => None,
                    Err(e) if e.is_not_found() || e.is_execution_reverted() => None,
                    Err(e) => return Err(e.into()),
                },
                None => None,
            };

            txs.insert(
                tx_hash,
                TxResult {
                    tx,
                    receipt,
                    revert_message,
                },
            );
        }

        Ok(MonitoredTxResult {
            id: mtx.id,
            to: mtx.to,
            nonce: mtx.nonce,
            value: mtx.value,
            data: mtx.data,
            mined_at_block: mtx.block_number,
            status: mtx.status,
            txs,
        })
    }

    /// Starts the monitoring loop. Each cycle runs the submission sweep and
    /// then the two confirmation sweeps; a failing sweep is logged and the
    /// loop backs off briefly before trying again.
    pub fn start(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            // Without durable storage the mempool is the only record of what
            // was in flight before a restart.
            if manager.cfg.storage_path.is_empty() && manager.cfg.read_pending_l1_txs {
                if let Err(e) = manager.ingest_pending_l1_txs().await {
                    error!("failed to get pending txs from L1: {e:#}");
                }
            }

            loop {
                tokio::select! {
                    _ = manager.cancel_token.cancelled() => {
                        info!("monitoring loop stopped");
                        return;
                    }
                    _ = sleep(manager.cfg.frequency_to_monitor_txs) => {
                        if let Err(e) = manager.monitor_txs().await {
                            manager.log_error_and_wait("failed to monitor txs", e).await;
                        }
                        if let Err(e) = manager.wait_mined_txs_to_be_safe().await {
                            manager.log_error_and_wait("failed to wait mined tx to be safe", e).await;
                        }
                        if let Err(e) = manager.wait_safe_txs_to_be_finalized().await {
                            manager.log_error_and_wait("failed to wait safe tx to be finalized", e).await;
                        }
                    }
                }
            }
        })
    }

    /// Stops the monitoring loop; in-flight per-tx tasks finish their current
    /// step and exit.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    async fn log_error_and_wait(&self, msg: &str, err: anyhow::Error) {
        error!("{msg}: {err:#}");
        tokio::select! {
            _ = self.cancel_token.cancelled() => {}
            _ = sleep(FAILURE_INTERVAL) => {}
        }
    }

    /// One submission sweep: review nonces serially in creation order, then
    /// advance every pending tx in parallel.
    async fn monitor_txs(&self) -> Result<(), anyhow::Error> {
        let mtxs = self
            .storage
            .get_by_status(&[MonitoredTxStatus::Created, MonitoredTxStatus::Sent])
            .await
            .context("failed to get pending monitored txs")?;

        debug!("found {} monitored txs to process", mtxs.len());

        // Serialised nonce allocation: per sender, a counter seeded from the
        // pending nonce hands out consecutive nonces in created_at order.
        let mut iterations = Vec::with_capacity(mtxs.len());
        let mut next_nonces: HashMap<Address, u64> = HashMap::new();
        for mtx in mtxs {
            let mut iteration = MonitoredTxIteration::new(mtx);
            if iteration.needs_nonce_refresh(self.l1.as_ref()).await {
                let from = iteration.tx.from;
                let nonce = match next_nonces.get(&from) {
                    Some(nonce) => *nonce,
                    None => match self.l1.pending_nonce(from).await {
                        Ok(nonce) => nonce,
                        Err(e) => {
                            error!(
                                monitored_tx = %iteration.tx.id,
                                "failed to get pending nonce for {from}: {e}"
                            );
                            continue;
                        }
                    },
                };
                if nonce != iteration.tx.nonce {
                    info!(
                        monitored_tx = %iteration.tx.id,
                        "nonce updated from {} to {}", iteration.tx.nonce, nonce
                    );
                }
                iteration.tx.nonce = nonce;
                if let Err(e) = self.storage.update(iteration.tx.clone()).await {
                    error!(
                        monitored_tx = %iteration.tx.id,
                        "failed to update monitored tx nonce change: {e}"
                    );
                    continue;
                }
                next_nonces.insert(from, nonce + 1);
            }
            iterations.push(iteration);
        }

        let mut tasks = JoinSet::new();
        for iteration in iterations {
            let manager = self.clone();
            tasks.spawn(async move {
                tokio::select! {
                    _ = manager.cancel_token.cancelled() => {}
                    _ = manager.monitor_tx(iteration) => {}
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            // a panicking tx must not take the cycle down with it
            if let Err(e) = joined {
                error!("monitoring task ended abnormally: {e}");
            }
        }

        Ok(())
    }

    /// Advances a single monitored tx by one step: re-price, sign, broadcast,
    /// wait and collect the receipt. Any error aborts the cycle for this tx
    /// only; the next cycle picks it up again.
    async fn monitor_tx(&self, iteration: MonitoredTxIteration) {
        let MonitoredTxIteration {
            tx: mut mtx,
            confirmed,
            last_receipt,
        } = iteration;

        info!(monitored_tx = %mtx.id, from = %mtx.from, "processing");

        let mut last_receipt = last_receipt;
        if !confirmed {
            if mtx.status == MonitoredTxStatus::Sent {
                if let Err(e) = self.review_monitored_tx(&mut mtx).await {
                    error!(monitored_tx = %mtx.id, "failed to review monitored tx: {e:#}");
                    return;
                }
                if let Err(e) = self.storage.update(mtx.clone()).await {
                    error!(monitored_tx = %mtx.id, "failed to update monitored tx review change: {e}");
                    return;
                }
            }

            let signed_tx = match self.l1.sign(mtx.from, mtx.tx()).await {
                Ok(signed_tx) => signed_tx,
                Err(e) => {
                    error!(monitored_tx = %mtx.id, "failed to sign tx: {e}");
                    return;
                }
            };
            let tx_hash = *signed_tx.tx_hash();
            debug!(monitored_tx = %mtx.id, "signed tx {tx_hash} created");

            if mtx.add_to_history(tx_hash) {
                info!(monitored_tx = %mtx.id, "signed tx already existed in the history");
            } else if let Err(e) = self.storage.update(mtx.clone()).await {
                error!(monitored_tx = %mtx.id, "failed to update monitored tx history: {e}");
                return;
            }

            // only broadcast when the network does not know the tx yet
            match self.l1.get_tx(tx_hash).await {
                Err(e) if e.is_not_found() => {
                    debug!(monitored_tx = %mtx.id, "signed tx not found in the network");
                    if let Err(e) = self.l1.send(signed_tx).await {
                        warn!(monitored_tx = %mtx.id, "failed to send tx {tx_hash} to network: {e}");
                        return;
                    }
                    info!(monitored_tx = %mtx.id, "signed tx sent to the network: {tx_hash}");
                    self.metrics.inc_sent();
                }
                Ok(_) => {
                    warn!(monitored_tx = %mtx.id, "signed tx already found in the network");
                }
                Err(e) => {
                    error!(monitored_tx = %mtx.id, "failed to check tx {tx_hash} in the network: {e}");
                    return;
                }
            }

            if mtx.status == MonitoredTxStatus::Created {
                mtx.status = MonitoredTxStatus::Sent;
                debug!(monitored_tx = %mtx.id, "status changed to {}", mtx.status);
                if let Err(e) = self.storage.update(mtx.clone()).await {
                    error!(monitored_tx = %mtx.id, "failed to update monitored tx changes: {e}");
                    return;
                }
            }

            debug!(monitored_tx = %mtx.id, "waiting for signed tx to be mined...");
            match self.l1.wait_mined(tx_hash, self.cfg.wait_tx_to_be_mined).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(monitored_tx = %mtx.id, "signed tx not mined yet and timeout has been reached");
                    return;
                }
                Err(e) => {
                    warn!(monitored_tx = %mtx.id, "failed to wait for tx to be mined: {e}");
                    return;
                }
            }

            let deadline = tokio::time::Instant::now() + self.cfg.get_receipt_max_time;
            let receipt = loop {
                match self.l1.get_receipt(tx_hash).await {
                    Ok(receipt) => break receipt,
                    Err(e) => {
                        if tokio::time::Instant::now() >= deadline {
                            warn!(
                                monitored_tx = %mtx.id,
                                "failed to get tx receipt for tx {tx_hash} after {:?}: {e}",
                                self.cfg.get_receipt_max_time
                            );
                            return;
                        }
                        sleep(self.cfg.get_receipt_wait_interval).await;
                    }
                }
            };
            last_receipt = Some(receipt);
        }

        let Some(receipt) = last_receipt else {
            error!(monitored_tx = %mtx.id, "confirmed monitored tx has no cached receipt");
            return;
        };

        if receipt.status() {
            mtx.status = MonitoredTxStatus::Mined;
            mtx.block_number = receipt.block_number;
            self.metrics.inc_mined();
            self.metrics.observe_send_attempts(mtx.history.len());
            info!(monitored_tx = %mtx.id, "mined");
        } else {
            // an opaque revert may still resolve; check again next cycle
            if self.should_continue_to_monitor(&receipt).await {
                return;
            }
            mtx.status = MonitoredTxStatus::Failed;
            mtx.block_number = receipt.block_number;
            self.metrics.inc_failed();
            self.metrics.observe_send_attempts(mtx.history.len());
            info!(monitored_tx = %mtx.id, "failed");
        }

        if let Err(e) = self.storage.update(mtx.clone()).await {
            error!(monitored_tx = %mtx.id, "failed to update monitored tx: {e}");
        }
    }

    /// A failed receipt keeps being monitored only when the revert reason
    /// could not be established; every other outcome is final.
    async fn should_continue_to_monitor(&self, receipt: &TransactionReceipt) -> bool {
        if receipt.status() {
            return false;
        }

        let tx = match self.l1.get_tx(receipt.transaction_hash).await {
            Ok((tx, _)) => tx,
            Err(e) => {
                error!(
                    "failed to get tx {} when identified as failed: {e}",
                    receipt.transaction_hash
                );
                return false;
            }
        };

        match self.l1.get_revert_reason(tx).await {
            Err(e) if e.is_execution_reverted() => true,
            Ok(_) => false,
            Err(e) => {
                error!(
                    "failed to get revert message for failed tx {}: {e}",
                    receipt.transaction_hash
                );
                false
            }
        }
    }

    /// Refreshes fee fields against the current network view. A value is only
    /// ever replaced by a strictly larger one, so a re-priced replacement can
    /// actually displace the previous attempt.
    async fn review_monitored_tx(&self, mtx: &mut MonitoredTx) -> Result<(), anyhow::Error> {
        debug!(monitored_tx = %mtx.id, "reviewing");
        let is_blob_tx = mtx.blob_sidecar.is_some();

        let gas_price = self.suggested_gas_price().await?;
        if gas_price > mtx.gas_price {
            info!(
                monitored_tx = %mtx.id,
                "monitored tx (blob? {is_blob_tx}) gas price updated from {} to {}",
                mtx.gas_price, gas_price
            );
            mtx.gas_price = gas_price;
        }

        if is_blob_tx {
            let parent_header = self
                .l1
                .get_header(None)
                .await
                .context("failed to get parent header")?;
            let blob_fee_cap = blob_fee_from_parent(&parent_header);
            let gas_tip_cap = self
                .l1
                .suggested_gas_tip_cap()
                .await
                .context("failed to get gas tip cap")?;

            if gas_tip_cap > mtx.gas_tip_cap {
                info!(
                    monitored_tx = %mtx.id,
                    "monitored tx gas tip cap updated from {} to {}", mtx.gas_tip_cap, gas_tip_cap
                );
                mtx.gas_tip_cap = gas_tip_cap;
            }
            if blob_fee_cap > mtx.blob_gas_price {
                info!(
                    monitored_tx = %mtx.id,
                    "monitored tx blob fee cap updated from {} to {}",
                    mtx.blob_gas_price, blob_fee_cap
                );
                mtx.blob_gas_price = blob_fee_cap;
            }
        }

        if mtx.estimate_gas {
            let estimate = if is_blob_tx {
                self.l1
                    .estimate_gas_blob_tx(
                        mtx.from,
                        mtx.to,
                        mtx.gas_price,
                        mtx.gas_tip_cap,
                        mtx.value,
                        mtx.data.clone(),
                    )
                    .await
            } else {
                self.l1
                    .estimate_gas(mtx.from, mtx.to, mtx.value, mtx.data.clone())
                    .await
            };
            let gas = match estimate {
                Ok(gas) => gas,
                Err(e) => {
                    if self.cfg.forced_gas > 0 {
                        self.cfg.forced_gas
                    } else {
                        return Err(anyhow!("failed to estimate gas: {e}"));
                    }
                }
            };
            if gas > mtx.gas {
                info!(
                    monitored_tx = %mtx.id,
                    "monitored tx gas updated from {} to {}", mtx.gas, gas
                );
                mtx.gas = gas;
            }
        }

        Ok(())
    }

    /// Suggested gas price with the configured margin and cap applied.
    async fn suggested_gas_price(&self) -> Result<u128, anyhow::Error> {
        let gas_price = self
            .l1
            .suggested_gas_price()
            .await
            .context("failed to get suggested gas price")?;

        let mut adjusted = (gas_price as f64 * self.cfg.gas_price_margin_factor) as u128;
        if self.cfg.max_gas_price_limit > 0 {
            adjusted = adjusted.min(self.cfg.max_gas_price_limit as u128);
        }
        Ok(adjusted)
    }

    async fn wait_mined_txs_to_be_safe(&self) -> Result<(), anyhow::Error> {
        self.promote_deep_enough(
            MonitoredTxStatus::Mined,
            MonitoredTxStatus::Safe,
            self.cfg.safe_status_l1_number_of_blocks,
        )
        .await
    }

    async fn wait_safe_txs_to_be_finalized(&self) -> Result<(), anyhow::Error> {
        self.promote_deep_enough(
            MonitoredTxStatus::Safe,
            MonitoredTxStatus::Finalized,
            self.cfg.finalized_status_l1_number_of_blocks,
        )
        .await
    }

    /// Promotes every tx of `from_status` whose block is at or below the
    /// confirmation threshold: either a configured depth below the latest
    /// block, or the network's own safe/finalized block.
    async fn promote_deep_enough(
        &self,
        from_status: MonitoredTxStatus,
        to_status: MonitoredTxStatus,
        depth_override: u64,
    ) -> Result<(), anyhow::Error> {
        let mtxs = self.storage.get_by_status(&[from_status]).await?;
        debug!("found {} {from_status} monitored txs to process", mtxs.len());

        let threshold = if depth_override > 0 {
            let latest = self
                .l1
                .latest_block_number()
                .await
                .context("failed to get latest block number")?;
            latest.saturating_sub(depth_override)
        } else if to_status == MonitoredTxStatus::Safe {
            self.l1
                .safe_block_number()
                .await
                .context("failed to get safe block number")?
        } else {
            self.l1
                .finalized_block_number()
                .await
                .context("failed to get finalized block number")?
        };

        for mut mtx in mtxs {
            if mtx.block_number.is_some_and(|block| block <= threshold) {
                info!(monitored_tx = %mtx.id, "{to_status}");
                mtx.status = to_status;
                self.storage
                    .update(mtx)
                    .await
                    .with_context(|| format!("failed to update {from_status} monitored tx"))?;
                match to_status {
                    MonitoredTxStatus::Safe => self.metrics.inc_safe(),
                    MonitoredTxStatus::Finalized => self.metrics.inc_finalized(),
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Blocks until no monitored tx is pending, handing every tx that reaches
    /// `safe` or `failed` to the result handler. Txs found at `mined` are
    /// promoted to `safe` before the hand-off.
    pub async fn process_pending_monitored_txs<F>(&self, result_handler: F)
    where
        F: Fn(MonitoredTxResult),
    {
        let statuses = [
            MonitoredTxStatus::Created,
            MonitoredTxStatus::Sent,
            MonitoredTxStatus::Failed,
            MonitoredTxStatus::Mined,
        ];

        loop {
            let results = match self.results_by_status(&statuses).await {
                Ok(results) => results,
                Err(e) => {
                    // do not unlock the caller on a transient failure
                    error!("failed to get results by statuses: {e:#}");
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if results.is_empty() {
                return;
            }

            for result in results {
                if result.status == MonitoredTxStatus::Mined {
                    if let Err(e) = self.set_status_safe(result.id).await {
                        error!(monitored_tx = %result.id, "failed to set monitored tx as safe: {e}");
                        // handled again in the next round of the outer loop
                        continue;
                    }
                    info!(monitored_tx = %result.id, "monitored tx safe");
                    result_handler(result);
                    continue;
                }

                if result.status == MonitoredTxStatus::Failed {
                    result_handler(result);
                    continue;
                }

                // still in flight; wait for it to settle
                loop {
                    sleep(Duration::from_secs(1)).await;

                    let refreshed = match self.result(result.id).await {
                        Ok(refreshed) => refreshed,
                        Err(e) => {
                            error!(monitored_tx = %result.id, "failed to get monitored tx result: {e:#}");
                            continue;
                        }
                    };

                    if matches!(
                        refreshed.status,
                        MonitoredTxStatus::Mined | MonitoredTxStatus::Failed
                    ) {
                        break;
                    }
                    debug!(
                        monitored_tx = %result.id,
                        "waiting for monitored tx to settle, status: {}", refreshed.status
                    );
                }
            }
        }
    }

    async fn set_status_safe(&self, id: B256) -> Result<(), StorageError> {
        let mut mtx = self.storage.get(id).await?;
        mtx.status = MonitoredTxStatus::Safe;
        self.storage.update(mtx).await
    }

    /// Packs raw bytes into a blob, 31 bytes per field element.
    pub fn encode_blob_data(&self, data: &[u8]) -> Result<Blob, anyhow::Error> {
        blob::encode_blob_data(data)
    }

    /// Builds the sidecar (commitments and proofs) for a set of blobs.
    pub fn make_blob_sidecar(
        &self,
        blobs: Vec<Blob>,
    ) -> Result<BlobTransactionSidecar, anyhow::Error> {
        kzg::make_blob_sidecar(blobs)
    }

    /// Seeds the store with the managed sender's mempool transactions so a
    /// restarted in-memory engine picks up what it had in flight.
    async fn ingest_pending_l1_txs(&self) -> Result<(), anyhow::Error> {
        let client = JsonRpcClient::new_with_timeout(&self.cfg.rpc_url, Duration::from_secs(30))?;
        let response = client.call_method("txpool_content", vec![]).await?;
        let content: TxPoolContent =
            serde_json::from_value(response).context("failed to decode txpool content")?;

        let pending = content
            .pending
            .get(&self.from)
            .map(|by_nonce| by_nonce.values())
            .into_iter()
            .flatten();

        let mut found = 0usize;
        for pool_tx in pending {
            if pool_tx.from != self.from {
                continue;
            }

            let nonce = parse_quantity_u64(&pool_tx.nonce).context("invalid pool tx nonce")?;
            let value = U256::from_str(&pool_tx.value).map_err(|e| anyhow!("invalid pool tx value: {e}"))?;
            let gas = parse_quantity_u64(&pool_tx.gas).context("invalid pool tx gas")?;
            let gas_price =
                parse_quantity_u128(&pool_tx.gas_price).context("invalid pool tx gas price")?;
            let data = pool_tx.input.clone();

            let id = monitored_tx::fingerprint(pool_tx.to, nonce, value, &data, None);
            let mtx = MonitoredTx {
                id,
                from: pool_tx.from,
                to: pool_tx.to,
                nonce,
                value,
                data,
                gas,
                gas_price,
                status: MonitoredTxStatus::Sent,
                estimate_gas: true,
                ..Default::default()
            };

            if let Err(e) = self.storage.add(mtx).await {
                error!("failed to add pending tx to storage: {e}");
            } else {
                found += 1;
            }
        }

        info!("{found} L1 pending txs found");
        Ok(())
    }
}

/// Blob base fee the next block will charge, derived from the parent header.
/// Headers predating EIP-4844 price blobs at the minimum.
fn blob_fee_from_parent(parent_header: &Header) -> u128 {
    match (
        parent_header.excess_blob_gas(),
        parent_header.blob_gas_used(),
    ) {
        (Some(excess_blob_gas), Some(blob_gas_used)) => {
            calc_blob_gasprice(calc_excess_blob_gas(excess_blob_gas, blob_gas_used))
        }
        _ => calc_blob_gasprice(0),
    }
}

#[derive(Debug, Deserialize)]
struct TxPoolContent {
    #[serde(default)]
    pending: HashMap<Address, HashMap<String, PooledL1Tx>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PooledL1Tx {
    from: Address,
    to: Option<Address>,
    nonce: String,
    gas_price: String,
    gas: String,
    value: String,
    input: Bytes,
}

fn parse_quantity_u64(raw: &str) -> Result<u64, anyhow::Error> {
    let value = U256::from_str(raw).map_err(|e| anyhow!("invalid quantity {raw}: {e}"))?;
    u64::try_from(value).map_err(|_| anyhow!("quantity {raw} overflows u64"))
}

fn parse_quantity_u128(raw: &str) -> Result<u128, anyhow::Error> {
    let value = U256::from_str(raw).map_err(|e| anyhow!("invalid quantity {raw}: {e}"))?;
    u128::try_from(value).map_err(|_| anyhow!("quantity {raw} overflows u128"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum_l1::{L1ClientError, MockL1Client};
    use alloy::{
        consensus::{
            transaction::Recovered, Eip658Value, Receipt, ReceiptEnvelope, ReceiptWithBloom,
            SignableTransaction, Signed, TxEnvelope, TxLegacy, TypedTransaction,
        },
        primitives::{address, Signature, TxKind},
        rpc::types::Transaction,
    };

    fn sender() -> Address {
        address!("0x1000000000000000000000000000000000000001")
    }

    fn recipient() -> Address {
        address!("0x0000000000000000000000000000000000000001")
    }

    fn dummy_signature() -> Signature {
        Signature::new(U256::from(1), U256::from(1), false)
    }

    fn dummy_sign(tx: TypedTransaction) -> TxEnvelope {
        match tx {
            TypedTransaction::Legacy(tx) => TxEnvelope::Legacy(tx.into_signed(dummy_signature())),
            TypedTransaction::Eip4844(tx) => {
                TxEnvelope::Eip4844(tx.into_signed(dummy_signature()))
            }
            other => panic!("unexpected tx type: {other:?}"),
        }
    }

    fn dummy_rpc_tx(tx_hash: B256) -> Transaction {
        let tx = TxLegacy {
            chain_id: None,
            nonce: 0,
            gas_price: 0,
            gas_limit: 0,
            to: TxKind::Call(recipient()),
            value: U256::ZERO,
            input: Bytes::new(),
        };
        let envelope = TxEnvelope::Legacy(Signed::new_unchecked(tx, dummy_signature(), tx_hash));
        Transaction {
            inner: Recovered::new_unchecked(envelope, sender()),
            block_hash: None,
            block_number: Some(1),
            transaction_index: None,
            effective_gas_price: None,
        }
    }

    fn make_receipt(tx_hash: B256, success: bool, block_number: Option<u64>) -> TransactionReceipt {
        TransactionReceipt {
            inner: ReceiptEnvelope::Legacy(ReceiptWithBloom {
                receipt: Receipt {
                    status: Eip658Value::Eip658(success),
                    cumulative_gas_used: 0,
                    logs: vec![],
                },
                logs_bloom: Default::default(),
            }),
            transaction_hash: tx_hash,
            transaction_index: Some(0),
            block_hash: block_number.map(|_| B256::ZERO),
            block_number,
            gas_used: 0,
            effective_gas_price: 0,
            blob_gas_used: None,
            blob_gas_price: None,
            from: sender(),
            to: None,
            contract_address: None,
        }
    }

    fn test_manager(cfg: Config, l1: MockL1Client) -> (Arc<Manager>, SharedStorage) {
        let storage: SharedStorage = Arc::new(MemoryStorage::new(None).unwrap());
        let manager = Arc::new(Manager::with_storage(
            cfg,
            sender(),
            Arc::new(l1),
            storage.clone(),
            Arc::new(Metrics::new()),
            CancellationToken::new(),
        ));
        (manager, storage)
    }

    #[tokio::test]
    async fn monitored_tx_goes_from_created_through_sent_to_mined() {
        let mut l1 = MockL1Client::new();
        l1.expect_pending_nonce().returning(|_| Ok(7));
        l1.expect_suggested_gas_price().returning(|| Ok(100));
        l1.expect_estimate_gas().returning(|_, _, _, _| Ok(21_000));
        l1.expect_sign().returning(|_, tx| Ok(dummy_sign(tx)));
        l1.expect_get_tx().returning(|_| Err(L1ClientError::NotFound));
        l1.expect_send().returning(|_| Ok(()));
        l1.expect_wait_mined().returning(|_, _| Ok(true));
        l1.expect_get_receipt()
            .returning(|tx_hash| Ok(make_receipt(tx_hash, true, Some(10))));

        let (manager, storage) = test_manager(Config::default(), l1);

        let id = manager
            .add(Some(recipient()), U256::from(1), Bytes::new(), 0, None)
            .await
            .unwrap();
        assert_eq!(
            storage.get(id).await.unwrap().status,
            MonitoredTxStatus::Created
        );

        manager.monitor_txs().await.unwrap();

        let mtx = storage.get(id).await.unwrap();
        assert_eq!(mtx.status, MonitoredTxStatus::Mined);
        assert_eq!(mtx.block_number, Some(10));
        assert_eq!(mtx.nonce, 7);
        assert_eq!(mtx.gas, 21_000);
        assert_eq!(mtx.history.len(), 1);
    }

    #[tokio::test]
    async fn estimation_failure_falls_back_to_forced_gas() {
        let mut l1 = MockL1Client::new();
        l1.expect_pending_nonce().returning(|_| Ok(0));
        l1.expect_suggested_gas_price().returning(|| Ok(100));
        l1.expect_estimate_gas()
            .returning(|_, _, _, _| Err(L1ClientError::Other("estimation failed".into())));

        let cfg = Config {
            forced_gas: 30_000,
            ..Default::default()
        };
        let (manager, storage) = test_manager(cfg, l1);

        let id = manager
            .add(Some(recipient()), U256::from(1), Bytes::new(), 0, None)
            .await
            .unwrap();

        let mtx = storage.get(id).await.unwrap();
        assert_eq!(mtx.gas, 30_000);
        assert!(mtx.estimate_gas);
    }

    #[tokio::test]
    async fn estimation_failure_without_forced_gas_is_surfaced() {
        let mut l1 = MockL1Client::new();
        l1.expect_pending_nonce().returning(|_| Ok(0));
        l1.expect_suggested_gas_price().returning(|| Ok(100));
        l1.expect_estimate_gas()
            .returning(|_, _, _, _| Err(L1ClientError::Other("estimation failed".into())));

        let (manager, storage) = test_manager(Config::default(), l1);

        let result = manager
            .add(Some(recipient()), U256::from(1), Bytes::new(), 0, None)
            .await;
        assert!(result.is_err());
        assert!(storage.get_by_status(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pinned_gas_disables_estimation() {
        let mut l1 = MockL1Client::new();
        l1.expect_pending_nonce().returning(|_| Ok(0));
        l1.expect_suggested_gas_price().returning(|| Ok(100));
        // no estimate_gas expectation: calling it would fail the test

        let (manager, storage) = test_manager(Config::default(), l1);

        let id = manager
            .add_with_gas(Some(recipient()), U256::from(1), Bytes::new(), 0, None, 50_000)
            .await
            .unwrap();

        let mtx = storage.get(id).await.unwrap();
        assert_eq!(mtx.gas, 50_000);
        assert!(!mtx.estimate_gas);
    }

    #[tokio::test]
    async fn nonce_allocation_is_gap_free_per_sender() {
        let mut l1 = MockL1Client::new();
        l1.expect_suggested_gas_price().returning(|| Ok(100));
        l1.expect_estimate_gas().returning(|_, _, _, _| Ok(21_000));
        // seeded once per cycle per sender; also used for the provisional
        // nonce of each add
        l1.expect_pending_nonce().returning(|_| Ok(7));
        // fail the submission fast so the cycle only allocates nonces
        l1.expect_sign()
            .returning(|from, _| Err(L1ClientError::PrivateKeyNotFound(from)));

        let (manager, storage) = test_manager(Config::default(), l1);

        manager
            .add(Some(recipient()), U256::from(1), Bytes::from(vec![1]), 0, None)
            .await
            .unwrap();
        manager
            .add(Some(recipient()), U256::from(1), Bytes::from(vec![2]), 0, None)
            .await
            .unwrap();

        manager.monitor_txs().await.unwrap();

        let txs = storage.get_by_status(&[]).await.unwrap();
        assert_eq!(txs.len(), 2);
        // creation order receives consecutive nonces from the pending nonce
        assert_eq!(txs[0].nonce, 7);
        assert_eq!(txs[1].nonce, 8);
    }

    #[tokio::test]
    async fn duplicate_add_of_identical_payload_is_rejected() {
        let mut l1 = MockL1Client::new();
        l1.expect_pending_nonce().returning(|_| Ok(7));
        l1.expect_suggested_gas_price().returning(|| Ok(100));
        l1.expect_estimate_gas().returning(|_, _, _, _| Ok(21_000));

        let (manager, storage) = test_manager(Config::default(), l1);

        let payload = Bytes::from(vec![1, 2, 3]);
        manager
            .add(Some(recipient()), U256::from(1), payload.clone(), 0, None)
            .await
            .unwrap();
        let err = manager
            .add(Some(recipient()), U256::from(1), payload, 0, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::AlreadyExists)
        ));
        assert_eq!(storage.get_by_status(&[]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_failure_leaves_the_status_untouched() {
        let mut l1 = MockL1Client::new();
        l1.expect_pending_nonce().returning(|_| Ok(0));
        l1.expect_suggested_gas_price().returning(|| Ok(100));
        l1.expect_estimate_gas().returning(|_, _, _, _| Ok(21_000));
        l1.expect_sign().returning(|_, tx| Ok(dummy_sign(tx)));
        l1.expect_get_tx().returning(|_| Err(L1ClientError::NotFound));
        l1.expect_send()
            .returning(|_| Err(L1ClientError::Other("connection refused".into())));

        let (manager, storage) = test_manager(Config::default(), l1);

        let id = manager
            .add(Some(recipient()), U256::from(1), Bytes::new(), 0, None)
            .await
            .unwrap();
        manager.monitor_txs().await.unwrap();

        let mtx = storage.get(id).await.unwrap();
        assert_eq!(mtx.status, MonitoredTxStatus::Created);
        // the attempt is on record even though the broadcast failed
        assert_eq!(mtx.history.len(), 1);
    }

    #[tokio::test]
    async fn decoded_revert_terminates_the_tx_at_failed() {
        let mut l1 = MockL1Client::new();
        let old_attempt = B256::with_last_byte(0xaa);
        // history scan: the old attempt was mined and reverted
        l1.expect_check_tx_was_mined()
            .returning(|tx_hash| Ok((true, Some(make_receipt(tx_hash, false, Some(12))))));
        l1.expect_pending_nonce().returning(|_| Ok(9));
        l1.expect_suggested_gas_price().returning(|| Ok(100));
        l1.expect_estimate_gas().returning(|_, _, _, _| Ok(21_000));
        l1.expect_sign().returning(|_, tx| Ok(dummy_sign(tx)));
        // the probe of the fresh attempt misses, the failure check hits
        l1.expect_get_tx()
            .times(1)
            .returning(|_| Err(L1ClientError::NotFound));
        l1.expect_get_tx()
            .returning(|tx_hash| Ok((dummy_rpc_tx(tx_hash), false)));
        l1.expect_send().returning(|_| Ok(()));
        l1.expect_wait_mined().returning(|_, _| Ok(true));
        l1.expect_get_receipt()
            .returning(|tx_hash| Ok(make_receipt(tx_hash, false, Some(12))));
        l1.expect_get_revert_reason()
            .returning(|_| Ok("execution reverted: X".to_string()));

        let (manager, storage) = test_manager(Config::default(), l1);

        let mut mtx = MonitoredTx {
            id: B256::with_last_byte(1),
            from: sender(),
            to: Some(recipient()),
            nonce: 3,
            gas: 21_000,
            gas_price: 50,
            status: MonitoredTxStatus::Created,
            estimate_gas: true,
            ..Default::default()
        };
        mtx.add_to_history(old_attempt);
        storage.add(mtx.clone()).await.unwrap();
        mtx.status = MonitoredTxStatus::Sent;
        storage.update(mtx).await.unwrap();

        manager.monitor_txs().await.unwrap();

        let mtx = storage.get(B256::with_last_byte(1)).await.unwrap();
        assert_eq!(mtx.status, MonitoredTxStatus::Failed);
        assert_eq!(mtx.block_number, Some(12));
        // the consumed nonce was re-assigned before the fresh attempt
        assert_eq!(mtx.nonce, 9);
    }

    #[tokio::test]
    async fn opaque_revert_keeps_the_tx_monitored() {
        let mut l1 = MockL1Client::new();
        l1.expect_check_tx_was_mined()
            .returning(|tx_hash| Ok((true, Some(make_receipt(tx_hash, false, Some(12))))));
        l1.expect_pending_nonce().returning(|_| Ok(9));
        l1.expect_suggested_gas_price().returning(|| Ok(100));
        l1.expect_estimate_gas().returning(|_, _, _, _| Ok(21_000));
        l1.expect_sign().returning(|_, tx| Ok(dummy_sign(tx)));
        l1.expect_get_tx()
            .times(1)
            .returning(|_| Err(L1ClientError::NotFound));
        l1.expect_get_tx()
            .returning(|tx_hash| Ok((dummy_rpc_tx(tx_hash), false)));
        l1.expect_send().returning(|_| Ok(()));
        l1.expect_wait_mined().returning(|_, _| Ok(true));
        l1.expect_get_receipt()
            .returning(|tx_hash| Ok(make_receipt(tx_hash, false, Some(12))));
        // transport could not establish a reason; the tx may still resolve
        l1.expect_get_revert_reason()
            .returning(|_| Err(L1ClientError::ExecutionReverted));

        let (manager, storage) = test_manager(Config::default(), l1);

        let mut mtx = MonitoredTx {
            id: B256::with_last_byte(2),
            from: sender(),
            to: Some(recipient()),
            nonce: 3,
            gas: 21_000,
            gas_price: 50,
            status: MonitoredTxStatus::Created,
            estimate_gas: true,
            ..Default::default()
        };
        mtx.add_to_history(B256::with_last_byte(0xbb));
        storage.add(mtx.clone()).await.unwrap();
        mtx.status = MonitoredTxStatus::Sent;
        storage.update(mtx).await.unwrap();

        manager.monitor_txs().await.unwrap();

        let mtx = storage.get(B256::with_last_byte(2)).await.unwrap();
        assert_eq!(mtx.status, MonitoredTxStatus::Sent);
        assert_eq!(mtx.block_number, None);
    }

    #[tokio::test]
    async fn mined_txs_promote_to_safe_exactly_at_the_threshold() {
        let mut l1 = MockL1Client::new();
        l1.expect_latest_block_number().returning(|| Ok(115));

        let cfg = Config {
            safe_status_l1_number_of_blocks: 10,
            ..Default::default()
        };
        let (manager, storage) = test_manager(cfg, l1);

        // threshold = 115 - 10 = 105
        for (last_byte, block) in [(1u8, 100u64), (2, 105), (3, 106)] {
            let mut mtx = MonitoredTx {
                id: B256::with_last_byte(last_byte),
                from: sender(),
                gas: 21_000,
                estimate_gas: true,
                ..Default::default()
            };
            storage.add(mtx.clone()).await.unwrap();
            mtx.status = MonitoredTxStatus::Mined;
            mtx.block_number = Some(block);
            storage.update(mtx).await.unwrap();
        }

        manager.wait_mined_txs_to_be_safe().await.unwrap();

        let statuses: Vec<_> = storage
            .get_by_status(&[])
            .await
            .unwrap()
            .into_iter()
            .map(|tx| (tx.id, tx.status))
            .collect();
        assert!(statuses.contains(&(B256::with_last_byte(1), MonitoredTxStatus::Safe)));
        assert!(statuses.contains(&(B256::with_last_byte(2), MonitoredTxStatus::Safe)));
        assert!(statuses.contains(&(B256::with_last_byte(3), MonitoredTxStatus::Mined)));
    }

    #[tokio::test]
    async fn safe_txs_promote_to_finalized_with_the_network_block() {
        let mut l1 = MockL1Client::new();
        l1.expect_finalized_block_number().returning(|| Ok(50));

        let (manager, storage) = test_manager(Config::default(), l1);

        let mut mtx = MonitoredTx {
            id: B256::with_last_byte(4),
            from: sender(),
            gas: 21_000,
            estimate_gas: true,
            ..Default::default()
        };
        storage.add(mtx.clone()).await.unwrap();
        mtx.status = MonitoredTxStatus::Safe;
        mtx.block_number = Some(50);
        storage.update(mtx).await.unwrap();

        manager.wait_safe_txs_to_be_finalized().await.unwrap();

        let mtx = storage.get(B256::with_last_byte(4)).await.unwrap();
        assert_eq!(mtx.status, MonitoredTxStatus::Finalized);
    }

    #[tokio::test]
    async fn results_by_status_reports_history_details() {
        let mut l1 = MockL1Client::new();
        let attempt = B256::with_last_byte(0xcc);
        l1.expect_get_tx()
            .returning(|tx_hash| Ok((dummy_rpc_tx(tx_hash), false)));
        l1.expect_get_receipt()
            .returning(|tx_hash| Ok(make_receipt(tx_hash, true, Some(10))));
        l1.expect_get_revert_reason().returning(|_| Ok(String::new()));

        let (manager, storage) = test_manager(Config::default(), l1);

        let mut mtx = MonitoredTx {
            id: B256::with_last_byte(5),
            from: sender(),
            to: Some(recipient()),
            gas: 21_000,
            estimate_gas: true,
            ..Default::default()
        };
        mtx.add_to_history(attempt);
        storage.add(mtx.clone()).await.unwrap();
        mtx.status = MonitoredTxStatus::Mined;
        mtx.block_number = Some(10);
        storage.update(mtx).await.unwrap();

        let results = manager
            .results_by_status(&[MonitoredTxStatus::Mined])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].mined_at_block, Some(10));
        let tx_result = results[0].txs.get(&attempt).unwrap();
        assert!(tx_result.tx.is_some());
        assert!(tx_result.receipt.is_some());
        assert!(tx_result.revert_message.is_none());
    }
}
