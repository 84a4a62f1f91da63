use super::monitored_tx::{MonitoredTx, MonitoredTxStatus};
use crate::ethereum_l1::L1Client;
use alloy::{network::ReceiptResponse, rpc::types::TransactionReceipt};
use tracing::debug;

/// Per-cycle view of one monitored tx: the row itself plus what the history
/// scan learned about it before dispatch.
pub(crate) struct MonitoredTxIteration {
    pub tx: MonitoredTx,
    /// One of the history hashes already has a successful receipt.
    pub confirmed: bool,
    /// The receipt of the last mined history hash, cached so the submission
    /// step does not fetch it again.
    pub last_receipt: Option<TransactionReceipt>,
}

impl MonitoredTxIteration {
    pub fn new(tx: MonitoredTx) -> Self {
        Self {
            tx,
            confirmed: false,
            last_receipt: None,
        }
    }

    /// Decides whether the nonce must be re-assigned this cycle.
    ///
    /// A tx that was never sent always needs a nonce. For a sent tx the
    /// history is inspected: a successful receipt marks the tx confirmed and
    /// keeps the nonce; if every attempt was mined and all of them failed,
    /// the nonce was consumed by a failed attempt and must be refreshed; as
    /// long as any attempt is still unknown to the network we wait, because
    /// it may yet be mined.
    pub async fn needs_nonce_refresh(&mut self, l1: &dyn L1Client) -> bool {
        if self.tx.status == MonitoredTxStatus::Created {
            return true;
        }

        let mut confirmed = false;
        let mut has_failed_receipts = false;
        let mut all_history_txs_were_mined = true;
        let mut last_receipt_checked = None;

        for tx_hash in self.tx.history_hashes() {
            let (mined, receipt) = match l1.check_tx_was_mined(tx_hash).await {
                Ok(result) => result,
                Err(e) => {
                    debug!(
                        monitored_tx = %self.tx.id,
                        "failed to check if tx {tx_hash} was mined: {e}"
                    );
                    continue;
                }
            };

            if !mined {
                all_history_txs_were_mined = false;
                continue;
            }
            let Some(receipt) = receipt else {
                continue;
            };

            let successful = receipt.status();
            last_receipt_checked = Some(receipt);

            if successful {
                confirmed = true;
                break;
            }

            confirmed = false;
            has_failed_receipts = true;
        }

        self.confirmed = confirmed;
        self.last_receipt = last_receipt_checked;

        !confirmed && has_failed_receipts && all_history_txs_were_mined
    }
}
