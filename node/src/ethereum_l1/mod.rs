pub mod config;
mod error;
mod execution_layer;

pub use error::L1ClientError;
pub use execution_layer::ExecutionLayer;

use alloy::{
    consensus::{TxEnvelope, TypedTransaction},
    primitives::{Address, Bytes, B256, U256},
    rpc::types::{Header, Transaction, TransactionReceipt},
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

/// The L1 operations the monitored transaction engine consumes.
///
/// [`L1ClientError::NotFound`] is always a domain value ("the network does
/// not know this entity"), never a transport failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait L1Client: Send + Sync {
    /// Fetches a transaction. The boolean is true while the tx is still
    /// pending in the mempool.
    async fn get_tx(&self, tx_hash: B256) -> Result<(Transaction, bool), L1ClientError>;

    async fn get_receipt(&self, tx_hash: B256) -> Result<TransactionReceipt, L1ClientError>;

    /// Waits until the tx is mined or the timeout expires. A timeout is not
    /// an error; it returns `Ok(false)` ("try again on the next cycle").
    async fn wait_mined(&self, tx_hash: B256, timeout: Duration) -> Result<bool, L1ClientError>;

    /// Broadcasts a signed transaction.
    async fn send(&self, tx: TxEnvelope) -> Result<(), L1ClientError>;

    async fn current_nonce(&self, account: Address) -> Result<u64, L1ClientError>;

    /// Next nonce including mempool transactions.
    async fn pending_nonce(&self, account: Address) -> Result<u64, L1ClientError>;

    async fn suggested_gas_price(&self) -> Result<u128, L1ClientError>;

    async fn suggested_gas_tip_cap(&self) -> Result<u128, L1ClientError>;

    async fn estimate_gas(
        &self,
        from: Address,
        to: Option<Address>,
        value: U256,
        data: Bytes,
    ) -> Result<u64, L1ClientError>;

    async fn estimate_gas_blob_tx(
        &self,
        from: Address,
        to: Option<Address>,
        gas_fee_cap: u128,
        gas_tip_cap: u128,
        value: U256,
        data: Bytes,
    ) -> Result<u64, L1ClientError>;

    /// Returns `(false, None)` when the tx is unknown or still pending,
    /// `(true, receipt)` once it is mined.
    async fn check_tx_was_mined(
        &self,
        tx_hash: B256,
    ) -> Result<(bool, Option<TransactionReceipt>), L1ClientError>;

    /// Signs with the sender's registered key, stamping the chain id.
    async fn sign(
        &self,
        sender: Address,
        tx: TypedTransaction,
    ) -> Result<TxEnvelope, L1ClientError>;

    /// Replays a failed tx at its mined block and decodes the revert reason.
    /// Returns [`L1ClientError::ExecutionReverted`] when no reason could be
    /// extracted.
    async fn get_revert_reason(&self, tx: Transaction) -> Result<String, L1ClientError>;

    async fn latest_block_number(&self) -> Result<u64, L1ClientError>;

    /// The network's own notion of the safe block.
    async fn safe_block_number(&self) -> Result<u64, L1ClientError>;

    /// The network's own notion of the finalized block.
    async fn finalized_block_number(&self) -> Result<u64, L1ClientError>;

    /// Header by number, latest when `None`. Source of the blob-fee inputs.
    async fn get_header(&self, number: Option<u64>) -> Result<Header, L1ClientError>;
}

pub type SharedL1Client = Arc<dyn L1Client>;
