use alloy::{
    consensus::{
        BlobTransactionSidecar, BlobTransactionSidecarVariant, SignableTransaction, TxEip4844,
        TxEip4844Variant, TxEip4844WithSidecar, TxLegacy, TypedTransaction,
    },
    eips::eip4844::DATA_GAS_PER_BLOB,
    primitives::{Address, Bytes, TxKind, B256, U256},
    rpc::types::{Transaction, TransactionReceipt},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a monitored transaction.
///
/// The status only ever advances along
/// `created -> sent -> {mined -> safe -> finalized} | failed`; the single
/// allowed repetition is `sent -> sent` after a re-pricing attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitoredTxStatus {
    /// Added to the storage, no attempt broadcast yet.
    #[default]
    Created,
    /// At least one signed attempt was handed to the network.
    Sent,
    /// Mined and reverted with a reason that cannot be recovered from.
    Failed,
    /// Mined with a successful receipt.
    #[serde(alias = "confirmed")]
    Mined,
    /// Mined deep enough to be considered safe.
    Safe,
    /// Mined deep enough to be considered final.
    Finalized,
}

impl MonitoredTxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Mined => "mined",
            Self::Safe => "safe",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for MonitoredTxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitoredTxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            // "confirmed" is the historical literal for mined rows.
            "mined" | "confirmed" => Ok(Self::Mined),
            "safe" => Ok(Self::Safe),
            "finalized" => Ok(Self::Finalized),
            other => Err(format!("unknown monitored tx status: {other}")),
        }
    }
}

/// A monitored transaction: the information needed to build and sign an L1
/// transaction, plus everything required to track it until it is finalized.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoredTx {
    /// Content-addressed id, unique across the storage.
    pub id: B256,
    /// Sender; selects the signing key.
    pub from: Address,
    /// Receiver; `None` denotes contract creation.
    pub to: Option<Address>,
    pub nonce: u64,
    pub value: U256,
    pub data: Bytes,
    /// Gas limit; `gas_offset` is added on every build.
    pub gas: u64,
    pub gas_offset: u64,
    /// Legacy gas price, and the fee cap for blob transactions.
    pub gas_price: u128,
    pub blob_sidecar: Option<BlobTransactionSidecar>,
    pub blob_gas: u64,
    pub blob_gas_price: u128,
    pub gas_tip_cap: u128,
    pub status: MonitoredTxStatus,
    /// Block of the successful receipt; tracks re-orged rows too.
    pub block_number: Option<u64>,
    /// Hashes of every signed attempt handed to the network.
    pub history: HashMap<B256, bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When false the caller pinned `gas` and the reviewer must not touch it.
    pub estimate_gas: bool,
}

impl MonitoredTx {
    /// Builds the unsigned transaction for the current field values.
    ///
    /// Blob transactions use `gas_price` as the fee cap and carry the sidecar;
    /// everything else becomes a legacy transaction. The chain id is stamped
    /// by the signer.
    pub fn tx(&self) -> TypedTransaction {
        match &self.blob_sidecar {
            None => TypedTransaction::Legacy(TxLegacy {
                chain_id: None,
                nonce: self.nonce,
                gas_price: self.gas_price,
                gas_limit: self.gas + self.gas_offset,
                to: self.to.map_or(TxKind::Create, TxKind::Call),
                value: self.value,
                input: self.data.clone(),
            }),
            Some(sidecar) => {
                let tx = TxEip4844 {
                    chain_id: 0,
                    nonce: self.nonce,
                    gas_limit: self.gas + self.gas_offset,
                    max_fee_per_gas: self.gas_price,
                    max_priority_fee_per_gas: self.gas_tip_cap,
                    to: self.to.unwrap_or_default(),
                    value: self.value,
                    access_list: Default::default(),
                    blob_versioned_hashes: sidecar.versioned_hashes().collect(),
                    max_fee_per_blob_gas: self.blob_gas_price,
                    input: self.data.clone(),
                };
                TypedTransaction::Eip4844(TxEip4844Variant::TxEip4844WithSidecar(
                    TxEip4844WithSidecar::from_tx_and_sidecar(
                        tx,
                        BlobTransactionSidecarVariant::Eip4844(sidecar.clone()),
                    ),
                ))
            }
        }
    }

    /// Records a signed attempt. Returns true when the hash was already
    /// present, in which case the history is left untouched.
    pub fn add_to_history(&mut self, tx_hash: B256) -> bool {
        if self.history.contains_key(&tx_hash) {
            return true;
        }
        self.history.insert(tx_hash, true);
        false
    }

    pub fn history_hashes(&self) -> Vec<B256> {
        self.history.keys().copied().collect()
    }

    /// Total blob gas consumed by the sidecar, zero for non-blob txs.
    pub fn sidecar_blob_gas(sidecar: &BlobTransactionSidecar) -> u64 {
        sidecar.blobs.len() as u64 * DATA_GAS_PER_BLOB
    }
}

/// Derives the content-addressed id of a monitored tx from the unsigned
/// transaction shape and the nonce chosen at creation. Re-adding the same
/// payload yields the same id, which is what the at-most-once insert keys on.
pub fn fingerprint(
    to: Option<Address>,
    nonce: u64,
    value: U256,
    data: &Bytes,
    sidecar: Option<&BlobTransactionSidecar>,
) -> B256 {
    match sidecar {
        None => TxLegacy {
            chain_id: None,
            nonce,
            gas_price: 0,
            gas_limit: 0,
            to: to.map_or(TxKind::Create, TxKind::Call),
            value,
            input: data.clone(),
        }
        .signature_hash(),
        Some(sidecar) => TxEip4844 {
            chain_id: 0,
            nonce,
            gas_limit: 0,
            max_fee_per_gas: 0,
            max_priority_fee_per_gas: 0,
            to: to.unwrap_or_default(),
            value,
            access_list: Default::default(),
            blob_versioned_hashes: sidecar.versioned_hashes().collect(),
            max_fee_per_blob_gas: 0,
            input: data.clone(),
        }
        .signature_hash(),
    }
}

/// Execution outcome of one monitored tx, with the details of every signed
/// attempt that was broadcast for it.
#[derive(Debug)]
pub struct MonitoredTxResult {
    pub id: B256,
    pub to: Option<Address>,
    pub nonce: u64,
    pub value: U256,
    pub data: Bytes,
    pub mined_at_block: Option<u64>,
    pub status: MonitoredTxStatus,
    pub txs: HashMap<B256, TxResult>,
}

/// On-chain view of a single signed attempt.
#[derive(Debug)]
pub struct TxResult {
    pub tx: Option<Transaction>,
    pub receipt: Option<TransactionReceipt>,
    pub revert_message: Option<String>,
}
