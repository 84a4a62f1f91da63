mod memory;
mod models;
mod sql;

pub use memory::MemoryStorage;
pub use sql::SqlStorage;

use crate::manager::monitored_tx::{MonitoredTx, MonitoredTxStatus};
use alloy::primitives::B256;
use async_trait::async_trait;
use std::sync::Arc;

/// The error type for monitored transaction storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The referenced transaction does not exist.
    #[error("not found")]
    NotFound,
    /// A transaction with the same id is already persisted.
    #[error("already exists")]
    AlreadyExists,
    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    /// History, sidecar or persistence-file (de)serialization failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The persistence file could not be read or written.
    #[error("persistence file error: {0}")]
    Io(#[from] std::io::Error),
    /// A persisted row holds a value the domain model cannot parse.
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Persistence contract for monitored transactions.
///
/// Implementations must tolerate many concurrent writers and stamp
/// `created_at` / `updated_at` themselves. `get_by_status` results are
/// ordered by `created_at` ascending (ties broken by id); the nonce
/// allocator relies on that ordering.
#[async_trait]
pub trait TxStorage: Send + Sync {
    /// Persists a new monitored tx. Fails with [`StorageError::AlreadyExists`]
    /// when the id is already present.
    async fn add(&self, tx: MonitoredTx) -> Result<(), StorageError>;

    /// Deletes a monitored tx by id.
    async fn remove(&self, id: B256) -> Result<(), StorageError>;

    /// Loads a monitored tx by id.
    async fn get(&self, id: B256) -> Result<MonitoredTx, StorageError>;

    /// Loads all monitored txs matching the provided statuses, oldest first.
    /// An empty filter returns every row.
    async fn get_by_status(
        &self,
        statuses: &[MonitoredTxStatus],
    ) -> Result<Vec<MonitoredTx>, StorageError>;

    /// Loads all monitored txs mined within the inclusive block range.
    /// Either bound may be open.
    async fn get_by_block(
        &self,
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<Vec<MonitoredTx>, StorageError>;

    /// Updates a persisted monitored tx.
    async fn update(&self, tx: MonitoredTx) -> Result<(), StorageError>;

    /// Deletes all rows.
    async fn empty(&self) -> Result<(), StorageError>;
}

pub type SharedStorage = Arc<dyn TxStorage>;
