use super::{StorageError, TxStorage};
use crate::manager::monitored_tx::{MonitoredTx, MonitoredTxStatus};
use alloy::primitives::B256;
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Mutex, RwLock},
};
use tracing::{error, info};

/// In-memory monitored transaction store.
///
/// When a persistence file is configured, every mutation rewrites the file
/// atomically (temp file + rename) and an existing snapshot is loaded back on
/// construction, so a restart does not lose track of in-flight transactions.
pub struct MemoryStorage {
    transactions: RwLock<HashMap<B256, MonitoredTx>>,
    persistence_file: Option<PathBuf>,
    file_lock: Mutex<()>,
}

impl MemoryStorage {
    pub fn new(persistence_file: Option<String>) -> Result<Self, StorageError> {
        let mut transactions = HashMap::new();
        if let Some(path) = &persistence_file {
            let path = PathBuf::from(path);
            if path.exists() {
                let contents = std::fs::read(&path)?;
                transactions = serde_json::from_slice(&contents)?;
                info!("Persistence file {} loaded", path.display());
            } else {
                info!("Persistence file {} does not exist", path.display());
            }
        }

        Ok(Self {
            transactions: RwLock::new(transactions),
            persistence_file: persistence_file.map(PathBuf::from),
            file_lock: Mutex::new(()),
        })
    }

    /// Writes the current snapshot next to the target and renames it over.
    /// Persistence failures are logged but never fail the storage operation.
    fn persist(&self) {
        let Some(path) = &self.persistence_file else {
            return;
        };

        let json = {
            let transactions = self
                .transactions
                .read()
                .expect("assert: storage lock is not poisoned");
            match serde_json::to_vec(&*transactions) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize storage snapshot: {}", e);
                    return;
                }
            }
        };

        let _guard = self
            .file_lock
            .lock()
            .expect("assert: file lock is not poisoned");
        let tmp_path = PathBuf::from(format!("{}.tmp", path.display()));
        if let Err(e) = std::fs::write(&tmp_path, json) {
            error!("Failed to write storage snapshot: {}", e);
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            error!("Failed to move storage snapshot into place: {}", e);
        }
    }
}

#[async_trait]
impl TxStorage for MemoryStorage {
    async fn add(&self, mut tx: MonitoredTx) -> Result<(), StorageError> {
        let now = Utc::now();
        tx.created_at = now;
        tx.updated_at = now;

        {
            let mut transactions = self
                .transactions
                .write()
                .expect("assert: storage lock is not poisoned");
            if transactions.contains_key(&tx.id) {
                return Err(StorageError::AlreadyExists);
            }
            transactions.insert(tx.id, tx);
        }
        self.persist();
        Ok(())
    }

    async fn remove(&self, id: B256) -> Result<(), StorageError> {
        {
            let mut transactions = self
                .transactions
                .write()
                .expect("assert: storage lock is not poisoned");
            if transactions.remove(&id).is_none() {
                return Err(StorageError::NotFound);
            }
        }
        self.persist();
        Ok(())
    }

    async fn get(&self, id: B256) -> Result<MonitoredTx, StorageError> {
        self.transactions
            .read()
            .expect("assert: storage lock is not poisoned")
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn get_by_status(
        &self,
        statuses: &[MonitoredTxStatus],
    ) -> Result<Vec<MonitoredTx>, StorageError> {
        let mut txs: Vec<MonitoredTx> = {
            let transactions = self
                .transactions
                .read()
                .expect("assert: storage lock is not poisoned");
            transactions
                .values()
                .filter(|tx| statuses.is_empty() || statuses.contains(&tx.status))
                .cloned()
                .collect()
        };
        txs.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(txs)
    }

    async fn get_by_block(
        &self,
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<Vec<MonitoredTx>, StorageError> {
        let transactions = self
            .transactions
            .read()
            .expect("assert: storage lock is not poisoned");
        let txs = transactions
            .values()
            .filter(|tx| match (from_block.or(to_block), tx.block_number) {
                // no bounds at all: every row qualifies
                (None, _) => true,
                // bounded scans only see mined rows
                (Some(_), None) => false,
                (Some(_), Some(block)) => {
                    from_block.is_none_or(|from| block >= from)
                        && to_block.is_none_or(|to| block <= to)
                }
            })
            .cloned()
            .collect();
        Ok(txs)
    }

    async fn update(&self, mut tx: MonitoredTx) -> Result<(), StorageError> {
        tx.updated_at = Utc::now();

        {
            let mut transactions = self
                .transactions
                .write()
                .expect("assert: storage lock is not poisoned");
            if !transactions.contains_key(&tx.id) {
                return Err(StorageError::NotFound);
            }
            transactions.insert(tx.id, tx);
        }
        self.persist();
        Ok(())
    }

    async fn empty(&self) -> Result<(), StorageError> {
        self.transactions
            .write()
            .expect("assert: storage lock is not poisoned")
            .clear();
        self.persist();
        Ok(())
    }
}
