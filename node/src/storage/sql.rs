use super::{
    models::{self, Column, Entity, Model},
    StorageError, TxStorage,
};
use crate::manager::monitored_tx::{MonitoredTx, MonitoredTxStatus};
use alloy::primitives::B256;
use async_trait::async_trait;
use chrono::Utc;
use l1_sentinel_migration::{Migrator, MigratorTrait};
use sea_orm::{
    sea_query::Expr, ColumnTrait, Condition, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, SqlErr,
};

/// SQLite-backed monitored transaction store.
///
/// The connection runs in WAL mode with `synchronous = NORMAL` so parallel
/// per-transaction tasks can write while the query surface reads.
pub struct SqlStorage {
    db: DatabaseConnection,
}

impl SqlStorage {
    /// Opens (and creates, if needed) the database at `db_path` and brings the
    /// schema up to date. `:memory:` yields a private in-memory database.
    pub async fn new(db_path: &str) -> Result<Self, StorageError> {
        let url = if db_path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{db_path}?mode=rwc")
        };
        let db = Database::connect(url).await?;

        db.execute_unprepared(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;
             PRAGMA journal_size_limit = 6144000;",
        )
        .await?;

        Migrator::up(&db, None).await?;

        Ok(Self { db })
    }
}

#[async_trait]
impl TxStorage for SqlStorage {
    async fn add(&self, mut tx: MonitoredTx) -> Result<(), StorageError> {
        let now = Utc::now();
        tx.created_at = now;
        tx.updated_at = now;

        // exec_without_returning: the primary key is a hex string, so there
        // is no numeric last-insert-id to fetch back
        let model = models::to_active_model(&tx)?;
        match Entity::insert(model).exec_without_returning(&self.db).await {
            Ok(_) => Ok(()),
            Err(e) => match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => Err(StorageError::AlreadyExists),
                _ => Err(e.into()),
            },
        }
    }

    async fn remove(&self, id: B256) -> Result<(), StorageError> {
        let result = Entity::delete_by_id(id.to_string()).exec(&self.db).await?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get(&self, id: B256) -> Result<MonitoredTx, StorageError> {
        Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound)?
            .to_monitored_tx()
    }

    async fn get_by_status(
        &self,
        statuses: &[MonitoredTxStatus],
    ) -> Result<Vec<MonitoredTx>, StorageError> {
        let mut query = Entity::find();
        if !statuses.is_empty() {
            query = query.filter(
                Column::Status.is_in(statuses.iter().map(MonitoredTxStatus::as_str)),
            );
        }

        let models = query
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        models.iter().map(Model::to_monitored_tx).collect()
    }

    async fn get_by_block(
        &self,
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<Vec<MonitoredTx>, StorageError> {
        // block_number holds decimal strings; compare numerically, not
        // lexicographically.
        let mut condition = Condition::all();
        if let Some(from_block) = from_block {
            condition = condition.add(Expr::cust_with_values(
                "CAST(block_number AS INTEGER) >= ?",
                [from_block as i64],
            ));
        }
        if let Some(to_block) = to_block {
            condition = condition.add(Expr::cust_with_values(
                "CAST(block_number AS INTEGER) <= ?",
                [to_block as i64],
            ));
        }

        let models = Entity::find().filter(condition).all(&self.db).await?;
        models.iter().map(Model::to_monitored_tx).collect()
    }

    async fn update(&self, mut tx: MonitoredTx) -> Result<(), StorageError> {
        tx.updated_at = Utc::now();

        let model = models::to_active_model(&tx)?;
        let result = Entity::update_many()
            .set(model)
            .filter(Column::Id.eq(tx.id.to_string()))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn empty(&self) -> Result<(), StorageError> {
        Entity::delete_many().exec(&self.db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kzg::make_blob_sidecar;
    use crate::utils::blob::encode_blob_data;
    use alloy::primitives::{address, Bytes, U256};

    /// Fresh file-backed database; `:memory:` does not survive a pooled
    /// second connection.
    async fn setup_test_db() -> (SqlStorage, tempfile::TempDir) {
        let dir = tempfile::Builder::new()
            .prefix("l1-sentinel-test-")
            .rand_bytes(8)
            .tempdir()
            .expect("failed to create temp dir");
        let path = dir.path().join("monitored_txs.db");
        let storage = SqlStorage::new(path.to_str().unwrap()).await.unwrap();
        (storage, dir)
    }

    fn sample_tx(last_byte: u8) -> MonitoredTx {
        MonitoredTx {
            id: B256::with_last_byte(last_byte),
            from: address!("0x1000000000000000000000000000000000000001"),
            to: Some(address!("0x2000000000000000000000000000000000000002")),
            nonce: 3,
            value: U256::from(1_000_000_000u64),
            data: Bytes::from(vec![1, 2, 3]),
            gas: 21_000,
            gas_offset: 100,
            gas_price: 42,
            gas_tip_cap: 2,
            estimate_gas: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn round_trips_a_monitored_tx() {
        let (storage, _dir) = setup_test_db().await;

        let mut tx = sample_tx(1);
        tx.add_to_history(B256::with_last_byte(0xaa));
        storage.add(tx.clone()).await.unwrap();

        let loaded = storage.get(tx.id).await.unwrap();
        assert_eq!(loaded.id, tx.id);
        assert_eq!(loaded.from, tx.from);
        assert_eq!(loaded.to, tx.to);
        assert_eq!(loaded.nonce, tx.nonce);
        assert_eq!(loaded.value, tx.value);
        assert_eq!(loaded.data, tx.data);
        assert_eq!(loaded.gas, tx.gas);
        assert_eq!(loaded.gas_offset, tx.gas_offset);
        assert_eq!(loaded.gas_price, tx.gas_price);
        assert_eq!(loaded.status, MonitoredTxStatus::Created);
        assert_eq!(loaded.history, tx.history);
        assert!(loaded.estimate_gas);
    }

    #[tokio::test]
    async fn round_trips_a_blob_sidecar() {
        let (storage, _dir) = setup_test_db().await;

        let mut tx = sample_tx(2);
        let blob = encode_blob_data(b"blob payload").unwrap();
        tx.blob_sidecar = Some(make_blob_sidecar(vec![blob]).unwrap());
        tx.blob_gas = 131_072;
        tx.blob_gas_price = 7;
        storage.add(tx.clone()).await.unwrap();

        let loaded = storage.get(tx.id).await.unwrap();
        assert_eq!(loaded.blob_sidecar, tx.blob_sidecar);
        assert_eq!(loaded.blob_gas, tx.blob_gas);
        assert_eq!(loaded.blob_gas_price, tx.blob_gas_price);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected_without_overwriting() {
        let (storage, _dir) = setup_test_db().await;

        let mut tx = sample_tx(3);
        tx.nonce = 1;
        storage.add(tx.clone()).await.unwrap();

        tx.nonce = 99;
        let err = storage.add(tx.clone()).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists));

        let loaded = storage.get(tx.id).await.unwrap();
        assert_eq!(loaded.nonce, 1);
        assert_eq!(storage.get_by_status(&[]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removed_rows_are_gone() {
        let (storage, _dir) = setup_test_db().await;

        let tx = sample_tx(4);
        storage.add(tx.clone()).await.unwrap();
        storage.remove(tx.id).await.unwrap();

        assert!(matches!(
            storage.get(tx.id).await.unwrap_err(),
            StorageError::NotFound
        ));
        assert!(matches!(
            storage.remove(tx.id).await.unwrap_err(),
            StorageError::NotFound
        ));
    }

    #[tokio::test]
    async fn get_by_status_filters_and_orders_by_creation() {
        let (storage, _dir) = setup_test_db().await;

        for last_byte in 1..=3 {
            storage.add(sample_tx(last_byte)).await.unwrap();
        }
        let mut sent = storage.get(B256::with_last_byte(2)).await.unwrap();
        sent.status = MonitoredTxStatus::Sent;
        storage.update(sent).await.unwrap();

        let created = storage
            .get_by_status(&[MonitoredTxStatus::Created])
            .await
            .unwrap();
        assert_eq!(created.len(), 2);

        let all = storage.get_by_status(&[]).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn get_by_block_is_an_inclusive_range() {
        let (storage, _dir) = setup_test_db().await;

        for (last_byte, block) in [(1u8, 10u64), (2, 20), (3, 30)] {
            let mut tx = sample_tx(last_byte);
            storage.add(tx.clone()).await.unwrap();
            tx.status = MonitoredTxStatus::Mined;
            tx.block_number = Some(block);
            storage.update(tx).await.unwrap();
        }
        // a row that never mined must not show up in bounded scans
        storage.add(sample_tx(4)).await.unwrap();

        let in_range = storage.get_by_block(Some(10), Some(20)).await.unwrap();
        assert_eq!(in_range.len(), 2);

        let from_only = storage.get_by_block(Some(21), None).await.unwrap();
        assert_eq!(from_only.len(), 1);
        assert_eq!(from_only[0].block_number, Some(30));

        let unbounded = storage.get_by_block(None, None).await.unwrap();
        assert_eq!(unbounded.len(), 4);
    }

    #[tokio::test]
    async fn update_requires_an_existing_row() {
        let (storage, _dir) = setup_test_db().await;
        let err = storage.update(sample_tx(9)).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[tokio::test]
    async fn empty_deletes_everything() {
        let (storage, _dir) = setup_test_db().await;
        storage.add(sample_tx(1)).await.unwrap();
        storage.add(sample_tx(2)).await.unwrap();

        storage.empty().await.unwrap();
        assert!(storage.get_by_status(&[]).await.unwrap().is_empty());
    }
}
