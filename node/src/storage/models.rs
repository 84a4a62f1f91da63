use super::StorageError;
use crate::manager::monitored_tx::{MonitoredTx, MonitoredTxStatus};
use alloy::{
    consensus::BlobTransactionSidecar,
    primitives::{Address, Bytes, B256, U256},
};
use chrono::{DateTime, SecondsFormat, Utc};
use sea_orm::{entity::prelude::*, ActiveValue};
use std::collections::HashMap;
use std::str::FromStr;

/// Database model for a monitored transaction.
///
/// Unbounded integers are stored as decimal strings, addresses and hashes as
/// 0x-prefixed hex, history and sidecar as JSON, timestamps as RFC 3339 with
/// microsecond precision. The row layout is fixed for on-disk compatibility.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "monitored_txs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub from_address: String,
    pub to_address: Option<String>,
    pub nonce: i64,
    pub value: Option<String>,
    pub tx_data: Option<Vec<u8>>,
    pub gas: i64,
    pub gas_offset: Option<i64>,
    pub gas_price: Option<String>,
    pub blob_sidecar: Option<Vec<u8>>,
    pub blob_gas: Option<i64>,
    pub blob_gas_price: Option<String>,
    pub gas_tip_cap: Option<String>,
    pub status: String,
    pub block_number: Option<String>,
    pub history: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub estimate_gas: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn to_monitored_tx(&self) -> Result<MonitoredTx, StorageError> {
        let to = self
            .to_address
            .as_deref()
            .map(Address::from_str)
            .transpose()
            .map_err(|e| corrupt("to_address", e))?;
        let value = self
            .value
            .as_deref()
            .map(U256::from_str)
            .transpose()
            .map_err(|e| corrupt("value", e))?
            .unwrap_or_default();
        let blob_sidecar: Option<BlobTransactionSidecar> = self
            .blob_sidecar
            .as_deref()
            .map(serde_json::from_slice)
            .transpose()?;
        let history: HashMap<B256, bool> = self
            .history
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();
        let block_number = self
            .block_number
            .as_deref()
            .map(|raw| raw.parse::<u64>())
            .transpose()
            .map_err(|e| corrupt("block_number", e))?;

        Ok(MonitoredTx {
            id: B256::from_str(&self.id).map_err(|e| corrupt("id", e))?,
            from: Address::from_str(&self.from_address).map_err(|e| corrupt("from_address", e))?,
            to,
            nonce: self.nonce as u64,
            value,
            data: self.tx_data.clone().map(Bytes::from).unwrap_or_default(),
            gas: self.gas as u64,
            gas_offset: self.gas_offset.unwrap_or_default() as u64,
            gas_price: parse_fee(self.gas_price.as_deref()).map_err(|e| corrupt("gas_price", e))?,
            blob_sidecar,
            blob_gas: self.blob_gas.unwrap_or_default() as u64,
            blob_gas_price: parse_fee(self.blob_gas_price.as_deref())
                .map_err(|e| corrupt("blob_gas_price", e))?,
            gas_tip_cap: parse_fee(self.gas_tip_cap.as_deref())
                .map_err(|e| corrupt("gas_tip_cap", e))?,
            status: MonitoredTxStatus::from_str(&self.status).map_err(StorageError::CorruptRow)?,
            block_number,
            history,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            estimate_gas: self.estimate_gas != 0,
        })
    }
}

pub fn to_active_model(tx: &MonitoredTx) -> Result<ActiveModel, StorageError> {
    let blob_sidecar = tx
        .blob_sidecar
        .as_ref()
        .map(serde_json::to_vec)
        .transpose()?;
    let history = serde_json::to_string(&tx.history)?;

    Ok(ActiveModel {
        id: ActiveValue::Set(tx.id.to_string()),
        from_address: ActiveValue::Set(tx.from.to_string()),
        to_address: ActiveValue::Set(tx.to.map(|to| to.to_string())),
        nonce: ActiveValue::Set(tx.nonce as i64),
        value: ActiveValue::Set(Some(tx.value.to_string())),
        tx_data: ActiveValue::Set(if tx.data.is_empty() {
            None
        } else {
            Some(tx.data.to_vec())
        }),
        gas: ActiveValue::Set(tx.gas as i64),
        gas_offset: ActiveValue::Set(Some(tx.gas_offset as i64)),
        gas_price: ActiveValue::Set(Some(tx.gas_price.to_string())),
        blob_sidecar: ActiveValue::Set(blob_sidecar),
        blob_gas: ActiveValue::Set(Some(tx.blob_gas as i64)),
        blob_gas_price: ActiveValue::Set(Some(tx.blob_gas_price.to_string())),
        gas_tip_cap: ActiveValue::Set(Some(tx.gas_tip_cap.to_string())),
        status: ActiveValue::Set(tx.status.as_str().to_string()),
        block_number: ActiveValue::Set(tx.block_number.map(|number| number.to_string())),
        history: ActiveValue::Set(Some(history)),
        created_at: ActiveValue::Set(format_timestamp(tx.created_at)),
        updated_at: ActiveValue::Set(format_timestamp(tx.updated_at)),
        estimate_gas: ActiveValue::Set(tx.estimate_gas as i32),
    })
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| corrupt("timestamp", e))
}

fn parse_fee(raw: Option<&str>) -> Result<u128, std::num::ParseIntError> {
    match raw {
        Some(raw) => raw.parse::<u128>(),
        None => Ok(0),
    }
}

fn corrupt(column: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::CorruptRow(format!("{column}: {err}"))
}
