use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MonitoredTxs::Table)
                    .if_not_exists()
                    .col(text(MonitoredTxs::Id).primary_key())
                    .col(text(MonitoredTxs::FromAddress))
                    .col(text_null(MonitoredTxs::ToAddress))
                    .col(big_integer(MonitoredTxs::Nonce))
                    .col(text_null(MonitoredTxs::Value))
                    .col(binary_null(MonitoredTxs::TxData))
                    .col(big_integer(MonitoredTxs::Gas))
                    .col(big_integer_null(MonitoredTxs::GasOffset))
                    .col(text_null(MonitoredTxs::GasPrice))
                    .col(binary_null(MonitoredTxs::BlobSidecar))
                    .col(big_integer_null(MonitoredTxs::BlobGas))
                    .col(text_null(MonitoredTxs::BlobGasPrice))
                    .col(text_null(MonitoredTxs::GasTipCap))
                    .col(text(MonitoredTxs::Status))
                    .col(text_null(MonitoredTxs::BlockNumber))
                    .col(text_null(MonitoredTxs::History))
                    .col(text(MonitoredTxs::CreatedAt))
                    .col(text(MonitoredTxs::UpdatedAt))
                    .col(integer(MonitoredTxs::EstimateGas))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_monitored_txs_status")
                    .table(MonitoredTxs::Table)
                    .col(MonitoredTxs::Status)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_monitored_txs_created_at")
                    .table(MonitoredTxs::Table)
                    .col(MonitoredTxs::CreatedAt)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_monitored_txs_block_number")
                    .table(MonitoredTxs::Table)
                    .col(MonitoredTxs::BlockNumber)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_monitored_txs_status_created_at")
                    .table(MonitoredTxs::Table)
                    .col(MonitoredTxs::Status)
                    .col(MonitoredTxs::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MonitoredTxs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MonitoredTxs {
    Table,
    Id,
    FromAddress,
    ToAddress,
    Nonce,
    Value,
    TxData,
    Gas,
    GasOffset,
    GasPrice,
    BlobSidecar,
    BlobGas,
    BlobGasPrice,
    GasTipCap,
    Status,
    BlockNumber,
    History,
    CreatedAt,
    UpdatedAt,
    EstimateGas,
}
