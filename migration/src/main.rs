use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
    cli::run_cli(l1_sentinel_migration::Migrator).await;
}
