use super::{config::EthereumL1Config, L1Client, L1ClientError};
use alloy::{
    consensus::{BlockHeader, SignableTransaction, TxEnvelope, TypedTransaction},
    eips::{eip2718::Encodable2718, BlockNumberOrTag},
    hex,
    network::{ReceiptResponse, TransactionResponse, TxSigner},
    primitives::{Address, Bytes, TxKind, B256, U256},
    providers::{
        DynProvider, PendingTransactionBuilder, PendingTransactionError, Provider,
        ProviderBuilder, WatchTxError,
    },
    rpc::types::{Header, Transaction, TransactionInput, TransactionReceipt, TransactionRequest},
    signers::{local::PrivateKeySigner, Signer},
    sol_types::{Revert, SolError},
};
use async_trait::async_trait;
use std::{collections::HashMap, str::FromStr, time::Duration};
use tracing::{debug, warn};

/// Alloy-backed implementation of the [`L1Client`] contract, plus the signer
/// registry for the managed senders.
pub struct ExecutionLayer {
    provider: DynProvider,
    signers: HashMap<Address, PrivateKeySigner>,
    rpc_url: String,
}

impl ExecutionLayer {
    pub async fn new(config: EthereumL1Config) -> Result<Self, anyhow::Error> {
        debug!("Creating execution layer with RPC URL: {}", config.rpc_url);

        let provider = ProviderBuilder::new()
            .connect(&config.rpc_url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to L1 RPC: {e}"))?
            .erased();
        let chain_id = provider.get_chain_id().await?;

        let mut signers = HashMap::new();
        for private_key in &config.private_keys {
            let signer = PrivateKeySigner::from_str(private_key)?.with_chain_id(Some(chain_id));
            tracing::info!("Registered L1 sender: {}", signer.address());
            signers.insert(signer.address(), signer);
        }

        Ok(Self {
            provider,
            signers,
            rpc_url: config.rpc_url,
        })
    }

    /// Addresses with a registered signing key.
    pub fn sender_addresses(&self) -> Vec<Address> {
        self.signers.keys().copied().collect()
    }

    fn build_call_request(
        from: Address,
        to: Option<Address>,
        value: U256,
        data: Bytes,
    ) -> TransactionRequest {
        let mut request = TransactionRequest::default();
        request.from = Some(from);
        request.to = Some(to.map_or(TxKind::Create, TxKind::Call));
        request.value = Some(value);
        request.input = TransactionInput::new(data);
        request
    }
}

#[async_trait]
impl L1Client for ExecutionLayer {
    async fn get_tx(&self, tx_hash: B256) -> Result<(Transaction, bool), L1ClientError> {
        match self.provider.get_transaction_by_hash(tx_hash).await? {
            Some(tx) => {
                let pending = tx.block_number.is_none();
                Ok((tx, pending))
            }
            None => Err(L1ClientError::NotFound),
        }
    }

    async fn get_receipt(&self, tx_hash: B256) -> Result<TransactionReceipt, L1ClientError> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await?
            .ok_or(L1ClientError::NotFound)
    }

    async fn wait_mined(&self, tx_hash: B256, timeout: Duration) -> Result<bool, L1ClientError> {
        let pending = PendingTransactionBuilder::new(self.provider.root().clone(), tx_hash)
            .with_timeout(Some(timeout));
        match pending.get_receipt().await {
            Ok(_) => Ok(true),
            Err(PendingTransactionError::TxWatcher(WatchTxError::Timeout)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn send(&self, tx: TxEnvelope) -> Result<(), L1ClientError> {
        let encoded = tx.encoded_2718();
        match self.provider.send_raw_transaction(&encoded).await {
            Ok(pending) => {
                debug!("Broadcast raw transaction with hash {}", pending.tx_hash());
                Ok(())
            }
            Err(e) => {
                // Leave the operator a way to replay the exact payload by hand.
                warn!(
                    "Failed to broadcast transaction, fallback: curl -X POST \
                     -H 'Content-Type: application/json' --data \
                     '{{\"jsonrpc\":\"2.0\",\"method\":\"eth_sendRawTransaction\",\
                     \"params\":[\"0x{}\"],\"id\":1}}' {}",
                    hex::encode(&encoded),
                    self.rpc_url
                );
                Err(e.into())
            }
        }
    }

    async fn current_nonce(&self, account: Address) -> Result<u64, L1ClientError> {
        Ok(self.provider.get_transaction_count(account).await?)
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, L1ClientError> {
        Ok(self
            .provider
            .get_transaction_count(account)
            .pending()
            .await?)
    }

    async fn suggested_gas_price(&self) -> Result<u128, L1ClientError> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn suggested_gas_tip_cap(&self) -> Result<u128, L1ClientError> {
        Ok(self.provider.get_max_priority_fee_per_gas().await?)
    }

    async fn estimate_gas(
        &self,
        from: Address,
        to: Option<Address>,
        value: U256,
        data: Bytes,
    ) -> Result<u64, L1ClientError> {
        let request = Self::build_call_request(from, to, value, data);
        Ok(self.provider.estimate_gas(request).await?)
    }

    async fn estimate_gas_blob_tx(
        &self,
        from: Address,
        to: Option<Address>,
        gas_fee_cap: u128,
        gas_tip_cap: u128,
        value: U256,
        data: Bytes,
    ) -> Result<u64, L1ClientError> {
        let mut request = Self::build_call_request(from, to, value, data);
        request.max_fee_per_gas = Some(gas_fee_cap);
        request.max_priority_fee_per_gas = Some(gas_tip_cap);
        Ok(self.provider.estimate_gas(request).await?)
    }

    async fn check_tx_was_mined(
        &self,
        tx_hash: B256,
    ) -> Result<(bool, Option<TransactionReceipt>), L1ClientError> {
        match self.provider.get_transaction_receipt(tx_hash).await? {
            Some(receipt) => Ok((true, Some(receipt))),
            None => Ok((false, None)),
        }
    }

    async fn sign(
        &self,
        sender: Address,
        tx: TypedTransaction,
    ) -> Result<TxEnvelope, L1ClientError> {
        let signer = self
            .signers
            .get(&sender)
            .ok_or(L1ClientError::PrivateKeyNotFound(sender))?;

        match tx {
            TypedTransaction::Legacy(mut tx) => {
                let signature = signer.sign_transaction(&mut tx).await?;
                Ok(TxEnvelope::Legacy(tx.into_signed(signature)))
            }
            TypedTransaction::Eip4844(mut tx) => {
                let signature = signer.sign_transaction(&mut tx).await?;
                Ok(TxEnvelope::Eip4844(tx.into_signed(signature)))
            }
            other => Err(L1ClientError::Other(format!(
                "unsupported transaction type: {:?}",
                other.tx_type()
            ))),
        }
    }

    async fn get_revert_reason(&self, tx: Transaction) -> Result<String, L1ClientError> {
        let receipt = self.get_receipt(tx.tx_hash()).await?;
        if receipt.status() {
            return Ok(String::new());
        }
        let block_number = receipt.block_number.ok_or_else(|| {
            L1ClientError::Other("failed receipt is missing a block number".to_string())
        })?;

        let request = TransactionRequest::from_transaction(tx);
        match self.provider.call(request).block(block_number.into()).await {
            // The replay did not revert; no reason can be recovered.
            Ok(_) => Err(L1ClientError::ExecutionReverted),
            Err(e) => {
                if let Some(payload) = e.as_error_resp() {
                    if let Some(data) = payload.as_revert_data() {
                        if let Ok(revert) = Revert::abi_decode(&data) {
                            return Ok(revert.reason);
                        }
                    }
                }
                Err(L1ClientError::ExecutionReverted)
            }
        }
    }

    async fn latest_block_number(&self) -> Result<u64, L1ClientError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn safe_block_number(&self) -> Result<u64, L1ClientError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Safe)
            .await?
            .ok_or(L1ClientError::NotFound)?;
        Ok(block.header.number())
    }

    async fn finalized_block_number(&self) -> Result<u64, L1ClientError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Finalized)
            .await?
            .ok_or(L1ClientError::NotFound)?;
        Ok(block.header.number())
    }

    async fn get_header(&self, number: Option<u64>) -> Result<Header, L1ClientError> {
        let tag = number.map_or(BlockNumberOrTag::Latest, BlockNumberOrTag::Number);
        let block = self
            .provider
            .get_block_by_number(tag)
            .await?
            .ok_or(L1ClientError::NotFound)?;
        Ok(block.header)
    }
}
