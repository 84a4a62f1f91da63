use alloy::{
    primitives::Address,
    providers::PendingTransactionError,
    transports::{RpcError, TransportErrorKind},
};

/// Errors surfaced by the L1 client facade.
///
/// `NotFound`, `PrivateKeyNotFound` and `ExecutionReverted` are domain
/// sentinels the engine matches on; everything else is treated as transient
/// and retried on the next monitoring cycle.
#[derive(Debug, thiserror::Error)]
pub enum L1ClientError {
    /// The RPC replied that the requested entity does not exist.
    #[error("not found")]
    NotFound,
    /// The sender has no registered signing key.
    #[error("no signer registered for sender {0}")]
    PrivateKeyNotFound(Address),
    /// The call reverted but the RPC did not reveal a decodable reason.
    #[error("execution reverted")]
    ExecutionReverted,
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError<TransportErrorKind>),
    #[error("pending transaction error: {0}")]
    PendingTransaction(#[from] PendingTransactionError),
    #[error("signer error: {0}")]
    Signer(#[from] alloy::signers::Error),
    #[error("{0}")]
    Other(String),
}

impl L1ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    pub fn is_execution_reverted(&self) -> bool {
        matches!(self, Self::ExecutionReverted)
    }
}
