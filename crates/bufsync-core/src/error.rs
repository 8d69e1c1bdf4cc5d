use thiserror::Error;

use crate::host::HostError;
use crate::rpc::RpcError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No external buffer for document {0}")]
    StaleDocument(String),

    #[error("External buffer {0} is not attached to any document")]
    StaleBuffer(u64),

    #[error("Host rejected the edit for document {0}")]
    ApplyRejected(String),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    pub fn rejected(document: impl std::fmt::Display) -> Self {
        Self::ApplyRejected(document.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
