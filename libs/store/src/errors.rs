//! Store error taxonomy (§7 kinds b/c) and the retryable/fatal split that
//! `StoreManager`'s retry loop consults.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Query(#[from] libsql::Error),

    #[error("store row mapping failed: {0}")]
    Mapping(String),

    #[error("store manager is shutting down and no longer accepts submissions")]
    ShuttingDown,

    #[error("timed out enqueueing a store submission within the configured send-timeout")]
    SendTimeout,

    #[error("timed out waiting for a store submission to complete within the configured wait-timeout")]
    WaitTimeout,

    #[error("store worker channel closed before a result was produced")]
    ChannelClosed,
}

impl StoreError {
    /// Classifies kind (b) transient failures (§7) from kind (c) fatal
    /// schema/logic violations. Consulted by `StoreManager`'s retry loop;
    /// the retryable set is {"store busy/locked", I/O timeout, transient
    /// endpoint error} per §4.1.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Query(err) => {
                let message = err.to_string().to_lowercase();
                message.contains("locked")
                    || message.contains("busy")
                    || message.contains("timeout")
                    || message.contains("timed out")
            }
            StoreError::SendTimeout | StoreError::WaitTimeout => true,
            _ => false,
        }
    }
}
