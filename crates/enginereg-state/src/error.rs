//! Error types for the binding store.

use thiserror::Error;

use crate::types::BindingId;

/// Result type alias for binding store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during binding store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("binding {0} not found")]
    NotFound(BindingId),

    /// The `(instance, cluster)` unique index already holds this pair.
    #[error("duplicate key: instance {instance} and cluster {cluster}")]
    DuplicateKey { instance: String, cluster: String },
}
