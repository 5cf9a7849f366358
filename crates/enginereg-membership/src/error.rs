//! Error types for membership operations.

use enginereg_state::{BindingId, StateError};
use thiserror::Error;

/// Result type alias for membership operations.
pub type MembershipResult<T> = Result<T, MembershipError>;

#[derive(Debug, Error)]
pub enum MembershipError {
    /// The `(instance, cluster)` slot is already bound.
    #[error("instance {instance} and cluster {cluster} already exists")]
    DuplicateAssignment { instance: String, cluster: String },

    #[error("binding {0} not found")]
    NotFound(BindingId),

    /// Storage failure, passed through unchanged.
    #[error(transparent)]
    Store(StateError),
}

impl From<StateError> for MembershipError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::DuplicateKey { instance, cluster } => {
                MembershipError::DuplicateAssignment { instance, cluster }
            }
            StateError::NotFound(id) => MembershipError::NotFound(id),
            other => MembershipError::Store(other),
        }
    }
}
