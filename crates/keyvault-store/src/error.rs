//! Error types for `keyvault-store`.

/// Errors returned by a [`VaultStore`](crate::VaultStore) backend.
///
/// Variants carry a human-readable reason rather than backend-specific error
/// types so that the core can treat every backend uniformly.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A read from the backend failed.
    #[error("store read failed: {reason}")]
    Read { reason: String },

    /// A write to the backend failed.
    #[error("store write failed: {reason}")]
    Write { reason: String },

    /// A delete against the backend failed.
    #[error("store delete failed: {reason}")]
    Delete { reason: String },

    /// An insert collided with an existing record.
    #[error("record already exists: {what}")]
    Conflict { what: String },

    /// A record required by the operation does not exist.
    #[error("record not found: {what}")]
    Missing { what: String },
}
