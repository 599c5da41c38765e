//! Error types for the portal core and the object-store backends.

use thiserror::Error;

pub type PortalResult<T> = Result<T, PortalError>;
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced to callers of the portal operations.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("document not found: {0}")]
    NotFound(String),

    /// `orphaned_preview` is set when the preview half of a dual upload was
    /// stored but the raw half was not.
    #[error("upload failed: {reason}")]
    UploadFailed {
        reason: String,
        orphaned_preview: Option<String>,
    },

    #[error("sharing failed: {reason}")]
    SharingFailed { reason: String },

    #[error("partial delete: removed {deleted:?}, failed {failed:?}")]
    PartialDelete {
        deleted: Vec<String>,
        failed: Vec<String>,
    },

    #[error("object store unavailable: {0}")]
    StoreUnavailable(String),
}

impl PortalError {
    /// Whether the user can reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortalError::StoreUnavailable(_))
    }

    /// Map a store error that is not expected on the happy path of an operation.
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => PortalError::NotFound(key),
            StoreError::Rejected(msg) => PortalError::InvalidArgument(msg),
            other => PortalError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Errors reported by an [`ObjectStore`](crate::storage::ObjectStore) backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Transient failures that are safe to retry against the same key.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}
