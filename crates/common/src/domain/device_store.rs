use crate::domain::{DeviceDocument, FieldMap, StorageId};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("device already exists: {0}")]
    DeviceAlreadyExists(String),

    #[error("field {0} cannot be modified")]
    ImmutableField(String),

    #[error("repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Counts reported by a bulk update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// Records selected by the filter
    pub matched: u64,
    /// Records whose stored content changed
    pub modified: u64,
}

/// Counts reported by a bulk delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteStats {
    pub deleted: u64,
}

/// Storage operations needed by the device command handlers.
///
/// Filters are field-equality matches on the stored document; the `_id` key matches
/// the storage identity. Infrastructure (postgres, in-memory) implements this trait.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Insert a single device. `deviceID` must be unique across the store.
    /// Returns the storage identity, generated when the document has none.
    async fn insert_device(&self, document: DeviceDocument) -> StoreResult<StorageId>;

    /// Apply `patch` to every device matching `filter`
    async fn update_devices(&self, filter: FieldMap, patch: FieldMap) -> StoreResult<UpdateStats>;

    /// Delete every device matching `filter`
    async fn delete_devices(&self, filter: FieldMap) -> StoreResult<DeleteStats>;
}
