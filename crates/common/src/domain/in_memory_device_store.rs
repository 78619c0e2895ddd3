use crate::domain::{
    fields, DeleteStats, DeviceDocument, DeviceStore, FieldMap, StorageId, StoreError,
    StoreResult, UpdateStats,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory implementation of `DeviceStore` using a `HashMap`.
pub struct InMemoryDeviceStore {
    documents: RwLock<HashMap<StorageId, FieldMap>>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored devices
    pub async fn count(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Snapshot of every stored device
    pub async fn documents(&self) -> Vec<DeviceDocument> {
        self.documents
            .read()
            .await
            .iter()
            .map(|(id, fields)| DeviceDocument {
                id: Some(id.clone()),
                fields: fields.clone(),
            })
            .collect()
    }
}

impl Default for InMemoryDeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn insert_device(&self, document: DeviceDocument) -> StoreResult<StorageId> {
        let mut documents = self.documents.write().await;

        let id = document.id.unwrap_or_else(StorageId::generate);
        if documents.contains_key(&id) {
            return Err(StoreError::DeviceAlreadyExists(id.into_inner()));
        }

        if let Some(device_id) = document.fields.get(fields::DEVICE_ID) {
            if documents
                .values()
                .any(|existing| existing.get(fields::DEVICE_ID) == Some(device_id))
            {
                return Err(StoreError::DeviceAlreadyExists(
                    device_id.as_str().unwrap_or_default().to_string(),
                ));
            }
        }

        debug!(storage_id = %id, "inserted device document");
        documents.insert(id.clone(), document.fields);
        Ok(id)
    }

    async fn update_devices(&self, filter: FieldMap, patch: FieldMap) -> StoreResult<UpdateStats> {
        if patch.contains_key(fields::ID) {
            return Err(StoreError::ImmutableField(fields::ID.to_string()));
        }

        let mut documents = self.documents.write().await;

        let mut stats = UpdateStats::default();
        let mut changed = Vec::new();
        for (id, existing) in documents.iter() {
            if !matches_filter(id, existing, &filter) {
                continue;
            }
            stats.matched += 1;

            // Fields already holding an equal value are left untouched
            let mut updated = existing.clone();
            for (key, value) in &patch {
                if !existing.get(key).is_some_and(|current| values_equal(current, value)) {
                    updated.insert(key.clone(), value.clone());
                }
            }
            if &updated != existing {
                changed.push((id.clone(), updated));
            }
        }
        stats.modified = changed.len() as u64;

        // Validate the resulting state before committing anything
        if let Some(device_id) = patch.get(fields::DEVICE_ID) {
            let holders = documents
                .iter()
                .filter(|(id, existing)| {
                    let after = changed
                        .iter()
                        .find(|(changed_id, _)| changed_id == *id)
                        .map(|(_, updated)| updated)
                        .unwrap_or(*existing);
                    after.get(fields::DEVICE_ID) == Some(device_id)
                })
                .count();
            if holders > 1 {
                return Err(StoreError::DeviceAlreadyExists(device_id.as_str().unwrap_or_default().to_string()));
            }
        }

        for (id, updated) in changed {
            documents.insert(id, updated);
        }

        debug!(matched = stats.matched, modified = stats.modified, "updated device documents");
        Ok(stats)
    }

    async fn delete_devices(&self, filter: FieldMap) -> StoreResult<DeleteStats> {
        let mut documents = self.documents.write().await;

        let before = documents.len();
        documents.retain(|id, existing| !matches_filter(id, existing, &filter));
        let deleted = (before - documents.len()) as u64;

        debug!(deleted, "deleted device documents");
        Ok(DeleteStats { deleted })
    }
}

fn matches_filter(id: &StorageId, document: &FieldMap, filter: &FieldMap) -> bool {
    filter.iter().all(|(key, expected)| {
        if key == fields::ID {
            return expected.as_str() == Some(id.as_str());
        }
        document
            .get(key)
            .is_some_and(|actual| values_equal(actual, expected))
    })
}

// Numbers compare by value so that 1 matches 1.0, as in document stores.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => l == r,
            _ => l.as_f64() == r.as_f64(),
        },
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(l), Value::Object(r)) => {
            l.len() == r.len()
                && l.iter()
                    .all(|(key, l)| r.get(key).is_some_and(|r| values_equal(l, r)))
        }
        _ => left == right,
    }
}
