use crate::domain::{CommandError, Operation, ValidationError};
use common::domain::{
    fields, CommandAction, DecodedCommand, Device, DeviceStore, FieldMap, MutatePayload,
    ResponseEnvelope,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

const INSERT_STAGE: &str = "InsertOne";
const UPDATE_STAGE: &str = "UpdateMany";
const DELETE_STAGE: &str = "DeleteMany";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResult {
    matched_count: u64,
    modified_count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteResult {
    deleted_count: u64,
}

/// Validates device commands, applies them to the store and shapes the response.
///
/// Every command yields exactly one `ResponseEnvelope`; failures never escape as errors.
pub struct DeviceCommandService {
    store: Arc<dyn DeviceStore>,
}

impl DeviceCommandService {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self { store }
    }

    /// Run the handler for `action`
    pub async fn handle(&self, action: CommandAction, command: &DecodedCommand) -> ResponseEnvelope {
        match action {
            CommandAction::Insert => self.insert(command).await,
            CommandAction::Update => self.update(command).await,
            CommandAction::Delete => self.delete(command).await,
        }
    }

    /// Create a single device. The result is the storage identity.
    #[instrument(skip(self, command), fields(correlation_id = %command.correlation_id, uuid = %command.uuid))]
    pub async fn insert(&self, command: &DecodedCommand) -> ResponseEnvelope {
        respond(command, self.try_insert(&command.data).await)
    }

    /// Patch every device matching the filter
    #[instrument(skip(self, command), fields(correlation_id = %command.correlation_id, uuid = %command.uuid))]
    pub async fn update(&self, command: &DecodedCommand) -> ResponseEnvelope {
        respond(command, self.try_update(&command.data).await)
    }

    /// Remove every device matching the filter
    #[instrument(skip(self, command), fields(correlation_id = %command.correlation_id, uuid = %command.uuid))]
    pub async fn delete(&self, command: &DecodedCommand) -> ResponseEnvelope {
        respond(command, self.try_delete(&command.data).await)
    }

    async fn try_insert(&self, data: &[u8]) -> Result<Value, CommandError> {
        const OP: Operation = Operation::Insert;

        let device = Device::from_wire(data).map_err(|e| CommandError::decode(OP, e))?;
        match device.device_id {
            None => return Err(CommandError::validation(OP, ValidationError::MissingDeviceId)),
            Some(id) if id.is_nil() => {
                return Err(CommandError::validation(OP, ValidationError::BlankDeviceId))
            }
            Some(_) => {}
        }

        let id = self
            .store
            .insert_device(device.to_document())
            .await
            .map_err(|e| CommandError::database(OP, INSERT_STAGE, e))?;

        debug!(storage_id = %id, "device created");
        Ok(Value::String(id.into_inner()))
    }

    async fn try_update(&self, data: &[u8]) -> Result<Value, CommandError> {
        const OP: Operation = Operation::Update;

        let payload: MutatePayload =
            serde_json::from_slice(data).map_err(|e| CommandError::decode(OP, e))?;

        if payload.filter.is_empty() {
            return Err(CommandError::validation(OP, ValidationError::BlankFilter));
        }
        if payload.update.is_empty() {
            return Err(CommandError::validation(OP, ValidationError::BlankUpdate));
        }
        if clears_device_id(&payload.update) {
            return Err(CommandError::validation(
                OP,
                ValidationError::BlankDeviceIdInUpdate,
            ));
        }
        // Known fields must carry well-typed values and are stored in their canonical
        // encoding, so identities compare equal to what insert wrote. Unknown ones pass through.
        let known = Device::from_fields(&payload.update).map_err(|e| CommandError::decode(OP, e))?;
        let mut update = payload.update;
        update.extend(known.to_fields());

        let stats = self
            .store
            .update_devices(payload.filter, update)
            .await
            .map_err(|e| CommandError::database(OP, UPDATE_STAGE, e))?;

        debug!(matched = stats.matched, modified = stats.modified, "devices updated");
        serde_json::to_value(UpdateResult {
            matched_count: stats.matched,
            modified_count: stats.modified,
        })
        .map_err(|source| CommandError::ResultEncoding {
            operation: OP,
            source,
        })
    }

    async fn try_delete(&self, data: &[u8]) -> Result<Value, CommandError> {
        const OP: Operation = Operation::Delete;

        let filter: FieldMap =
            serde_json::from_slice(data).map_err(|e| CommandError::decode(OP, e))?;
        if filter.is_empty() {
            return Err(CommandError::validation(OP, ValidationError::BlankFilter));
        }

        let stats = self
            .store
            .delete_devices(filter)
            .await
            .map_err(|e| CommandError::database(OP, DELETE_STAGE, e))?;

        debug!(deleted = stats.deleted, "devices deleted");
        serde_json::to_value(DeleteResult {
            deleted_count: stats.deleted,
        })
        .map_err(|source| CommandError::ResultEncoding {
            operation: OP,
            source,
        })
    }
}

/// A patch may not blank out the identity, neither with the nil UUID nor with null
fn clears_device_id(update: &FieldMap) -> bool {
    match update.get(fields::DEVICE_ID) {
        Some(Value::Null) => true,
        Some(Value::String(s)) => Uuid::parse_str(s).is_ok_and(|id| id.is_nil()),
        _ => false,
    }
}

fn respond(command: &DecodedCommand, result: Result<Value, CommandError>) -> ResponseEnvelope {
    match result {
        Ok(value) => ResponseEnvelope::success(command, value),
        Err(e) => {
            let kind = e.kind();
            error!(
                correlation_id = %command.correlation_id,
                uuid = %command.uuid,
                event_action = %command.event_action,
                error_code = kind.code(),
                error = %e,
                "command failed"
            );
            ResponseEnvelope::failure(command, kind, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        DeleteStats, ErrorKind, InMemoryDeviceStore, MockDeviceStore, StorageId, StoreError,
        UpdateStats, DEVICE_AGGREGATE_ID,
    };
    use serde_json::json;

    const DEVICE_ID: &str = "3f1c7a52-8d4e-4b6a-9c1f-2e5d7b9a0c11";
    const ITEM_ID: &str = "a9e2b4c6-1d3f-4e5a-8b7c-9d0e1f2a3b4c";

    fn command(action: &str, data: Value) -> DecodedCommand {
        DecodedCommand {
            aggregate_id: DEVICE_AGGREGATE_ID,
            correlation_id: Uuid::new_v4(),
            user_uuid: Uuid::new_v4(),
            version: 1,
            year_bucket: 2024,
            nano_time: 1_700_000_000_000_000_000,
            event_action: action.to_string(),
            service_action: "device".to_string(),
            uuid: Uuid::new_v4(),
            data: serde_json::to_vec(&data).unwrap(),
        }
    }

    fn full_device(device_id: &str, status: &str) -> Value {
        json!({
            "itemID": ITEM_ID,
            "deviceID": device_id,
            "dateInstalled": 1700000000,
            "lot": "L1",
            "lastMaintenance": 1710000000,
            "name": "pump",
            "status": status,
            "sku": "SKU-1",
        })
    }

    fn assert_echoes(response: &ResponseEnvelope, command: &DecodedCommand) {
        assert_eq!(response.aggregate_id, command.aggregate_id);
        assert_eq!(response.correlation_id, command.correlation_id);
        assert_eq!(response.uuid, command.uuid);
        assert_eq!(response.event_action, command.event_action);
        assert_eq!(response.service_action, command.service_action);
    }

    fn in_memory() -> (Arc<InMemoryDeviceStore>, DeviceCommandService) {
        let store = Arc::new(InMemoryDeviceStore::new());
        let service = DeviceCommandService::new(store.clone());
        (store, service)
    }

    #[tokio::test]
    async fn test_insert_success_returns_storage_id() {
        let mut mock_store = MockDeviceStore::new();
        mock_store
            .expect_insert_device()
            .withf(|doc| {
                doc.id.is_none()
                    && doc.fields.get("deviceID") == Some(&json!(DEVICE_ID))
                    && doc.fields.len() == 8
            })
            .times(1)
            .return_once(|_| Ok(StorageId::from("cv37k8lq4t0f3bq1t0ng".to_string())));

        let service = DeviceCommandService::new(Arc::new(mock_store));
        let cmd = command("insert", full_device(DEVICE_ID, "active"));

        let response = service.insert(&cmd).await;

        assert_echoes(&response, &cmd);
        assert_eq!(response.result(), Some(&json!("cv37k8lq4t0f3bq1t0ng")));
    }

    #[tokio::test]
    async fn test_insert_missing_device_id_is_internal_error() {
        let mut mock_store = MockDeviceStore::new();
        mock_store.expect_insert_device().times(0);
        let service = DeviceCommandService::new(Arc::new(mock_store));
        let cmd = command("insert", json!({ "name": "pump" }));

        let response = service.insert(&cmd).await;

        assert_echoes(&response, &cmd);
        assert_eq!(response.error_kind(), Some(ErrorKind::InternalError));
        assert_eq!(response.error(), Some("Insert: deviceID not provided"));
    }

    #[tokio::test]
    async fn test_insert_nil_device_id_is_internal_error() {
        let mut mock_store = MockDeviceStore::new();
        mock_store.expect_insert_device().times(0);
        let service = DeviceCommandService::new(Arc::new(mock_store));
        let cmd = command(
            "insert",
            full_device("00000000-0000-0000-0000-000000000000", "active"),
        );

        let response = service.insert(&cmd).await;

        assert_eq!(response.error_kind(), Some(ErrorKind::InternalError));
        assert_eq!(response.error(), Some("Insert: blank deviceID provided"));
    }

    #[tokio::test]
    async fn test_insert_malformed_payload_is_internal_error() {
        let service = DeviceCommandService::new(Arc::new(MockDeviceStore::new()));
        let mut cmd = command("insert", json!({}));
        cmd.data = b"not json".to_vec();

        let response = service.insert(&cmd).await;

        assert_echoes(&response, &cmd);
        assert_eq!(response.error_kind(), Some(ErrorKind::InternalError));
    }

    #[tokio::test]
    async fn test_insert_wrong_typed_field_is_internal_error() {
        let service = DeviceCommandService::new(Arc::new(MockDeviceStore::new()));
        let cmd = command("insert", json!({ "deviceID": DEVICE_ID, "lot": 7 }));

        let response = service.insert(&cmd).await;

        assert_eq!(response.error_kind(), Some(ErrorKind::InternalError));
    }

    #[tokio::test]
    async fn test_insert_duplicate_is_database_error() {
        let (store, service) = in_memory();
        let first = service
            .insert(&command("insert", full_device(DEVICE_ID, "active")))
            .await;
        assert!(first.is_success());

        let cmd = command("insert", full_device(DEVICE_ID, "retired"));
        let response = service.insert(&cmd).await;

        assert_echoes(&response, &cmd);
        assert_eq!(response.error_kind(), Some(ErrorKind::DatabaseError));
        assert!(response.error().unwrap().starts_with("Insert: error in InsertOne"));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_insert_keeps_caller_storage_id() {
        let (store, service) = in_memory();
        let mut device = full_device(DEVICE_ID, "active");
        device["_id"] = json!("caller-chosen");

        let response = service.insert(&command("insert", device)).await;

        assert_eq!(response.result(), Some(&json!("caller-chosen")));
        let docs = store.documents().await;
        assert_eq!(docs[0].id.as_ref().map(|id| id.as_str()), Some("caller-chosen"));
    }

    #[tokio::test]
    async fn test_update_empty_filter_checked_first() {
        let mut mock_store = MockDeviceStore::new();
        mock_store.expect_update_devices().times(0);
        let service = DeviceCommandService::new(Arc::new(mock_store));
        let cmd = command("update", json!({ "filter": {}, "update": {} }));

        let response = service.update(&cmd).await;

        assert_echoes(&response, &cmd);
        assert_eq!(response.error_kind(), Some(ErrorKind::InternalError));
        assert_eq!(response.error(), Some("Update: blank filter provided"));
    }

    #[tokio::test]
    async fn test_update_missing_keys_decode_as_empty() {
        let service = DeviceCommandService::new(Arc::new(MockDeviceStore::new()));

        let response = service
            .update(&command("update", json!({ "filter": { "lot": "L1" } })))
            .await;

        assert_eq!(response.error(), Some("Update: blank update provided"));
    }

    #[tokio::test]
    async fn test_update_nil_device_id_in_patch_is_rejected() {
        let mut mock_store = MockDeviceStore::new();
        mock_store.expect_update_devices().times(0);
        let service = DeviceCommandService::new(Arc::new(mock_store));
        let cmd = command(
            "update",
            json!({
                "filter": { "lot": "L1" },
                "update": { "deviceID": "00000000-0000-0000-0000-000000000000" },
            }),
        );

        let response = service.update(&cmd).await;

        assert_echoes(&response, &cmd);
        assert_eq!(response.error_kind(), Some(ErrorKind::InternalError));
        assert_eq!(response.error(), Some("Update: found blank deviceID in update"));
    }

    #[tokio::test]
    async fn test_update_null_device_id_in_patch_is_rejected() {
        let service = DeviceCommandService::new(Arc::new(MockDeviceStore::new()));

        let response = service
            .update(&command(
                "update",
                json!({ "filter": { "lot": "L1" }, "update": { "deviceID": null } }),
            ))
            .await;

        assert_eq!(response.error(), Some("Update: found blank deviceID in update"));
    }

    #[tokio::test]
    async fn test_update_non_map_filter_is_decode_error() {
        let service = DeviceCommandService::new(Arc::new(MockDeviceStore::new()));

        let response = service
            .update(&command("update", json!({ "filter": [1, 2], "update": { "lot": "L2" } })))
            .await;

        assert_eq!(response.error_kind(), Some(ErrorKind::InternalError));
        assert!(response.error().unwrap().starts_with("Update: error decoding payload"));
    }

    #[tokio::test]
    async fn test_update_wrong_typed_known_field_is_rejected() {
        let mut mock_store = MockDeviceStore::new();
        mock_store.expect_update_devices().times(0);
        let service = DeviceCommandService::new(Arc::new(mock_store));

        let response = service
            .update(&command(
                "update",
                json!({ "filter": { "lot": "L1" }, "update": { "dateInstalled": "yesterday" } }),
            ))
            .await;

        assert_eq!(response.error_kind(), Some(ErrorKind::InternalError));
    }

    #[tokio::test]
    async fn test_update_success_reports_counts() {
        let mut mock_store = MockDeviceStore::new();
        mock_store
            .expect_update_devices()
            .withf(|filter, patch| {
                filter.get("lot") == Some(&json!("L1")) && patch.get("status") == Some(&json!("retired"))
            })
            .times(1)
            .return_once(|_, _| Ok(UpdateStats { matched: 2, modified: 1 }));
        let service = DeviceCommandService::new(Arc::new(mock_store));
        let cmd = command(
            "update",
            json!({ "filter": { "lot": "L1" }, "update": { "status": "retired" } }),
        );

        let response = service.update(&cmd).await;

        assert_echoes(&response, &cmd);
        assert_eq!(
            response.result(),
            Some(&json!({ "matchedCount": 2, "modifiedCount": 1 }))
        );
    }

    #[tokio::test]
    async fn test_update_store_failure_is_database_error() {
        let mut mock_store = MockDeviceStore::new();
        mock_store
            .expect_update_devices()
            .times(1)
            .return_once(|_, _| Err(StoreError::RepositoryError(anyhow::anyhow!("connection reset"))));
        let service = DeviceCommandService::new(Arc::new(mock_store));

        let response = service
            .update(&command(
                "update",
                json!({ "filter": { "lot": "L1" }, "update": { "status": "retired" } }),
            ))
            .await;

        assert_eq!(response.error_kind(), Some(ErrorKind::DatabaseError));
        assert!(response.error().unwrap().starts_with("Update: error in UpdateMany"));
    }

    #[tokio::test]
    async fn test_update_storage_id_patch_is_database_error() {
        let (_store, service) = in_memory();

        let response = service
            .update(&command(
                "update",
                json!({ "filter": { "lot": "L1" }, "update": { "_id": "other" } }),
            ))
            .await;

        assert_eq!(response.error_kind(), Some(ErrorKind::DatabaseError));
    }

    #[tokio::test]
    async fn test_update_upper_case_device_id_cannot_duplicate_identity() {
        let (store, service) = in_memory();
        let other = "3f1c7a52-8d4e-4b6a-9c1f-2e5d7b9a0c12";
        let mut first = full_device(DEVICE_ID, "active");
        first["name"] = json!("A");
        let mut second = full_device(other, "active");
        second["name"] = json!("B");
        service.insert(&command("insert", first)).await;
        service.insert(&command("insert", second)).await;

        let response = service
            .update(&command(
                "update",
                json!({
                    "filter": { "name": "B" },
                    "update": { "deviceID": DEVICE_ID.to_uppercase() },
                }),
            ))
            .await;

        assert_eq!(response.error_kind(), Some(ErrorKind::DatabaseError));
        let mut ids: Vec<Value> = store
            .documents()
            .await
            .into_iter()
            .map(|doc| doc.fields["deviceID"].clone())
            .collect();
        ids.sort_by_key(|id| id.to_string());
        assert_eq!(ids, vec![json!(DEVICE_ID), json!(other)]);
    }

    #[tokio::test]
    async fn test_update_stores_known_fields_canonically() {
        let mut mock_store = MockDeviceStore::new();
        mock_store
            .expect_update_devices()
            .withf(|_, patch| {
                patch.get("deviceID") == Some(&json!(DEVICE_ID))
                    && patch.get("dateInstalled") == Some(&json!(1700000000))
                    && patch.get("color") == Some(&json!("red"))
            })
            .times(1)
            .return_once(|_, _| Ok(UpdateStats { matched: 1, modified: 1 }));
        let service = DeviceCommandService::new(Arc::new(mock_store));

        let response = service
            .update(&command(
                "update",
                json!({
                    "filter": { "lot": "L1" },
                    "update": {
                        "deviceID": DEVICE_ID.to_uppercase(),
                        "dateInstalled": 1700000000.0,
                        "color": "red",
                    },
                }),
            ))
            .await;

        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_idempotent_update_leaves_store_unchanged() {
        let (store, service) = in_memory();
        for (n, status) in ["active", "retired"].iter().enumerate() {
            let id = format!("3f1c7a52-8d4e-4b6a-9c1f-2e5d7b9a0c1{}", n);
            service.insert(&command("insert", full_device(&id, status))).await;
        }
        let update = json!({ "filter": { "lot": "L1" }, "update": { "status": "active" } });

        let first = service.update(&command("update", update.clone())).await;
        let snapshot = store.documents().await;
        let second = service.update(&command("update", update)).await;

        assert_eq!(first.result(), Some(&json!({ "matchedCount": 2, "modifiedCount": 1 })));
        assert_eq!(second.result(), Some(&json!({ "matchedCount": 2, "modifiedCount": 0 })));
        let mut before = snapshot;
        let mut after = store.documents().await;
        before.sort_by(|a, b| a.id.cmp(&b.id));
        after.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_delete_empty_filter_is_internal_error() {
        let mut mock_store = MockDeviceStore::new();
        mock_store.expect_delete_devices().times(0);
        let service = DeviceCommandService::new(Arc::new(mock_store));
        let cmd = command("delete", json!({}));

        let response = service.delete(&cmd).await;

        assert_echoes(&response, &cmd);
        assert_eq!(response.error_kind(), Some(ErrorKind::InternalError));
        assert_eq!(response.error(), Some("Delete: blank filter provided"));
    }

    #[tokio::test]
    async fn test_delete_non_map_payload_is_internal_error() {
        let service = DeviceCommandService::new(Arc::new(MockDeviceStore::new()));

        let response = service.delete(&command("delete", json!(["lot"]))).await;

        assert_eq!(response.error_kind(), Some(ErrorKind::InternalError));
    }

    #[tokio::test]
    async fn test_delete_reports_deleted_count() {
        let (store, service) = in_memory();
        for n in 0..3 {
            let id = format!("3f1c7a52-8d4e-4b6a-9c1f-2e5d7b9a0c2{}", n);
            service.insert(&command("insert", full_device(&id, "retired"))).await;
        }
        service
            .insert(&command("insert", full_device(DEVICE_ID, "active")))
            .await;

        let cmd = command("delete", json!({ "status": "retired" }));
        let response = service.delete(&cmd).await;

        assert_echoes(&response, &cmd);
        assert_eq!(response.result(), Some(&json!({ "deletedCount": 3 })));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_store_failure_is_database_error() {
        let mut mock_store = MockDeviceStore::new();
        mock_store
            .expect_delete_devices()
            .times(1)
            .return_once(|_| Err(StoreError::RepositoryError(anyhow::anyhow!("timeout"))));
        let service = DeviceCommandService::new(Arc::new(mock_store));

        let response = service.delete(&command("delete", json!({ "lot": "L1" }))).await;

        assert_eq!(response.error_kind(), Some(ErrorKind::DatabaseError));
        assert!(response.error().unwrap().starts_with("Delete: error in DeleteMany"));
    }

    #[tokio::test]
    async fn test_handle_routes_by_action() {
        let mut mock_store = MockDeviceStore::new();
        mock_store
            .expect_delete_devices()
            .times(1)
            .return_once(|_| Ok(DeleteStats { deleted: 0 }));
        let service = DeviceCommandService::new(Arc::new(mock_store));

        let response = service
            .handle(CommandAction::Delete, &command("remove", json!({ "lot": "L9" })))
            .await;

        assert_eq!(response.result(), Some(&json!({ "deletedCount": 0 })));
    }
}
