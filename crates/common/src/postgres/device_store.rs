use crate::domain::{
    fields, DeleteStats, DeviceDocument, DeviceStore, FieldMap, StorageId, StoreError,
    StoreResult, UpdateStats,
};
use crate::postgres::PostgresClient;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tracing::{debug, info, instrument};

type SqlParam = Box<dyn ToSql + Sync + Send>;

/// PostgreSQL implementation of the `DeviceStore` trait.
///
/// Each device is one row: the storage identity in `id` and every other field in a
/// JSONB `document`. A unique expression index on `document->>'deviceID'` enforces
/// identity uniqueness.
#[derive(Clone)]
pub struct PostgresDeviceStore {
    client: PostgresClient,
    table: String,
}

impl PostgresDeviceStore {
    pub fn new(client: PostgresClient, table: &str) -> anyhow::Result<Self> {
        if !is_valid_identifier(table) {
            return Err(anyhow!("invalid device table name: {:?}", table));
        }
        Ok(Self {
            client,
            table: table.to_string(),
        })
    }

    /// Create the device table and its unique identity index when missing
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        let conn = self.client.get_connection().await?;

        conn.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                 id TEXT PRIMARY KEY,
                 document JSONB NOT NULL,
                 created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                 updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
             );
             CREATE UNIQUE INDEX IF NOT EXISTS {table}_device_id_index
                 ON {table} ((document ->> '{device_id}'));",
            table = self.table,
            device_id = fields::DEVICE_ID,
        ))
        .await
        .with_context(|| format!("failed to ensure schema for table {}", self.table))?;

        info!(table = %self.table, "device table ready");
        Ok(())
    }
}

#[async_trait]
impl DeviceStore for PostgresDeviceStore {
    #[instrument(skip(self, document), fields(table = %self.table))]
    async fn insert_device(&self, document: DeviceDocument) -> StoreResult<StorageId> {
        let conn = self.client.get_connection().await?;

        let id = document.id.unwrap_or_else(StorageId::generate);
        let device_id = document
            .fields
            .get(fields::DEVICE_ID)
            .map(display_value)
            .unwrap_or_else(|| id.to_string());
        let body = Value::Object(document.fields);

        let result = conn
            .execute(
                &format!("INSERT INTO {} (id, document) VALUES ($1, $2::jsonb)", self.table),
                &[&id.as_str(), &body],
            )
            .await;

        if let Err(e) = result {
            return Err(map_write_error(e, device_id));
        }

        debug!(storage_id = %id, "inserted device");
        Ok(id)
    }

    #[instrument(skip(self, filter, patch), fields(table = %self.table, filter_keys = filter.len(), patch_keys = patch.len()))]
    async fn update_devices(&self, filter: FieldMap, patch: FieldMap) -> StoreResult<UpdateStats> {
        if patch.contains_key(fields::ID) {
            return Err(StoreError::ImmutableField(fields::ID.to_string()));
        }

        let conn = self.client.get_connection().await?;

        let device_id = patch.get(fields::DEVICE_ID).map(display_value);
        let (clause, filter_params) = build_filter_clause(&filter, 2);
        let sql = format!(
            "WITH matched AS (
                 SELECT id, document FROM {table} WHERE {clause} FOR UPDATE
             ), updated AS (
                 UPDATE {table} AS t
                 SET document = t.document || $1::jsonb, updated_at = now()
                 FROM matched AS m
                 WHERE t.id = m.id AND (m.document || $1::jsonb) <> m.document
                 RETURNING t.id
             )
             SELECT (SELECT COUNT(*) FROM matched), (SELECT COUNT(*) FROM updated)",
            table = self.table,
        );

        let patch_body: SqlParam = Box::new(Value::Object(patch));
        let params: Vec<SqlParam> = std::iter::once(patch_body).chain(filter_params).collect();
        let refs = param_refs(&params);

        let row = match conn.query_one(&sql, &refs).await {
            Ok(row) => row,
            Err(e) => {
                return Err(map_write_error(
                    e,
                    device_id.unwrap_or_else(|| "<unchanged>".to_string()),
                ))
            }
        };

        let matched: i64 = row.get(0);
        let modified: i64 = row.get(1);
        debug!(matched, modified, "updated devices");

        Ok(UpdateStats {
            matched: matched as u64,
            modified: modified as u64,
        })
    }

    #[instrument(skip(self, filter), fields(table = %self.table, filter_keys = filter.len()))]
    async fn delete_devices(&self, filter: FieldMap) -> StoreResult<DeleteStats> {
        let conn = self.client.get_connection().await?;

        let (clause, params) = build_filter_clause(&filter, 1);
        let refs = param_refs(&params);

        let deleted = conn
            .execute(&format!("DELETE FROM {} WHERE {}", self.table, clause), &refs)
            .await
            .map_err(|e| StoreError::RepositoryError(e.into()))?;

        debug!(deleted, "deleted devices");
        Ok(DeleteStats { deleted })
    }
}

fn map_write_error(e: tokio_postgres::Error, device_id: String) -> StoreError {
    if let Some(db_err) = e.as_db_error() {
        // PostgreSQL error code 23505 is unique_violation
        if db_err.code().code() == "23505" {
            return StoreError::DeviceAlreadyExists(device_id);
        }
    }
    StoreError::RepositoryError(e.into())
}

fn display_value(value: &Value) -> String {
    value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

fn param_refs(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|param| param.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

/// Build a `WHERE` clause matching every filter entry by equality.
/// Placeholders are numbered from `first_param`.
fn build_filter_clause(filter: &FieldMap, first_param: usize) -> (String, Vec<SqlParam>) {
    let mut conditions = Vec::with_capacity(filter.len());
    let mut params: Vec<SqlParam> = Vec::new();

    for (key, value) in filter {
        let next = first_param + params.len();
        if key == fields::ID {
            match value.as_str() {
                Some(id) => {
                    conditions.push(format!("id = ${}", next));
                    params.push(Box::new(id.to_string()));
                }
                // Storage ids are always strings
                None => conditions.push("FALSE".to_string()),
            }
        } else {
            conditions.push(format!("(document -> ${}::text) = ${}::jsonb", next, next + 1));
            params.push(Box::new(key.clone()));
            params.push(Box::new(value.clone()));
        }
    }

    if conditions.is_empty() {
        return ("TRUE".to_string(), params);
    }
    (conditions.join(" AND "), params)
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 48 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
