use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Aggregate identifier of the Device aggregate within the event store
pub const DEVICE_AGGREGATE_ID: i8 = 6;

/// Open-ended, ordered mapping of field name to value.
/// Used for filters, patches and the field set of a stored document.
pub type FieldMap = serde_json::Map<String, Value>;

/// Wire/storage field names of a Device record
pub mod fields {
    pub const ID: &str = "_id";
    pub const ITEM_ID: &str = "itemID";
    pub const DEVICE_ID: &str = "deviceID";
    pub const DATE_INSTALLED: &str = "dateInstalled";
    pub const LOT: &str = "lot";
    pub const LAST_MAINTENANCE: &str = "lastMaintenance";
    pub const NAME: &str = "name";
    pub const STATUS: &str = "status";
    pub const SKU: &str = "sku";
}

#[derive(Error, Debug)]
pub enum DecodingError {
    #[error("malformed device payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("device payload must be a JSON object")]
    NotAnObject,

    #[error("field {field} has wrong type: expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field {field} is not a valid identifier: {source}")]
    InvalidIdentifier {
        field: &'static str,
        #[source]
        source: uuid::Error,
    },
}

/// Storage identity assigned by the store when a device is inserted.
/// Rendered as a 20 character xid on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageId(String);

impl StorageId {
    /// Generate a fresh, time-ordered storage identity
    pub fn generate() -> Self {
        Self(xid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for StorageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Domain representation of a Device record.
///
/// Every field is optional so the same type can describe a full record (Create payload)
/// and a partial one (Mutate patch). `None` always means "absent"; a present field with an
/// unexpected type is reported as a [`DecodingError`] instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    pub id: Option<StorageId>,
    pub item_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub date_installed: Option<i64>,
    pub lot: Option<String>,
    pub last_maintenance: Option<i64>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub sku: Option<String>,
}

/// Storage representation of a Device: the storage identity is split out
/// as a native handle, the remaining fields are kept as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDocument {
    pub id: Option<StorageId>,
    pub fields: FieldMap,
}

impl Device {
    /// Decode a device from its JSON wire bytes
    pub fn from_wire(bytes: &[u8]) -> Result<Self, DecodingError> {
        let value: Value = serde_json::from_slice(bytes)?;
        match value {
            Value::Object(map) => Self::from_fields(&map),
            _ => Err(DecodingError::NotAnObject),
        }
    }

    /// Encode a device to JSON wire bytes
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&Value::Object(self.to_fields()))
    }

    /// Decode a device from a wire field map. Unknown keys are ignored.
    pub fn from_fields(map: &FieldMap) -> Result<Self, DecodingError> {
        Ok(Self {
            id: string_field(map, fields::ID)?.map(StorageId::from),
            item_id: uuid_field(map, fields::ITEM_ID)?,
            device_id: uuid_field(map, fields::DEVICE_ID)?,
            date_installed: int_field(map, fields::DATE_INSTALLED)?,
            lot: string_field(map, fields::LOT)?,
            last_maintenance: int_field(map, fields::LAST_MAINTENANCE)?,
            name: string_field(map, fields::NAME)?,
            status: string_field(map, fields::STATUS)?,
            sku: string_field(map, fields::SKU)?,
        })
    }

    /// Encode a device to a wire field map. Absent fields are omitted.
    pub fn to_fields(&self) -> FieldMap {
        let mut map = FieldMap::new();
        if let Some(id) = &self.id {
            map.insert(fields::ID.to_string(), Value::String(id.to_string()));
        }
        map.extend(self.document_fields());
        map
    }

    /// Convert to the storage representation
    pub fn to_document(&self) -> DeviceDocument {
        DeviceDocument {
            id: self.id.clone(),
            fields: self.document_fields(),
        }
    }

    /// Rebuild a device from its storage representation
    pub fn from_document(document: &DeviceDocument) -> Result<Self, DecodingError> {
        let mut device = Self::from_fields(&document.fields)?;
        device.id = document.id.clone();
        Ok(device)
    }

    /// True when the identity is absent or the nil UUID
    pub fn has_blank_device_id(&self) -> bool {
        self.device_id.is_none_or(|id| id.is_nil())
    }

    fn document_fields(&self) -> FieldMap {
        let mut map = FieldMap::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        };

        put(fields::ITEM_ID, self.item_id.map(|id| Value::String(id.to_string())));
        put(fields::DEVICE_ID, self.device_id.map(|id| Value::String(id.to_string())));
        put(fields::DATE_INSTALLED, self.date_installed.map(Value::from));
        put(fields::LOT, self.lot.clone().map(Value::String));
        put(fields::LAST_MAINTENANCE, self.last_maintenance.map(Value::from));
        put(fields::NAME, self.name.clone().map(Value::String));
        put(fields::STATUS, self.status.clone().map(Value::String));
        put(fields::SKU, self.sku.clone().map(Value::String));
        map
    }
}

// JSON null is treated the same as a missing key.
fn present<'a>(map: &'a FieldMap, field: &str) -> Option<&'a Value> {
    map.get(field).filter(|value| !value.is_null())
}

fn string_field(map: &FieldMap, field: &'static str) -> Result<Option<String>, DecodingError> {
    present(map, field)
        .map(|value| {
            value
                .as_str()
                .map(str::to_string)
                .ok_or(DecodingError::WrongType {
                    field,
                    expected: "string",
                })
        })
        .transpose()
}

fn uuid_field(map: &FieldMap, field: &'static str) -> Result<Option<Uuid>, DecodingError> {
    string_field(map, field)?
        .map(|raw| {
            Uuid::parse_str(&raw).map_err(|source| DecodingError::InvalidIdentifier { field, source })
        })
        .transpose()
}

fn int_field(map: &FieldMap, field: &'static str) -> Result<Option<i64>, DecodingError> {
    let wrong_type = DecodingError::WrongType {
        field,
        expected: "integer",
    };

    let Some(value) = present(map, field) else {
        return Ok(None);
    };
    let Value::Number(number) = value else {
        return Err(wrong_type);
    };

    if let Some(int) = number.as_i64() {
        return Ok(Some(int));
    }

    // Producers that route numbers through f64 still send whole values
    match number.as_f64() {
        Some(float) if float.fract() == 0.0 && float >= i64::MIN as f64 && float < i64::MAX as f64 => {
            Ok(Some(float as i64))
        }
        _ => Err(wrong_type),
    }
}
