use crate::domain::FieldMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// An inbound instruction for the Device aggregate, already decoded by the poller.
///
/// `data` is opaque until a handler interprets it: a full Device record for inserts,
/// a `{"filter", "update"}` pair for updates and a bare filter for deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedCommand {
    #[serde(rename = "aggregateID")]
    pub aggregate_id: i8,
    #[serde(rename = "correlationID")]
    pub correlation_id: Uuid,
    #[serde(rename = "userUUID")]
    pub user_uuid: Uuid,
    pub version: i64,
    pub year_bucket: i16,
    pub nano_time: i64,
    pub event_action: String,
    #[serde(default)]
    pub service_action: String,
    pub uuid: Uuid,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// The three command kinds handled by the aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandAction {
    Insert,
    Update,
    Delete,
}

impl CommandAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandAction::Insert => "insert",
            CommandAction::Update => "update",
            CommandAction::Delete => "delete",
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown command action: {0}")]
pub struct UnknownActionError(pub String);

impl FromStr for CommandAction {
    type Err = UnknownActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" | "create" => Ok(CommandAction::Insert),
            "update" | "mutate" => Ok(CommandAction::Update),
            "delete" | "remove" => Ok(CommandAction::Delete),
            _ => Err(UnknownActionError(s.to_string())),
        }
    }
}

/// Error attached upstream to a delivery, before the command reaches a handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct UpstreamError(pub String);

impl UpstreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A single arrival on one of the command channels
pub type CommandDelivery = Result<DecodedCommand, UpstreamError>;

/// Payload of an update command
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MutatePayload {
    #[serde(default)]
    pub filter: FieldMap,
    #[serde(default)]
    pub update: FieldMap,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_aliases() {
        assert_eq!("insert".parse::<CommandAction>(), Ok(CommandAction::Insert));
        assert_eq!("create".parse::<CommandAction>(), Ok(CommandAction::Insert));
        assert_eq!("Mutate".parse::<CommandAction>(), Ok(CommandAction::Update));
        assert_eq!("remove".parse::<CommandAction>(), Ok(CommandAction::Delete));
        assert_eq!(
            "query".parse::<CommandAction>(),
            Err(UnknownActionError("query".to_string()))
        );
    }

    #[test]
    fn test_decoded_command_wire_format() {
        let correlation_id = Uuid::new_v4();
        let user_uuid = Uuid::new_v4();
        let uuid = Uuid::new_v4();

        let wire = json!({
            "aggregateID": 6,
            "correlationID": correlation_id,
            "userUUID": user_uuid,
            "version": 3,
            "yearBucket": 2018,
            "nanoTime": 1_538_000_000_000_000_000_i64,
            "eventAction": "delete",
            "serviceAction": "deleteDevice",
            "uuid": uuid,
            "data": "eyJ4IjoxfQ=="
        });

        let command: DecodedCommand = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(command.aggregate_id, 6);
        assert_eq!(command.correlation_id, correlation_id);
        assert_eq!(command.year_bucket, 2018);
        assert_eq!(command.data, br#"{"x":1}"#.to_vec());

        assert_eq!(serde_json::to_value(&command).unwrap(), wire);
    }

    #[test]
    fn test_mutate_payload_defaults_missing_keys() {
        let payload: MutatePayload = serde_json::from_str(r#"{"filter":{"x":1}}"#).unwrap();
        assert_eq!(payload.filter.len(), 1);
        assert!(payload.update.is_empty());
    }

    #[test]
    fn test_mutate_payload_rejects_non_map_filter() {
        let result = serde_json::from_str::<MutatePayload>(r#"{"filter":"x","update":{}}"#);
        assert!(result.is_err());
    }
}
