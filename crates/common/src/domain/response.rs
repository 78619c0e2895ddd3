use crate::domain::DecodedCommand;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Stable classification of a failed command. The numeric code is the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or invalid input, or a failure inside the service itself
    InternalError,
    /// The store rejected or failed an operation on otherwise valid input
    DatabaseError,
    /// Reserved for user-caused domain errors
    UserError,
}

impl ErrorKind {
    pub fn code(&self) -> i16 {
        match self {
            ErrorKind::InternalError => 2,
            ErrorKind::DatabaseError => 3,
            ErrorKind::UserError => 4,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            2 => Some(ErrorKind::InternalError),
            3 => Some(ErrorKind::DatabaseError),
            4 => Some(ErrorKind::UserError),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InternalError => "InternalError",
            ErrorKind::DatabaseError => "DatabaseError",
            ErrorKind::UserError => "UserError",
        };
        write!(f, "{}({})", name, self.code())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i16(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i16::deserialize(deserializer)?;
        ErrorKind::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error code: {}", code)))
    }
}

/// Outcome carried by a response: a result on success, a message and kind on failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    Success {
        result: Value,
    },
    Failure {
        error: String,
        #[serde(rename = "errorCode")]
        error_code: ErrorKind,
    },
}

/// Response produced for every processed command, correlated to its request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    #[serde(rename = "aggregateID")]
    pub aggregate_id: i8,
    #[serde(rename = "correlationID")]
    pub correlation_id: Uuid,
    pub event_action: String,
    pub service_action: String,
    pub uuid: Uuid,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ResponseEnvelope {
    /// Successful response echoing the command's routing identifiers
    pub fn success(command: &DecodedCommand, result: Value) -> Self {
        Self::with_outcome(command, Outcome::Success { result })
    }

    /// Failed response echoing the command's routing identifiers
    pub fn failure(command: &DecodedCommand, kind: ErrorKind, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.is_empty() {
            message = format!("{} without description", kind);
        }
        Self::with_outcome(
            command,
            Outcome::Failure {
                error: message,
                error_code: kind,
            },
        )
    }

    fn with_outcome(command: &DecodedCommand, outcome: Outcome) -> Self {
        Self {
            aggregate_id: command.aggregate_id,
            correlation_id: command.correlation_id,
            event_action: command.event_action.clone(),
            service_action: command.service_action.clone(),
            uuid: command.uuid,
            outcome,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Success { result } => Some(result),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { error, .. } => Some(error),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { error_code, .. } => Some(*error_code),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }
}
