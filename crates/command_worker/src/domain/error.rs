use common::domain::{DecodingError, ErrorKind, StoreError};
use std::fmt;
use thiserror::Error;

/// Handler a failure originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Insert => "Insert",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
        };
        f.write_str(name)
    }
}

/// Payload rules checked before the store is touched
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("deviceID not provided")]
    MissingDeviceId,

    #[error("blank deviceID provided")]
    BlankDeviceId,

    #[error("blank filter provided")]
    BlankFilter,

    #[error("blank update provided")]
    BlankUpdate,

    #[error("found blank deviceID in update")]
    BlankDeviceIdInUpdate,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{operation}: error decoding payload: {source}")]
    Decode {
        operation: Operation,
        #[source]
        source: DecodingError,
    },

    #[error("{operation}: {source}")]
    Validation {
        operation: Operation,
        #[source]
        source: ValidationError,
    },

    #[error("{operation}: error in {stage}: {source}")]
    Database {
        operation: Operation,
        stage: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("{operation}: error encoding result: {source}")]
    ResultEncoding {
        operation: Operation,
        #[source]
        source: serde_json::Error,
    },
}

impl CommandError {
    pub fn decode(operation: Operation, source: impl Into<DecodingError>) -> Self {
        Self::Decode {
            operation,
            source: source.into(),
        }
    }

    pub fn validation(operation: Operation, source: ValidationError) -> Self {
        Self::Validation { operation, source }
    }

    pub fn database(operation: Operation, stage: &'static str, source: StoreError) -> Self {
        Self::Database {
            operation,
            stage,
            source,
        }
    }

    /// Stable error kind reported to the caller
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::Database { .. } => ErrorKind::DatabaseError,
            CommandError::Decode { .. }
            | CommandError::Validation { .. }
            | CommandError::ResultEncoding { .. } => ErrorKind::InternalError,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            CommandError::Decode { operation, .. }
            | CommandError::Validation { operation, .. }
            | CommandError::Database { operation, .. }
            | CommandError::ResultEncoding { operation, .. } => *operation,
        }
    }
}
