//! Error types for mongolier

use mongodb::error::{ErrorKind, WriteFailure, RETRYABLE_WRITE_ERROR};
use thiserror::Error;

/// Result type alias for mongolier operations
pub type Result<T> = std::result::Result<T, MongolierError>;

/// Server error codes that mean the node we were talking to is no longer the
/// primary (or is going away), or that the socket to it failed.
const RECONNECT_CODES: &[i32] = &[
    6,     // HostUnreachable
    7,     // HostNotFound
    89,    // NetworkTimeout
    91,    // ShutdownInProgress
    189,   // PrimarySteppedDown
    9001,  // SocketException
    10107, // NotWritablePrimary
    11600, // InterruptedAtShutdown
    11602, // InterruptedDueToReplStateChange
    13435, // NotPrimaryNoSecondaryOk
    13436, // NotPrimaryOrSecondary
];

/// Server error code for a unique index violation
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Unified error type for all mongolier operations
#[derive(Error, Debug, Clone)]
pub enum MongolierError {
    /// Malformed connection descriptor, bad URI, or unreachable target at
    /// construction time. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An error raised by the MongoDB driver, passed through unchanged.
    #[error(transparent)]
    Driver(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fixture error: {0}")]
    Fixture(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MongolierError {
    /// Returns true if this is the driver's transient auto-reconnect condition
    pub fn is_auto_reconnect(&self) -> bool {
        match self {
            MongolierError::Driver(err) => is_auto_reconnect(err),
            _ => false,
        }
    }

    /// Returns true if this is a duplicate key violation
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            MongolierError::Driver(err) => is_duplicate_key(err),
            _ => false,
        }
    }

    /// Returns the underlying driver error, if any
    pub fn driver_error(&self) -> Option<&mongodb::error::Error> {
        match self {
            MongolierError::Driver(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors that can tell whether they are the transient auto-reconnect
/// condition. The retry combinator is generic over this trait.
pub trait Reconnectable {
    fn is_auto_reconnect(&self) -> bool;
}

impl Reconnectable for MongolierError {
    fn is_auto_reconnect(&self) -> bool {
        MongolierError::is_auto_reconnect(self)
    }
}

impl Reconnectable for mongodb::error::Error {
    fn is_auto_reconnect(&self) -> bool {
        is_auto_reconnect(self)
    }
}

/// Classifies a driver error as the auto-reconnect condition: the client lost
/// its connection to the current primary and a retry after a short delay is
/// expected to reach a newly elected one.
pub fn is_auto_reconnect(err: &mongodb::error::Error) -> bool {
    if err.contains_label(RETRYABLE_WRITE_ERROR) {
        return true;
    }

    match &*err.kind {
        ErrorKind::Io(_) => true,
        ErrorKind::ConnectionPoolCleared { .. } => true,
        ErrorKind::ServerSelection { .. } => true,
        ErrorKind::Command(command_err) => RECONNECT_CODES.contains(&command_err.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(wc_err)) => {
            RECONNECT_CODES.contains(&wc_err.code)
        }
        _ => false,
    }
}

/// Returns true if the driver reported a unique index violation
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(write_err)) => {
            write_err.code == DUPLICATE_KEY_CODE
        }
        ErrorKind::InsertMany(insert_err) => insert_err
            .write_errors
            .as_ref()
            .map(|errors| errors.iter().all(|e| e.code == DUPLICATE_KEY_CODE))
            .unwrap_or(false),
        ErrorKind::Command(command_err) => command_err.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

/// Returns true if the driver reported a unique index violation on `_id`
/// only, i.e. the documents being written already exist under the same ids
pub fn is_duplicate_id_key(err: &mongodb::error::Error) -> bool {
    let on_id = |code: i32, message: &str| code == DUPLICATE_KEY_CODE && message.contains("_id_");

    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(write_err)) => {
            on_id(write_err.code, &write_err.message)
        }
        ErrorKind::InsertMany(insert_err) => {
            insert_err.write_concern_error.is_none()
                && insert_err
                    .write_errors
                    .as_ref()
                    .map(|errors| {
                        !errors.is_empty() && errors.iter().all(|e| on_id(e.code, &e.message))
                    })
                    .unwrap_or(false)
        }
        _ => false,
    }
}

impl From<serde_json::Error> for MongolierError {
    fn from(err: serde_json::Error) -> Self {
        MongolierError::Serialization(err.to_string())
    }
}

impl From<bson::ser::Error> for MongolierError {
    fn from(err: bson::ser::Error) -> Self {
        MongolierError::Serialization(format!("BSON serialization error: {}", err))
    }
}

impl From<bson::de::Error> for MongolierError {
    fn from(err: bson::de::Error) -> Self {
        MongolierError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}
