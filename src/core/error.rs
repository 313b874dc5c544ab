/// Driver Error Module
///
/// This module defines the error taxonomy of the driver. Every failed call
/// surfaces exactly one `DriverError` to its immediate caller.
use thiserror::Error;

/// Comprehensive error type for the driver.
///
/// The variants split along who is at fault:
/// - caller misuse (`IllegalState`, `QueryShape`, `ParameterBinding`, `CursorState`)
/// - recoverable contention (`DatabaseBusy`)
/// - engine failures (`Engine`, `InternalConsistency`)
/// - ambient failures (opening, configuration, I/O)
#[derive(Error, Debug)]
pub enum DriverError {
    /// Used after close, or not yet prepared
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Row-returning path used for an update, or the other way round
    #[error("Query shape error: {0}")]
    QueryShape(String),

    /// Parameter position out of range or rejected by the engine
    #[error("Parameter binding error: {0}")]
    ParameterBinding(String),

    /// Column read without a current row, or on a stale cursor
    #[error("Cursor state error: {0}")]
    CursorState(String),

    /// The database is locked by someone else; the caller may retry
    #[error("database locked")]
    DatabaseBusy,

    /// The engine reported API misuse. Always a driver defect.
    #[error("internal consistency error: {0}")]
    InternalConsistency(String),

    /// Native execution failure, message taken from the engine
    #[error("Engine error ({code}): {message}")]
    Engine { code: i32, message: String },

    /// A batch stopped at `index`; `partial` holds the change counts of
    /// the entries that completed before it.
    #[error("batch entry {index}: {source}")]
    Batch {
        index: usize,
        partial: Vec<i64>,
        #[source]
        source: Box<DriverError>,
    },

    /// Raised by a user-defined SQL function; aborts the calling statement
    #[error("Function error: {0}")]
    Function(String),

    /// Errors raised by rusqlite while opening or configuring a session
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The embedded engine could not be initialised for this process
    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON rendering errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DriverError {
    pub(crate) fn closed(what: &str) -> Self {
        DriverError::IllegalState(format!("{} is closed", what))
    }

    /// True for errors the caller may retry after a backoff.
    pub fn is_busy(&self) -> bool {
        matches!(self, DriverError::DatabaseBusy)
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, DriverError::IllegalState(_))
    }
}

/// Type alias for Result to use DriverError as the error type.
pub type Result<T> = std::result::Result<T, DriverError>;
