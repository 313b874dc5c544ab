/// Engine Gateway Module
///
/// The gateway is the only place that talks to the embedded engine. Every
/// primitive is synchronous, and an implementation must serialize all calls
/// against one session (the engine session is not reentrant), with the single
/// exception of `interrupt`, which has to reach a step that is in flight.
///
/// ## Handles
///
/// Compiled statements are referred to by an opaque `StmtHandle`. The value 0
/// (`StmtHandle::NULL`) means "no handle". A handle that has been finalized
/// must never resolve to a live statement again; primitives called with such
/// a handle report `MISUSE` instead of touching freed memory.
pub mod sqlite;

use crate::core::db::Value;
use crate::core::Result;
use rusqlite::ffi;
use std::fmt;

pub use sqlite::{initialize, EngineInfo, SqliteGateway};

/// Raw engine result code of a successful primitive.
pub const CODE_OK: i32 = ffi::SQLITE_OK;
/// Raw engine result code for API misuse (including unknown handles).
pub const CODE_MISUSE: i32 = ffi::SQLITE_MISUSE;

/// Opaque identifier of a compiled statement owned by the engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StmtHandle(pub(crate) u64);

impl StmtHandle {
    /// The "no handle" sentinel.
    pub const NULL: StmtHandle = StmtHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StmtHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stmt#{}", self.0)
    }
}

/// Outcome of a single `step` primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCode {
    /// A row is available for column reads
    Row,
    /// The statement ran to completion
    Done,
    /// The database is locked by another connection or process
    Busy,
    /// The engine detected API misuse
    Misuse,
    /// Any other failure, with the raw engine code
    Error(i32),
}

impl StepCode {
    /// Translates a raw engine result code returned by step. Extended codes
    /// are classified by their primary code.
    pub fn from_raw(rc: i32) -> Self {
        match rc & 0xff {
            ffi::SQLITE_ROW => StepCode::Row,
            ffi::SQLITE_DONE => StepCode::Done,
            ffi::SQLITE_BUSY => StepCode::Busy,
            ffi::SQLITE_MISUSE => StepCode::Misuse,
            _ => StepCode::Error(rc),
        }
    }
}

/// Storage class of a column value in the current row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Blob,
    Null,
}

impl ColumnType {
    pub fn from_raw(code: i32) -> Self {
        match code {
            ffi::SQLITE_INTEGER => ColumnType::Integer,
            ffi::SQLITE_FLOAT => ColumnType::Float,
            ffi::SQLITE_TEXT => ColumnType::Text,
            ffi::SQLITE_BLOB => ColumnType::Blob,
            _ => ColumnType::Null,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
            ColumnType::Null => "NULL",
        }
    }
}

/// Constraint flags of the table column a result column reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnConstraints {
    pub not_null: bool,
    pub primary_key: bool,
    pub autoincrement: bool,
}

/// A user-defined scalar SQL function. It receives the call's arguments and
/// returns the result value; an error aborts the calling statement with
/// the error's text as the engine message.
pub type ScalarFunction = Box<dyn Fn(&[Value]) -> Result<Value> + Send + 'static>;

/// Primitive operations against one engine session.
///
/// Methods returning `i32` return the raw engine result code (`CODE_OK` on
/// success). Column accessors are only meaningful while the statement sits
/// on a row; called with an unknown handle they return the empty value.
pub trait EngineGateway: Send + Sync {
    /// Compiles one SQL statement and returns its handle.
    fn prepare(&self, sql: &str) -> Result<StmtHandle>;
    fn step(&self, stmt: StmtHandle) -> StepCode;
    fn reset(&self, stmt: StmtHandle) -> i32;
    /// Resets a statement whose step failed and returns the engine message
    /// that reset leaves behind. Both happen under one session lock, so no
    /// other statement can overwrite the message in between.
    fn reset_with_message(&self, stmt: StmtHandle) -> String;
    /// Releases the native statement. The handle is dead afterwards no
    /// matter what code is returned.
    fn finalize(&self, stmt: StmtHandle) -> i32;
    fn clear_bindings(&self, stmt: StmtHandle) -> i32;
    fn bind_parameter_count(&self, stmt: StmtHandle) -> usize;
    /// Name of parameter `pos` (`:name`, `@name`, `$name`, `?NNN`); `None`
    /// for a plain `?`.
    fn bind_parameter_name(&self, stmt: StmtHandle, pos: usize) -> Option<String>;
    /// Position of the parameter called `name`, if there is one.
    fn bind_parameter_index(&self, stmt: StmtHandle, name: &str) -> Option<usize>;

    fn bind_null(&self, stmt: StmtHandle, pos: usize) -> i32;
    fn bind_int(&self, stmt: StmtHandle, pos: usize, value: i32) -> i32;
    fn bind_long(&self, stmt: StmtHandle, pos: usize, value: i64) -> i32;
    fn bind_double(&self, stmt: StmtHandle, pos: usize, value: f64) -> i32;
    fn bind_text(&self, stmt: StmtHandle, pos: usize, value: &str) -> i32;
    fn bind_blob(&self, stmt: StmtHandle, pos: usize, value: &[u8]) -> i32;

    fn column_count(&self, stmt: StmtHandle) -> usize;
    fn column_type(&self, stmt: StmtHandle, col: usize) -> ColumnType;
    fn column_name(&self, stmt: StmtHandle, col: usize) -> Option<String>;
    fn column_decltype(&self, stmt: StmtHandle, col: usize) -> Option<String>;
    fn column_table_name(&self, stmt: StmtHandle, col: usize) -> Option<String>;
    /// Constraints of the source column, `None` for an expression column.
    fn column_constraints(&self, stmt: StmtHandle, col: usize) -> Option<ColumnConstraints>;
    fn column_text(&self, stmt: StmtHandle, col: usize) -> Option<String>;
    fn column_blob(&self, stmt: StmtHandle, col: usize) -> Option<Vec<u8>>;
    fn column_double(&self, stmt: StmtHandle, col: usize) -> f64;
    fn column_long(&self, stmt: StmtHandle, col: usize) -> i64;
    fn column_int(&self, stmt: StmtHandle, col: usize) -> i32;

    /// Text of the most recent engine error on this session.
    fn last_error_message(&self) -> String;
    /// Rows changed by the most recently completed statement.
    fn change_count(&self) -> i64;

    /// Asks the engine to abort the statement currently running. Must not
    /// wait for the session lock.
    fn interrupt(&self);
    fn busy_timeout(&self, ms: u32) -> Result<()>;
    /// Runs a script of one or more statements, discarding any rows.
    fn exec(&self, sql: &str) -> Result<()>;
    /// Registers `func` as the SQL function `name` taking `n_args`
    /// arguments (-1 for any number), replacing an earlier registration.
    fn create_function(
        &self,
        name: &str,
        n_args: i32,
        deterministic: bool,
        func: ScalarFunction,
    ) -> Result<()>;
    fn remove_function(&self, name: &str, n_args: i32) -> Result<()>;
    fn libversion(&self) -> String;
    /// Finalizes every outstanding statement and ends the session.
    fn close(&self) -> Result<()>;
}
