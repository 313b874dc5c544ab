/// Parameter and column values.
use crate::core::gateway::{ColumnType, EngineGateway, StmtHandle};
use rusqlite::types::ValueRef;
use serde::Serialize;

/// A value that can be bound to a parameter or read from a column.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Int(i32),
    Long(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Binds this value at 1-based `pos`, returning the engine result code.
    pub(crate) fn bind(&self, gateway: &dyn EngineGateway, stmt: StmtHandle, pos: usize) -> i32 {
        match self {
            Value::Null => gateway.bind_null(stmt, pos),
            Value::Int(v) => gateway.bind_int(stmt, pos, *v),
            Value::Long(v) => gateway.bind_long(stmt, pos, *v),
            Value::Double(v) => gateway.bind_double(stmt, pos, *v),
            Value::Text(v) => gateway.bind_text(stmt, pos, v),
            Value::Blob(v) => gateway.bind_blob(stmt, pos, v),
        }
    }

    /// Reads column `col` of the current row, typed by its storage class.
    pub(crate) fn read(gateway: &dyn EngineGateway, stmt: StmtHandle, col: usize) -> Value {
        match gateway.column_type(stmt, col) {
            ColumnType::Integer => Value::Long(gateway.column_long(stmt, col)),
            ColumnType::Float => Value::Double(gateway.column_double(stmt, col)),
            ColumnType::Text => gateway.column_text(stmt, col).map(Value::Text).unwrap_or_default(),
            ColumnType::Blob => gateway.column_blob(stmt, col).map(Value::Blob).unwrap_or_default(),
            ColumnType::Null => Value::Null,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(i32::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

/// Arguments handed to a user-defined function.
impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Long(i),
            ValueRef::Real(f) => Value::Double(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

/// Results returned from a user-defined function.
impl From<Value> for rusqlite::types::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => rusqlite::types::Value::Null,
            Value::Int(i) => rusqlite::types::Value::Integer(i64::from(i)),
            Value::Long(i) => rusqlite::types::Value::Integer(i),
            Value::Double(f) => rusqlite::types::Value::Real(f),
            Value::Text(s) => rusqlite::types::Value::Text(s),
            Value::Blob(b) => rusqlite::types::Value::Blob(b),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
