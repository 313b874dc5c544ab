// Core infrastructure modules
pub mod config;
pub mod core;

#[cfg(test)]
mod test_utils;

pub use crate::config::{load_config, DriverConfig};
pub use crate::core::db::{
    ColumnMetadata, Connection, Cursor, ParameterMetadata, PreparedStatement, Statement, Value,
};
pub use crate::core::gateway::{
    ColumnConstraints, ColumnType, EngineGateway, ScalarFunction, SqliteGateway, StepCode,
    StmtHandle,
};
pub use crate::core::{DriverError, Result};
