/// Database Module
///
/// The statement layer of the driver, split by concern:
/// - **Connection** (`connection.rs`): owns the engine session and the
///   registry of live statements
/// - **Statement Core** (`stmt_core.rs`): the one owner of a compiled
///   handle, its result state and the step loop
/// - **Statement** (`statement.rs`) and **PreparedStatement** (`prepared.rs`):
///   execution front ends over a core
/// - **Cursor** (`cursor.rs`): row iteration over the core that produced it
/// - **Value** (`value.rs`): parameter and column values
///
/// ## Error Handling
///
/// Every operation returns `DriverError`; see `crate::core::error`.
pub mod connection;
pub mod cursor;
pub mod prepared;
pub mod statement;
pub(crate) mod stmt_core;
pub mod value;

pub use connection::Connection;
pub use cursor::Cursor;
pub use prepared::{ParameterMetadata, PreparedStatement};
pub use statement::Statement;
pub use stmt_core::ColumnMetadata;
pub use value::Value;
