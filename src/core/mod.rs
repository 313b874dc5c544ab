/// Core Module for sqlstep
///
/// The engine gateway, the statement layer built on top of it, and the
/// shared error type.
pub mod db;
pub mod error;
pub mod gateway;

// Re-export commonly used types for convenience
pub use error::{DriverError, Result};
