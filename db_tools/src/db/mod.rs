//! Database module for db_tools
//!
//! Connections and statement execution.

pub mod connection;
pub mod executor;

// Re-export key types
pub use connection::{ConnectionId, DatabaseConnection, Platform};
pub use executor::{BatchReport, SqlExecutor, StatementFailure};
