//! Utilities for db_tools

pub mod logging;
pub mod naming;

pub use naming::{format_name, get_foreign_key_name, truncate_identifier};
