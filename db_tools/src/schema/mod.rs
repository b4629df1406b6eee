//! Schema module for db_tools
//!
//! The schema model and everything that reads, writes and compares it.

pub mod builder;
pub mod catalog;
pub mod corrections;
pub mod definition;
pub mod diff;
pub mod generator;
pub mod introspector;
pub mod normalize;
pub mod parser;
pub mod pattern;
pub mod serializer;
pub mod types;

// Re-export key types
pub use builder::{add_pattern_tables, build_schema, build_table, definition_matcher};
pub use corrections::{CorrectionRegistry, PlatformCorrection};
pub use definition::{Format, SchemaDefinition, TableDefinition};
pub use diff::{SchemaChange, SchemaDiff};
pub use generator::DdlGenerator;
pub use introspector::SchemaIntrospector;
pub use normalize::Normalizer;
pub use parser::{parse_column, parse_foreign_key, parse_index};
pub use pattern::{PatternMatcher, TableFilter};
pub use serializer::to_definition;
pub use types::{Column, ColumnAttributes, ForeignKey, Index, IndexKind, Schema, Table};
