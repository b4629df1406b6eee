//! Textual schema definition documents
//!
//! A definition document maps table names to their column, index, foreign-key
//! and option definitions. It can be stored as JSON, YAML or TOML.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Table option naming a wildcard pattern for table families sharing one definition
pub const PATTERN_OPTION: &str = "pattern";

/// Definition of one table in compact text form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub indexes: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub options: IndexMap<String, Value>,
}

impl TableDefinition {
    /// Wildcard pattern declared through the `pattern` option
    pub fn pattern(&self) -> Option<&str> {
        self.options.get(PATTERN_OPTION).and_then(Value::as_str)
    }
}

/// Ordered mapping of table name to definition
pub type SchemaDefinition = IndexMap<String, TableDefinition>;

/// Serialization format of a definition document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        ext.parse().map_err(|_| {
            Error::ConfigError(format!(
                "cannot tell the format of '{}' from its extension",
                path.display()
            ))
        })
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "yaml" | "yml" => Ok(Format::Yaml),
            "toml" => Ok(Format::Toml),
            other => Err(Error::ConfigError(format!("unsupported format '{}'", other))),
        }
    }
}

/// Load a definition document from a file, picking the format from its extension
pub fn load_from_file(path: &Path) -> Result<SchemaDefinition> {
    let format = Format::from_path(path)?;
    let content = fs::read_to_string(path).map_err(|e| {
        Error::ConfigError(format!("Failed to read '{}': {}", path.display(), e))
    })?;
    parse(&content, format).map_err(|e| match e {
        Error::SerializationError(msg) => {
            Error::ValidationError(format!("data in file {} is invalid: {}", path.display(), msg))
        }
        other => other,
    })
}

/// Parse a definition document
pub fn parse(content: &str, format: Format) -> Result<SchemaDefinition> {
    let definition = match format {
        Format::Json => serde_json::from_str(content)?,
        Format::Yaml => serde_yaml::from_str(content)?,
        Format::Toml => {
            toml::from_str(content).map_err(|e| Error::SerializationError(e.to_string()))?
        }
    };
    Ok(definition)
}

/// Render a definition document
pub fn to_string(definition: &SchemaDefinition, format: Format) -> Result<String> {
    let out = match format {
        Format::Json => {
            let mut out = serde_json::to_string_pretty(definition)?;
            out.push('\n');
            out
        }
        Format::Yaml => serde_yaml::to_string(definition)?,
        Format::Toml => {
            toml::to_string(definition).map_err(|e| Error::SerializationError(e.to_string()))?
        }
    };
    Ok(out)
}

/// Set the storage engine on every table that does not name one
pub fn apply_engine(definition: &mut SchemaDefinition, engine: &str) {
    for table in definition.values_mut() {
        let has_engine = table
            .options
            .get("engine")
            .map_or(false, |v| !v.is_null() && v.as_str() != Some(""));
        if !has_engine {
            table
                .options
                .insert("engine".to_string(), Value::String(engine.to_string()));
        }
    }
}
