//! Normalization ahead of comparison
//!
//! Definitions written by hand and schemas read back from a database describe
//! the same structure with different vocabulary: `varchar` vs `string`, an
//! integer display width, the platform's default collation, a default given as
//! a number instead of a string. The [`Normalizer`] rewrites both sides into
//! one canonical form for a given [`Platform`] so the differ only sees real
//! changes.

use serde_json::Value;

use crate::db::connection::Platform;
use crate::schema::serializer::IMPLICIT_COLLATION;
use crate::schema::types::{is_default_attribute, Column, ForeignKey, Index, Schema, Table};

/// Length given to `string` and `binary` columns that declare none
pub const DEFAULT_STRING_LENGTH: u32 = 255;

const INTEGER_TYPES: [&str; 4] = ["tinyint", "smallint", "integer", "bigint"];
const NUMERIC_TYPES: [&str; 7] = [
    "tinyint", "smallint", "integer", "bigint", "decimal", "float", "boolean",
];
const SIZED_TYPES: [&str; 2] = ["string", "binary"];
const DEFAULT_FK_ACTIONS: [&str; 2] = ["RESTRICT", "NO ACTION"];
const CASE_INSENSITIVE_OPTIONS: [&str; 3] = ["engine", "charset", "collation"];

/// Canonical portable type for a type name, and whether it implies a fixed width
pub fn canonical_type(type_name: &str) -> (String, bool) {
    let lower = type_name.trim().to_ascii_lowercase();
    let (name, fixed) = match lower.as_str() {
        "int" | "int4" | "mediumint" => ("integer", false),
        "int2" => ("smallint", false),
        "int8" => ("bigint", false),
        "varchar" => ("string", false),
        "char" => ("string", true),
        "bool" => ("boolean", false),
        "double" | "real" => ("float", false),
        "numeric" => ("decimal", false),
        "timestamp" => ("datetime", false),
        "tinytext" | "mediumtext" | "longtext" => ("text", false),
        "tinyblob" | "mediumblob" | "longblob" => ("blob", false),
        "varbinary" => ("binary", false),
        _ => return (lower, false),
    };
    (name.to_string(), fixed)
}

pub fn is_integer_type(type_name: &str) -> bool {
    INTEGER_TYPES.contains(&type_name)
}

/// Render a default value the way catalogs report it
fn default_to_string(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Value::String(if *b { "1" } else { "0" }.to_string())),
        Value::String(_) => Some(value.clone()),
        other => Some(Value::String(other.to_string())),
    }
}

/// Rewrites schemas into the canonical vocabulary of one platform
#[derive(Debug, Clone)]
pub struct Normalizer {
    platform: Platform,
    default_collation: Option<String>,
}

impl Normalizer {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            default_collation: None,
        }
    }

    /// Treat `collation` as the platform default and ignore it on columns
    pub fn with_default_collation(mut self, collation: Option<&str>) -> Self {
        self.default_collation = collation.map(str::to_ascii_lowercase);
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn normalize_schema(&self, schema: &Schema) -> Schema {
        Schema {
            tables: schema
                .tables
                .iter()
                .map(|(name, table)| (name.clone(), self.normalize_table(table)))
                .collect(),
            namespaces: schema.namespaces.clone(),
        }
    }

    pub fn normalize_table(&self, table: &Table) -> Table {
        let mut normalized = Table::new(&table.name);
        for column in table.columns.values() {
            normalized.add_column(self.normalize_column(column));
        }
        normalized.indexes = table
            .indexes
            .iter()
            .map(|(name, index)| (name.clone(), self.normalize_index(index)))
            .collect();
        normalized.foreign_keys = table
            .foreign_keys
            .iter()
            .map(|fk| self.normalize_foreign_key(fk))
            .collect();

        if self.platform == Platform::MySql {
            for (key, value) in &table.options {
                let value = match value {
                    Value::String(s) if CASE_INSENSITIVE_OPTIONS.contains(&key.as_str()) => {
                        Value::String(s.to_ascii_lowercase())
                    }
                    Value::Null => continue,
                    other => other.clone(),
                };
                normalized.set_option(key, value);
            }
        }
        normalized
    }

    pub fn normalize_column(&self, column: &Column) -> Column {
        let mut attributes = column.attributes.clone();
        let (mut type_name, implied_fixed) = canonical_type(&column.type_name);
        attributes.fixed |= implied_fixed;

        if type_name == "guid" {
            type_name = "string".to_string();
            attributes.length = Some(36);
            attributes.fixed = true;
        }

        match self.platform {
            Platform::MySql => {
                if type_name == "boolean" {
                    type_name = "tinyint".to_string();
                }
            }
            Platform::Sqlite => {
                if type_name == "enum" {
                    type_name = "text".to_string();
                }
                // only INTEGER PRIMARY KEY columns can autoincrement
                if attributes.autoincrement && is_integer_type(&type_name) {
                    type_name = "integer".to_string();
                    attributes.unsigned = false;
                }
                for key in ["collation", "charset", "comment"] {
                    attributes.extra.shift_remove(key);
                }
            }
        }

        let sized = SIZED_TYPES.contains(&type_name.as_str());
        if sized {
            attributes.length.get_or_insert(DEFAULT_STRING_LENGTH);
        } else {
            attributes.length = None;
            attributes.fixed = false;
        }
        if !NUMERIC_TYPES.contains(&type_name.as_str()) {
            attributes.unsigned = false;
        }
        if type_name != "decimal" {
            attributes.extra.shift_remove("precision");
            attributes.extra.shift_remove("scale");
        }
        if type_name != "enum" {
            attributes.extra.shift_remove("values");
        }

        if let Some(default) = attributes.extra.shift_remove("default") {
            if let Some(default) = default_to_string(&default) {
                attributes.extra.insert("default".to_string(), default);
            }
        }

        let default_collation = self.default_collation.as_deref();
        attributes.extra.retain(|key, value| {
            if is_default_attribute(key, value) {
                return false;
            }
            if key == "collation" {
                let collation = value.as_str().map(str::to_ascii_lowercase);
                return !(collation.as_deref() == Some(IMPLICIT_COLLATION)
                    || (collation.is_some() && collation.as_deref() == default_collation));
            }
            true
        });

        Column::new(&column.name, &type_name).with_attributes(attributes)
    }

    pub fn normalize_index(&self, index: &Index) -> Index {
        let mut normalized = index.clone();
        match self.platform {
            Platform::MySql => {
                let mut flags: Vec<String> =
                    index.flags.iter().map(|f| f.to_ascii_lowercase()).collect();
                flags.sort();
                flags.dedup();
                normalized.flags = flags;
            }
            Platform::Sqlite => {
                normalized.flags.clear();
                normalized.lengths.clear();
            }
        }
        normalized
    }

    pub fn normalize_foreign_key(&self, foreign_key: &ForeignKey) -> ForeignKey {
        let mut normalized = foreign_key.clone();
        normalized.options.clear();
        for (key, value) in &foreign_key.options {
            match (key.as_str(), value) {
                ("onDelete" | "onUpdate", Value::String(action)) => {
                    let action = action.trim().to_ascii_uppercase();
                    if !DEFAULT_FK_ACTIONS.contains(&action.as_str()) {
                        normalized.options.insert(key.clone(), Value::String(action));
                    }
                }
                (_, Value::Null) => {}
                _ => {
                    normalized.options.insert(key.clone(), value.clone());
                }
            }
        }
        normalized
    }
}
