//! Type definitions for database schema objects

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Error, Result};

/// Key under which a table's primary key is stored in its index map
pub const PRIMARY_KEY_NAME: &str = "PRIMARY";

/// Represents a complete database schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: IndexMap<String, Table>,
    pub namespaces: Vec<String>,
}

impl Schema {
    /// Create a new empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table to the schema. Table names are unique.
    pub fn add_table(&mut self, table: Table) -> Result<()> {
        if self.tables.contains_key(&table.name) {
            return Err(Error::ValidationError(format!(
                "table '{}' is defined more than once",
                table.name
            )));
        }
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}

/// Represents a database table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: IndexMap<String, Column>,
    pub indexes: IndexMap<String, Index>,
    pub foreign_keys: Vec<ForeignKey>,
    pub options: IndexMap<String, Value>,
}

impl Table {
    /// Create a new table with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: IndexMap::new(),
            indexes: IndexMap::new(),
            foreign_keys: Vec::new(),
            options: IndexMap::new(),
        }
    }

    /// Add a column to the table, replacing any column with the same name
    pub fn add_column(&mut self, column: Column) {
        self.columns.insert(column.name.clone(), column);
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn primary_key(&self) -> Option<&Index> {
        self.indexes.get(PRIMARY_KEY_NAME)
    }

    /// Set the primary key. Its columns become NOT NULL.
    pub fn set_primary_key(&mut self, mut index: Index) -> Result<()> {
        if self.primary_key().is_some() {
            return Err(Error::ValidationError(format!(
                "table '{}' declares more than one PRIMARY index",
                self.name
            )));
        }
        self.check_index_columns(&index)?;
        for column in &index.columns {
            if let Some(col) = self.columns.get_mut(column) {
                col.attributes.notnull = true;
            }
        }
        index.name = PRIMARY_KEY_NAME.to_string();
        index.kind = IndexKind::Primary;
        self.indexes.insert(PRIMARY_KEY_NAME.to_string(), index);
        Ok(())
    }

    /// Add an index to the table. Primary indexes are routed to `set_primary_key`.
    pub fn add_index(&mut self, index: Index) -> Result<()> {
        if index.kind == IndexKind::Primary {
            return self.set_primary_key(index);
        }
        if index.name.eq_ignore_ascii_case(PRIMARY_KEY_NAME) {
            return Err(Error::ValidationError(format!(
                "table '{}': index name '{}' is reserved for the primary key",
                self.name, index.name
            )));
        }
        if self.indexes.contains_key(&index.name) {
            return Err(Error::ValidationError(format!(
                "table '{}' declares index '{}' more than once",
                self.name, index.name
            )));
        }
        self.check_index_columns(&index)?;
        self.indexes.insert(index.name.clone(), index);
        Ok(())
    }

    /// Add a foreign key. Its local columns must exist on the table.
    pub fn add_foreign_key(&mut self, foreign_key: ForeignKey) -> Result<()> {
        if foreign_key.local_columns.is_empty()
            || foreign_key.local_columns.len() != foreign_key.foreign_columns.len()
        {
            return Err(Error::ValidationError(format!(
                "table '{}': foreign key to '{}' must map the same non-zero number of columns",
                self.name, foreign_key.foreign_table
            )));
        }
        if let Some(missing) = foreign_key
            .local_columns
            .iter()
            .find(|c| !self.columns.contains_key(*c))
        {
            return Err(Error::ValidationError(format!(
                "table '{}': foreign key references unknown column '{}'",
                self.name, missing
            )));
        }
        self.foreign_keys.push(foreign_key);
        Ok(())
    }

    pub fn set_option(&mut self, name: &str, value: Value) {
        self.options.insert(name.to_string(), value);
    }

    /// The string value of a table option, if set
    pub fn option_str(&self, name: &str) -> Option<&str> {
        self.options.get(name).and_then(Value::as_str)
    }

    fn check_index_columns(&self, index: &Index) -> Result<()> {
        if index.columns.is_empty() {
            return Err(Error::ValidationError(format!(
                "table '{}': index '{}' has no columns",
                self.name, index.name
            )));
        }
        if let Some(missing) = index.columns.iter().find(|c| !self.columns.contains_key(*c)) {
            return Err(Error::ValidationError(format!(
                "table '{}': index '{}' references unknown column '{}'",
                self.name, index.name, missing
            )));
        }
        Ok(())
    }
}

/// Represents a database column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub type_name: String,
    pub attributes: ColumnAttributes,
}

impl Column {
    /// Create a new column with the given name and type
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            attributes: ColumnAttributes::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: ColumnAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.attributes.get_extra("default")
    }

    pub fn comment(&self) -> Option<&str> {
        self.attributes.get_extra("comment").and_then(Value::as_str)
    }
}

/// Column attributes: the well-known keys are typed, everything else is kept as-is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnAttributes {
    pub length: Option<u32>,
    pub unsigned: bool,
    pub fixed: bool,
    pub notnull: bool,
    pub autoincrement: bool,
    /// Passthrough attributes (default, precision, scale, comment, collation, values, ...)
    pub extra: IndexMap<String, Value>,
}

impl ColumnAttributes {
    /// Boolean attributes that may be written as bare flag words
    pub const FLAGS: [&'static str; 4] = ["unsigned", "fixed", "notnull", "autoincrement"];

    /// Set an attribute from a loosely typed value
    pub fn set(&mut self, key: &str, value: Value) -> std::result::Result<(), String> {
        match key {
            "length" => {
                self.length = match value {
                    Value::Null => None,
                    Value::Number(ref n) => Some(
                        n.as_u64()
                            .and_then(|n| u32::try_from(n).ok())
                            .ok_or_else(|| format!("length must be a positive integer, got {}", n))?,
                    ),
                    other => return Err(format!("length must be an integer, got {}", other)),
                };
            }
            "unsigned" | "fixed" | "notnull" | "autoincrement" => {
                let flag = match value {
                    Value::Null => false,
                    Value::Bool(b) => b,
                    other => return Err(format!("{} must be a boolean, got {}", key, other)),
                };
                match key {
                    "unsigned" => self.unsigned = flag,
                    "fixed" => self.fixed = flag,
                    "notnull" => self.notnull = flag,
                    _ => self.autoincrement = flag,
                }
            }
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    /// Merge a JSON object into the attributes, key by key
    pub fn merge(&mut self, map: Map<String, Value>) -> std::result::Result<(), String> {
        for (key, value) in map {
            self.set(&key, value)?;
        }
        Ok(())
    }

    pub fn get_extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key).filter(|v| !v.is_null())
    }

    pub fn flag(&self, key: &str) -> bool {
        match key {
            "unsigned" => self.unsigned,
            "fixed" => self.fixed,
            "notnull" => self.notnull,
            "autoincrement" => self.autoincrement,
            _ => false,
        }
    }
}

/// Whether a passthrough attribute holds its documented default and may be omitted
pub fn is_default_attribute(key: &str, value: &Value) -> bool {
    if value.is_null() {
        return true;
    }
    match key {
        "precision" => value.as_u64() == Some(10),
        "scale" => value.as_u64() == Some(0),
        "platformOptions" | "customSchemaOptions" => {
            value.as_object().map_or(false, |m| m.is_empty())
        }
        _ => false,
    }
}

/// Kind of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    Primary,
    Unique,
    Key,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Primary => write!(f, "PRIMARY"),
            IndexKind::Unique => write!(f, "UNIQUE"),
            IndexKind::Key => write!(f, "KEY"),
        }
    }
}

/// Represents an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub kind: IndexKind,
    pub columns: Vec<String>,
    /// Key-prefix length per column, for partial indexes on string columns
    pub lengths: IndexMap<String, u32>,
    /// Dialect-specific modifiers such as `fulltext` or `spatial`
    pub flags: Vec<String>,
    pub options: IndexMap<String, Value>,
}

impl Index {
    pub fn new(name: &str, kind: IndexKind, columns: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            columns,
            lengths: IndexMap::new(),
            flags: Vec::new(),
            options: IndexMap::new(),
        }
    }

    pub fn is_primary(&self) -> bool {
        self.kind == IndexKind::Primary
    }

    pub fn is_unique(&self) -> bool {
        matches!(self.kind, IndexKind::Primary | IndexKind::Unique)
    }

    pub fn prefix_length(&self, column: &str) -> Option<u32> {
        self.lengths.get(column).copied()
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }
}

/// Represents a foreign key constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: Option<String>,
    pub local_columns: Vec<String>,
    pub foreign_table: String,
    pub foreign_columns: Vec<String>,
    pub options: IndexMap<String, Value>,
}

impl ForeignKey {
    pub fn new(local_columns: Vec<String>, foreign_table: &str, foreign_columns: Vec<String>) -> Self {
        Self {
            name: None,
            local_columns,
            foreign_table: foreign_table.to_string(),
            foreign_columns,
            options: IndexMap::new(),
        }
    }

    pub fn on_delete(&self) -> Option<&str> {
        self.options.get("onDelete").and_then(Value::as_str)
    }

    pub fn on_update(&self) -> Option<&str> {
        self.options.get("onUpdate").and_then(Value::as_str)
    }

    /// Whether both keys link the same local columns to the same foreign columns
    pub fn same_reference(&self, other: &ForeignKey) -> bool {
        self.local_columns == other.local_columns
            && self.foreign_table == other.foreign_table
            && self.foreign_columns == other.foreign_columns
    }
}
