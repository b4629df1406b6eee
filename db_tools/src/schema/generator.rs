//! DDL generator
//!
//! Renders a [`SchemaDiff`] as SQL statements for one platform. MySQL is
//! fully supported. SQLite cannot alter columns or constraints of an existing
//! table, so those changes are refused with a migration error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

use crate::db::connection::Platform;
use crate::error::{Error, Result};
use crate::schema::diff::{SchemaChange, SchemaDiff};
use crate::schema::normalize::{canonical_type, DEFAULT_STRING_LENGTH};
use crate::schema::pattern::TableFilter;
use crate::schema::types::{Column, ForeignKey, Index, IndexKind, Schema, Table};
use crate::utils::naming::{self, FOREIGN_KEY_PATTERN};

static EXPRESSION_DEFAULT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(current_timestamp|current_date|current_time|now)(\(\d*\))?$")
        .expect("valid regex")
});

const NUMERIC_TYPES: [&str; 7] = [
    "tinyint", "smallint", "integer", "bigint", "decimal", "float", "boolean",
];

/// SQL generator for one platform
#[derive(Debug, Clone, Copy)]
pub struct DdlGenerator {
    platform: Platform,
}

impl DdlGenerator {
    /// Create a new generator
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Generate the statements for a diff, in diff order
    pub fn generate(&self, diff: &SchemaDiff) -> Result<Vec<String>> {
        match self.platform {
            Platform::MySql => self.generate_mysql(diff),
            Platform::Sqlite => self.generate_sqlite(diff),
        }
    }

    /// Statements creating every table of a schema from scratch
    pub fn create_schema_sql(&self, schema: &Schema) -> Result<Vec<String>> {
        let diff = SchemaDiff::generate(&Schema::new(), schema, TableFilter::All);
        self.generate(&diff)
    }

    fn quote(&self, name: &str) -> String {
        self.platform.quote_identifier(name)
    }

    fn quote_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.quote(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Constraint name of a foreign key, generated when it has none
    pub fn foreign_key_name(&self, table: &str, foreign_key: &ForeignKey) -> String {
        match &foreign_key.name {
            Some(name) => name.clone(),
            None => naming::get_foreign_key_name(
                FOREIGN_KEY_PATTERN,
                table,
                &foreign_key.local_columns,
                self.platform.max_identifier_length(),
            ),
        }
    }

    fn generate_mysql(&self, diff: &SchemaDiff) -> Result<Vec<String>> {
        let mut statements = Vec::with_capacity(diff.len());

        for change in diff {
            let sql = match change {
                SchemaChange::CreateTable(table) => self.generate_mysql_create_table_sql(table)?,
                SchemaChange::DropTable { table } => format!("DROP TABLE {}", self.quote(table)),
                SchemaChange::AddColumn { table, column } => format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    self.quote(table),
                    self.generate_mysql_column_sql(column)?
                ),
                SchemaChange::ModifyColumn { table, to, .. } => format!(
                    "ALTER TABLE {} MODIFY COLUMN {}",
                    self.quote(table),
                    self.generate_mysql_column_sql(to)?
                ),
                SchemaChange::DropColumn { table, column } => format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    self.quote(table),
                    self.quote(column)
                ),
                SchemaChange::AddIndex { table, index } => format!(
                    "ALTER TABLE {} ADD {}",
                    self.quote(table),
                    self.generate_mysql_index_sql(index)
                ),
                SchemaChange::DropIndex { table, index } if index.is_primary() => {
                    format!("ALTER TABLE {} DROP PRIMARY KEY", self.quote(table))
                }
                SchemaChange::DropIndex { table, index } => format!(
                    "ALTER TABLE {} DROP INDEX {}",
                    self.quote(table),
                    self.quote(&index.name)
                ),
                SchemaChange::AddForeignKey { table, foreign_key } => format!(
                    "ALTER TABLE {} ADD {}",
                    self.quote(table),
                    self.generate_foreign_key_sql(table, foreign_key)
                ),
                SchemaChange::DropForeignKey { table, foreign_key } => format!(
                    "ALTER TABLE {} DROP FOREIGN KEY {}",
                    self.quote(table),
                    self.quote(&self.foreign_key_name(table, foreign_key))
                ),
                SchemaChange::ChangeTableOption { table, option, value } => format!(
                    "ALTER TABLE {} {}",
                    self.quote(table),
                    self.generate_mysql_table_option_sql(option, value)
                ),
            };
            statements.push(sql);
        }

        Ok(statements)
    }

    /// Generate MySQL-specific table creation SQL, keys inline
    fn generate_mysql_create_table_sql(&self, table: &Table) -> Result<String> {
        let mut definitions = Vec::new();
        for column in table.columns.values() {
            definitions.push(self.generate_mysql_column_sql(column)?);
        }
        if let Some(primary) = table.primary_key() {
            definitions.push(self.generate_mysql_index_sql(primary));
        }
        for index in table.indexes.values().filter(|i| !i.is_primary()) {
            definitions.push(self.generate_mysql_index_sql(index));
        }

        let mut sql = format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote(&table.name),
            definitions.join(",\n  ")
        );
        for (option, value) in &table.options {
            sql.push(' ');
            sql.push_str(&self.generate_mysql_table_option_sql(option, value));
        }
        Ok(sql)
    }

    fn generate_mysql_column_sql(&self, column: &Column) -> Result<String> {
        let attributes = &column.attributes;
        let (type_name, _) = canonical_type(&column.type_name);
        let mut sql = format!(
            "{} {}",
            self.quote(&column.name),
            self.generate_type_sql(column)?
        );

        if attributes.unsigned && NUMERIC_TYPES.contains(&type_name.as_str()) {
            sql.push_str(" UNSIGNED");
        }
        if let Some(charset) = attributes.get_extra("charset").and_then(Value::as_str) {
            sql.push_str(&format!(" CHARACTER SET {}", charset));
        }
        if let Some(collation) = attributes.get_extra("collation").and_then(Value::as_str) {
            sql.push_str(&format!(" COLLATE {}", collation));
        }
        sql.push_str(if attributes.notnull { " NOT NULL" } else { " NULL" });
        if let Some(default) = default_sql(column) {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        if attributes.autoincrement {
            sql.push_str(" AUTO_INCREMENT");
        }
        if let Some(comment) = column.comment() {
            sql.push_str(&format!(" COMMENT {}", naming::quote_literal(comment)));
        }
        Ok(sql)
    }

    /// Index clause for CREATE TABLE or ALTER TABLE ... ADD
    fn generate_mysql_index_sql(&self, index: &Index) -> String {
        let columns = index
            .columns
            .iter()
            .map(|column| match index.prefix_length(column) {
                Some(length) => format!("{}({})", self.quote(column), length),
                None => self.quote(column),
            })
            .collect::<Vec<_>>()
            .join(", ");

        match index.kind {
            IndexKind::Primary => format!("PRIMARY KEY ({})", columns),
            IndexKind::Unique => format!("UNIQUE KEY {} ({})", self.quote(&index.name), columns),
            IndexKind::Key => {
                let prefix = if index.has_flag("fulltext") {
                    "FULLTEXT "
                } else if index.has_flag("spatial") {
                    "SPATIAL "
                } else {
                    ""
                };
                format!("{}KEY {} ({})", prefix, self.quote(&index.name), columns)
            }
        }
    }

    fn generate_mysql_table_option_sql(&self, option: &str, value: &Value) -> String {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match option.to_ascii_lowercase().as_str() {
            "engine" => format!("ENGINE={}", text.to_ascii_uppercase()),
            "charset" => format!("DEFAULT CHARSET={}", text),
            "collation" | "collate" => format!("COLLATE={}", text),
            "comment" => format!("COMMENT={}", naming::quote_literal(&text)),
            other => format!("{}={}", other.to_ascii_uppercase(), text),
        }
    }

    fn generate_foreign_key_sql(&self, table: &str, foreign_key: &ForeignKey) -> String {
        let mut sql = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote(&self.foreign_key_name(table, foreign_key)),
            self.quote_list(&foreign_key.local_columns),
            self.quote(&foreign_key.foreign_table),
            self.quote_list(&foreign_key.foreign_columns)
        );
        if let Some(action) = foreign_key.on_delete() {
            sql.push_str(&format!(" ON DELETE {}", action.to_ascii_uppercase()));
        }
        if let Some(action) = foreign_key.on_update() {
            sql.push_str(&format!(" ON UPDATE {}", action.to_ascii_uppercase()));
        }
        sql
    }

    fn generate_sqlite(&self, diff: &SchemaDiff) -> Result<Vec<String>> {
        let created: HashSet<&str> = diff
            .iter()
            .filter_map(|change| match change {
                SchemaChange::CreateTable(table) => Some(table.name.as_str()),
                _ => None,
            })
            .collect();
        let dropped: HashSet<&str> = diff
            .iter()
            .filter_map(|change| match change {
                SchemaChange::DropTable { table } => Some(table.as_str()),
                _ => None,
            })
            .collect();

        let mut statements = Vec::with_capacity(diff.len());
        for change in diff {
            match change {
                SchemaChange::CreateTable(table) => {
                    // foreign keys of new tables are declared inline
                    let foreign_keys: Vec<&ForeignKey> = diff
                        .iter()
                        .filter_map(|c| match c {
                            SchemaChange::AddForeignKey { table: t, foreign_key } if *t == table.name => {
                                Some(foreign_key)
                            }
                            _ => None,
                        })
                        .collect();
                    statements.extend(self.generate_sqlite_create_table_sql(table, &foreign_keys)?);
                }
                SchemaChange::DropTable { table } => {
                    statements.push(format!("DROP TABLE {}", self.quote(table)))
                }
                SchemaChange::AddColumn { table, column } => statements.push(format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    self.quote(table),
                    self.generate_sqlite_column_sql(column, false)?
                )),
                SchemaChange::DropColumn { table, column } => statements.push(format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    self.quote(table),
                    self.quote(column)
                )),
                SchemaChange::AddIndex { table, index } if !index.is_primary() => {
                    statements.push(self.generate_sqlite_index_sql(table, index))
                }
                SchemaChange::DropIndex { index, .. } if !index.is_primary() => {
                    statements.push(format!("DROP INDEX {}", self.quote(&index.name)))
                }
                SchemaChange::AddForeignKey { table, .. } if created.contains(table.as_str()) => {}
                // sqlite does not check references when a table is dropped
                SchemaChange::DropForeignKey { table, foreign_key }
                    if dropped.contains(table.as_str())
                        || dropped.contains(foreign_key.foreign_table.as_str()) => {}
                unsupported => {
                    return Err(Error::MigrationError(format!(
                        "sqlite cannot {} on an existing table",
                        unsupported
                    )))
                }
            }
        }

        Ok(statements)
    }

    /// Generate SQLite-specific table creation SQL; indexes follow as separate statements
    fn generate_sqlite_create_table_sql(
        &self,
        table: &Table,
        foreign_keys: &[&ForeignKey],
    ) -> Result<Vec<String>> {
        let inline_pk = table.primary_key().and_then(|pk| match pk.columns.as_slice() {
            [column] if table.column(column).map_or(false, |c| c.attributes.autoincrement) => {
                Some(column.as_str())
            }
            _ => None,
        });

        let mut definitions = Vec::new();
        for column in table.columns.values() {
            let is_pk = inline_pk == Some(column.name.as_str());
            definitions.push(self.generate_sqlite_column_sql(column, is_pk)?);
        }
        if let (Some(primary), None) = (table.primary_key(), inline_pk) {
            definitions.push(format!("PRIMARY KEY ({})", self.quote_list(&primary.columns)));
        }
        for foreign_key in foreign_keys {
            definitions.push(self.generate_foreign_key_sql(&table.name, foreign_key));
        }

        let mut statements = vec![format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote(&table.name),
            definitions.join(",\n  ")
        )];
        for index in table.indexes.values().filter(|i| !i.is_primary()) {
            statements.push(self.generate_sqlite_index_sql(&table.name, index));
        }
        Ok(statements)
    }

    fn generate_sqlite_column_sql(&self, column: &Column, inline_pk: bool) -> Result<String> {
        let attributes = &column.attributes;
        let (type_name, _) = canonical_type(&column.type_name);
        let mut sql = format!("{} ", self.quote(&column.name));

        if inline_pk {
            sql.push_str("INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT");
            return Ok(sql);
        }

        sql.push_str(&self.generate_type_sql(column)?);
        if attributes.unsigned && NUMERIC_TYPES.contains(&type_name.as_str()) {
            sql.push_str(" UNSIGNED");
        }
        if attributes.notnull {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = default_sql(column) {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        Ok(sql)
    }

    fn generate_sqlite_index_sql(&self, table: &str, index: &Index) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.is_unique() { "UNIQUE " } else { "" },
            self.quote(&index.name),
            self.quote(table),
            self.quote_list(&index.columns)
        )
    }

    /// Native type of a column
    fn generate_type_sql(&self, column: &Column) -> Result<String> {
        let attributes = &column.attributes;
        let (type_name, implied_fixed) = canonical_type(&column.type_name);
        let fixed = attributes.fixed || implied_fixed;
        let length = attributes.length.unwrap_or(DEFAULT_STRING_LENGTH);

        let sql = match type_name.as_str() {
            "integer" => "INTEGER".to_string(),
            "smallint" => "SMALLINT".to_string(),
            "bigint" => "BIGINT".to_string(),
            "tinyint" => "TINYINT".to_string(),
            "boolean" => match self.platform {
                Platform::MySql => "TINYINT(1)".to_string(),
                Platform::Sqlite => "BOOLEAN".to_string(),
            },
            "decimal" => {
                let precision = attributes
                    .get_extra("precision")
                    .and_then(Value::as_u64)
                    .unwrap_or(10);
                let scale = attributes.get_extra("scale").and_then(Value::as_u64).unwrap_or(0);
                format!("DECIMAL({}, {})", precision, scale)
            }
            "float" => "DOUBLE".to_string(),
            "string" if fixed => format!("CHAR({})", length),
            "string" => format!("VARCHAR({})", length),
            "binary" if fixed => format!("BINARY({})", length),
            "binary" => format!("VARBINARY({})", length),
            "guid" => "CHAR(36)".to_string(),
            "text" => "TEXT".to_string(),
            "blob" => "BLOB".to_string(),
            "date" => "DATE".to_string(),
            "datetime" => "DATETIME".to_string(),
            "time" => "TIME".to_string(),
            "json" => "JSON".to_string(),
            "enum" => match self.platform {
                Platform::Sqlite => "TEXT".to_string(),
                Platform::MySql => {
                    let values: Vec<String> = attributes
                        .get_extra("values")
                        .and_then(Value::as_array)
                        .map(|values| {
                            values
                                .iter()
                                .filter_map(Value::as_str)
                                .map(naming::quote_literal)
                                .collect()
                        })
                        .unwrap_or_default();
                    if values.is_empty() {
                        return Err(Error::MigrationError(format!(
                            "enum column '{}' has no values",
                            column.name
                        )));
                    }
                    format!("ENUM({})", values.join(","))
                }
            },
            other => {
                return Err(Error::MigrationError(format!(
                    "column '{}' has unsupported type '{}'",
                    column.name, other
                )))
            }
        };
        Ok(sql)
    }
}

/// SQL literal for a column default, if it has one
fn default_sql(column: &Column) -> Option<String> {
    let (type_name, _) = canonical_type(&column.type_name);
    let numeric = NUMERIC_TYPES.contains(&type_name.as_str());
    match column.default_value()? {
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if numeric && s.trim().parse::<f64>().is_ok() => Some(s.trim().to_string()),
        Value::String(s) if EXPRESSION_DEFAULT_RE.is_match(s.trim()) => Some(s.trim().to_uppercase()),
        Value::String(s) => Some(naming::quote_literal(s)),
        other => Some(naming::quote_literal(&other.to_string())),
    }
}
