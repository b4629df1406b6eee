//! Catalog metadata
//!
//! Generic "list tables / describe table" access for MySQL and SQLite. Types
//! are reported in the portable vocabulary, which loses some detail (a
//! `tinyint` reads back as `boolean`, an `enum` as `string`); the native type
//! is kept next to each column so platform corrections can restore it.

use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sqlx::{FromRow, MySql, Pool, Sqlite};

use crate::db::connection::{DatabaseConnection, DatabasePool};
use crate::error::Result;
use crate::schema::types::{Column, ForeignKey, Index, IndexKind, PRIMARY_KEY_NAME};

static AUTOINCREMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bAUTOINCREMENT\b").expect("valid regex"));

const TYPE_MODIFIERS: [&str; 3] = ["unsigned", "signed", "zerofill"];

/// A column type as the database spells it, e.g. `int(10) unsigned`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NativeType {
    /// Lowercase base name, possibly several words (`double precision`)
    pub base: String,
    /// Raw text between the parentheses
    pub args: Option<String>,
    pub modifiers: Vec<String>,
}

impl NativeType {
    pub fn parse(native: &str) -> Self {
        let native = native.trim();
        let (head, args, tail) = match (native.find('('), native.rfind(')')) {
            (Some(open), Some(close)) if close > open => (
                &native[..open],
                Some(native[open + 1..close].to_string()),
                &native[close + 1..],
            ),
            _ => (native, None, ""),
        };

        let mut base = Vec::new();
        let mut modifiers = Vec::new();
        for word in head.split_whitespace().map(str::to_ascii_lowercase) {
            if TYPE_MODIFIERS.contains(&word.as_str()) {
                modifiers.push(word);
            } else {
                base.push(word);
            }
        }
        modifiers.extend(tail.split_whitespace().map(str::to_ascii_lowercase));

        Self {
            base: base.join(" "),
            args,
            modifiers,
        }
    }

    /// Comma-separated numeric arguments, e.g. precision and scale
    pub fn numeric_args(&self) -> Vec<u32> {
        self.args
            .as_deref()
            .map(|args| {
                args.split(',')
                    .filter_map(|a| a.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_modifier(&self, modifier: &str) -> bool {
        self.modifiers.iter().any(|m| m == modifier)
    }
}

/// Portable type for a native base type, and whether it is fixed-width
fn generic_type(base: &str) -> (&'static str, bool) {
    match base {
        "tinyint" | "bool" | "boolean" | "bit" => ("boolean", false),
        "smallint" | "int2" => ("smallint", false),
        "int" | "integer" | "mediumint" | "int4" => ("integer", false),
        "bigint" | "int8" | "big int" => ("bigint", false),
        "decimal" | "numeric" => ("decimal", false),
        "float" | "double" | "double precision" | "real" => ("float", false),
        "char" | "character" | "nchar" | "native character" => ("string", true),
        "varchar" | "character varying" | "varying character" | "nvarchar" | "enum" | "set" => {
            ("string", false)
        }
        "text" | "tinytext" | "mediumtext" | "longtext" | "clob" => ("text", false),
        "binary" => ("binary", true),
        "varbinary" => ("binary", false),
        "blob" | "tinyblob" | "mediumblob" | "longblob" | "" => ("blob", false),
        "date" | "year" => ("date", false),
        "datetime" | "timestamp" => ("datetime", false),
        "time" => ("time", false),
        "json" => ("json", false),
        _ => ("text", false),
    }
}

/// Column in generic form, with the native type it was read from
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogColumn {
    pub column: Column,
    pub native_type: NativeType,
}

impl CatalogColumn {
    fn from_native(name: &str, native: &str) -> Self {
        let native_type = NativeType::parse(native);
        let (type_name, fixed) = generic_type(&native_type.base);
        let mut column = Column::new(name, type_name);
        let args = native_type.numeric_args();
        match type_name {
            "string" | "binary" => {
                column.attributes.length = args.first().copied();
                column.attributes.fixed = fixed;
            }
            "decimal" => {
                if let Some(precision) = args.first() {
                    column.attributes.extra.insert("precision".into(), (*precision).into());
                }
                if let Some(scale) = args.get(1) {
                    column.attributes.extra.insert("scale".into(), (*scale).into());
                }
            }
            _ => {}
        }
        column.attributes.unsigned = native_type.has_modifier("unsigned");
        Self {
            column,
            native_type,
        }
    }
}

/// Strip SQL quoting from a reported default; `NULL` means no default
pub fn unquote_default(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("null") {
        return None;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Some(raw[1..raw.len() - 1].replace("''", "'"));
    }
    Some(raw.to_string())
}

/// Catalog metadata access
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Names of all base tables, sorted
    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn columns(&self, table: &str) -> Result<Vec<CatalogColumn>>;

    /// Indexes including the primary key, which is named `PRIMARY`
    async fn indexes(&self, table: &str) -> Result<Vec<Index>>;

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>>;

    async fn table_options(&self, _table: &str) -> Result<IndexMap<String, Value>> {
        Ok(IndexMap::new())
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Catalog for the platform behind a connection
pub fn catalog_for(connection: &DatabaseConnection) -> Box<dyn Catalog + '_> {
    match connection.pool() {
        DatabasePool::MySql(pool) => Box::new(MySqlCatalog { pool }),
        DatabasePool::Sqlite(pool) => Box::new(SqliteCatalog { pool }),
    }
}

// Row types for MySQL queries
#[derive(FromRow)]
struct NameRow {
    name: String,
}

#[derive(FromRow)]
struct MySqlTableRow {
    engine: Option<String>,
    collation: Option<String>,
    comment: Option<String>,
}

#[derive(FromRow)]
struct MySqlColumnRow {
    name: String,
    column_type: String,
    is_nullable: String,
    column_default: Option<String>,
    extra: Option<String>,
    collation: Option<String>,
    table_collation: Option<String>,
    comment: Option<String>,
}

#[derive(FromRow)]
struct MySqlIndexRow {
    name: String,
    column_name: Option<String>,
    non_unique: String,
    index_type: Option<String>,
}

#[derive(FromRow)]
struct MySqlForeignKeyRow {
    name: String,
    column_name: String,
    foreign_table: String,
    foreign_column: String,
    on_update: Option<String>,
    on_delete: Option<String>,
}

/// MySQL catalog over `information_schema`
struct MySqlCatalog<'a> {
    pool: &'a Pool<MySql>,
}

#[async_trait]
impl<'a> Catalog for MySqlCatalog<'a> {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let sql = r#"
            SELECT CAST(TABLE_NAME AS CHAR) AS name
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
        "#;

        let rows = sqlx::query_as::<_, NameRow>(sql)
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    async fn columns(&self, table: &str) -> Result<Vec<CatalogColumn>> {
        let sql = r#"
            SELECT
                CAST(c.COLUMN_NAME AS CHAR) AS name,
                CAST(c.COLUMN_TYPE AS CHAR) AS column_type,
                CAST(c.IS_NULLABLE AS CHAR) AS is_nullable,
                CAST(c.COLUMN_DEFAULT AS CHAR) AS column_default,
                CAST(c.EXTRA AS CHAR) AS extra,
                CAST(c.COLLATION_NAME AS CHAR) AS collation,
                CAST(t.TABLE_COLLATION AS CHAR) AS table_collation,
                CAST(c.COLUMN_COMMENT AS CHAR) AS comment
            FROM information_schema.COLUMNS c
            JOIN information_schema.TABLES t
              ON t.TABLE_SCHEMA = c.TABLE_SCHEMA AND t.TABLE_NAME = c.TABLE_NAME
            WHERE c.TABLE_SCHEMA = DATABASE() AND c.TABLE_NAME = ?
            ORDER BY c.ORDINAL_POSITION
        "#;

        let rows = sqlx::query_as::<_, MySqlColumnRow>(sql)
            .bind(table)
            .fetch_all(self.pool)
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let mut column = CatalogColumn::from_native(&row.name, &row.column_type);
            let attributes = &mut column.column.attributes;
            attributes.notnull = row.is_nullable.eq_ignore_ascii_case("NO");
            attributes.autoincrement = row
                .extra
                .as_deref()
                .map_or(false, |e| e.to_ascii_lowercase().contains("auto_increment"));
            if let Some(default) = row.column_default.as_deref().and_then(unquote_default) {
                attributes.extra.insert("default".into(), Value::String(default));
            }
            if let Some(collation) = row.collation {
                if row.table_collation.as_deref() != Some(collation.as_str()) {
                    attributes.extra.insert("collation".into(), Value::String(collation));
                }
            }
            if let Some(comment) = row.comment.filter(|c| !c.is_empty()) {
                attributes.extra.insert("comment".into(), Value::String(comment));
            }
            columns.push(column);
        }
        Ok(columns)
    }

    async fn indexes(&self, table: &str) -> Result<Vec<Index>> {
        let sql = r#"
            SELECT
                CAST(INDEX_NAME AS CHAR) AS name,
                CAST(COLUMN_NAME AS CHAR) AS column_name,
                CAST(NON_UNIQUE AS CHAR) AS non_unique,
                CAST(INDEX_TYPE AS CHAR) AS index_type
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY INDEX_NAME = 'PRIMARY' DESC, INDEX_NAME, SEQ_IN_INDEX
        "#;

        let rows = sqlx::query_as::<_, MySqlIndexRow>(sql)
            .bind(table)
            .fetch_all(self.pool)
            .await?;

        let mut indexes: IndexMap<String, Index> = IndexMap::new();
        for row in rows {
            // functional index parts have no column
            let Some(column) = row.column_name else {
                continue;
            };
            let index = indexes.entry(row.name.clone()).or_insert_with(|| {
                let kind = if row.name == PRIMARY_KEY_NAME {
                    IndexKind::Primary
                } else if row.non_unique.trim() == "0" {
                    IndexKind::Unique
                } else {
                    IndexKind::Key
                };
                let mut index = Index::new(&row.name, kind, Vec::new());
                if let Some(flag) = row.index_type.as_deref().map(str::to_ascii_lowercase) {
                    if flag == "fulltext" || flag == "spatial" {
                        index.flags.push(flag);
                    }
                }
                index
            });
            index.columns.push(column);
        }
        Ok(indexes.into_values().collect())
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let sql = r#"
            SELECT
                CAST(k.CONSTRAINT_NAME AS CHAR) AS name,
                CAST(k.COLUMN_NAME AS CHAR) AS column_name,
                CAST(k.REFERENCED_TABLE_NAME AS CHAR) AS foreign_table,
                CAST(k.REFERENCED_COLUMN_NAME AS CHAR) AS foreign_column,
                CAST(r.UPDATE_RULE AS CHAR) AS on_update,
                CAST(r.DELETE_RULE AS CHAR) AS on_delete
            FROM information_schema.KEY_COLUMN_USAGE k
            JOIN information_schema.REFERENTIAL_CONSTRAINTS r
              ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA
             AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME
             AND r.TABLE_NAME = k.TABLE_NAME
            WHERE k.TABLE_SCHEMA = DATABASE() AND k.TABLE_NAME = ?
              AND k.REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY k.CONSTRAINT_NAME, k.ORDINAL_POSITION
        "#;

        let rows = sqlx::query_as::<_, MySqlForeignKeyRow>(sql)
            .bind(table)
            .fetch_all(self.pool)
            .await?;

        let mut foreign_keys: IndexMap<String, ForeignKey> = IndexMap::new();
        for row in rows {
            let fk = foreign_keys.entry(row.name.clone()).or_insert_with(|| {
                let mut fk = ForeignKey::new(Vec::new(), &row.foreign_table, Vec::new());
                fk.name = Some(row.name.clone());
                if let Some(action) = &row.on_delete {
                    fk.options.insert("onDelete".into(), Value::String(action.clone()));
                }
                if let Some(action) = &row.on_update {
                    fk.options.insert("onUpdate".into(), Value::String(action.clone()));
                }
                fk
            });
            fk.local_columns.push(row.column_name);
            fk.foreign_columns.push(row.foreign_column);
        }
        Ok(foreign_keys.into_values().collect())
    }

    async fn table_options(&self, table: &str) -> Result<IndexMap<String, Value>> {
        let sql = r#"
            SELECT
                CAST(ENGINE AS CHAR) AS engine,
                CAST(TABLE_COLLATION AS CHAR) AS collation,
                CAST(TABLE_COMMENT AS CHAR) AS comment
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
        "#;

        let row = sqlx::query_as::<_, MySqlTableRow>(sql)
            .bind(table)
            .fetch_optional(self.pool)
            .await?;

        let mut options = IndexMap::new();
        if let Some(row) = row {
            for (key, value) in [
                ("engine", row.engine),
                ("collation", row.collation),
                ("comment", row.comment),
            ] {
                if let Some(value) = value.filter(|v| !v.is_empty()) {
                    options.insert(key.to_string(), Value::String(value));
                }
            }
        }
        Ok(options)
    }
}

// Row types for SQLite pragmas
#[derive(FromRow)]
struct SqliteColumnRow {
    name: String,
    #[sqlx(rename = "type")]
    declared_type: String,
    notnull: i64,
    dflt_value: Option<String>,
    pk: i64,
}

#[derive(FromRow)]
struct SqliteIndexRow {
    name: String,
    #[sqlx(rename = "unique")]
    is_unique: i64,
    origin: String,
}

#[derive(FromRow)]
struct SqliteIndexColumnRow {
    name: Option<String>,
}

#[derive(FromRow)]
struct SqliteForeignKeyRow {
    id: i64,
    #[sqlx(rename = "table")]
    foreign_table: String,
    #[sqlx(rename = "from")]
    local_column: String,
    #[sqlx(rename = "to")]
    foreign_column: Option<String>,
    on_update: String,
    on_delete: String,
}

/// SQLite catalog over `sqlite_master` and the table-valued pragmas
struct SqliteCatalog<'a> {
    pool: &'a Pool<Sqlite>,
}

impl<'a> SqliteCatalog<'a> {
    async fn table_info(&self, table: &str) -> Result<Vec<SqliteColumnRow>> {
        let sql = r#"
            SELECT name, type, "notnull", dflt_value, pk
            FROM pragma_table_info(?)
            ORDER BY cid
        "#;

        let rows = sqlx::query_as::<_, SqliteColumnRow>(sql)
            .bind(table)
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    async fn primary_key_columns(&self, table: &str) -> Result<Vec<String>> {
        let mut pk: Vec<(i64, String)> = self
            .table_info(table)
            .await?
            .into_iter()
            .filter(|row| row.pk > 0)
            .map(|row| (row.pk, row.name))
            .collect();
        pk.sort();
        Ok(pk.into_iter().map(|(_, name)| name).collect())
    }
}

#[async_trait]
impl<'a> Catalog for SqliteCatalog<'a> {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let sql = r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name
        "#;

        let rows = sqlx::query_as::<_, NameRow>(sql)
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    async fn columns(&self, table: &str) -> Result<Vec<CatalogColumn>> {
        let rows = self.table_info(table).await?;

        let create_sql: Option<String> =
            sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(self.pool)
                .await?
                .flatten();
        let has_autoincrement = create_sql
            .as_deref()
            .map_or(false, |sql| AUTOINCREMENT_RE.is_match(sql));
        let single_pk = rows.iter().filter(|row| row.pk > 0).count() == 1;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let mut column = CatalogColumn::from_native(&row.name, &row.declared_type);
            let attributes = &mut column.column.attributes;
            attributes.notnull = row.notnull != 0;
            attributes.autoincrement = has_autoincrement
                && single_pk
                && row.pk > 0
                && row.declared_type.eq_ignore_ascii_case("integer");
            if let Some(default) = row.dflt_value.as_deref().and_then(unquote_default) {
                attributes.extra.insert("default".into(), Value::String(default));
            }
            columns.push(column);
        }
        Ok(columns)
    }

    async fn indexes(&self, table: &str) -> Result<Vec<Index>> {
        let mut indexes = Vec::new();

        let pk = self.primary_key_columns(table).await?;
        if !pk.is_empty() {
            indexes.push(Index::new(PRIMARY_KEY_NAME, IndexKind::Primary, pk));
        }

        let sql = r#"SELECT name, "unique", origin FROM pragma_index_list(?) ORDER BY name"#;
        let rows = sqlx::query_as::<_, SqliteIndexRow>(sql)
            .bind(table)
            .fetch_all(self.pool)
            .await?;

        'indexes: for row in rows {
            // constraint-backed autoindexes cannot be dropped with DROP INDEX
            if row.origin == "pk" || row.origin == "u" {
                tracing::debug!(table, index = %row.name, "Skipping constraint index");
                continue;
            }
            let parts = sqlx::query_as::<_, SqliteIndexColumnRow>(
                "SELECT name FROM pragma_index_info(?) ORDER BY seqno",
            )
            .bind(&row.name)
            .fetch_all(self.pool)
            .await?;

            let mut columns = Vec::with_capacity(parts.len());
            for part in parts {
                // expression indexes cannot be described as column lists
                let Some(name) = part.name else {
                    tracing::debug!(table, index = %row.name, "Skipping expression index");
                    continue 'indexes;
                };
                columns.push(name);
            }
            let kind = if row.is_unique != 0 {
                IndexKind::Unique
            } else {
                IndexKind::Key
            };
            indexes.push(Index::new(&row.name, kind, columns));
        }
        Ok(indexes)
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let sql = r#"
            SELECT id, "table", "from", "to", on_update, on_delete
            FROM pragma_foreign_key_list(?)
            ORDER BY id, seq
        "#;

        let rows = sqlx::query_as::<_, SqliteForeignKeyRow>(sql)
            .bind(table)
            .fetch_all(self.pool)
            .await?;

        let mut foreign_keys: IndexMap<i64, ForeignKey> = IndexMap::new();
        let mut implicit = Vec::new();
        for row in rows {
            let fk = foreign_keys.entry(row.id).or_insert_with(|| {
                let mut fk = ForeignKey::new(Vec::new(), &row.foreign_table, Vec::new());
                fk.options
                    .insert("onDelete".into(), Value::String(row.on_delete.clone()));
                fk.options
                    .insert("onUpdate".into(), Value::String(row.on_update.clone()));
                fk
            });
            fk.local_columns.push(row.local_column);
            match row.foreign_column {
                Some(column) => fk.foreign_columns.push(column),
                None => implicit.push(row.id),
            }
        }

        // a reference without target columns points at the primary key
        for id in implicit {
            if let Some(fk) = foreign_keys.get_mut(&id) {
                if fk.foreign_columns.is_empty() {
                    fk.foreign_columns = self.primary_key_columns(&fk.foreign_table).await?;
                }
            }
        }
        Ok(foreign_keys.into_values().collect())
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, NameRow>("SELECT name FROM pragma_database_list ORDER BY seq")
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn parses_native_types() {
        assert_eq!(
            NativeType::parse("int(10) unsigned zerofill"),
            NativeType {
                base: "int".into(),
                args: Some("10".into()),
                modifiers: vec!["unsigned".into(), "zerofill".into()],
            }
        );
        assert_eq!(NativeType::parse("UNSIGNED BIG INT").base, "big int");
        assert_eq!(
            NativeType::parse("enum('a','b,c')").args.as_deref(),
            Some("'a','b,c'")
        );
        assert_eq!(NativeType::parse("decimal(12, 2)").numeric_args(), vec![12, 2]);
    }

    #[rstest]
    #[case("tinyint(1)", "boolean", None)]
    #[case("varchar(50)", "string", Some(50))]
    #[case("char(2)", "string", Some(2))]
    #[case("enum('a','b')", "string", None)]
    #[case("int(11) unsigned", "integer", None)]
    #[case("mediumtext", "text", None)]
    #[case("", "blob", None)]
    fn generic_columns(#[case] native: &str, #[case] type_name: &str, #[case] length: Option<u32>) {
        let column = CatalogColumn::from_native("c", native);
        assert_eq!(column.column.type_name, type_name);
        assert_eq!(column.column.attributes.length, length);
    }

    #[test]
    fn decimal_keeps_precision_and_scale() {
        let column = CatalogColumn::from_native("c", "decimal(12,2) unsigned");
        assert_eq!(column.column.attributes.extra["precision"], 12);
        assert_eq!(column.column.attributes.extra["scale"], 2);
        assert!(column.column.attributes.unsigned);
    }

    #[test]
    fn defaults() {
        assert_eq!(unquote_default("'it''s'").as_deref(), Some("it's"));
        assert_eq!(unquote_default("0").as_deref(), Some("0"));
        assert_eq!(unquote_default("NULL"), None);
        assert_eq!(
            unquote_default("CURRENT_TIMESTAMP").as_deref(),
            Some("CURRENT_TIMESTAMP")
        );
    }
}
