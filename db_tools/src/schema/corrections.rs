//! Platform corrections
//!
//! Generic catalog metadata is lossy on some platforms. A correction is a
//! small plugin run by the introspector after the generic catalog call: it
//! may rewrite a column using its native type, or patch a whole table with a
//! supplementary query. Corrections are set up once per connection through
//! the [`CorrectionRegistry`].

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::db::connection::{ConnectionId, DatabaseConnection, DatabasePool, Platform};
use crate::error::Result;
use crate::schema::catalog::NativeType;
use crate::schema::types::{Column, Table};

static ENUM_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'((?:[^']|'')*)'").expect("valid regex"));

/// A platform-specific fix-up of catalog metadata
#[async_trait]
pub trait PlatformCorrection: Send + Sync {
    fn name(&self) -> &'static str;

    fn applies_to(&self, platform: Platform) -> bool;

    /// Rewrite one column read through the generic catalog
    fn correct_column(&self, _column: &mut Column, _native: &NativeType) {}

    /// Patch a fully assembled table
    async fn correct_table(&self, _connection: &DatabaseConnection, _table: &mut Table) -> Result<()> {
        Ok(())
    }
}

/// Keeps compact integers distinct from booleans
pub struct TinyintCorrection;

#[async_trait]
impl PlatformCorrection for TinyintCorrection {
    fn name(&self) -> &'static str {
        "tinyint"
    }

    fn applies_to(&self, _platform: Platform) -> bool {
        true
    }

    fn correct_column(&self, column: &mut Column, native: &NativeType) {
        if native.base == "tinyint" && column.type_name == "boolean" {
            column.type_name = "tinyint".to_string();
        }
    }
}

/// Restores `enum` columns and their value list
pub struct EnumCorrection;

/// Literal values of an enum argument list such as `'a','it''s'`
pub fn parse_enum_values(args: &str) -> Vec<String> {
    ENUM_VALUE_RE
        .captures_iter(args)
        .map(|caps| caps[1].replace("''", "'"))
        .collect()
}

#[async_trait]
impl PlatformCorrection for EnumCorrection {
    fn name(&self) -> &'static str {
        "enum"
    }

    fn applies_to(&self, _platform: Platform) -> bool {
        true
    }

    fn correct_column(&self, column: &mut Column, native: &NativeType) {
        if native.base != "enum" {
            return;
        }
        column.type_name = "enum".to_string();
        column.attributes.length = None;
        column.attributes.fixed = false;
        let values = parse_enum_values(native.args.as_deref().unwrap_or_default());
        column.attributes.extra.insert(
            "values".to_string(),
            Value::Array(values.into_iter().map(Value::String).collect()),
        );
    }
}

#[derive(FromRow)]
struct SubPartRow {
    index_name: String,
    column_name: String,
    sub_part: String,
}

/// Recovers index key-prefix lengths, which the generic index listing omits
pub struct IndexPrefixCorrection;

#[async_trait]
impl PlatformCorrection for IndexPrefixCorrection {
    fn name(&self) -> &'static str {
        "index-prefix"
    }

    fn applies_to(&self, platform: Platform) -> bool {
        platform == Platform::MySql
    }

    async fn correct_table(&self, connection: &DatabaseConnection, table: &mut Table) -> Result<()> {
        let DatabasePool::MySql(pool) = connection.pool() else {
            return Ok(());
        };

        let sql = r#"
            SELECT
                CAST(INDEX_NAME AS CHAR) AS index_name,
                CAST(COLUMN_NAME AS CHAR) AS column_name,
                CAST(SUB_PART AS CHAR) AS sub_part
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
              AND SUB_PART IS NOT NULL AND COLUMN_NAME IS NOT NULL
        "#;

        let rows = sqlx::query_as::<_, SubPartRow>(sql)
            .bind(&table.name)
            .fetch_all(pool)
            .await?;

        for row in rows {
            let Ok(length) = row.sub_part.trim().parse::<u32>() else {
                continue;
            };
            if let Some(index) = table.indexes.get_mut(&row.index_name) {
                index.lengths.insert(row.column_name, length);
            }
        }
        Ok(())
    }
}

/// The corrections active for one platform, in application order
pub struct CorrectionSet {
    platform: Platform,
    corrections: Vec<Box<dyn PlatformCorrection>>,
}

impl CorrectionSet {
    /// The built-in corrections that apply to `platform`
    pub fn for_platform(platform: Platform) -> Self {
        let all: Vec<Box<dyn PlatformCorrection>> = vec![
            Box::new(TinyintCorrection),
            Box::new(EnumCorrection),
            Box::new(IndexPrefixCorrection),
        ];
        Self {
            platform,
            corrections: all.into_iter().filter(|c| c.applies_to(platform)).collect(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.corrections.iter().map(|c| c.name()).collect()
    }

    pub fn correct_column(&self, column: &mut Column, native: &NativeType) {
        for correction in &self.corrections {
            correction.correct_column(column, native);
        }
    }

    pub async fn correct_table(&self, connection: &DatabaseConnection, table: &mut Table) -> Result<()> {
        for correction in &self.corrections {
            correction.correct_table(connection, table).await?;
        }
        Ok(())
    }
}

/// Side table of correction sets, one per connection identity
#[derive(Default)]
pub struct CorrectionRegistry {
    sets: Mutex<HashMap<ConnectionId, Arc<CorrectionSet>>>,
}

impl CorrectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the corrections for a connection.
    /// Registering the same connection again returns the existing set.
    pub fn register(&self, connection: &DatabaseConnection) -> Arc<CorrectionSet> {
        let mut sets = self.sets.lock().unwrap_or_else(|e| e.into_inner());
        sets.entry(connection.id())
            .or_insert_with(|| {
                let set = CorrectionSet::for_platform(connection.platform());
                tracing::debug!(
                    connection = %connection.id(),
                    corrections = ?set.names(),
                    "Registered platform corrections"
                );
                Arc::new(set)
            })
            .clone()
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        let sets = self.sets.lock().unwrap_or_else(|e| e.into_inner());
        sets.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn enum_values_unescape_quotes() {
        assert_eq!(parse_enum_values("'a','it''s','b,c'"), vec!["a", "it's", "b,c"]);
        assert!(parse_enum_values("").is_empty());
    }

    #[test]
    fn tinyint_is_restored_from_native_type() {
        let mut column = Column::new("flag", "boolean");
        TinyintCorrection.correct_column(&mut column, &NativeType::parse("tinyint(1)"));
        assert_eq!(column.type_name, "tinyint");

        let mut column = Column::new("flag", "boolean");
        TinyintCorrection.correct_column(&mut column, &NativeType::parse("boolean"));
        assert_eq!(column.type_name, "boolean");
    }

    #[test]
    fn enum_is_restored_with_values() {
        let mut column = Column::new("state", "string");
        EnumCorrection.correct_column(&mut column, &NativeType::parse("enum('on','off')"));
        assert_eq!(column.type_name, "enum");
        assert_eq!(
            column.attributes.extra["values"],
            serde_json::json!(["on", "off"])
        );
    }

    #[test]
    fn platform_sets() {
        assert_eq!(
            CorrectionSet::for_platform(Platform::MySql).names(),
            vec!["tinyint", "enum", "index-prefix"]
        );
        assert_eq!(
            CorrectionSet::for_platform(Platform::Sqlite).names(),
            vec!["tinyint", "enum"]
        );
    }

    #[tokio::test]
    async fn registration_is_idempotent_per_connection() {
        let registry = CorrectionRegistry::new();
        let config = DatabaseConfig::sqlite(":memory:");
        let a = DatabaseConnection::connect(&config).await.unwrap();
        let b = DatabaseConnection::connect(&config).await.unwrap();

        let first = registry.register(&a);
        let again = registry.register(&a.clone());
        let other = registry.register(&b);

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert!(registry.is_registered(a.id()));
    }
}
