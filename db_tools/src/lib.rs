//! db_tools: declarative schema definitions for MySQL and SQLite
//!
//! Tables are declared in a compact text form (JSON, YAML or TOML), read into
//! a [`Schema`](schema::Schema), compared with the schema of a live database
//! and turned into the DDL statements that bring the database in line.

pub mod config;
pub mod db;
pub mod error;
pub mod schema;
pub mod utils;

use std::path::Path;

// Re-export main types for easier access
pub use config::Config;
pub use db::connection::{DatabaseConnection, Platform};
pub use db::executor::{BatchReport, SqlExecutor};
pub use error::{Error, Result};
pub use schema::corrections::CorrectionRegistry;
pub use schema::diff::SchemaDiff;
pub use schema::generator::DdlGenerator;
pub use schema::introspector::SchemaIntrospector;
pub use schema::normalize::Normalizer;

use config::{DatabaseConfig, SchemaConfig};
use schema::definition::{self, SchemaDefinition};
use schema::pattern::TableFilter;
use schema::types::Schema;

/// Compare two schemas after normalizing both for `normalizer`'s platform
pub fn compare_schemas(
    current: &Schema,
    target: &Schema,
    filter: TableFilter<'_>,
    normalizer: &Normalizer,
) -> SchemaDiff {
    SchemaDiff::generate(
        &normalizer.normalize_schema(current),
        &normalizer.normalize_schema(target),
        filter,
    )
}

/// Load a definition file, applying the storage-engine override if any
pub fn load_definition(path: &Path, engine: Option<&str>) -> Result<SchemaDefinition> {
    let mut definition = definition::load_from_file(path)?;
    if let Some(engine) = engine {
        definition::apply_engine(&mut definition, engine);
    }
    Ok(definition)
}

/// The main client for working with one live database
pub struct SchemaClient {
    introspector: SchemaIntrospector,
    executor: SqlExecutor,
    normalizer: Normalizer,
    generator: DdlGenerator,
}

impl SchemaClient {
    /// Connect and set up a client
    pub async fn connect(
        config: &DatabaseConfig,
        schema_config: &SchemaConfig,
        registry: &CorrectionRegistry,
    ) -> Result<Self> {
        let connection = DatabaseConnection::connect(config)
            .await
            .map_err(|e| match e {
                Error::SqlxError(e) => Error::DatabaseError(format!(
                    "cannot connect to {}: {}",
                    config.describe(),
                    e
                )),
                other => other,
            })?;
        Ok(Self::new(connection, schema_config, registry))
    }

    /// Create a client over an existing connection
    pub fn new(
        connection: DatabaseConnection,
        schema_config: &SchemaConfig,
        registry: &CorrectionRegistry,
    ) -> Self {
        let platform = connection.platform();
        Self {
            introspector: SchemaIntrospector::new(connection.clone(), registry),
            executor: SqlExecutor::new(connection),
            normalizer: Normalizer::new(platform)
                .with_default_collation(schema_config.default_collation.as_deref()),
            generator: DdlGenerator::new(platform),
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.introspector.connection()
    }

    pub fn platform(&self) -> Platform {
        self.connection().platform()
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Read the current database schema
    pub async fn introspect(&self, filter: TableFilter<'_>) -> Result<Schema> {
        self.introspector.introspect(filter).await
    }

    /// Diff the database against `target`
    pub async fn diff(&self, target: &Schema, filter: TableFilter<'_>) -> Result<SchemaDiff> {
        let current = self.introspect(filter).await?;
        Ok(self.diff_from(&current, target, filter))
    }

    /// Diff an already introspected schema against `target`
    pub fn diff_from(&self, current: &Schema, target: &Schema, filter: TableFilter<'_>) -> SchemaDiff {
        compare_schemas(current, target, filter, &self.normalizer)
    }

    /// Render a diff as statements for this database
    pub fn generate_sql(&self, diff: &SchemaDiff) -> Result<Vec<String>> {
        self.generator.generate(diff)
    }

    /// Apply statements best-effort
    pub async fn apply(&self, statements: &[String]) -> BatchReport {
        self.executor.execute_batch(statements).await
    }

    /// Complete workflow: introspect, diff and apply
    pub async fn sync(&self, target: &Schema, filter: TableFilter<'_>) -> Result<BatchReport> {
        let diff = self.diff(target, filter).await?;
        if diff.is_empty() {
            tracing::info!("Database schema is already in sync");
            return Ok(BatchReport::default());
        }
        let statements = self.generate_sql(&diff)?;
        Ok(self.apply(&statements).await)
    }
}
