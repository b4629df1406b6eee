//! Schema introspector
//!
//! Reads a live database into a [`Schema`] through the catalog, then lets the
//! connection's registered corrections repair what the catalog lost.

use std::sync::Arc;

use crate::db::connection::DatabaseConnection;
use crate::error::{Error, Result};
use crate::schema::catalog::{catalog_for, Catalog};
use crate::schema::corrections::{CorrectionRegistry, CorrectionSet};
use crate::schema::pattern::TableFilter;
use crate::schema::types::{Schema, Table};

/// Schema introspector for a live connection
pub struct SchemaIntrospector {
    connection: DatabaseConnection,
    corrections: Arc<CorrectionSet>,
}

impl SchemaIntrospector {
    /// Create an introspector, registering the connection's corrections if needed
    pub fn new(connection: DatabaseConnection, registry: &CorrectionRegistry) -> Self {
        let corrections = registry.register(&connection);
        Self {
            connection,
            corrections,
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Read every table the filter includes
    pub async fn introspect(&self, filter: TableFilter<'_>) -> Result<Schema> {
        let catalog = catalog_for(&self.connection);
        let mut schema = Schema::new();

        let names = catalog
            .list_tables()
            .await
            .map_err(|e| e.in_context(&format!("listing tables on {}", self.connection.id())))?;

        for name in names.iter().filter(|name| filter.includes(name)) {
            let table = self
                .read_table(catalog.as_ref(), name)
                .await
                .map_err(|e| e.in_context(&format!("table '{}'", name)))?;
            schema.add_table(table)?;
        }

        if self.connection.platform().supports_namespaces() {
            schema.namespaces = catalog
                .namespaces()
                .await
                .map_err(|e| e.in_context("listing namespaces"))?;
        }

        tracing::info!(
            connection = %self.connection.id(),
            tables = schema.tables.len(),
            "Introspected database schema"
        );
        Ok(schema)
    }

    /// Read a single table
    pub async fn introspect_table(&self, name: &str) -> Result<Table> {
        let catalog = catalog_for(&self.connection);
        self.read_table(catalog.as_ref(), name)
            .await
            .map_err(|e| e.in_context(&format!("table '{}'", name)))
    }

    async fn read_table(&self, catalog: &dyn Catalog, name: &str) -> Result<Table> {
        let mut table = Table::new(name);

        let columns = catalog.columns(name).await?;
        if columns.is_empty() {
            return Err(Error::IntrospectionError(format!(
                "table '{}' does not exist or has no columns",
                name
            )));
        }
        for mut entry in columns {
            self.corrections
                .correct_column(&mut entry.column, &entry.native_type);
            table.add_column(entry.column);
        }

        for index in catalog.indexes(name).await? {
            table.add_index(index).map_err(as_introspection_error)?;
        }
        for foreign_key in catalog.foreign_keys(name).await? {
            table
                .add_foreign_key(foreign_key)
                .map_err(as_introspection_error)?;
        }
        for (option, value) in catalog.table_options(name).await? {
            table.set_option(&option, value);
        }

        self.corrections
            .correct_table(&self.connection, &mut table)
            .await?;

        tracing::debug!(
            table = name,
            columns = table.columns.len(),
            indexes = table.indexes.len(),
            foreign_keys = table.foreign_keys.len(),
            "Introspected table"
        );
        Ok(table)
    }
}

fn as_introspection_error(error: Error) -> Error {
    match error {
        Error::ValidationError(msg) => Error::IntrospectionError(msg),
        other => other,
    }
}
