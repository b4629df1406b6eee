//! Schema builder
//!
//! Turns a textual definition document into a [`Schema`].

use crate::error::{Error, Result};
use crate::schema::definition::{SchemaDefinition, TableDefinition, PATTERN_OPTION};
use crate::schema::parser::{parse_column, parse_foreign_key, parse_index};
use crate::schema::pattern::{anchored_pattern, exact_pattern, PatternMatcher, TableFilter};
use crate::schema::types::{Column, Schema, Table};

/// Build a schema from every definition the filter includes
pub fn build_schema(definition: &SchemaDefinition, filter: TableFilter<'_>) -> Result<Schema> {
    let mut schema = Schema::new();
    for (name, table_definition) in definition {
        if filter.includes(name) {
            schema.add_table(build_table(name, table_definition)?)?;
        }
    }
    tracing::debug!(tables = schema.tables.len(), "Built schema from definitions");
    Ok(schema)
}

/// Build a single table from its definition
pub fn build_table(name: &str, definition: &TableDefinition) -> Result<Table> {
    let columns = match &definition.columns {
        Some(columns) if !columns.is_empty() => columns,
        _ => {
            return Err(Error::ValidationError(format!(
                "table '{}': columns is required",
                name
            )))
        }
    };

    let mut table = Table::new(name);
    for (column_name, column_definition) in columns {
        let (type_name, attributes) = parse_column(column_definition)
            .map_err(|e| e.in_context(&format!("table '{}', column '{}'", name, column_name)))?;
        table.add_column(Column::new(column_name, &type_name).with_attributes(attributes));
    }

    for (index_name, index_definition) in &definition.indexes {
        let context = format!("table '{}', index '{}'", name, index_name);
        let index = parse_index(index_name, index_definition).map_err(|e| e.in_context(&context))?;
        table.add_index(index).map_err(|e| e.in_context(&context))?;
    }

    for foreign_key_definition in &definition.foreign_keys {
        let context = format!("table '{}', foreign key '{}'", name, foreign_key_definition);
        let foreign_key =
            parse_foreign_key(foreign_key_definition).map_err(|e| e.in_context(&context))?;
        table
            .add_foreign_key(foreign_key)
            .map_err(|e| e.in_context(&context))?;
    }

    for (option, value) in &definition.options {
        if option != PATTERN_OPTION {
            table.set_option(option, value.clone());
        }
    }

    Ok(table)
}

/// Route table names to definitions: every exact name first, then the
/// `options.pattern` wildcards in document order
pub fn definition_matcher(definition: &SchemaDefinition) -> Result<PatternMatcher<TableDefinition>> {
    let mut matcher = PatternMatcher::new();
    for (name, table) in definition {
        matcher.add(&exact_pattern(name), table.clone())?;
    }
    for table in definition.values() {
        if let Some(pattern) = table.pattern() {
            matcher.add(&anchored_pattern(pattern), table.clone())?;
        }
    }
    Ok(matcher)
}

/// Add a table for every current table that only a wildcard pattern covers
///
/// Tables already present in `target` are left alone. Returns the names added.
pub fn add_pattern_tables(
    target: &mut Schema,
    current: &Schema,
    matcher: &PatternMatcher<TableDefinition>,
) -> Result<Vec<String>> {
    let mut added = Vec::new();
    for name in current.tables.keys() {
        if target.has_table(name) {
            continue;
        }
        if let Some(definition) = matcher.get(name) {
            target.add_table(build_table(name, definition)?)?;
            added.push(name.clone());
        }
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::definition::{parse, Format};
    use crate::schema::types::IndexKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn definition() -> SchemaDefinition {
        parse(
            r#"{
                "users": {
                    "columns": {"id": "int unsigned autoincrement", "name": "varchar(50)"},
                    "indexes": {"pk": "PRIMARY KEY (id)", "ix_name": "KEY (name(10))"},
                    "options": {"engine": "InnoDB"}
                },
                "order_2023_1": {
                    "columns": {"id": "int", "user_id": "int unsigned"},
                    "foreignKeys": ["(user_id) REFERENCES users (id) {\"onDelete\":\"CASCADE\"}"],
                    "options": {"pattern": "order_2023_\\d+"}
                }
            }"#,
            Format::Json,
        )
        .unwrap()
    }

    #[test]
    fn builds_tables_with_indexes_and_keys() {
        let schema = build_schema(&definition(), TableFilter::All).unwrap();
        let users = schema.table("users").unwrap();

        assert_eq!(users.columns.keys().collect::<Vec<_>>(), vec!["id", "name"]);
        assert!(users.columns["id"].attributes.notnull);
        assert_eq!(users.primary_key().unwrap().columns, vec!["id"]);
        assert_eq!(users.indexes["ix_name"].kind, IndexKind::Key);
        assert_eq!(users.indexes["ix_name"].prefix_length("name"), Some(10));
        assert_eq!(users.options["engine"], json!("InnoDB"));

        let orders = schema.table("order_2023_1").unwrap();
        assert_eq!(orders.foreign_keys[0].on_delete(), Some("CASCADE"));
        assert!(orders.options.is_empty());
    }

    #[test]
    fn filter_limits_tables() {
        let names = vec!["users".to_string()];
        let schema = build_schema(&definition(), TableFilter::names(&names)).unwrap();
        assert_eq!(schema.table_names(), vec!["users"]);
    }

    #[test]
    fn missing_columns_is_a_validation_error() {
        let definition = parse(r#"{"t": {"indexes": {"ix": "KEY (a)"}}}"#, Format::Json).unwrap();
        let err = build_schema(&definition, TableFilter::All).unwrap_err();
        assert!(matches!(err, Error::ValidationError(ref m) if m.contains("columns is required")));
    }

    #[test]
    fn duplicate_primary_is_a_validation_error() {
        let definition = parse(
            r#"{"t": {"columns": {"a": "int", "b": "int"},
                      "indexes": {"p1": "PRIMARY KEY (a)", "p2": "PRIMARY KEY (b)"}}}"#,
            Format::Json,
        )
        .unwrap();
        let err = build_schema(&definition, TableFilter::All).unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[test]
    fn parse_errors_carry_table_and_column() {
        let definition =
            parse(r#"{"t": {"columns": {"a": "(11) int"}}}"#, Format::Json).unwrap();
        let err = build_schema(&definition, TableFilter::All).unwrap_err().to_string();
        assert!(err.contains("table 't', column 'a'"));
        assert!(err.contains("(11) int"));
    }

    #[test]
    fn foreign_key_errors_name_table_and_key() {
        let definition = parse(
            r#"{"t": {"columns": {"a": "int"}, "foreignKeys": ["(missing) REFERENCES p (id)"]}}"#,
            Format::Json,
        )
        .unwrap();
        let err = build_schema(&definition, TableFilter::All).unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
        let message = err.to_string();
        assert!(message.contains("table 't', foreign key '(missing) REFERENCES p (id)'"));
    }

    #[test]
    fn pattern_tables_use_wildcard_definitions() {
        let definition = definition();
        let matcher = definition_matcher(&definition).unwrap();
        assert_eq!(matcher.len(), 3);

        let mut current = Schema::new();
        for name in ["users", "order_2023_7", "audit"] {
            let mut table = Table::new(name);
            table.add_column(Column::new("id", "integer"));
            current.add_table(table).unwrap();
        }

        let mut target = build_schema(&definition, TableFilter::All).unwrap();
        let added = add_pattern_tables(&mut target, &current, &matcher).unwrap();

        assert_eq!(added, vec!["order_2023_7"]);
        assert!(!matcher.matches("audit"));
        assert_eq!(
            target.table("order_2023_7").unwrap().columns.len(),
            target.table("order_2023_1").unwrap().columns.len()
        );
    }
}
