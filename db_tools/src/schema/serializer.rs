//! Schema serializer
//!
//! Renders a [`Schema`] back into the compact text form read by the builder.
//! Attributes holding their default value are left out.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::schema::definition::{SchemaDefinition, TableDefinition};
use crate::schema::types::{
    is_default_attribute, Column, ColumnAttributes, ForeignKey, Index, IndexKind, Schema, Table,
    PRIMARY_KEY_NAME,
};

/// Collation treated as an implicit default and never written out
pub const IMPLICIT_COLLATION: &str = "utf8_general_ci";

pub fn to_definition(schema: &Schema) -> SchemaDefinition {
    schema
        .tables
        .iter()
        .map(|(name, table)| (name.clone(), table_to_definition(table)))
        .collect()
}

pub fn table_to_definition(table: &Table) -> TableDefinition {
    let columns: IndexMap<String, String> = table
        .columns
        .iter()
        .map(|(name, column)| (name.clone(), stringify_column(column)))
        .collect();

    let mut indexes = IndexMap::new();
    if let Some(primary) = table.primary_key() {
        indexes.insert(PRIMARY_KEY_NAME.to_string(), stringify_index(primary));
    }
    for (name, index) in table.indexes.iter().filter(|(_, i)| !i.is_primary()) {
        indexes.insert(name.clone(), stringify_index(index));
    }

    TableDefinition {
        columns: (!columns.is_empty()).then_some(columns),
        indexes,
        foreign_keys: table.foreign_keys.iter().map(stringify_foreign_key).collect(),
        options: table.options.clone(),
    }
}

pub fn stringify_column(column: &Column) -> String {
    let attributes = &column.attributes;
    let mut def = column.type_name.clone();
    if let Some(length) = attributes.length {
        def.push_str(&format!("({})", length));
    }
    for flag in ColumnAttributes::FLAGS {
        if attributes.flag(flag) {
            def.push(' ');
            def.push_str(flag);
        }
    }

    let remaining: Map<String, Value> = attributes
        .extra
        .iter()
        .filter(|(key, value)| !is_default_attribute(key, value))
        .filter(|(key, value)| {
            !(key.as_str() == "collation" && value.as_str() == Some(IMPLICIT_COLLATION))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if !remaining.is_empty() {
        def.push(' ');
        def.push_str(&Value::Object(remaining).to_string());
    }
    def
}

pub fn stringify_index(index: &Index) -> String {
    let mut def = match index.kind {
        IndexKind::Primary => "PRIMARY KEY(".to_string(),
        IndexKind::Unique => "UNIQUE KEY(".to_string(),
        IndexKind::Key => "KEY(".to_string(),
    };
    let columns: Vec<String> = index
        .columns
        .iter()
        .map(|column| match index.prefix_length(column) {
            Some(length) => format!("{}({})", column, length),
            None => column.clone(),
        })
        .collect();
    def.push_str(&columns.join(","));
    def.push(')');

    let mut others = Map::new();
    if !index.options.is_empty() {
        let options: Map<String, Value> = index
            .options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        others.insert("options".to_string(), Value::Object(options));
    }
    if !index.flags.is_empty() {
        others.insert(
            "flags".to_string(),
            Value::Array(index.flags.iter().cloned().map(Value::String).collect()),
        );
    }
    if !others.is_empty() {
        def.push(' ');
        def.push_str(&Value::Object(others).to_string());
    }
    def
}

pub fn stringify_foreign_key(foreign_key: &ForeignKey) -> String {
    let mut def = format!(
        "({}) REFERENCES {} ({})",
        foreign_key.local_columns.join(","),
        foreign_key.foreign_table,
        foreign_key.foreign_columns.join(",")
    );
    if !foreign_key.options.is_empty() {
        let options: Map<String, Value> = foreign_key
            .options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        def.push(' ');
        def.push_str(&Value::Object(options).to_string());
    }
    def
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parser::{parse_column, parse_foreign_key, parse_index};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn column(definition: &str) -> Column {
        let (type_name, attributes) = parse_column(definition).unwrap();
        Column::new("c", &type_name).with_attributes(attributes)
    }

    #[rstest]
    #[case("varchar(50) notnull")]
    #[case("int(11) unsigned notnull autoincrement")]
    #[case(r#"varchar {"length":50,"default":"x"}"#)]
    #[case(r#"decimal notnull {"precision":12,"scale":2}"#)]
    #[case(r#"enum {"values":["a","b"],"comment":"state"}"#)]
    #[case("string(20) fixed binary")]
    fn column_round_trip_is_stable(#[case] definition: &str) {
        let parsed = parse_column(definition).unwrap();
        let rendered = stringify_column(&column(definition));
        assert_eq!(parse_column(&rendered).unwrap(), parsed);
    }

    #[test]
    fn defaults_are_omitted() {
        let rendered = stringify_column(&column(
            r#"decimal(10) {"precision":10,"scale":0,"default":null,"collation":"utf8_general_ci"}"#,
        ));
        assert_eq!(rendered, "decimal(10)");
    }

    #[test]
    fn flags_follow_type_in_canonical_order() {
        let rendered = stringify_column(&column("int autoincrement notnull unsigned"));
        assert_eq!(rendered, "int unsigned notnull autoincrement");
    }

    #[test]
    fn renders_indexes() {
        let primary = parse_index("p", "PRIMARY KEY (id)").unwrap();
        assert_eq!(stringify_index(&primary), "PRIMARY KEY(id)");

        let prefix = parse_index("ix", "KEY (name(10), age)").unwrap();
        assert_eq!(stringify_index(&prefix), "KEY(name(10),age)");

        let fulltext = parse_index("ft", r#"UNIQUE KEY (body) {"flags":["fulltext"]}"#).unwrap();
        assert_eq!(stringify_index(&fulltext), r#"UNIQUE KEY(body) {"flags":["fulltext"]}"#);
    }

    #[test]
    fn renders_foreign_keys() {
        let fk = parse_foreign_key(r#"(a, b) REFERENCES t (x, y) {"onDelete":"CASCADE"}"#).unwrap();
        assert_eq!(
            stringify_foreign_key(&fk),
            r#"(a,b) REFERENCES t (x,y) {"onDelete":"CASCADE"}"#
        );
    }

    #[test]
    fn table_groups_put_primary_first_and_skip_empty_ones() {
        let mut table = Table::new("t");
        table.add_column(column("int"));
        table
            .add_index(parse_index("ix", "KEY (c)").unwrap())
            .unwrap();
        table
            .add_index(parse_index("pk", "PRIMARY KEY (c)").unwrap())
            .unwrap();

        let definition = table_to_definition(&table);
        assert_eq!(
            definition.indexes.keys().collect::<Vec<_>>(),
            vec!["PRIMARY", "ix"]
        );
        assert!(definition.foreign_keys.is_empty());

        let json = serde_json::to_value(&definition).unwrap();
        assert_eq!(
            json,
            json!({
                "columns": {"c": "int notnull"},
                "indexes": {"PRIMARY": "PRIMARY KEY(c)", "ix": "KEY(c)"}
            })
        );
    }
}
