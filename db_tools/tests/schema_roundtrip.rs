use db_tools::schema::definition::{self, Format};
use db_tools::schema::{
    build_schema, build_table, parse_column, to_definition, Column, PatternMatcher, Schema,
    SchemaChange, SchemaDiff, Table, TableFilter,
};
use db_tools::{compare_schemas, DdlGenerator, Normalizer, Platform};
use pretty_assertions::assert_eq;
use rstest::rstest;

const SHOP: &str = r#"
users:
  columns:
    id: int unsigned notnull autoincrement
    email: varchar(100) notnull
    name: varchar(50) {"default":"anon"}
    active: tinyint notnull {"default":1}
  indexes:
    PRIMARY: PRIMARY KEY (id)
    uk_email: UNIQUE KEY (email)
    ix_name: KEY (name(10))
  options:
    engine: InnoDB
orders:
  columns:
    id: int unsigned notnull autoincrement
    user_id: int unsigned notnull
    total: decimal {"precision":10,"scale":2}
    state: enum {"values":["new","paid"]}
  indexes:
    PRIMARY: PRIMARY KEY (id)
    ix_user: KEY (user_id)
  foreignKeys:
    - (user_id) REFERENCES users (id) {"onDelete":"CASCADE"}
"#;

fn shop() -> Schema {
    let definition = definition::parse(SHOP, Format::Yaml).unwrap();
    build_schema(&definition, TableFilter::All).unwrap()
}

fn table(name: &str, columns: &[(&str, &str)]) -> Table {
    let mut table = Table::new(name);
    for (column, spec) in columns {
        let (type_name, attributes) = parse_column(spec).unwrap();
        table.add_column(Column::new(column, &type_name).with_attributes(attributes));
    }
    table
}

#[rstest]
#[case("varchar(50) notnull")]
#[case("int(11) unsigned notnull autoincrement")]
#[case("char(2) fixed {\"default\":\"NL\"}")]
#[case("decimal {\"precision\":8,\"scale\":3}")]
#[case("enum {\"values\":[\"a\",\"b\"]}")]
fn column_specs_survive_serialization(#[case] spec: &str) {
    let parsed = parse_column(spec).unwrap();
    let mut table = Table::new("t");
    table.add_column(Column::new("c", &parsed.0).with_attributes(parsed.1.clone()));

    let mut schema = Schema::new();
    schema.add_table(table).unwrap();
    let written = to_definition(&schema);
    let reparsed = parse_column(&written["t"].columns.as_ref().unwrap()["c"]).unwrap();

    assert_eq!(reparsed, parsed);
}

#[test]
fn definition_survives_export_and_rebuild() {
    let schema = shop();
    for format in [Format::Yaml, Format::Json] {
        let text = definition::to_string(&to_definition(&schema), format).unwrap();
        let rebuilt = build_schema(&definition::parse(&text, format).unwrap(), TableFilter::All)
            .unwrap();
        assert!(
            SchemaDiff::generate(&schema, &rebuilt, TableFilter::All).is_empty(),
            "{:?} export changed the schema",
            format
        );
    }
}

#[rstest]
#[case(Platform::MySql)]
#[case(Platform::Sqlite)]
fn schema_diffed_against_itself_is_empty(#[case] platform: Platform) {
    let schema = shop();
    let diff = compare_schemas(&schema, &schema, TableFilter::All, &Normalizer::new(platform));
    assert!(diff.is_empty());
    assert!(DdlGenerator::new(platform).generate(&diff).unwrap().is_empty());
}

#[test]
fn new_column_is_the_only_change() {
    let mut current = Schema::new();
    current.add_table(table("foo", &[("id", "int")])).unwrap();
    let mut target = Schema::new();
    target
        .add_table(table("foo", &[("id", "int"), ("name", "varchar(50)")]))
        .unwrap();

    let diff = SchemaDiff::generate(&current, &target, TableFilter::All);

    assert_eq!(diff.len(), 1);
    match &diff.changes[0] {
        SchemaChange::AddColumn { table, column } => {
            assert_eq!(table, "foo");
            assert_eq!(column.name, "name");
        }
        other => panic!("unexpected change {}", other),
    }

    let statements = DdlGenerator::new(Platform::MySql).generate(&diff).unwrap();
    assert_eq!(
        statements,
        vec!["ALTER TABLE `foo` ADD COLUMN `name` VARCHAR(50) NULL".to_string()]
    );
}

#[test]
fn subset_diff_leaves_other_tables_alone() {
    let mut current = Schema::new();
    current.add_table(table("foo", &[("id", "int")])).unwrap();
    current.add_table(table("bar", &[("id", "int")])).unwrap();
    let mut target = Schema::new();
    target.add_table(table("foo", &[("id", "int")])).unwrap();

    let only_foo = vec!["foo".to_string()];
    let diff = SchemaDiff::generate(&current, &target, TableFilter::names(&only_foo));
    assert!(diff.is_empty());

    let diff = SchemaDiff::generate(&current, &target, TableFilter::All);
    assert_eq!(diff.len(), 1);
    assert!(matches!(&diff.changes[0], SchemaChange::DropTable { table } if table == "bar"));
}

#[test]
fn first_matching_pattern_wins() {
    let mut matcher = PatternMatcher::new();
    matcher.add("^a.*$", "X").unwrap();
    matcher.add("^ab$", "Y").unwrap();

    assert_eq!(matcher.get("ab"), Some(&"X"));
    assert_eq!(matcher.get("b"), None);
}

#[test]
fn mysql_create_script_covers_every_table() {
    let statements = DdlGenerator::new(Platform::MySql)
        .create_schema_sql(&shop())
        .unwrap();

    assert!(statements[0].starts_with("CREATE TABLE `users`"));
    assert!(statements[0].contains("KEY `ix_name` (`name`(10))"));
    assert!(statements[1].starts_with("CREATE TABLE `orders`"));
    assert!(statements[1].contains("ENUM('new','paid')"));
    assert!(statements
        .last()
        .unwrap()
        .contains("FOREIGN KEY (`user_id`) REFERENCES `users` (`id`) ON DELETE CASCADE"));
}

#[test]
fn bad_definition_names_table_and_fragment() {
    let definition = definition::parse(
        r#"{"t": {"columns": {"a": "int"}, "indexes": {"ix": "KEY name)"}}}"#,
        Format::Json,
    )
    .unwrap();
    let err = build_table("t", &definition["t"]).unwrap_err().to_string();
    assert!(err.contains("KEY name)"));
    assert!(err.contains("table 't'"));
}
