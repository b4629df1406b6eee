//! Schema difference calculator
//!
//! Compares two schemas and lists the changes that turn the current one into
//! the target, ordered so that every statement can run after the previous
//! ones: foreign keys and indexes are dropped first, tables and columns are
//! created before the indexes and foreign keys that use them.
//!
//! Both schemas should have gone through the same
//! [`Normalizer`](crate::schema::normalize::Normalizer) first.

use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

use crate::schema::pattern::TableFilter;
use crate::schema::types::{Column, ForeignKey, Index, Schema, Table};

/// One schema change
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    /// A new table, without its foreign keys (they follow as `AddForeignKey`)
    CreateTable(Table),
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: Column,
    },
    ModifyColumn {
        table: String,
        from: Column,
        to: Column,
    },
    DropColumn {
        table: String,
        column: String,
    },
    AddIndex {
        table: String,
        index: Index,
    },
    DropIndex {
        table: String,
        index: Index,
    },
    AddForeignKey {
        table: String,
        foreign_key: ForeignKey,
    },
    DropForeignKey {
        table: String,
        foreign_key: ForeignKey,
    },
    ChangeTableOption {
        table: String,
        option: String,
        value: Value,
    },
}

impl SchemaChange {
    /// Name of the table the change applies to
    pub fn table(&self) -> &str {
        match self {
            SchemaChange::CreateTable(table) => &table.name,
            SchemaChange::DropTable { table }
            | SchemaChange::AddColumn { table, .. }
            | SchemaChange::ModifyColumn { table, .. }
            | SchemaChange::DropColumn { table, .. }
            | SchemaChange::AddIndex { table, .. }
            | SchemaChange::DropIndex { table, .. }
            | SchemaChange::AddForeignKey { table, .. }
            | SchemaChange::DropForeignKey { table, .. }
            | SchemaChange::ChangeTableOption { table, .. } => table,
        }
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaChange::CreateTable(table) => write!(f, "create table {}", table.name),
            SchemaChange::DropTable { table } => write!(f, "drop table {}", table),
            SchemaChange::AddColumn { table, column } => {
                write!(f, "add column {}.{}", table, column.name)
            }
            SchemaChange::ModifyColumn { table, to, .. } => {
                write!(f, "modify column {}.{}", table, to.name)
            }
            SchemaChange::DropColumn { table, column } => {
                write!(f, "drop column {}.{}", table, column)
            }
            SchemaChange::AddIndex { table, index } => {
                write!(f, "add index {} on {}", index.name, table)
            }
            SchemaChange::DropIndex { table, index } => {
                write!(f, "drop index {} on {}", index.name, table)
            }
            SchemaChange::AddForeignKey { table, foreign_key } => write!(
                f,
                "add foreign key {}({}) -> {}",
                table,
                foreign_key.local_columns.join(","),
                foreign_key.foreign_table
            ),
            SchemaChange::DropForeignKey { table, foreign_key } => write!(
                f,
                "drop foreign key {}({}) -> {}",
                table,
                foreign_key.local_columns.join(","),
                foreign_key.foreign_table
            ),
            SchemaChange::ChangeTableOption { table, option, value } => {
                write!(f, "set {} = {} on {}", option, value, table)
            }
        }
    }
}

/// Ordered changes needed to synchronize two schemas
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    pub changes: Vec<SchemaChange>,
}

/// Changes grouped by execution phase
#[derive(Default)]
struct Phases {
    drop_foreign_keys: Vec<SchemaChange>,
    drop_indexes: Vec<SchemaChange>,
    create_tables: Vec<SchemaChange>,
    columns: Vec<SchemaChange>,
    add_indexes: Vec<SchemaChange>,
    table_options: Vec<SchemaChange>,
    drop_columns: Vec<SchemaChange>,
    drop_tables: Vec<SchemaChange>,
    add_foreign_keys: Vec<SchemaChange>,
}

impl Phases {
    fn into_changes(self) -> Vec<SchemaChange> {
        [
            self.drop_foreign_keys,
            self.drop_indexes,
            self.create_tables,
            self.columns,
            self.add_indexes,
            self.table_options,
            self.drop_columns,
            self.drop_tables,
            self.add_foreign_keys,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

impl SchemaDiff {
    /// Generate the diff from `current` to `target`.
    ///
    /// Only tables included by `filter` are compared; a table outside it is
    /// neither created nor dropped.
    pub fn generate(current: &Schema, target: &Schema, filter: TableFilter<'_>) -> Self {
        let mut phases = Phases::default();

        for (name, target_table) in &target.tables {
            if !filter.includes(name) {
                continue;
            }
            match current.table(name) {
                Some(current_table) => Self::diff_table(&mut phases, current_table, target_table),
                None => {
                    let mut table = target_table.clone();
                    let foreign_keys = std::mem::take(&mut table.foreign_keys);
                    phases.create_tables.push(SchemaChange::CreateTable(table));
                    for foreign_key in foreign_keys {
                        phases.add_foreign_keys.push(SchemaChange::AddForeignKey {
                            table: name.clone(),
                            foreign_key,
                        });
                    }
                }
            }
        }

        for (name, current_table) in &current.tables {
            if !filter.includes(name) || target.has_table(name) {
                continue;
            }
            for foreign_key in &current_table.foreign_keys {
                phases.drop_foreign_keys.push(SchemaChange::DropForeignKey {
                    table: name.clone(),
                    foreign_key: foreign_key.clone(),
                });
            }
            phases.drop_tables.push(SchemaChange::DropTable {
                table: name.clone(),
            });
        }

        Self::release_foreign_keys(&mut phases, current, target, filter);

        let diff = Self {
            changes: phases.into_changes(),
        };
        tracing::debug!(changes = diff.len(), "Computed schema diff");
        diff
    }

    /// Drop the foreign keys that block a dropped table or column, and
    /// drop then re-add the ones that span a modified column
    fn release_foreign_keys(
        phases: &mut Phases,
        current: &Schema,
        target: &Schema,
        filter: TableFilter<'_>,
    ) {
        let dropped_tables: HashSet<&str> = phases
            .drop_tables
            .iter()
            .filter_map(|change| match change {
                SchemaChange::DropTable { table } => Some(table.as_str()),
                _ => None,
            })
            .collect();
        let dropped_columns: HashSet<(&str, &str)> = phases
            .drop_columns
            .iter()
            .filter_map(|change| match change {
                SchemaChange::DropColumn { table, column } => Some((table.as_str(), column.as_str())),
                _ => None,
            })
            .collect();
        let modified_columns: HashSet<(&str, &str)> = phases
            .columns
            .iter()
            .filter_map(|change| match change {
                SchemaChange::ModifyColumn { table, to, .. } => Some((table.as_str(), to.name.as_str())),
                _ => None,
            })
            .collect();

        let mut dropped = Vec::new();
        let mut readded = Vec::new();
        for (name, table) in &current.tables {
            if !filter.includes(name) || dropped_tables.contains(name.as_str()) {
                continue;
            }
            for foreign_key in &table.foreign_keys {
                let already_dropped = phases.drop_foreign_keys.iter().any(|change| {
                    matches!(change, SchemaChange::DropForeignKey { table, foreign_key: fk }
                        if table == name && fk.same_reference(foreign_key))
                });
                if already_dropped {
                    continue;
                }

                let spans = |columns: &HashSet<(&str, &str)>| {
                    foreign_key
                        .local_columns
                        .iter()
                        .any(|c| columns.contains(&(name.as_str(), c.as_str())))
                        || foreign_key
                            .foreign_columns
                            .iter()
                            .any(|c| columns.contains(&(foreign_key.foreign_table.as_str(), c.as_str())))
                };
                let orphaned = dropped_tables.contains(foreign_key.foreign_table.as_str())
                    || spans(&dropped_columns);

                if orphaned || spans(&modified_columns) {
                    dropped.push(SchemaChange::DropForeignKey {
                        table: name.clone(),
                        foreign_key: foreign_key.clone(),
                    });
                }
                if orphaned || !spans(&modified_columns) {
                    continue;
                }
                let kept = target
                    .table(name)
                    .and_then(|t| t.foreign_keys.iter().find(|fk| fk.same_reference(foreign_key)));
                if let Some(kept) = kept {
                    readded.push(SchemaChange::AddForeignKey {
                        table: name.clone(),
                        foreign_key: kept.clone(),
                    });
                }
            }
        }
        phases.drop_foreign_keys.extend(dropped);
        phases.add_foreign_keys.extend(readded);
    }

    fn diff_table(phases: &mut Phases, current: &Table, target: &Table) {
        let table = &target.name;

        for (name, target_column) in &target.columns {
            match current.column(name) {
                None => phases.columns.push(SchemaChange::AddColumn {
                    table: table.clone(),
                    column: target_column.clone(),
                }),
                Some(current_column) if current_column != target_column => {
                    phases.columns.push(SchemaChange::ModifyColumn {
                        table: table.clone(),
                        from: current_column.clone(),
                        to: target_column.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        for name in current.columns.keys() {
            if target.column(name).is_none() {
                phases.drop_columns.push(SchemaChange::DropColumn {
                    table: table.clone(),
                    column: name.clone(),
                });
            }
        }

        for (name, target_index) in &target.indexes {
            match current.indexes.get(name) {
                Some(current_index) if same_index(current_index, target_index) => {}
                Some(current_index) => {
                    phases.drop_indexes.push(SchemaChange::DropIndex {
                        table: table.clone(),
                        index: current_index.clone(),
                    });
                    phases.add_indexes.push(SchemaChange::AddIndex {
                        table: table.clone(),
                        index: target_index.clone(),
                    });
                }
                None => phases.add_indexes.push(SchemaChange::AddIndex {
                    table: table.clone(),
                    index: target_index.clone(),
                }),
            }
        }
        for (name, current_index) in &current.indexes {
            if !target.indexes.contains_key(name) && !backs_kept_foreign_key(name, current, target) {
                phases.drop_indexes.push(SchemaChange::DropIndex {
                    table: table.clone(),
                    index: current_index.clone(),
                });
            }
        }

        for target_fk in &target.foreign_keys {
            match current.foreign_keys.iter().find(|fk| fk.same_reference(target_fk)) {
                Some(current_fk) if current_fk.options == target_fk.options => {}
                Some(current_fk) => {
                    phases.drop_foreign_keys.push(SchemaChange::DropForeignKey {
                        table: table.clone(),
                        foreign_key: current_fk.clone(),
                    });
                    phases.add_foreign_keys.push(SchemaChange::AddForeignKey {
                        table: table.clone(),
                        foreign_key: target_fk.clone(),
                    });
                }
                None => phases.add_foreign_keys.push(SchemaChange::AddForeignKey {
                    table: table.clone(),
                    foreign_key: target_fk.clone(),
                }),
            }
        }
        for current_fk in &current.foreign_keys {
            if !target.foreign_keys.iter().any(|fk| fk.same_reference(current_fk)) {
                phases.drop_foreign_keys.push(SchemaChange::DropForeignKey {
                    table: table.clone(),
                    foreign_key: current_fk.clone(),
                });
            }
        }

        // options missing from the target are left as they are
        for (option, value) in &target.options {
            if current.options.get(option) != Some(value) {
                phases.table_options.push(SchemaChange::ChangeTableOption {
                    table: table.clone(),
                    option: option.clone(),
                    value: value.clone(),
                });
            }
        }
    }

    /// Check if the diff is empty (no changes needed)
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SchemaChange> {
        self.changes.iter()
    }
}

impl<'a> IntoIterator for &'a SchemaDiff {
    type Item = &'a SchemaChange;
    type IntoIter = std::slice::Iter<'a, SchemaChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// Index equality ignoring the name and free-form options
fn same_index(a: &Index, b: &Index) -> bool {
    a.kind == b.kind && a.columns == b.columns && a.lengths == b.lengths && a.flags == b.flags
}

/// Whether an index is the one MySQL created implicitly for a foreign key
/// that survives in the target
fn backs_kept_foreign_key(index: &str, current: &Table, target: &Table) -> bool {
    current
        .foreign_keys
        .iter()
        .filter(|fk| fk.name.as_deref() == Some(index))
        .any(|fk| target.foreign_keys.iter().any(|t| t.same_reference(fk)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::builder::build_schema;
    use crate::schema::definition::{parse, Format};
    use pretty_assertions::assert_eq;

    fn schema(json: &str) -> Schema {
        build_schema(&parse(json, Format::Json).unwrap(), TableFilter::All).unwrap()
    }

    fn kinds(diff: &SchemaDiff) -> Vec<String> {
        diff.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn identical_schemas_have_no_changes() {
        let s = schema(
            r#"{"users": {"columns": {"id": "int", "email": "varchar(50)"},
                          "indexes": {"PRIMARY": "PRIMARY KEY (id)", "uk": "UNIQUE KEY (email)"}},
                "posts": {"columns": {"id": "int", "user_id": "int"},
                          "foreignKeys": ["(user_id) REFERENCES users (id)"]}}"#,
        );
        assert!(SchemaDiff::generate(&s, &s, TableFilter::All).is_empty());
    }

    #[test]
    fn added_column_is_the_only_change() {
        let current = schema(r#"{"foo": {"columns": {"id": "int"}}}"#);
        let target = schema(r#"{"foo": {"columns": {"id": "int", "name": "varchar(50)"}}}"#);

        let diff = SchemaDiff::generate(&current, &target, TableFilter::All);
        assert_eq!(diff.len(), 1);
        match &diff.changes[0] {
            SchemaChange::AddColumn { table, column } => {
                assert_eq!(table, "foo");
                assert_eq!(column.name, "name");
                assert_eq!(column.attributes.length, Some(50));
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn subset_never_drops_outside_tables() {
        let current = schema(
            r#"{"foo": {"columns": {"id": "int"}}, "bar": {"columns": {"id": "int"}}}"#,
        );
        let target = schema(r#"{"foo": {"columns": {"id": "int"}}}"#);

        let subset = vec!["foo".to_string()];
        assert!(SchemaDiff::generate(&current, &target, TableFilter::names(&subset)).is_empty());

        let purge = SchemaDiff::generate(&current, &target, TableFilter::All);
        assert_eq!(kinds(&purge), vec!["drop table bar"]);
    }

    #[test]
    fn changes_are_ordered_by_dependency() {
        let current = schema(
            r#"{"users": {"columns": {"id": "int", "old": "int", "email": "varchar(20)"},
                          "indexes": {"ix_old": "KEY (old)"}},
                "legacy": {"columns": {"id": "int", "user_id": "int"},
                           "foreignKeys": ["(user_id) REFERENCES users (id)"]}}"#,
        );
        let target = schema(
            r#"{"users": {"columns": {"id": "int", "email": "varchar(50)", "name": "varchar(10)"},
                          "indexes": {"ix_name": "KEY (name)"},
                          "options": {"engine": "InnoDB"}},
                "posts": {"columns": {"id": "int", "user_id": "int"},
                          "foreignKeys": ["(user_id) REFERENCES users (id)"]}}"#,
        );

        let diff = SchemaDiff::generate(&current, &target, TableFilter::All);
        assert_eq!(
            kinds(&diff),
            vec![
                "drop foreign key legacy(user_id) -> users",
                "drop index ix_old on users",
                "create table posts",
                "modify column users.email",
                "add column users.name",
                "add index ix_name on users",
                "set engine = \"InnoDB\" on users",
                "drop column users.old",
                "drop table legacy",
                "add foreign key posts(user_id) -> users",
            ]
        );
        match &diff.changes[2] {
            SchemaChange::CreateTable(table) => assert!(table.foreign_keys.is_empty()),
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn changed_index_and_foreign_key_are_recreated() {
        let current = schema(
            r#"{"t": {"columns": {"a": "int", "b": "int"},
                      "indexes": {"ix": "KEY (a)"},
                      "foreignKeys": ["(a) REFERENCES p (id)"]}}"#,
        );
        let target = schema(
            r#"{"t": {"columns": {"a": "int", "b": "int"},
                      "indexes": {"ix": "KEY (a, b)"},
                      "foreignKeys": ["(a) REFERENCES p (id) {\"onDelete\":\"CASCADE\"}"]}}"#,
        );

        let diff = SchemaDiff::generate(&current, &target, TableFilter::All);
        assert_eq!(
            kinds(&diff),
            vec![
                "drop foreign key t(a) -> p",
                "drop index ix on t",
                "add index ix on t",
                "add foreign key t(a) -> p",
            ]
        );
    }

    #[test]
    fn primary_key_compared_by_position_not_name() {
        let current = schema(r#"{"t": {"columns": {"id": "int"}, "indexes": {"pk": "PRIMARY KEY (id)"}}}"#);
        let target =
            schema(r#"{"t": {"columns": {"id": "int"}, "indexes": {"PRIMARY": "PRIMARY KEY (id)"}}}"#);
        assert!(SchemaDiff::generate(&current, &target, TableFilter::All).is_empty());
    }

    #[test]
    fn implicit_foreign_key_index_is_kept() {
        let current = schema(
            r#"{"t": {"columns": {"a": "int"},
                      "indexes": {"fk_t_a": "KEY (a)"},
                      "foreignKeys": ["(a) REFERENCES p (id) {\"name\":\"fk_t_a\"}"]}}"#,
        );
        let target = schema(
            r#"{"t": {"columns": {"a": "int"}, "foreignKeys": ["(a) REFERENCES p (id)"]}}"#,
        );
        assert!(SchemaDiff::generate(&current, &target, TableFilter::All).is_empty());
    }

    #[test]
    fn options_only_present_in_current_are_kept() {
        let current =
            schema(r#"{"t": {"columns": {"id": "int"}, "options": {"engine": "InnoDB", "comment": "x"}}}"#);
        let target = schema(r#"{"t": {"columns": {"id": "int"}, "options": {"engine": "InnoDB"}}}"#);
        assert!(SchemaDiff::generate(&current, &target, TableFilter::All).is_empty());
    }

    #[test]
    fn dropping_a_table_releases_keys_that_reference_it() {
        let current = schema(
            r#"{"p": {"columns": {"id": "int"}, "indexes": {"PRIMARY": "PRIMARY KEY (id)"}},
                "c": {"columns": {"id": "int", "p_id": "int"},
                      "foreignKeys": ["(p_id) REFERENCES p (id)"]}}"#,
        );
        let target = schema(r#"{"c": {"columns": {"id": "int", "p_id": "int"}}}"#);

        let diff = SchemaDiff::generate(&current, &target, TableFilter::All);
        assert_eq!(
            kinds(&diff),
            vec!["drop foreign key c(p_id) -> p", "drop table p"]
        );
    }

    #[test]
    fn dropping_a_referenced_column_releases_its_keys() {
        let current = schema(
            r#"{"p": {"columns": {"id": "int", "code": "int"}},
                "c": {"columns": {"id": "int", "p_code": "int"},
                      "foreignKeys": ["(p_code) REFERENCES p (code)"]}}"#,
        );
        let target = schema(
            r#"{"p": {"columns": {"id": "int"}},
                "c": {"columns": {"id": "int", "p_code": "int"}}}"#,
        );

        let diff = SchemaDiff::generate(&current, &target, TableFilter::All);
        assert_eq!(
            kinds(&diff),
            vec!["drop foreign key c(p_code) -> p", "drop column p.code"]
        );
    }

    #[test]
    fn modified_key_column_recreates_unchanged_foreign_key() {
        let current = schema(
            r#"{"p": {"columns": {"id": "int"}},
                "c": {"columns": {"id": "int", "p_id": "int"},
                      "foreignKeys": ["(p_id) REFERENCES p (id)"]}}"#,
        );
        let target = schema(
            r#"{"p": {"columns": {"id": "bigint"}},
                "c": {"columns": {"id": "int", "p_id": "bigint"},
                      "foreignKeys": ["(p_id) REFERENCES p (id)"]}}"#,
        );

        let diff = SchemaDiff::generate(&current, &target, TableFilter::All);
        assert_eq!(
            kinds(&diff),
            vec![
                "drop foreign key c(p_id) -> p",
                "modify column p.id",
                "modify column c.p_id",
                "add foreign key c(p_id) -> p",
            ]
        );
    }
}
