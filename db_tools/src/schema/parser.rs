//! Parsers for the compact column, index and foreign-key definition syntax
//!
//! ```text
//! column:      <type>[(<length>)] [flag ...] [{"attr": value, ...}]
//! index:       [PRIMARY|UNIQUE] KEY (<col>[(<prefix>)], ...) [{"options": {...}, "flags": [...]}]
//! foreign key: (<local_cols>) REFERENCES <table> (<foreign_cols>) [{"onDelete": ..., ...}]
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::schema::types::{ColumnAttributes, ForeignKey, Index, IndexKind};

static TYPE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+)\s*").expect("valid regex"));
static LENGTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(\s*(\d+)\s*\)\s*").expect("valid regex"));
static FLAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_]\w*$").expect("valid regex"));
static KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^((primary|unique)\s+)?key").expect("valid regex"));
static COLUMN_LIST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\((.*)\)$").expect("valid regex"));
static PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)\s*\(\s*(\d+)\s*\)$").expect("valid regex"));
static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w$]+$").expect("valid regex"));
static FOREIGN_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\(([^)]*)\)\s*REFERENCES\s+([\w.$]+)\s*\(([^)]*)\)\s*(\{.*\})?$")
        .expect("valid regex")
});

/// Parse one column definition into its type name and attributes.
///
/// The `unsigned`, `fixed`, `notnull` and `autoincrement` flags are `false`
/// unless the definition sets them.
pub fn parse_column(definition: &str) -> Result<(String, ColumnAttributes)> {
    let trimmed = definition.trim();
    let caps = TYPE_RE
        .captures(trimmed)
        .ok_or_else(|| Error::parse(definition, "column definition must start with a type name"))?;
    let type_name = caps[1].to_string();
    let mut rest = &trimmed[caps[0].len()..];

    let mut attributes = ColumnAttributes::default();
    if let Some(caps) = LENGTH_RE.captures(rest) {
        let length = caps[1]
            .parse::<u32>()
            .map_err(|e| Error::parse(definition, format!("invalid length: {}", e)))?;
        attributes.length = Some(length);
        rest = &rest[caps[0].len()..];
    }

    if rest.starts_with('{') {
        let map = parse_json_object(definition, rest)?;
        attributes
            .merge(map)
            .map_err(|msg| Error::parse(definition, msg))?;
        return Ok((type_name, attributes));
    }

    let flags = match rest.find(" {") {
        Some(pos) => {
            let map = parse_json_object(definition, &rest[pos + 1..])?;
            attributes
                .merge(map)
                .map_err(|msg| Error::parse(definition, msg))?;
            &rest[..pos]
        }
        None => rest,
    };

    for word in flags.split_whitespace() {
        if !FLAG_RE.is_match(word) {
            return Err(Error::parse(
                definition,
                format!("unexpected token '{}'", word),
            ));
        }
        attributes
            .set(word, Value::Bool(true))
            .map_err(|msg| Error::parse(definition, msg))?;
    }

    Ok((type_name, attributes))
}

/// Parse one index definition. The returned index carries `name`.
pub fn parse_index(name: &str, definition: &str) -> Result<Index> {
    let trimmed = definition.trim();
    let caps = KEY_RE
        .captures(trimmed)
        .ok_or_else(|| Error::parse(definition, "index definition must contain KEY"))?;
    let kind = match caps.get(2).map(|m| m.as_str().to_ascii_uppercase()) {
        Some(ref k) if k == "PRIMARY" => IndexKind::Primary,
        Some(_) => IndexKind::Unique,
        None => IndexKind::Key,
    };
    let mut rest = &trimmed[caps[0].len()..];

    let mut index = Index::new(name, kind, Vec::new());
    if let Some(pos) = rest.find(" {") {
        let mut extra = parse_json_object(definition, &rest[pos + 1..])?;
        if let Some(options) = extra.remove("options") {
            let Value::Object(options) = options else {
                return Err(Error::parse(definition, "'options' must be a JSON object"));
            };
            for (key, value) in options {
                if key == "length" {
                    merge_prefix_lengths(definition, &mut index, value)?;
                } else {
                    index.options.insert(key, value);
                }
            }
        }
        if let Some(flags) = extra.remove("flags") {
            index.flags = string_list(definition, "flags", flags)?;
        }
        if let Some(key) = extra.keys().next() {
            return Err(Error::parse(
                definition,
                format!("unknown index attribute '{}'", key),
            ));
        }
        rest = &rest[..pos];
    }

    let rest = rest.trim();
    let list = COLUMN_LIST_RE
        .captures(rest)
        .ok_or_else(|| Error::parse(definition, "expected a parenthesized column list"))?;
    for entry in list[1].split(',').map(str::trim) {
        let column = match PREFIX_RE.captures(entry) {
            Some(caps) => {
                let column = caps[1].trim().to_string();
                let length = caps[2]
                    .parse::<u32>()
                    .map_err(|e| Error::parse(definition, format!("invalid prefix length: {}", e)))?;
                index.lengths.insert(column.clone(), length);
                column
            }
            None => entry.to_string(),
        };
        if !IDENT_RE.is_match(&column) {
            return Err(Error::parse(
                definition,
                format!("malformed column '{}' in column list", entry),
            ));
        }
        index.columns.push(column);
    }

    Ok(index)
}

/// Parse one foreign-key definition
pub fn parse_foreign_key(definition: &str) -> Result<ForeignKey> {
    let trimmed = definition.trim();
    let caps = FOREIGN_KEY_RE.captures(trimmed).ok_or_else(|| {
        Error::parse(
            definition,
            "expected '(<columns>) REFERENCES <table> (<columns>)'",
        )
    })?;

    let local_columns = identifier_list(definition, &caps[1])?;
    let foreign_columns = identifier_list(definition, &caps[3])?;
    let mut foreign_key = ForeignKey::new(local_columns, &caps[2], foreign_columns);

    if let Some(json) = caps.get(4) {
        for (key, value) in parse_json_object(definition, json.as_str())? {
            if key == "name" {
                let Value::String(name) = value else {
                    return Err(Error::parse(definition, "foreign key 'name' must be a string"));
                };
                foreign_key.name = Some(name);
            } else {
                foreign_key.options.insert(key, value);
            }
        }
    }

    Ok(foreign_key)
}

fn parse_json_object(definition: &str, json: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::parse(definition, "expected a JSON object")),
        Err(e) => Err(Error::parse(
            definition,
            format!("invalid JSON: {}", e),
        )),
    }
}

fn merge_prefix_lengths(definition: &str, index: &mut Index, value: Value) -> Result<()> {
    let Value::Object(lengths) = value else {
        return Err(Error::parse(definition, "'options.length' must map columns to lengths"));
    };
    for (column, length) in lengths {
        let length = length
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                Error::parse(definition, format!("invalid prefix length for '{}'", column))
            })?;
        index.lengths.insert(column, length);
    }
    Ok(())
}

fn string_list(definition: &str, key: &str, value: Value) -> Result<Vec<String>> {
    let Value::Array(items) = value else {
        return Err(Error::parse(definition, format!("'{}' must be a list", key)));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            other => Err(Error::parse(
                definition,
                format!("'{}' entries must be strings, got {}", key, other),
            )),
        })
        .collect()
}

fn identifier_list(definition: &str, list: &str) -> Result<Vec<String>> {
    list.split(',')
        .map(str::trim)
        .map(|column| {
            if IDENT_RE.is_match(column) {
                Ok(column.to_string())
            } else {
                Err(Error::parse(
                    definition,
                    format!("malformed column '{}' in column list", column),
                ))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn column_with_length_and_flag() {
        let (type_name, attrs) = parse_column("varchar(50) notnull").unwrap();
        assert_eq!(type_name, "varchar");
        assert_eq!(
            attrs,
            ColumnAttributes {
                length: Some(50),
                notnull: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn column_with_all_flags() {
        let (type_name, attrs) = parse_column("int(11) unsigned notnull autoincrement").unwrap();
        assert_eq!(type_name, "int");
        assert_eq!(attrs.length, Some(11));
        assert!(attrs.unsigned && attrs.notnull && attrs.autoincrement);
        assert!(!attrs.fixed);
    }

    #[test]
    fn column_with_json_only() {
        let (type_name, attrs) = parse_column(r#"varchar {"length":50,"default":"x"}"#).unwrap();
        assert_eq!(type_name, "varchar");
        assert_eq!(attrs.length, Some(50));
        assert_eq!(attrs.extra.get("default"), Some(&json!("x")));
        assert!(!attrs.notnull);
    }

    #[test]
    fn column_with_flags_and_json() {
        let (_, attrs) =
            parse_column(r#"decimal notnull {"precision":12,"scale":2,"comment":"price"}"#).unwrap();
        assert!(attrs.notnull);
        assert_eq!(attrs.extra.get("precision"), Some(&json!(12)));
        assert_eq!(attrs.extra.get("scale"), Some(&json!(2)));
        assert_eq!(attrs.extra.get("comment"), Some(&json!("price")));
    }

    #[test]
    fn unknown_flag_words_become_true_attributes() {
        let (_, attrs) = parse_column("string(20) binary").unwrap();
        assert_eq!(attrs.extra.get("binary"), Some(&json!(true)));
    }

    #[rstest]
    #[case("")]
    #[case("(10) notnull")]
    #[case("varchar notnull {\"length\":")]
    #[case("varchar {not json}")]
    #[case("varchar(abc)")]
    fn malformed_columns_fail(#[case] definition: &str) {
        let err = parse_column(definition).unwrap_err();
        match err {
            Error::ParseError { fragment, .. } => assert_eq!(fragment, definition),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn malformed_json_reports_underlying_error() {
        let err = parse_column(r#"varchar notnull {"length": }"#).unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn unique_index() {
        let index = parse_index("uk_email", "UNIQUE KEY (email)").unwrap();
        assert_eq!(index.kind, IndexKind::Unique);
        assert_eq!(index.columns, vec!["email"]);
        assert!(index.lengths.is_empty());
    }

    #[test]
    fn index_with_prefix_length() {
        let index = parse_index("ix_name", "KEY (name(10),age)").unwrap();
        assert_eq!(index.kind, IndexKind::Key);
        assert_eq!(index.columns, vec!["name", "age"]);
        assert_eq!(index.prefix_length("name"), Some(10));
        assert_eq!(index.prefix_length("age"), None);
    }

    #[rstest]
    #[case("PRIMARY KEY (id)", IndexKind::Primary)]
    #[case("primary key(id)", IndexKind::Primary)]
    #[case("Unique Key (id)", IndexKind::Unique)]
    #[case("KEY (id)", IndexKind::Key)]
    fn index_kinds(#[case] definition: &str, #[case] kind: IndexKind) {
        assert_eq!(parse_index("ix", definition).unwrap().kind, kind);
    }

    #[test]
    fn index_with_flags_and_options() {
        let index = parse_index(
            "ft_body",
            r#"KEY (body) {"flags":["fulltext"],"options":{"length":{"body":100},"where":"x"}}"#,
        )
        .unwrap();
        assert_eq!(index.flags, vec!["fulltext"]);
        assert_eq!(index.prefix_length("body"), Some(100));
        assert_eq!(index.options.get("where"), Some(&json!("x")));
    }

    #[rstest]
    #[case("KEY name)")]
    #[case("INDEX (name)")]
    #[case("KEY ()")]
    #[case("KEY (a,,b)")]
    #[case("KEY (a) {\"flags\":")]
    fn malformed_indexes_fail(#[case] definition: &str) {
        match parse_index("ix", definition).unwrap_err() {
            Error::ParseError { fragment, .. } => assert_eq!(fragment, definition),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn foreign_key_with_options() {
        let fk = parse_foreign_key(
            r#"(author_id) REFERENCES users (id) {"onDelete":"CASCADE","name":"fk_author"}"#,
        )
        .unwrap();
        assert_eq!(fk.local_columns, vec!["author_id"]);
        assert_eq!(fk.foreign_table, "users");
        assert_eq!(fk.foreign_columns, vec!["id"]);
        assert_eq!(fk.on_delete(), Some("CASCADE"));
        assert_eq!(fk.name.as_deref(), Some("fk_author"));
        assert!(!fk.options.contains_key("name"));
    }

    #[test]
    fn composite_foreign_key() {
        let fk = parse_foreign_key("(a, b) references parent (x,y)").unwrap();
        assert_eq!(fk.local_columns, vec!["a", "b"]);
        assert_eq!(fk.foreign_columns, vec!["x", "y"]);
    }

    #[test]
    fn malformed_foreign_key_fails() {
        assert!(parse_foreign_key("author_id REFERENCES users (id)").is_err());
        assert!(parse_foreign_key("(author_id) users (id)").is_err());
    }
}
