//! Naming utilities for generated SQL
//!
//! Constraint names, identifier quoting and identifier length limits.

/// Default pattern for foreign keys declared without a name
pub const FOREIGN_KEY_PATTERN: &str = "fk_{table}_{columns}";

/// Format a name according to a pattern with placeholders
pub fn format_name(pattern: &str, replacements: &[(&str, &str)]) -> String {
    let mut result = pattern.to_string();

    for (placeholder, value) in replacements {
        result = result.replace(&format!("{{{}}}", placeholder), value);
    }

    result
}

/// Get foreign key constraint name according to pattern, within `max_length`
pub fn get_foreign_key_name(
    pattern: &str,
    table_name: &str,
    columns: &[String],
    max_length: usize,
) -> String {
    let columns_str = columns.join("_");

    let name = format_name(pattern, &[("table", table_name), ("columns", &columns_str)]);
    truncate_identifier(&name, max_length)
}

/// Truncate an identifier to fit database limits
pub fn truncate_identifier(name: &str, max_length: usize) -> String {
    if name.len() <= max_length {
        return name.to_string();
    }

    // room for "_" plus 8 hash characters
    let keep_length = max_length.saturating_sub(9);
    let hash = format!("{:x}", md5::compute(name.as_bytes()));

    let mut cut = keep_length.min(name.len());
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{}_{}", &name[..cut], &hash[0..8])
}

/// Get maximum identifier length for specific database
pub fn get_max_identifier_length(db_type: &str) -> usize {
    match db_type.to_lowercase().as_str() {
        "mysql" => 64,
        "sqlite" => 2048,
        _ => 63,
    }
}

/// Format SQL identifier according to database style
pub fn format_sql_identifier(name: &str, db_type: &str) -> String {
    match db_type.to_lowercase().as_str() {
        "mysql" => format!("`{}`", name.replace('`', "``")),
        "sqlite" => format!("\"{}\"", name.replace('"', "\"\"")),
        _ => name.to_string(),
    }
}

/// Quote a string literal for SQL
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_name() {
        assert_eq!(
            format_name("fk_{table}_{columns}", &[("table", "posts"), ("columns", "author_id")]),
            "fk_posts_author_id"
        );
    }

    #[test]
    fn test_foreign_key_name() {
        assert_eq!(
            get_foreign_key_name(
                FOREIGN_KEY_PATTERN,
                "orders",
                &["customer_id".to_string(), "shop_id".to_string()],
                64
            ),
            "fk_orders_customer_id_shop_id"
        );

        let long = get_foreign_key_name(
            FOREIGN_KEY_PATTERN,
            "a_table_with_a_rather_long_name",
            &["and_a_long_column_name_too".to_string()],
            30,
        );
        assert_eq!(long.len(), 30);
        assert!(long.starts_with("fk_a_table_with_a_ra"));
    }

    #[test]
    fn test_truncate_identifier() {
        let long_name = "this_is_a_very_long_identifier_that_exceeds_database_limits";
        let truncated = truncate_identifier(long_name, 30);

        assert_eq!(truncated.len(), 30);
        assert!(truncated.starts_with("this_is_a_very_long"));
        assert_eq!(truncate_identifier("short", 30), "short");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let truncated = truncate_identifier("ééééééééééééééééééé", 20);
        assert!(truncated.len() <= 20);
    }

    #[test]
    fn test_quoting() {
        assert_eq!(format_sql_identifier("from", "mysql"), "`from`");
        assert_eq!(format_sql_identifier("a`b", "mysql"), "`a``b`");
        assert_eq!(format_sql_identifier("from", "sqlite"), "\"from\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
