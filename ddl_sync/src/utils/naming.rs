//! Naming utilities for ddl_sync
//!
//! Identifier normalisation, generated constraint names and migration file names.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Dialect;

static MIGRATION_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^changes-(?P<ts>[^.]*)\.sql$").expect("valid migration file regex"));

const MIGRATION_PREFIX: &str = "changes-";
const DOWN_SUFFIX: &str = ".down.sql";

/// Key used for case-insensitive lookups of tables, columns, constraints and indexes
pub fn normalize_identifier(name: &str) -> String {
    name.trim_matches('"').to_lowercase()
}

/// Format a name according to a pattern with placeholders
pub fn format_name(pattern: &str, replacements: &[(&str, &str)]) -> String {
    let mut result = pattern.to_string();

    for (placeholder, value) in replacements {
        result = result.replace(&format!("{{{}}}", placeholder), value);
    }

    result
}

/// Name a constraint the way PostgreSQL names unnamed ones:
/// `{table}_{columns}_{suffix}`, or `{table}_{suffix}` without columns.
pub fn get_constraint_name(
    table_name: &str,
    columns: &[String],
    suffix: &str,
    dialect: Dialect,
) -> String {
    let name = if columns.is_empty() {
        format_name("{table}_{type}", &[("table", table_name), ("type", suffix)])
    } else {
        let columns_str = columns.join("_");
        format_name(
            "{table}_{columns}_{type}",
            &[("table", table_name), ("columns", &columns_str), ("type", suffix)],
        )
    };

    truncate_identifier(&name, get_max_identifier_length(dialect))
}

/// Name of the table-level constraint equivalent to an inline `UNIQUE` column modifier
pub fn unique_constraint_name(table_name: &str, column_name: &str, dialect: Dialect) -> String {
    get_constraint_name(table_name, &[column_name.to_string()], "key", dialect)
}

/// Truncate an identifier to fit database limits
pub fn truncate_identifier(name: &str, max_length: usize) -> String {
    if name.len() <= max_length {
        name.to_string()
    } else {
        // Room for the underscore and an 8 char hash
        let keep_length = max_length.saturating_sub(9);

        let hash = format!("{:x}", md5::compute(name.as_bytes()));

        let mut cut = keep_length.min(name.len());
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }

        format!("{}_{}", &name[..cut], &hash[0..8])
    }
}

/// Get maximum identifier length for specific database
pub fn get_max_identifier_length(dialect: Dialect) -> usize {
    match dialect {
        Dialect::Postgres => 63,
        Dialect::Mysql => 64,
        Dialect::Sqlite => 2048,
        Dialect::Generic => 63,
    }
}

/// Format SQL identifier according to database style (quoted, backticks, etc.)
pub fn format_sql_identifier(name: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::Mysql => format!("`{}`", name),
        _ => format!("\"{}\"", name),
    }
}

/// Check if a name is a reserved SQL keyword
pub fn is_sql_keyword(name: &str) -> bool {
    const SQL_KEYWORDS: &[&str] = &[
        "add", "all", "alter", "and", "any", "as", "asc", "between", "by", "case", "check",
        "column", "constraint", "create", "default", "delete", "desc", "distinct", "drop",
        "else", "end", "except", "exists", "foreign", "from", "full", "group", "having", "in",
        "index", "inner", "insert", "intersect", "into", "is", "join", "key", "left", "like",
        "limit", "not", "null", "on", "or", "order", "outer", "primary", "references", "right",
        "select", "set", "table", "to", "union", "unique", "update", "user", "values", "view",
        "where", "with",
    ];

    SQL_KEYWORDS.contains(&name.to_lowercase().as_str())
}

/// Quote an identifier when it is a keyword or contains characters an
/// unquoted identifier cannot. Case is left alone so unquoted names keep
/// folding the way they did in the source DDL.
pub fn escape_identifier(name: &str, dialect: Dialect) -> String {
    let plain = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && !name.is_empty();

    if plain && !is_sql_keyword(name) {
        name.to_string()
    } else {
        format_sql_identifier(name, dialect)
    }
}

/// File name of the forward migration generated at `timestamp`
pub fn migration_file_name(timestamp: i64) -> String {
    format!("{}{}.sql", MIGRATION_PREFIX, timestamp)
}

/// File name of the separate reverse migration generated at `timestamp`
pub fn down_file_name(timestamp: i64) -> String {
    format!("{}{}{}", MIGRATION_PREFIX, timestamp, DOWN_SUFFIX)
}

/// Whether a file name belongs to the forward migration history
pub fn is_migration_file(file_name: &str) -> bool {
    file_name.starts_with(MIGRATION_PREFIX)
        && file_name.ends_with(".sql")
        && !file_name.ends_with(DOWN_SUFFIX)
}

/// Time key encoded in a `changes-<unix-timestamp>.sql` file name.
/// `None` when the name does not carry a parseable timestamp.
pub fn parse_time_key(file_name: &str) -> Option<i64> {
    MIGRATION_FILE
        .captures(file_name)
        .and_then(|caps| caps.name("ts"))
        .and_then(|ts| ts.as_str().parse::<i64>().ok())
}
