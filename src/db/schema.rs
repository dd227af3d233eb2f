//! Introspection query templates.
//!
//! The host process runs these through the executor like any other read, so
//! they only need to produce SQL text.

/// SQL listing the base tables and views of the current database.
pub const LIST_TABLES: &str = r#"
    SELECT
        CONVERT(TABLE_NAME USING utf8mb4) AS TABLE_NAME,
        CONVERT(TABLE_TYPE USING utf8mb4) AS TABLE_TYPE
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = DATABASE()
    AND TABLE_TYPE IN ('BASE TABLE', 'VIEW')
    ORDER BY TABLE_NAME
    "#;

pub fn list_tables_sql() -> &'static str {
    LIST_TABLES
}

/// SQL describing the columns of `table`.
///
/// Accepts `table` or `schema.table`; each part is backtick-quoted.
pub fn describe_table_sql(table: &str) -> String {
    let quoted: Vec<String> = table.split('.').map(quote_identifier).collect();
    format!("DESCRIBE {}", quoted.join("."))
}

/// Quote a MySQL identifier, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
