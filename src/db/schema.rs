pub const BKT_SCHEMA_SQL: &str = include_str!("../../sql/bkt_schema.sql");
pub const SCHEMA_VERSION: &str = "1";

/// Executable statements of the schema: split on top-level `;`, comment lines
/// dropped, empty statements skipped.
pub fn schema_statements() -> Vec<String> {
    split_sql_statements(BKT_SCHEMA_SQL)
        .into_iter()
        .map(|stmt| {
            stmt.lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|stmt| !stmt.is_empty())
        .collect()
}

/// Splits on `;` outside single/double quotes.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in sql.chars() {
        match (ch, quote) {
            ('\'' | '"', None) => quote = Some(ch),
            (c, Some(q)) if c == q => quote = None,
            (';', None) => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }

    statements
}
