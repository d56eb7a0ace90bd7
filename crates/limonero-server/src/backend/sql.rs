//! Statement rewriting shared by the SQL adapters

use regex::Regex;
use std::sync::LazyLock;

static TRAILING_LIMIT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)\s+limit\s+\d+(\s*(,|offset)\s*\d+)?\s*$").ok());

/// Drop a trailing `;` and any trailing `LIMIT` clause
pub fn strip_limit(sql: &str) -> String {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    match TRAILING_LIMIT.as_ref() {
        Some(pattern) => pattern.replace(trimmed, "").into_owned(),
        None => trimmed.to_string(),
    }
}

/// Statement returning the columns of `sql` without any row
pub fn describe_statement(sql: &str) -> String {
    format!("{} LIMIT 0", strip_limit(sql))
}

/// Statement returning at most `limit` rows of `sql`
pub fn limited_statement(sql: &str, limit: usize) -> String {
    format!("{} LIMIT {}", strip_limit(sql), limit)
}
