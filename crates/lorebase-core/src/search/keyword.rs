//! FTS5 query sanitization.
//!
//! FTS5 reads `-` as a NOT operator, so raw user input with hyphenated
//! tokens ("alex-jones", "2024-01-15") silently becomes an exclusion query.
//! Hyphenated runs are quoted as literal phrases unless the user wrote
//! explicit FTS5 syntax.

use std::sync::LazyLock;

use regex::Regex;

static HYPHENATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\S*-\S*").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// Sanitize a search query for FTS5.
///
/// Queries containing an explicit `AND`/`OR`/`NOT` (space-delimited, any
/// case) or a double-quote pass through untouched; the user is assumed to
/// mean the syntax. Otherwise every whitespace-bounded run containing a
/// hyphen is wrapped in double quotes.
///
/// Idempotent: quoting introduces a `"`, so a second pass passes through.
pub fn sanitize_fts_query(query: &str) -> String {
    let upper = query.to_uppercase();
    if upper.contains(" AND ")
        || upper.contains(" OR ")
        || upper.contains(" NOT ")
        || query.contains('"')
    {
        return query.to_string();
    }

    HYPHENATED.replace_all(query, "\"${0}\"").into_owned()
}
