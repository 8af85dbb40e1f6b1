//! Markdown document parsing: YAML frontmatter plus body, and wikilink
//! extraction.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::Value;

use crate::model::{Entry, KbType};
use crate::repair::FRONTMATTER_RE;

static WIKILINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\]\|]+)(?:\|[^\]]*)?\]\]")
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// A parsed Markdown source file.
#[derive(Debug, Clone)]
pub struct Document {
    pub frontmatter: serde_yaml::Mapping,
    pub body: String,
}

/// Document parse error
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("no frontmatter block")]
    NoFrontmatter,
    #[error("invalid frontmatter YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Split a file into its frontmatter mapping and body. The frontmatter
/// block must open the file (`---\n ... ---\n`).
pub fn parse_document(content: &str) -> Result<Document, DocumentError> {
    let m = FRONTMATTER_RE
        .captures(content)
        .ok_or(DocumentError::NoFrontmatter)?;

    let frontmatter: serde_yaml::Mapping = match serde_yaml::from_str(&m[2])? {
        Value::Mapping(map) => map,
        // An empty block parses as null; treat it as no keys
        Value::Null => serde_yaml::Mapping::new(),
        _ => return Err(DocumentError::NoFrontmatter),
    };
    let body = content[m.get(0).map(|g| g.end()).unwrap_or(0)..].to_string();

    Ok(Document { frontmatter, body })
}

/// Wikilink targets in order of first appearance, aliases stripped,
/// duplicates removed.
pub fn extract_wikilinks(body: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();
    for capture in WIKILINK_RE.captures_iter(body) {
        let target = capture[1].trim().to_string();
        if !target.is_empty() && seen.insert(target.clone()) {
            links.push(target);
        }
    }
    links
}

/// Build an [`Entry`] from a parsed document.
///
/// The id falls back to the file stem, the title to the id; unknown
/// frontmatter keys are ignored here (the source file remains the owner of
/// arbitrary user keys).
pub fn entry_from_document(
    doc: &Document,
    kb_name: &str,
    kb_type: KbType,
    path: &Path,
) -> Entry {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let id = str_field(&doc.frontmatter, "id").unwrap_or_else(|| stem.clone());
    let title = str_field(&doc.frontmatter, "title").unwrap_or_else(|| id.clone());
    let entry_type = str_field(&doc.frontmatter, "type")
        .unwrap_or_else(|| kb_type.default_entry_type().to_string());

    let body = doc.body.trim();

    Entry {
        id,
        kb_name: kb_name.to_string(),
        entry_type,
        title,
        summary: str_field(&doc.frontmatter, "summary"),
        body: (!body.is_empty()).then(|| body.to_string()),
        location: str_field(&doc.frontmatter, "location"),
        date: str_field(&doc.frontmatter, "date"),
        importance: int_field(&doc.frontmatter, "importance"),
        status: str_field(&doc.frontmatter, "status")
            .or_else(|| str_field(&doc.frontmatter, "research_status")),
        file_path: Some(path.to_string_lossy().into_owned()),
        created_by: None,
        modified_by: None,
        tags: list_field(&doc.frontmatter, "tags"),
        links: extract_wikilinks(&doc.body),
        sources: list_field(&doc.frontmatter, "sources"),
    }
}

/// A frontmatter value as a string. Scalars are stringified the way YAML
/// wrote them (dates arrive unquoted and must survive as-is).
fn str_field(map: &serde_yaml::Mapping, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn int_field(map: &serde_yaml::Mapping, key: &str) -> Option<i64> {
    match map.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn list_field(map: &serde_yaml::Mapping, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Sequence(seq)) => seq
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => {
                    let s = s.trim();
                    (!s.is_empty()).then(|| s.to_string())
                }
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        // `tags: single` shorthand
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Vec::new()
            } else {
                vec![s.to_string()]
            }
        }
        _ => Vec::new(),
    }
}
