//! Frontmatter Repair
//!
//! One-shot normalization passes run against KB source files before first
//! indexing: id injection, wikilink prefix stripping, and frontmatter key
//! and value normalization. Each routine returns counts for reporting and
//! leaves files without a valid frontmatter block untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Frontmatter block anchored at the start of the file:
/// `---\n` ... `---\n`.
pub(crate) static FRONTMATTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A(---\n)(.*?)(---\n)").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// Folder prefixes stripped from wikilinks in research KBs.
const WIKILINK_PREFIXES: &[&str] = &[
    "actors",
    "organizations",
    "events",
    "themes",
    "scenes",
    "victims",
    "statistics",
    "mechanisms",
    "sources",
    "capture-lanes",
    "research-notes",
];

static WIKILINK_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = WIKILINK_PREFIXES
        .iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\[\[(?:{alternation})/"))
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

static ID_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^id:\s").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// Repair error
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Counts from [`normalize_research_frontmatter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResearchRepairCounts {
    pub essay_type_to_type: usize,
    pub event_date_to_date: usize,
    pub org_to_cascade_org: usize,
    pub research_status_normalized: usize,
}

/// Counts from [`normalize_timeline_frontmatter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineRepairCounts {
    pub type_added: usize,
    pub date_unquoted: usize,
}

/// Markdown files under `kb_path` in sorted path order, skipping files
/// whose name starts with `_` (index pages and templates).
fn markdown_files(kb_path: &Path) -> Result<Vec<PathBuf>, RepairError> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(kb_path) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('_') || !name.ends_with(".md") {
            continue;
        }
        files.push(entry.into_path());
    }
    files.sort();
    Ok(files)
}

/// Add `id: <filename-stem>` as the first frontmatter line of files that
/// lack an `id` key. Stem collisions are logged, never fatal. Returns the
/// injected (path, id) pairs.
pub fn inject_ids(kb_path: &Path) -> Result<BTreeMap<PathBuf, String>, RepairError> {
    let mut injected = BTreeMap::new();
    let mut seen_ids: BTreeMap<String, PathBuf> = BTreeMap::new();

    for md_file in markdown_files(kb_path)? {
        let stem = md_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = std::fs::read_to_string(&md_file)?;

        if let Some(previous) = seen_ids.get(&stem) {
            tracing::warn!(
                "ID collision: '{}' in {} and {}",
                stem,
                previous.display(),
                md_file.display()
            );
        }
        seen_ids.insert(stem.clone(), md_file.clone());

        let Some(m) = FRONTMATTER_RE.captures(&content) else {
            continue;
        };
        let fm_block = &m[2];
        if ID_KEY_RE.is_match(fm_block) {
            continue;
        }

        let rest = &content[m.get(0).map(|g| g.end()).unwrap_or(0)..];
        let new_content = format!("{}id: {}\n{}{}{}", &m[1], stem, fm_block, &m[3], rest);
        std::fs::write(&md_file, new_content)?;
        injected.insert(md_file, stem);
    }

    Ok(injected)
}

/// Strip folder prefixes from wikilinks: `[[actors/powell-lewis]]` becomes
/// `[[powell-lewis]]`. Returns the total substitution count.
pub fn normalize_wikilinks(kb_path: &Path) -> Result<usize, RepairError> {
    let mut total = 0;

    for md_file in markdown_files(kb_path)? {
        let content = std::fs::read_to_string(&md_file)?;
        let count = WIKILINK_PREFIX_RE.find_iter(&content).count();
        if count == 0 {
            continue;
        }
        let new_content = WIKILINK_PREFIX_RE.replace_all(&content, "[[");
        std::fs::write(&md_file, new_content.as_ref())?;
        total += count;
    }

    Ok(total)
}

/// Normalize research-KB frontmatter keys and values:
/// - `essay_type:` becomes `type:`
/// - `event_date:` becomes `date:` only when no `date:` key exists
/// - `type: organization` becomes `type: cascade_org`
/// - `research_status` values are unquoted and mapped to the closed set
pub fn normalize_research_frontmatter(
    kb_path: &Path,
) -> Result<ResearchRepairCounts, RepairError> {
    static ESSAY_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^essay_type:\s*").unwrap_or_else(|e| unreachable!("{e}"))
    });
    static EVENT_DATE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^event_date:").unwrap_or_else(|e| unreachable!("{e}")));
    static DATE_KEY_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^date:").unwrap_or_else(|e| unreachable!("{e}")));
    static ORG_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^type:\s*organization\s*$").unwrap_or_else(|e| unreachable!("{e}"))
    });
    static RESEARCH_STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^research_status:[ \t]*(.*)$").unwrap_or_else(|e| unreachable!("{e}"))
    });

    let mut counts = ResearchRepairCounts::default();

    for md_file in markdown_files(kb_path)? {
        let content = std::fs::read_to_string(&md_file)?;
        let Some(m) = FRONTMATTER_RE.captures(&content) else {
            continue;
        };

        let open = m[1].to_string();
        let close = m[3].to_string();
        let body = content[m.get(0).map(|g| g.end()).unwrap_or(0)..].to_string();
        let mut fm = m[2].to_string();
        let mut changed = false;

        let essay_hits = ESSAY_TYPE_RE.find_iter(&fm).count();
        if essay_hits > 0 {
            fm = ESSAY_TYPE_RE.replace_all(&fm, "type: ").into_owned();
            changed = true;
            counts.essay_type_to_type += essay_hits;
        }

        if EVENT_DATE_RE.is_match(&fm) && !DATE_KEY_RE.is_match(&fm) {
            let hits = EVENT_DATE_RE.find_iter(&fm).count();
            fm = EVENT_DATE_RE.replace_all(&fm, "date:").into_owned();
            changed = true;
            counts.event_date_to_date += hits;
        }

        let org_hits = ORG_TYPE_RE.find_iter(&fm).count();
        if org_hits > 0 {
            fm = ORG_TYPE_RE.replace_all(&fm, "type: cascade_org").into_owned();
            changed = true;
            counts.org_to_cascade_org += org_hits;
        }

        let status_edit = RESEARCH_STATUS_RE.captures(&fm).map(|status| {
            let range = status.get(0).map(|g| g.range()).unwrap_or(0..0);
            (range, status[1].trim().to_string())
        });
        if let Some((range, raw_value)) = status_edit {
            let (unquoted, had_quotes) = strip_quotes(&raw_value);
            let normalized = normalize_status(&unquoted.to_lowercase());
            if had_quotes || normalized != raw_value {
                fm.replace_range(range, &format!("research_status: {normalized}"));
                changed = true;
                counts.research_status_normalized += 1;
            }
        }

        if changed {
            std::fs::write(&md_file, format!("{open}{fm}{close}{body}"))?;
        }
    }

    Ok(counts)
}

/// Normalize timeline-KB frontmatter:
/// - add `type: timeline_event` when no `type:` key exists
/// - strip quotes around ISO-date `date:` values
pub fn normalize_timeline_frontmatter(
    kb_path: &Path,
) -> Result<TimelineRepairCounts, RepairError> {
    static TYPE_KEY_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^type:").unwrap_or_else(|e| unreachable!("{e}")));
    static QUOTED_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?m)^(date:\s*)['"](\d{4}-\d{2}-\d{2})['"]"#)
            .unwrap_or_else(|e| unreachable!("{e}"))
    });

    let mut counts = TimelineRepairCounts::default();

    for md_file in markdown_files(kb_path)? {
        let content = std::fs::read_to_string(&md_file)?;
        let Some(m) = FRONTMATTER_RE.captures(&content) else {
            continue;
        };

        let open = m[1].to_string();
        let close = m[3].to_string();
        let body = content[m.get(0).map(|g| g.end()).unwrap_or(0)..].to_string();
        let mut fm = m[2].to_string();
        let mut changed = false;

        if !TYPE_KEY_RE.is_match(&fm) {
            fm = format!("type: timeline_event\n{fm}");
            changed = true;
            counts.type_added += 1;
        }

        let quoted_hits = QUOTED_DATE_RE.find_iter(&fm).count();
        if quoted_hits > 0 {
            fm = QUOTED_DATE_RE.replace_all(&fm, "${1}${2}").into_owned();
            changed = true;
            counts.date_unquoted += quoted_hits;
        }

        if changed {
            std::fs::write(&md_file, format!("{open}{fm}{close}{body}"))?;
        }
    }

    Ok(counts)
}

/// Strip one pair of matching surrounding quotes.
fn strip_quotes(value: &str) -> (String, bool) {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return (value[1..value.len() - 1].to_string(), true);
        }
    }
    (value.to_string(), false)
}

/// Closed research-status map; unknown values pass through lowercased.
fn normalize_status(raw: &str) -> String {
    match raw {
        "active" | "in_progress" | "in-progress" => "in-progress".to_string(),
        "stub" => "stub".to_string(),
        "complete" => "complete".to_string(),
        "comprehensive" => "comprehensive".to_string(),
        other => other.to_string(),
    }
}
