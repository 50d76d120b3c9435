//! Markdown save format for decisions.
//!
//! One file per prefix (`decisions/BACK.md`):
//!
//! ```text
//! # BACK decisions
//!
//! BACK-01: Use PostgreSQL for persistence
//!   - rationale: Relational data with strong consistency needs
//!   - created: 2026-10-19T12:00:00+00:00
//!   - superseded-by: BACK-03
//! ```
//!
//! Counters live next to the files in `counters.json`. The files are a save
//! format only: they are parsed into a [`DecisionStore`], mutated in memory,
//! and rewritten whole.

use super::store::{Decision, DecisionStore, validate_prefix};
use crate::atomic::write_atomic;
use crate::errors::DecisionError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

static ENTRY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z][A-Z0-9]*)-(\d+):\s?(.*)$").unwrap());
static META_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+-\s+([a-z-]+):\s?(.*)$").unwrap());

const COUNTERS_FILE: &str = "counters.json";

/// Render every decision of one prefix, visible and retired, in id order.
pub fn render_decision_file(prefix: &str, visible: &[&Decision], retired: &[&Decision]) -> String {
    let mut entries: Vec<(&Decision, bool)> = visible
        .iter()
        .map(|d| (*d, false))
        .chain(retired.iter().map(|d| (*d, true)))
        .collect();
    entries.sort_by_key(|(d, _)| d.seq());

    let mut out = format!("# {} decisions\n", prefix);
    for (d, is_retired) in entries {
        out.push('\n');
        let _ = writeln!(out, "{}: {}", d.id, escape(&d.text));
        let _ = writeln!(out, "  - rationale: {}", escape(&d.rationale));
        let _ = writeln!(out, "  - created: {}", d.created_at.to_rfc3339());
        if let Some(ref s) = d.supersedes {
            let _ = writeln!(out, "  - supersedes: {}", s);
        }
        if let Some(ref s) = d.superseded_by {
            let _ = writeln!(out, "  - superseded-by: {}", s);
        }
        if is_retired {
            out.push_str("  - retired: true\n");
        }
    }
    out
}

/// Parse one decision file into `(decision, retired)` pairs.
pub fn parse_decision_file(
    file: &str,
    content: &str,
) -> Result<Vec<(Decision, bool)>, DecisionError> {
    let malformed = |line_no: usize, message: &str| DecisionError::Malformed {
        file: file.to_string(),
        message: format!("line {}: {}", line_no + 1, message),
    };

    let mut parsed: Vec<(Decision, bool)> = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(caps) = ENTRY_REGEX.captures(line) {
            let prefix = caps[1].to_string();
            let seq: u32 = caps[2]
                .parse()
                .map_err(|_| malformed(line_no, "sequence number out of range"))?;
            parsed.push((
                Decision {
                    id: super::format_id(&prefix, seq),
                    prefix,
                    text: unescape(&caps[3]),
                    rationale: String::new(),
                    created_at: DateTime::<Utc>::UNIX_EPOCH,
                    supersedes: None,
                    superseded_by: None,
                },
                false,
            ));
            continue;
        }
        let Some(caps) = META_REGEX.captures(line) else {
            return Err(malformed(line_no, "expected `PREFIX-NN: text` or a metadata bullet"));
        };
        let (decision, retired) = parsed
            .last_mut()
            .ok_or_else(|| malformed(line_no, "metadata before first decision"))?;
        let value = caps[2].trim();
        match &caps[1] {
            "rationale" => decision.rationale = unescape(&caps[2]),
            "created" => {
                decision.created_at = DateTime::parse_from_rfc3339(value)
                    .map_err(|e| malformed(line_no, &format!("bad timestamp: {}", e)))?
                    .with_timezone(&Utc);
            }
            "supersedes" => decision.supersedes = Some(value.to_string()),
            "superseded-by" => decision.superseded_by = Some(value.to_string()),
            "retired" => *retired = value == "true",
            other => return Err(malformed(line_no, &format!("unknown field '{}'", other))),
        }
    }
    Ok(parsed)
}

/// Load every `<PREFIX>.md` file and the counters from a directory.
///
/// A missing directory yields an empty store.
pub fn load_from_dir(dir: &Path) -> Result<DecisionStore> {
    if !dir.exists() {
        return Ok(DecisionStore::new());
    }

    let mut visible = Vec::new();
    let mut retired = Vec::new();
    let mut files: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read decisions directory: {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "md"))
        .collect();
    files.sort();

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read decision file: {}", path.display()))?;
        for (decision, is_retired) in parse_decision_file(&name, &content)? {
            if is_retired {
                retired.push(decision);
            } else {
                visible.push(decision);
            }
        }
    }

    let counters_path = dir.join(COUNTERS_FILE);
    let counters: BTreeMap<String, u32> = if counters_path.exists() {
        let content = fs::read_to_string(&counters_path)
            .context("Failed to read decision counters")?;
        serde_json::from_str(&content).context("Failed to parse decision counters")?
    } else {
        BTreeMap::new()
    };

    Ok(DecisionStore::from_parts(visible, retired, counters))
}

/// Write one file per prefix plus the counters.
pub fn save_to_dir(store: &DecisionStore, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create decisions directory: {}", dir.display()))?;

    for prefix in store.prefixes() {
        validate_prefix(&prefix)?;
        let visible = store.list(Some(&prefix));
        let retired: Vec<&Decision> = store.retired().iter().filter(|d| d.prefix == prefix).collect();
        let content = render_decision_file(&prefix, &visible, &retired);
        let path = dir.join(format!("{}.md", prefix));
        write_atomic(&path, content)
            .with_context(|| format!("Failed to write decision file: {}", path.display()))?;
    }

    let counters =
        serde_json::to_string_pretty(store.counters()).context("Failed to serialize counters")?;
    write_atomic(&dir.join(COUNTERS_FILE), counters).context("Failed to write decision counters")?;
    Ok(())
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_render_then_parse_preserves_fields() {
        let mut store = DecisionStore::new();
        let old = store.append("BACK", "Use Postgres", "Relational\nneeds").unwrap();
        store.supersede(&old, "Use SQLite").unwrap();

        let visible = store.list(Some("BACK"));
        let rendered = render_decision_file("BACK", &visible, &[]);
        assert!(rendered.contains("BACK-01: Use Postgres"));
        assert!(rendered.contains("  - superseded-by: BACK-02"));

        let parsed = parse_decision_file("BACK.md", &rendered).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, *visible[0]);
        assert_eq!(parsed[0].0.rationale, "Relational\nneeds");
        assert_eq!(parsed[1].0.supersedes.as_deref(), Some("BACK-01"));
    }

    #[test]
    fn test_control_characters_survive_round_trip() {
        let text = "text with cr\r";
        let rationale = "windows\r\nline endings, a tab\tand C:\\path\\n ";
        let mut store = DecisionStore::new();
        store.append("GEN", text, rationale).unwrap();

        let rendered = render_decision_file("GEN", &store.list(None), &[]);
        assert_eq!(rendered.matches('\r').count(), 0);
        let parsed = parse_decision_file("GEN.md", &rendered).unwrap();
        assert_eq!(parsed[0].0.text, text);
        assert_eq!(parsed[0].0.rationale, rationale);
    }

    #[test]
    fn test_parse_rejects_garbage_line() {
        let content = "# BACK decisions\n\nthis is not a decision\n";
        let err = parse_decision_file("BACK.md", content).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_parse_rejects_orphan_metadata() {
        let content = "  - rationale: floating\n";
        assert!(parse_decision_file("BACK.md", content).is_err());
    }

    #[test]
    fn test_save_and_load_dir() {
        let dir = tempdir().unwrap();
        let mut store = DecisionStore::new();
        store.append("GEN", "Ship a CLI", "Users live in terminals").unwrap();
        store.append("BACK", "Use axum", "Async stack").unwrap();
        let snap = store.snapshot();
        store.append("BACK", "Use tower", "Middleware").unwrap();
        store.restore(&snap);

        save_to_dir(&store, dir.path()).unwrap();
        assert!(dir.path().join("GEN.md").exists());
        assert!(dir.path().join("BACK.md").exists());

        let loaded = load_from_dir(dir.path()).unwrap();
        assert_eq!(loaded.list(None).len(), 2);
        assert_eq!(loaded.retired().len(), 1);
        assert_eq!(loaded.counter("BACK"), 2);
    }

    #[test]
    fn test_counters_survive_restart_without_files() {
        let dir = tempdir().unwrap();
        let mut store = DecisionStore::new();
        store.append("BACK", "a", "r1").unwrap();
        save_to_dir(&store, dir.path()).unwrap();
        fs::remove_file(dir.path().join("BACK.md")).unwrap();

        let mut loaded = load_from_dir(dir.path()).unwrap();
        assert_eq!(loaded.append("BACK", "b", "r2").unwrap(), "BACK-02");
    }

    #[test]
    fn test_load_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let store = load_from_dir(&dir.path().join("nope")).unwrap();
        assert!(store.is_empty());
    }
}
