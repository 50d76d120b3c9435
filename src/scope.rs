//! Advisory file-scope check.
//!
//! Edits outside the active task's declared files produce a warning, never an
//! error: the guard reports, the hook decides.

use crate::queue::Task;
use glob::Pattern;
use serde::Serialize;
use std::path::Path;

/// Result of a scope check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScopeCheck {
    Ok,
    Warning {
        path: String,
        task: String,
        allowed: Vec<String>,
    },
}

impl ScopeCheck {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn message(&self) -> Option<String> {
        match self {
            Self::Ok => None,
            Self::Warning {
                path,
                task,
                allowed,
            } => Some(format!(
                "{} is outside the scope of task {} (allowed: {})",
                path,
                task,
                allowed.join(", ")
            )),
        }
    }
}

/// Check an edited path against the active task's allowed files.
///
/// No active task, or a task without declared files, is always in scope.
pub fn check(edited_path: &str, active_task: Option<&Task>) -> ScopeCheck {
    let Some(task) = active_task else {
        return ScopeCheck::Ok;
    };
    if task.allowed_files.is_empty() {
        return ScopeCheck::Ok;
    }

    let path = normalize(edited_path);
    let basename = Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.clone());

    if task
        .allowed_paths()
        .any(|entry| matches_entry(&normalize(entry), &path, &basename))
    {
        return ScopeCheck::Ok;
    }

    ScopeCheck::Warning {
        path: edited_path.to_string(),
        task: task.id.clone(),
        allowed: task.allowed_paths().map(str::to_string).collect(),
    }
}

/// Plain entries match by substring twice over: the entry within the full
/// path, and the entry's basename within the path's basename.
fn matches_entry(entry: &str, path: &str, basename: &str) -> bool {
    if entry.is_empty() {
        return false;
    }
    if entry.contains(['*', '?', '[']) {
        return match Pattern::new(entry) {
            Ok(pattern) => {
                pattern.matches(path)
                    || pattern.matches(basename)
                    || path.ends_with(entry)
                    || suffix_glob_match(&pattern, path)
            }
            Err(_) => path.contains(entry),
        };
    }
    let entry_basename = entry.rsplit('/').next().unwrap_or(entry);
    path.contains(entry) || (!entry_basename.is_empty() && basename.contains(entry_basename))
}

/// Match a relative glob against every trailing run of path components, so
/// `src/*.rs` matches `/abs/project/src/lib.rs`.
fn suffix_glob_match(pattern: &Pattern, path: &str) -> bool {
    let mut rest = path;
    while let Some(idx) = rest.find('/') {
        rest = &rest[idx + 1..];
        if pattern.matches(rest) {
            return true;
        }
    }
    false
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim().replace('\\', "/");
    trimmed.strip_prefix("./").unwrap_or(&trimmed).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FileAction;

    fn task() -> Task {
        Task::new("T1", "API")
            .with_file(FileAction::Modify, "src/api.rs")
            .with_file(FileAction::Create, "src/handlers/*.rs")
            .with_file(FileAction::Test, "tests/api_test.rs")
    }

    #[test]
    fn test_no_active_task_is_ok() {
        assert_eq!(check("anything.rs", None), ScopeCheck::Ok);
    }

    #[test]
    fn test_empty_scope_is_ok() {
        let t = Task::new("T1", "Free");
        assert!(check("src/x.rs", Some(&t)).is_ok());
    }

    #[test]
    fn test_absolute_path_suffix_match() {
        let t = task();
        assert!(check("/home/dev/project/src/api.rs", Some(&t)).is_ok());
        assert!(check("./tests/api_test.rs", Some(&t)).is_ok());
    }

    #[test]
    fn test_glob_entries() {
        let t = task();
        assert!(check("src/handlers/users.rs", Some(&t)).is_ok());
        assert!(check("/abs/project/src/handlers/users.rs", Some(&t)).is_ok());
        assert!(!check("src/handlers/users.ts", Some(&t)).is_ok());
    }

    #[test]
    fn test_out_of_scope_warns() {
        let t = task();
        let result = check("src/db.rs", Some(&t));
        match &result {
            ScopeCheck::Warning { task, allowed, .. } => {
                assert_eq!(task, "T1");
                assert_eq!(allowed.len(), 3);
            }
            ScopeCheck::Ok => panic!("expected warning"),
        }
        assert!(result.message().unwrap().contains("outside the scope of task T1"));
    }

    #[test]
    fn test_basename_entry() {
        let t = Task::new("T2", "Config").with_file(FileAction::Modify, "Cargo.toml");
        assert!(check("/repo/Cargo.toml", Some(&t)).is_ok());
        assert!(!check("/repo/package.json", Some(&t)).is_ok());
    }

    #[test]
    fn test_basename_uses_substring_rule() {
        let t = Task::new("T3", "Schema").with_file(FileAction::Modify, "src/db/schema.rs");
        assert!(check("crates/store/src/db/schema.rs", Some(&t)).is_ok());
        assert!(check("schema.rs", Some(&t)).is_ok());
        assert!(check("migrations/schema.rs.orig", Some(&t)).is_ok());
        assert!(!check("src/db/models.rs", Some(&t)).is_ok());

        let dir_entry = Task::new("T4", "Docs").with_file(FileAction::Modify, "docs/");
        assert!(check("docs/guide.md", Some(&dir_entry)).is_ok());
        assert!(!check("src/lib.rs", Some(&dir_entry)).is_ok());
    }
}
