//! Markdown save format for the task queue (`tasks.md`).
//!
//! ```text
//! # Task Queue
//!
//! ## Milestone M1: Foundations
//! **Status:** active
//!
//! ### [x] T1: Create schema
//! **Decisions:** BACK-01
//! **Files:**
//! - Create: src/db.rs
//! - Test: tests/db.rs
//!
//! ### [~] T2: Wire API
//! **Depends on:** T1
//! ```
//!
//! Tasks under `## Unassigned` (or before the first milestone) belong to no
//! milestone. Titles and deferral reasons are single-line: line breaks are
//! written as `\n` / `\r` and a literal backslash before `n`, `r` or `\` is
//! doubled. Free prose between blocks is ignored; anything that looks like
//! structure but does not parse fails the whole load.

use super::task::{FileAction, FileScope, Milestone, MilestoneState, Task, TaskState};
use super::task_queue::TaskQueue;
use crate::atomic::write_atomic;
use crate::artifacts::ArtifactType;
use crate::errors::QueueError;
use anyhow::{Context, Result};
use regex::Regex;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

static MILESTONE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^##\s+Milestone\s+(\S+?):\s*(.*)$").unwrap());
static UNASSIGNED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^##\s+Unassigned\s*$").unwrap());
static TASK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^###\s+\[(.)\]\s+(\S+?):\s*(.*)$").unwrap());
static FIELD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*\*([A-Za-z ]+):\*\*\s*(.*)$").unwrap());
static FILE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*-\s+(create|modify|test):\s*(.+)$").unwrap());

const UNASSIGNED_HEADER: &str = "## Unassigned";

/// Parse a queue document into validated milestones and tasks.
pub fn parse_queue_document(content: &str) -> Result<TaskQueue, QueueError> {
    let mut milestones: Vec<Milestone> = Vec::new();
    let mut tasks: Vec<Task> = Vec::new();
    let mut current_milestone: Option<usize> = None;
    let mut in_task = false;
    let mut in_files = false;

    for (line_no, line) in content.lines().enumerate() {
        let malformed = |message: String| {
            QueueError::MalformedQueue(format!("line {}: {}", line_no + 1, message))
        };
        let trimmed = line.trim_end();

        if let Some(caps) = MILESTONE_REGEX.captures(trimmed) {
            milestones.push(Milestone::new(&caps[1], &unescape_field(caps[2].trim())));
            current_milestone = Some(milestones.len() - 1);
            in_task = false;
            in_files = false;
            continue;
        }
        if UNASSIGNED_REGEX.is_match(trimmed) {
            current_milestone = None;
            in_task = false;
            in_files = false;
            continue;
        }
        if trimmed.starts_with("###") {
            let caps = TASK_REGEX
                .captures(trimmed)
                .ok_or_else(|| malformed(format!("bad task header '{}'", trimmed)))?;
            let marker = caps[1].chars().next().unwrap_or('?');
            let state = TaskState::from_marker(marker)
                .ok_or_else(|| malformed(format!("unknown task marker '{}'", marker)))?;
            let mut task = Task::new(&caps[2], &unescape_field(caps[3].trim())).with_state(state);
            if let Some(m) = current_milestone {
                task.milestone = Some(milestones[m].id.clone());
                milestones[m].tasks.push(task.id.clone());
            }
            tasks.push(task);
            in_task = true;
            in_files = false;
            continue;
        }
        if let Some(caps) = FIELD_REGEX.captures(trimmed) {
            let field = caps[1].trim().to_lowercase();
            let value = caps[2].trim();
            in_files = false;

            if field == "status" {
                if in_task {
                    return Err(malformed("status belongs on a milestone".into()));
                }
                let m = current_milestone
                    .ok_or_else(|| malformed("status outside a milestone".into()))?;
                milestones[m].state = value
                    .parse::<MilestoneState>()
                    .map_err(|e| malformed(e.to_string()))?;
                continue;
            }

            let task = match (in_task, tasks.last_mut()) {
                (true, Some(task)) => task,
                _ => return Err(malformed(format!("field '{}' outside a task", field))),
            };
            match field.as_str() {
                "depends on" => task.depends_on = split_list(value),
                "decisions" => task.decision_refs = split_list(value).into_iter().collect(),
                "artifacts" => {
                    for name in split_list(value) {
                        let artifact = name
                            .parse::<ArtifactType>()
                            .map_err(|e| malformed(e.to_string()))?;
                        task.artifact_refs.insert(artifact);
                    }
                }
                "deferred" => task.deferred_reason = Some(unescape_field(value)),
                "files" => in_files = true,
                other => return Err(malformed(format!("unknown task field '{}'", other))),
            }
            continue;
        }
        if in_files && let Some(caps) = FILE_REGEX.captures(trimmed) {
            let action = FileAction::parse(&caps[1])
                .ok_or_else(|| malformed(format!("unknown file action '{}'", &caps[1])))?;
            if let Some(task) = tasks.last_mut() {
                task.allowed_files
                    .push(FileScope::new(action, caps[2].trim()));
            }
            continue;
        }
        if !trimmed.trim().is_empty() {
            in_files = false;
        }
    }

    TaskQueue::load(milestones, tasks)
}

/// Render a queue as a markdown document that parses back to the same queue.
pub fn render_queue_document(queue: &TaskQueue) -> String {
    let mut out = String::from("# Task Queue\n");

    for milestone in queue.milestones() {
        let _ = write!(
            out,
            "\n## Milestone {}: {}\n**Status:** {}\n",
            milestone.id,
            escape_field(&milestone.title),
            milestone.state
        );
        for id in &milestone.tasks {
            if let Some(task) = queue.get(id) {
                render_task(&mut out, task);
            }
        }
    }

    let unassigned: Vec<&Task> = queue.tasks().iter().filter(|t| t.milestone.is_none()).collect();
    if !unassigned.is_empty() {
        if !queue.milestones().is_empty() {
            let _ = write!(out, "\n{}\n", UNASSIGNED_HEADER);
        }
        for task in unassigned {
            render_task(&mut out, task);
        }
    }
    out
}

fn render_task(out: &mut String, task: &Task) {
    let _ = write!(
        out,
        "\n### [{}] {}: {}\n",
        task.state.marker(),
        task.id,
        escape_field(&task.title)
    );
    if !task.depends_on.is_empty() {
        let _ = writeln!(out, "**Depends on:** {}", task.depends_on.join(", "));
    }
    if !task.decision_refs.is_empty() {
        let refs: Vec<&str> = task.decision_refs.iter().map(String::as_str).collect();
        let _ = writeln!(out, "**Decisions:** {}", refs.join(", "));
    }
    if !task.artifact_refs.is_empty() {
        let refs: Vec<&str> = task.artifact_refs.iter().map(|a| a.as_str()).collect();
        let _ = writeln!(out, "**Artifacts:** {}", refs.join(", "));
    }
    if let Some(ref reason) = task.deferred_reason {
        let _ = writeln!(out, "**Deferred:** {}", escape_field(reason));
    }
    if !task.allowed_files.is_empty() {
        out.push_str("**Files:**\n");
        for file in &task.allowed_files {
            let _ = writeln!(out, "- {}: {}", file.action.as_str(), file.path);
        }
    }
}

/// Keep a free-text field on one line.
fn escape_field(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' if matches!(chars.peek(), Some('n' | 'r' | '\\' | '\n' | '\r') | None) => {
                out.push_str("\\\\")
            }
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape_field`]. Other backslashes are taken literally, so
/// hand-written paths like `C:\src` read as written.
fn unescape_field(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            _ => {
                out.push('\\');
                continue;
            }
        }
        chars.next();
    }
    out
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
        .map(str::to_string)
        .collect()
}

/// Load `tasks.md`. A missing file is an empty queue.
pub fn load_queue(path: &Path) -> Result<TaskQueue> {
    if !path.exists() {
        return Ok(TaskQueue::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read task queue: {}", path.display()))?;
    let queue = parse_queue_document(&content)
        .with_context(|| format!("Failed to load task queue: {}", path.display()))?;
    Ok(queue)
}

pub fn save_queue(queue: &TaskQueue, path: &Path) -> Result<()> {
    write_atomic(path, render_queue_document(queue))
        .with_context(|| format!("Failed to write task queue: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = "\
# Task Queue

Plan produced by the decompose step.

## Milestone M1: Foundations
**Status:** active

### [x] T1: Create schema
**Decisions:** BACK-01, BACK-02
**Files:**
- Create: src/db.rs
- Test: tests/db.rs

### [ ] T2: Wire API
**Depends on:** T1
**Artifacts:** style-guide
**Files:**
- Modify: src/api/*.rs

## Milestone M2: Polish

### [-] T3: Dark mode
**Depends on:** T2
**Deferred:** needs brand guide

## Unassigned

### [ ] T9: Write changelog
";

    #[test]
    fn test_parse_sample_document() {
        let queue = parse_queue_document(SAMPLE).unwrap();
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.milestones().len(), 2);
        assert_eq!(queue.milestone("M1").unwrap().state, MilestoneState::Active);

        let t1 = queue.get("T1").unwrap();
        assert_eq!(t1.state, TaskState::Done);
        assert!(t1.decision_refs.contains("BACK-02"));
        assert_eq!(t1.allowed_files[1], FileScope::new(FileAction::Test, "tests/db.rs"));

        let t2 = queue.get("T2").unwrap();
        assert_eq!(t2.depends_on, vec!["T1"]);
        assert!(t2.artifact_refs.contains(&ArtifactType::StyleGuide));

        let t3 = queue.get("T3").unwrap();
        assert_eq!(t3.state, TaskState::Deferred);
        assert_eq!(t3.deferred_reason.as_deref(), Some("needs brand guide"));

        assert!(queue.get("T9").unwrap().milestone.is_none());
        assert_eq!(queue.next_eligible().unwrap().id, "T2");
    }

    #[test]
    fn test_render_reloads_to_same_queue() {
        let queue = parse_queue_document(SAMPLE).unwrap();
        let rendered = render_queue_document(&queue);
        let reloaded = parse_queue_document(&rendered).unwrap();
        assert_eq!(reloaded.snapshot(), queue.snapshot());
    }

    #[test]
    fn test_multiline_fields_round_trip() {
        let mut queue = TaskQueue::load(
            vec![Milestone::new("M1", "Core\nand more")],
            vec![
                Task::new("T1", "Parse C:\\new\\ paths\\").with_milestone("M1"),
                Task::new("T2", "Wire API").with_milestone("M1"),
            ],
        )
        .unwrap();
        let reason = "blocked upstream\r\n### [ ] T9: injected\nsee \\n";
        queue.defer("T2", reason).unwrap();

        let rendered = render_queue_document(&queue);
        assert!(!rendered.lines().any(|l| l.starts_with("### [ ] T9")));
        let reloaded = parse_queue_document(&rendered).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("T2").unwrap().deferred_reason.as_deref(), Some(reason));
        assert_eq!(reloaded.get("T1").unwrap().title, "Parse C:\\new\\ paths\\");
        assert_eq!(reloaded.milestone("M1").unwrap().title, "Core\nand more");
        assert_eq!(reloaded.snapshot(), queue.snapshot());
    }

    #[test]
    fn test_hand_written_backslashes_are_literal() {
        let doc = "### [ ] T1: Fix C:\\src\\app loader\n";
        let queue = parse_queue_document(doc).unwrap();
        assert_eq!(queue.get("T1").unwrap().title, "Fix C:\\src\\app loader");
    }

    #[test]
    fn test_unknown_marker_fails() {
        let doc = "### [?] T1: Mystery\n";
        let err = parse_queue_document(doc).unwrap_err();
        assert!(err.to_string().contains("unknown task marker"));
    }

    #[test]
    fn test_field_outside_task_fails() {
        let doc = "## Milestone M1: A\n**Depends on:** T0\n";
        assert!(matches!(
            parse_queue_document(doc),
            Err(QueueError::MalformedQueue(_))
        ));
    }

    #[test]
    fn test_cycle_in_document_rejected() {
        let doc = "### [ ] T1: A\n**Depends on:** T2\n\n### [ ] T2: B\n**Depends on:** T1\n";
        assert!(matches!(
            parse_queue_document(doc),
            Err(QueueError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let queue = load_queue(&dir.path().join("tasks.md")).unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reader_sees_whole_queue_during_saves() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.md");
        let tasks: Vec<Task> = (0..200)
            .map(|i| Task::new(&format!("T{}", i), "generated task"))
            .collect();
        let queue = TaskQueue::load(vec![], tasks).unwrap();
        save_queue(&queue, &path).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let path = path.clone();
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                loop {
                    assert_eq!(load_queue(&path).unwrap().len(), 200);
                    if done.load(Ordering::Relaxed) {
                        break;
                    }
                }
            })
        };
        for _ in 0..200 {
            save_queue(&queue, &path).unwrap();
        }
        done.store(true, Ordering::Relaxed);
        reader.join().unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.md");
        let queue = parse_queue_document(SAMPLE).unwrap();
        save_queue(&queue, &path).unwrap();
        assert_eq!(load_queue(&path).unwrap().snapshot(), queue.snapshot());
    }
}
