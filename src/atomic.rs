//! Atomic replacement of workspace files.
//!
//! Readers that skip the run lock (`status`, `decisions`, `scope-check`)
//! must never observe a truncated file, so every state write goes to a
//! temporary file in the target's directory, is fsynced, then renamed over
//! the target.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replace `path` with `content` in one rename.
pub fn write_atomic(path: &Path, content: impl AsRef<[u8]>) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in: {}", dir.display()))?;
    temp.write_all(content.as_ref())
        .context("Failed to write temporary file")?;
    temp.as_file()
        .sync_all()
        .context("Failed to fsync temporary file")?;
    temp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        write_atomic(&path, "first").unwrap();
        write_atomic(&path, "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_write_atomic_preserves_carriage_returns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artifact.md");
        write_atomic(&path, "line\r\nnext\r").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "line\r\nnext\r");
    }

    #[test]
    fn test_concurrent_reader_never_sees_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.md");
        let long = "x".repeat(64 * 1024);
        let short = "y".repeat(32 * 1024);
        write_atomic(&path, &long).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let path = path.clone();
            let done = Arc::clone(&done);
            let (long_len, short_len) = (long.len(), short.len());
            thread::spawn(move || {
                let mut reads = 0;
                loop {
                    let content = fs::read_to_string(&path).unwrap();
                    assert!(
                        content.len() == long_len || content.len() == short_len,
                        "torn read of {} bytes",
                        content.len()
                    );
                    reads += 1;
                    if done.load(Ordering::Relaxed) {
                        break reads;
                    }
                }
            })
        };

        for i in 0..200 {
            let content = if i % 2 == 0 { &short } else { &long };
            write_atomic(&path, content).unwrap();
        }
        done.store(true, Ordering::Relaxed);
        assert!(reader.join().unwrap() > 0);
    }
}
