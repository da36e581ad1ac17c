//! Durable file primitives shared by the journals.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::JournalError;

/// Attempts made before a journal write is reported as failed.
pub const WRITE_ATTEMPTS: u32 = 3;

/// Append one line and flush it to stable storage.
pub fn append_line(path: &Path, line: &str) -> Result<(), JournalError> {
    retry(path, || {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_data()
    })
}

/// Replace `path` atomically: write a temp file, fsync, rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), JournalError> {
    let temp_path = temp_path(path);
    retry(path, || {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&temp_path)?;

        let cleanup_and_err = |e| {
            let _ = fs::remove_file(&temp_path);
            e
        };

        file.write_all(contents).map_err(cleanup_and_err)?;
        file.sync_all().map_err(cleanup_and_err)?;
        fs::rename(&temp_path, path).map_err(cleanup_and_err)?;
        if let Some(parent) = path.parent() {
            // Persist the rename itself where the platform allows it.
            if let Ok(dir) = fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn retry(path: &Path, mut op: impl FnMut() -> std::io::Result<()>) -> Result<(), JournalError> {
    let mut last = None;
    for attempt in 1..=WRITE_ATTEMPTS {
        match op() {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(path = %path.display(), attempt, error = %e, "Journal write failed");
                last = Some(e);
            }
        }
    }
    match last {
        Some(source) => Err(JournalError::Write {
            path: path.to_path_buf(),
            source,
        }),
        None => Err(JournalError::Exhausted {
            what: path.display().to_string(),
            attempts: WRITE_ATTEMPTS,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_creates_parent_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/log.jsonl");
        append_line(&path, "one").unwrap();
        append_line(&path, "two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, b"{\"v\":1}").unwrap();
        write_atomic(&path, b"{\"v\":2}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"v\":2}");
        assert!(!dir.path().join("state.json.tmp").exists());
    }
}
