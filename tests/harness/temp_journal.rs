use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rangelock::application::Incident;
use tempfile::TempDir;

/// Temporary journal root laid out like a real run: `streams/`,
/// `execution/` and `incidents.jsonl`.
pub struct TempJournal {
    dir: TempDir,
}

impl TempJournal {
    pub fn create() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp journal dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn stream_files(&self, date: NaiveDate) -> Vec<PathBuf> {
        list(&self.root().join("streams").join(date.format("%Y-%m-%d").to_string()))
    }

    pub fn execution_files(&self) -> Vec<PathBuf> {
        list(&self.root().join("execution"))
    }

    /// Incidents persisted so far.
    pub fn incidents(&self) -> Vec<Incident> {
        let path = self.root().join("incidents.jsonl");
        let Ok(content) = fs::read_to_string(path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).expect("parse incident"))
            .collect()
    }
}

fn list(dir: &Path) -> Vec<PathBuf> {
    let Ok(read) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<_> = read.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();
    paths
}
