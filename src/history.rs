// Append-only log of clean operations, one JSON record per line.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error on {path}: {source}")]
    Io { path: String, source: io::Error },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CullAction {
    Moved,
    Trashed,
    Deleted,
}

impl CullAction {
    /// Whether the culled files still exist somewhere and can be moved back.
    pub fn is_restorable(self) -> bool {
        matches!(self, CullAction::Moved | CullAction::Trashed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CulledFile {
    pub from: PathBuf,
    /// Where the file went; `None` once it was deleted outright.
    pub to: Option<PathBuf>,
}

/// What one clean did to one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CullRecord {
    pub timestamp: String,
    pub group_id: usize,
    pub retained: PathBuf,
    pub culled: Vec<CulledFile>,
    pub action: CullAction,
}

/// One line of the history file.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    Record(CullRecord),
    /// A line this build could not read, such as one from a newer format.
    Unparsed(String),
}

pub struct CullHistory {
    path: PathBuf,
}

impl CullHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, records: &[CullRecord]) -> Result<(), HistoryError> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }

        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        for record in records {
            writeln!(out, "{}", serde_json::to_string(record)?).map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }

    /// Every well-formed record in file order. A missing file is an empty
    /// history; malformed lines are logged and skipped.
    pub fn load(&self) -> Result<Vec<CullRecord>, HistoryError> {
        Ok(self
            .load_entries()?
            .into_iter()
            .filter_map(|entry| match entry {
                HistoryEntry::Record(record) => Some(record),
                HistoryEntry::Unparsed(_) => None,
            })
            .collect())
    }

    /// Every non-blank line in file order, keeping the ones that do not parse
    /// so a rewrite can put them back untouched.
    pub fn load_entries(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut entries = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| self.io_error(e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CullRecord>(&line) {
                Ok(record) => entries.push(HistoryEntry::Record(record)),
                Err(err) => {
                    log::warn!("Skipping malformed history entry {}: {}", i, err);
                    entries.push(HistoryEntry::Unparsed(line));
                }
            }
        }
        Ok(entries)
    }

    /// Replace the file contents with `entries`. Unparsed lines are written
    /// back verbatim.
    pub fn rewrite(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        let mut content = String::new();
        for entry in entries {
            match entry {
                HistoryEntry::Record(record) => content.push_str(&serde_json::to_string(record)?),
                HistoryEntry::Unparsed(line) => content.push_str(line),
            }
            content.push('\n');
        }
        fs::write(&self.path, content).map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: io::Error) -> HistoryError {
        HistoryError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(group_id: usize, action: CullAction) -> CullRecord {
        CullRecord {
            timestamp: "2024-05-01T10:00:00Z".to_string(),
            group_id,
            retained: PathBuf::from("/photos/keep.jpg"),
            culled: vec![CulledFile {
                from: PathBuf::from("/photos/dup.jpg"),
                to: Some(PathBuf::from("/trash/dup.jpg")),
            }],
            action,
        }
    }

    #[test]
    fn test_missing_file_is_empty_history() {
        let temp_dir = TempDir::new().unwrap();
        let history = CullHistory::new(temp_dir.path().join("none.jsonl"));
        assert!(history.load().unwrap().is_empty());
    }

    #[test]
    fn test_append_then_load_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let history = CullHistory::new(temp_dir.path().join("sub").join("h.jsonl"));
        history.append(&[record(1, CullAction::Moved)]).unwrap();
        history
            .append(&[record(2, CullAction::Deleted), record(3, CullAction::Trashed)])
            .unwrap();

        let loaded = history.load().unwrap();
        assert_eq!(
            loaded.iter().map(|r| r.group_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(loaded[1].action, CullAction::Deleted);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("h.jsonl");
        let good = serde_json::to_string(&record(7, CullAction::Moved)).unwrap();
        fs::write(&path, format!("{{broken\n\n{}\n", good)).unwrap();

        let loaded = CullHistory::new(&path).load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].group_id, 7);
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let temp_dir = TempDir::new().unwrap();
        let history = CullHistory::new(temp_dir.path().join("h.jsonl"));
        history
            .append(&[record(1, CullAction::Moved), record(2, CullAction::Moved)])
            .unwrap();

        history
            .rewrite(&[HistoryEntry::Record(record(2, CullAction::Moved))])
            .unwrap();
        let loaded = history.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].group_id, 2);

        history.rewrite(&[]).unwrap();
        assert!(history.load().unwrap().is_empty());
    }

    #[test]
    fn test_action_wire_names() {
        assert_eq!(
            serde_json::to_string(&CullAction::Trashed).unwrap(),
            "\"trashed\""
        );
        assert!(CullAction::Moved.is_restorable());
        assert!(!CullAction::Deleted.is_restorable());
    }

    #[test]
    fn test_rewrite_keeps_unparsed_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("h.jsonl");
        let good = serde_json::to_string(&record(3, CullAction::Trashed)).unwrap();
        fs::write(&path, format!("{{\"future\":\"format\"}}\n{}\n", good)).unwrap();

        let history = CullHistory::new(&path);
        let entries = history.load_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0],
            HistoryEntry::Unparsed("{\"future\":\"format\"}".to_string())
        );

        let kept: Vec<HistoryEntry> = entries
            .into_iter()
            .filter(|entry| matches!(entry, HistoryEntry::Unparsed(_)))
            .collect();
        history.rewrite(&kept).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"future\":\"format\"}\n");
        assert!(history.load().unwrap().is_empty());
    }
}
