//! Per-document journal
//!
//! A plain-text log kept next to each document's state. Every line carries a
//! timestamp and, when it concerns a segment, the segment id. Failure lines
//! are prefixed with `!!` so they stand out when skimming.
//!
//! ```text
//! 2026-03-14 09:12:44 (003)   fetch ok   CHK@abc…
//! 2026-03-14 09:12:45 (003) !! insert failed  CHK@def…  (route not found)
//! ```

use crate::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Marker placed before failure lines
pub const FAILURE_MARK: &str = "!!";

/// One journal line before formatting
#[derive(Debug, Clone)]
pub struct JournalEntry {
    /// Segment the line belongs to, if any
    pub segment: Option<u32>,
    /// Indentation depth (discovery nesting level)
    pub depth: usize,
    /// Minimum journal verbosity at which the line is written
    pub verbosity: u8,
    /// Whether the line reports a failure
    pub failure: bool,
    /// Message text
    pub message: String,
}

impl JournalEntry {
    /// Render without the timestamp
    pub fn render(&self) -> String {
        let segment = match self.segment {
            Some(id) => format!("({:03}) ", id),
            None => String::new(),
        };
        let mark = if self.failure { FAILURE_MARK } else { "  " };
        format!(
            "{}{} {}{}",
            segment,
            mark,
            "  ".repeat(self.depth),
            self.message
        )
    }
}

enum Sink {
    File { path: PathBuf, file: File },
    Memory(Vec<String>),
    Discard,
}

/// Journal of a single document
pub struct DocumentJournal {
    verbosity: u8,
    sink: Mutex<Sink>,
}

impl DocumentJournal {
    /// Open (or create) the journal file at `path` in append mode
    pub fn open(path: impl AsRef<Path>, verbosity: u8) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            verbosity,
            sink: Mutex::new(Sink::File { path, file }),
        })
    }

    /// Journal that keeps its lines in memory
    pub fn in_memory(verbosity: u8) -> Self {
        Self {
            verbosity,
            sink: Mutex::new(Sink::Memory(Vec::new())),
        }
    }

    /// Journal that drops everything
    pub fn discard() -> Self {
        Self {
            verbosity: 0,
            sink: Mutex::new(Sink::Discard),
        }
    }

    /// Configured verbosity
    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// Drop all previous content
    pub fn clear(&self) -> Result<()> {
        let mut sink = self.sink.lock();
        match &mut *sink {
            Sink::File { path, file } => {
                *file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&*path)?;
            }
            Sink::Memory(lines) => lines.clear(),
            Sink::Discard => {}
        }
        Ok(())
    }

    /// Append an entry if the verbosity allows it.
    ///
    /// Write errors are reported through tracing and otherwise ignored.
    pub fn record(&self, entry: JournalEntry) {
        if entry.verbosity > self.verbosity {
            return;
        }
        let line = format!(
            "{} {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            entry.render()
        );
        let mut sink = self.sink.lock();
        match &mut *sink {
            Sink::File { path, file } => {
                if let Err(e) = writeln!(file, "{}", line) {
                    tracing::warn!(path = %path.display(), error = %e, "journal write failed");
                }
            }
            Sink::Memory(lines) => lines.push(line),
            Sink::Discard => {}
        }
    }

    /// Outcome line, always written
    pub fn note(&self, segment: Option<u32>, depth: usize, message: impl Into<String>) {
        self.record(JournalEntry {
            segment,
            depth,
            verbosity: 0,
            failure: false,
            message: message.into(),
        });
    }

    /// Failure line, always written
    pub fn fail(&self, segment: Option<u32>, depth: usize, message: impl Into<String>) {
        self.record(JournalEntry {
            segment,
            depth,
            verbosity: 0,
            failure: true,
            message: message.into(),
        });
    }

    /// Progress line, written at verbosity 1 and above
    pub fn progress(&self, segment: Option<u32>, depth: usize, message: impl Into<String>) {
        self.record(JournalEntry {
            segment,
            depth,
            verbosity: 1,
            failure: false,
            message: message.into(),
        });
    }

    /// Detail line, written only at verbosity 2
    pub fn detail(&self, segment: Option<u32>, depth: usize, message: impl Into<String>) {
        self.record(JournalEntry {
            segment,
            depth,
            verbosity: 2,
            failure: false,
            message: message.into(),
        });
    }

    /// Lines held by an in-memory journal; empty for other sinks
    pub fn lines(&self) -> Vec<String> {
        match &*self.sink.lock() {
            Sink::Memory(lines) => lines.clone(),
            _ => Vec::new(),
        }
    }

    /// Read a journal file back
    pub fn read(path: impl AsRef<Path>) -> Result<String> {
        Ok(std::fs::read_to_string(path)?)
    }
}

impl std::fmt::Debug for DocumentJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &*self.sink.lock() {
            Sink::File { .. } => "file",
            Sink::Memory(_) => "memory",
            Sink::Discard => "discard",
        };
        f.debug_struct("DocumentJournal")
            .field("verbosity", &self.verbosity)
            .field("sink", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_render_segment_and_failure() {
        let entry = JournalEntry {
            segment: Some(7),
            depth: 1,
            verbosity: 0,
            failure: true,
            message: "insert failed".into(),
        };
        assert_eq!(entry.render(), "(007) !!   insert failed");
    }

    #[test]
    fn test_verbosity_filter() {
        let journal = DocumentJournal::in_memory(1);
        journal.note(None, 0, "kept");
        journal.progress(Some(0), 0, "kept too");
        journal.detail(Some(0), 0, "dropped");

        let lines = journal.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("kept"));
    }

    #[test]
    fn test_failure_lines_are_marked() {
        let journal = DocumentJournal::in_memory(0);
        journal.fail(Some(2), 0, "fetch failed");
        assert!(journal.lines()[0].contains("(002) !! fetch failed"));
    }

    #[test]
    fn test_file_journal_clear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal-1.log");
        let journal = DocumentJournal::open(&path, 2).unwrap();

        journal.note(None, 0, "first pass");
        assert!(DocumentJournal::read(&path).unwrap().contains("first pass"));

        journal.clear().unwrap();
        journal.note(None, 0, "second pass");
        let content = DocumentJournal::read(&path).unwrap();
        assert!(!content.contains("first pass"));
        assert!(content.contains("second pass"));
    }
}
