//! Append-only execution journal: line-oriented JSON, fsync'd before any
//! corresponding filesystem mutation becomes observable.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FileMoverError, Result};
use crate::plan::OpKind;

pub const JOURNAL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultKind {
    Pending,
    Ok,
    Skip,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalHeader {
    pub version: u32,
    pub started_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub when_utc: DateTime<Utc>,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub op: OpKind,
    pub result: ResultKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JournalEntry {
    pub fn pending(source: PathBuf, dest: PathBuf, op: OpKind) -> Self {
        Self {
            when_utc: Utc::now(),
            source,
            dest,
            op,
            result: ResultKind::Pending,
            message: None,
        }
    }

    pub fn with_result(mut self, result: ResultKind) -> Self {
        self.when_utc = Utc::now();
        self.result = result;
        self
    }

    pub fn failed<S: Into<String>>(mut self, message: S) -> Self {
        self.when_utc = Utc::now();
        self.result = ResultKind::Failed;
        self.message = Some(message.into());
        self
    }

    pub fn skipped<S: Into<String>>(mut self, message: S) -> Self {
        self.when_utc = Utc::now();
        self.result = ResultKind::Skip;
        self.message = Some(message.into());
        self
    }
}

/// Mutex-guarded journal writer. Every appended line is flushed and
/// fsync'd before the call returns, so the attempt record is durable
/// before the mutation it announces.
pub struct Journal {
    path: PathBuf,
    file: Mutex<File>,
}

impl Journal {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| FileMoverError::Journal(format!("create journal dir: {}", e)))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| FileMoverError::Journal(format!("open journal: {}", e)))?;

        let header = JournalHeader {
            version: JOURNAL_VERSION,
            started_utc: Utc::now(),
        };
        let line = serde_json::to_string(&header)
            .map_err(|e| FileMoverError::Journal(format!("encode header: {}", e)))?;
        writeln!(file, "{}", line)
            .map_err(|e| FileMoverError::Journal(format!("write header: {}", e)))?;
        file.sync_data()
            .map_err(|e| FileMoverError::Journal(format!("sync header: {}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let line = serde_json::to_string(entry)
            .map_err(|e| FileMoverError::Journal(format!("encode entry: {}", e)))?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| FileMoverError::Journal("journal writer poisoned".to_string()))?;
        writeln!(file, "{}", line)
            .map_err(|e| FileMoverError::Journal(format!("append entry: {}", e)))?;
        file.sync_data()
            .map_err(|e| FileMoverError::Journal(format!("sync entry: {}", e)))?;
        Ok(())
    }
}

/// Parsed journal plus validation facts consumed by undo and by
/// `validate-journal`.
#[derive(Debug, Clone)]
pub struct JournalReader {
    pub header: JournalHeader,
    pub entries: Vec<JournalEntry>,
}

impl JournalReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| FileMoverError::Journal(format!("open {}: {}", path.display(), e)))?;
        let mut lines = BufReader::new(file).lines();

        let header_line = lines
            .next()
            .ok_or_else(|| FileMoverError::Journal("journal is empty".to_string()))?
            .map_err(|e| FileMoverError::Journal(format!("read header: {}", e)))?;
        let header: JournalHeader = serde_json::from_str(&header_line)
            .map_err(|e| FileMoverError::Journal(format!("invalid header: {}", e)))?;
        if header.version != JOURNAL_VERSION {
            return Err(FileMoverError::Journal(format!(
                "unsupported journal version {}",
                header.version
            )));
        }

        let mut entries = Vec::new();
        for (index, line) in lines.enumerate() {
            let line = line.map_err(|e| FileMoverError::Journal(format!("read line: {}", e)))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line).map_err(|e| {
                FileMoverError::Journal(format!("invalid entry at line {}: {}", index + 2, e))
            })?;
            entries.push(entry);
        }

        Ok(Self { header, entries })
    }

    /// Attempt records whose result line never arrived. A non-empty set
    /// means the execution was interrupted; the filesystem state decides
    /// what actually happened.
    pub fn ambiguous_tail(&self) -> Vec<&JournalEntry> {
        let mut pending: Vec<&JournalEntry> = Vec::new();
        for entry in &self.entries {
            match entry.result {
                ResultKind::Pending => pending.push(entry),
                _ => {
                    pending.retain(|p| p.source != entry.source || p.dest != entry.dest);
                }
            }
        }
        pending
    }

    pub fn count(&self, result: ResultKind) -> u64 {
        self.entries.iter().filter(|e| e.result == result).count() as u64
    }
}
