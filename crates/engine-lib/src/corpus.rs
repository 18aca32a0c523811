//! Append-only interaction corpus
//!
//! Records are kept in memory and persisted as one JSON object per line.
//! Each append is synced to disk before it becomes visible to readers.

use crate::error::EngineResult;
use crate::models::InteractionRecord;
use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name of the corpus inside the data directory
pub const CORPUS_FILE: &str = "interactions.jsonl";

/// Persistent store of every recorded interaction
#[derive(Debug)]
pub struct InteractionCorpus {
    path: PathBuf,
    records: Vec<InteractionRecord>,
    file: File,
}

impl InteractionCorpus {
    /// Open or create the corpus file and load existing records.
    ///
    /// Lines that do not parse are skipped with a warning.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create corpus directory {:?}", parent))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open corpus file {:?}", path))?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        let reader = BufReader::new(&file);
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read corpus file {:?}", path))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<InteractionRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    warn!(path = %path.display(), line = line_no + 1, error = %e, "Skipping malformed corpus line");
                }
            }
        }

        // A crash mid-append can leave the last line unterminated
        if ends_without_newline(&mut file)? {
            file.write_all(b"\n")
                .with_context(|| format!("Failed to repair corpus file {:?}", path))?;
            file.sync_data().context("Failed to sync corpus file")?;
        }

        info!(path = %path.display(), records = records.len(), skipped = skipped, "Loaded interaction corpus");
        Ok(Self { path, records, file })
    }

    /// Persist one record and add it to the in-memory view
    pub fn append(&mut self, record: InteractionRecord) -> EngineResult<()> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .with_context(|| format!("Failed to append to corpus file {:?}", self.path))?;
        self.file.sync_data().context("Failed to sync corpus file")?;
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[InteractionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn ends_without_newline(file: &mut File) -> EngineResult<bool> {
    let len = file.metadata().context("Failed to stat corpus file")?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1)).context("Failed to seek corpus file")?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).context("Failed to read corpus file")?;
    Ok(last[0] != b'\n')
}
