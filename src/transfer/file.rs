//! File helpers for archive metadata.
//!
//! - Atomic JSON writes: write to a temp file, sync to disk, then rename
//! - JSONL writing and reading with line-numbered errors

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Write a value as pretty JSON, atomically.
///
/// If any step fails, the original file (if any) remains untouched.
///
/// # Errors
///
/// Returns an error if serialization or any file operation fails.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("json.tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        writer.write_all(content.as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Read a JSON object file into a generic map. A missing file is `None`.
///
/// # Errors
///
/// Returns [`Error::Format`] if the file exists but is not a JSON object.
pub fn read_json_object(path: &Path) -> Result<Option<serde_json::Map<String, serde_json::Value>>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| Error::Format(format!("{} is not a JSON object: {e}", path.display())))
}

/// Streaming JSONL writer.
pub struct JsonlWriter {
    out: BufWriter<File>,
    count: usize,
}

impl JsonlWriter {
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            count: 0,
        })
    }

    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.count += 1;
        Ok(())
    }

    /// Flush and return the number of records written.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn finish(mut self) -> Result<usize> {
        self.out.flush()?;
        Ok(self.count)
    }
}

/// Read records from a JSONL file. Blank lines are skipped.
///
/// # Errors
///
/// Returns [`Error::Format`] naming the line of the first invalid record.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim().trim_start_matches('\u{feff}');
        if trimmed.is_empty() {
            continue;
        }
        let record = serde_json::from_str(trimmed).map_err(|e| {
            Error::Format(format!(
                "{} line {}: {e}",
                path.display(),
                line_num + 1
            ))
        })?;
        records.push(record);
    }

    Ok(records)
}
