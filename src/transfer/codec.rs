//! Table row codecs.
//!
//! Two interchangeable row formats:
//!
//! - **CSV**: UTF-8 with a byte-order mark, one header row, RFC 4180 style
//!   quoting. `NULL` is a bare empty field, an empty string is `""`.
//! - **JSONL**: one JSON object per line, column name to value, no header.
//!   `NULL` is an explicit `null`.
//!
//! Writers take rows as value slices aligned to a fixed column list. Readers
//! yield rows keyed by column name.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::value::{from_field, from_json, to_field, to_json};

const BOM: char = '\u{feff}';
const BOM_UTF8: &[u8] = b"\xEF\xBB\xBF";

/// One row read back from a table file, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Row file format, chosen at export time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    /// Comma-separated values with a header row
    Csv,
    /// One JSON object per line
    #[default]
    Jsonl,
}

impl TableFormat {
    /// File extension, without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Jsonl => "jsonl",
        }
    }

    /// Infer the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            ext if ext.eq_ignore_ascii_case("csv") => Some(Self::Csv),
            ext if ext.eq_ignore_ascii_case("jsonl") => Some(Self::Jsonl),
            _ => None,
        }
    }
}

impl std::fmt::Display for TableFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Streaming sink for the rows of one table.
pub trait TableWriter {
    /// Append one row. `values` must line up with the writer's columns.
    ///
    /// # Errors
    ///
    /// Returns an error on a column count mismatch or a failed write.
    fn write_row(&mut self, values: &[Value]) -> Result<()>;

    /// Flush and close. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    fn finish(self: Box<Self>) -> Result<u64>;
}

/// Create a writer for `format` at `path`, truncating any existing file.
///
/// # Errors
///
/// Returns an error if the file cannot be created or the header cannot be written.
pub fn create_writer(
    format: TableFormat,
    path: &Path,
    columns: &[String],
) -> Result<Box<dyn TableWriter>> {
    let out = BufWriter::new(File::create(path)?);
    Ok(match format {
        TableFormat::Csv => Box::new(CsvTableWriter::new(out, columns)?),
        TableFormat::Jsonl => Box::new(JsonlTableWriter::new(out, columns)),
    })
}

/// Quote a field if it contains a comma, quote, or line break.
#[must_use]
pub fn escape_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn check_width(columns: usize, values: &[Value]) -> Result<()> {
    if values.len() == columns {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "row has {} values for {} columns",
            values.len(),
            columns
        )))
    }
}

struct CsvTableWriter<W: Write> {
    out: W,
    columns: usize,
    rows: u64,
}

impl<W: Write> CsvTableWriter<W> {
    fn new(mut out: W, columns: &[String]) -> Result<Self> {
        write!(out, "{BOM}")?;
        let mut writer = Self {
            out,
            columns: columns.len(),
            rows: 0,
        };
        writer.write_line(columns.iter().map(|c| escape_field(c)))?;
        Ok(writer)
    }

    fn write_line(&mut self, fields: impl Iterator<Item = String>) -> Result<()> {
        let line = fields.collect::<Vec<_>>().join(",");
        writeln!(self.out, "{line}")?;
        Ok(())
    }
}

/// Encode one value. `NULL` is a bare empty field, an empty string is `""`.
fn csv_field(value: &Value) -> String {
    match value {
        Value::Text(s) if s.is_empty() => "\"\"".to_string(),
        other => escape_field(&to_field(other)),
    }
}

impl<W: Write> TableWriter for CsvTableWriter<W> {
    fn write_row(&mut self, values: &[Value]) -> Result<()> {
        check_width(self.columns, values)?;
        self.write_line(values.iter().map(csv_field))?;
        self.rows += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<u64> {
        self.out.flush()?;
        Ok(self.rows)
    }
}

struct JsonlTableWriter<W: Write> {
    out: W,
    columns: Vec<String>,
    rows: u64,
}

impl<W: Write> JsonlTableWriter<W> {
    fn new(out: W, columns: &[String]) -> Self {
        Self {
            out,
            columns: columns.to_vec(),
            rows: 0,
        }
    }
}

impl<W: Write> TableWriter for JsonlTableWriter<W> {
    fn write_row(&mut self, values: &[Value]) -> Result<()> {
        check_width(self.columns.len(), values)?;
        let record: serde_json::Map<String, serde_json::Value> = self
            .columns
            .iter()
            .cloned()
            .zip(values.iter().map(to_json))
            .collect();
        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        self.rows += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<u64> {
        self.out.flush()?;
        Ok(self.rows)
    }
}

/// Keeps the bytes the CSV parser has consumed, so a record's raw text can be
/// checked for quoting after it is parsed.
struct Capture<R> {
    inner: R,
    buf: Vec<u8>,
    /// Stream offset of `buf[0]`.
    base: u64,
}

impl<R: Read> Capture<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            base: 0,
        }
    }

    fn raw(&self, start: u64, end: u64) -> &[u8] {
        let offset = |at: u64| usize::try_from(at.saturating_sub(self.base)).unwrap_or(usize::MAX);
        self.buf.get(offset(start)..offset(end)).unwrap_or_default()
    }

    /// Drop everything before stream offset `upto`.
    fn release(&mut self, upto: u64) {
        let n = usize::try_from(upto.saturating_sub(self.base))
            .unwrap_or(usize::MAX)
            .min(self.buf.len());
        self.buf.drain(..n);
        self.base += n as u64;
    }
}

impl<R: Read> Read for Capture<R> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(out)?;
        self.buf.extend_from_slice(&out[..n]);
        Ok(n)
    }
}

/// For each field of `record`, whether its raw text was a quoted `""`.
///
/// Walks field widths rather than re-parsing: an unquoted field is as wide as
/// its value, a quoted one adds the two quotes and one per doubled quote.
fn quoted_empty_fields(raw: &[u8], record: &StringRecord) -> Vec<bool> {
    let skip = raw.iter().take_while(|b| matches!(b, b'\r' | b'\n')).count();
    let raw = &raw[skip..];
    let mut at = 0;
    record
        .iter()
        .map(|field| {
            let quoted = raw.get(at) == Some(&b'"');
            let width = if quoted {
                field.len() + field.matches('"').count() + 2
            } else {
                field.len()
            };
            at += width + 1;
            quoted && field.is_empty()
        })
        .collect()
}

fn csv_error(path: &Path, err: &csv::Error) -> Error {
    Error::Format(format!("{}: invalid CSV: {err}", path.display()))
}

enum ReaderKind {
    Csv {
        reader: csv::Reader<Capture<BufReader<File>>>,
        header: Vec<String>,
        record: StringRecord,
        path: PathBuf,
    },
    Jsonl {
        lines: std::io::Lines<BufReader<File>>,
        line: usize,
    },
}

/// Iterator over the rows of one table file.
pub struct TableReader {
    kind: ReaderKind,
}

impl TableReader {
    /// Open a table file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or, for CSV, has no header.
    pub fn open(format: TableFormat, path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let kind = match format {
            TableFormat::Csv => {
                if reader.fill_buf()?.starts_with(BOM_UTF8) {
                    reader.consume(BOM_UTF8.len());
                }
                let mut reader = ReaderBuilder::new()
                    .has_headers(true)
                    .flexible(true)
                    .from_reader(Capture::new(reader));
                let header: Vec<String> = reader
                    .headers()
                    .map_err(|e| csv_error(path, &e))?
                    .iter()
                    .map(String::from)
                    .collect();
                if header.is_empty() {
                    return Err(Error::Format(format!("{} has no header row", path.display())));
                }
                ReaderKind::Csv {
                    reader,
                    header,
                    record: StringRecord::new(),
                    path: path.to_path_buf(),
                }
            }
            TableFormat::Jsonl => ReaderKind::Jsonl {
                lines: reader.lines(),
                line: 0,
            },
        };
        Ok(Self { kind })
    }

    /// Column names from the CSV header. Empty for JSONL.
    #[must_use]
    pub fn header(&self) -> &[String] {
        match &self.kind {
            ReaderKind::Csv { header, .. } => header,
            ReaderKind::Jsonl { .. } => &[],
        }
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        match &mut self.kind {
            ReaderKind::Csv {
                reader,
                header,
                record,
                path,
            } => {
                if !reader.read_record(record).map_err(|e| csv_error(path, &e))? {
                    return Ok(None);
                }
                let start = record.position().map_or(0, csv::Position::byte);
                let end = reader.position().byte();
                let quoted = quoted_empty_fields(reader.get_ref().raw(start, end), record);
                reader.get_mut().release(end);

                let row = header
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let value = match record.get(i) {
                            Some("") if quoted[i] => Value::Text(String::new()),
                            Some(field) => from_field(field),
                            None => Value::Null,
                        };
                        (name.clone(), value)
                    })
                    .collect();
                Ok(Some(row))
            }
            ReaderKind::Jsonl { lines, line } => loop {
                let Some(text) = lines.next().transpose()? else {
                    return Ok(None);
                };
                *line += 1;
                let text = text.trim_start_matches(BOM);
                if text.trim().is_empty() {
                    continue;
                }
                let record: serde_json::Map<String, serde_json::Value> =
                    serde_json::from_str(text).map_err(|e| {
                        Error::Format(format!("invalid record at line {}: {e}", *line))
                    })?;
                return Ok(Some(
                    record.iter().map(|(k, v)| (k.clone(), from_json(v))).collect(),
                ));
            },
        }
    }
}

impl Iterator for TableReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}
