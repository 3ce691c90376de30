//! Minimal reader for the dBase III table file the dataset ships in.
//!
//! Only what the PIndx table needs: character, numeric, and date fields,
//! sequential access, single-byte decoding via `encoding_rs`. Records are
//! read one at a time and not retained.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use encoding_rs::Encoding;

use crate::error::{Error, Result};

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const DESCRIPTOR_TERMINATOR: u8 = 0x0D;
const DELETED_FLAG: u8 = b'*';
const EOF_MARKER: u8 = 0x1A;

#[derive(Debug, Clone)]
struct FieldDescriptor {
    name: String,
    kind: u8,
    len: usize,
}

/// One decoded row. Field values are owned; the shared name list comes from
/// the reader.
#[derive(Debug, Clone)]
pub struct Record {
    names: Arc<Vec<String>>,
    values: Vec<Value>,
}

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Date(Option<NaiveDate>),
}

impl Record {
    fn position(&self, column: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == column)
            .ok_or_else(|| Error::Table(format!("no column named {column}")))
    }

    /// Field value as text. Date fields come back in their raw `YYYYMMDD`
    /// form, or empty when blank.
    pub fn text(&self, column: &str) -> Result<String> {
        let value = &self.values[self.position(column)?];
        Ok(match value {
            Value::Text(s) => s.clone(),
            Value::Date(Some(d)) => d.format("%Y%m%d").to_string(),
            Value::Date(None) => String::new(),
        })
    }

    /// Field value as a calendar date. `None` for a blank date field.
    pub fn date(&self, column: &str) -> Result<Option<NaiveDate>> {
        match &self.values[self.position(column)?] {
            Value::Date(d) => Ok(*d),
            Value::Text(_) => Err(Error::Table(format!("column {column} is not a date"))),
        }
    }
}

/// Sequential reader over a DBF file with a known column list and encoding.
#[derive(Debug)]
pub struct DbfReader<R: Read> {
    input: R,
    fields: Vec<FieldDescriptor>,
    names: Arc<Vec<String>>,
    record_len: usize,
    remaining: u32,
    encoding: &'static Encoding,
}

impl DbfReader<BufReader<File>> {
    /// Open `path` and verify that every column in `columns` is present
    /// (DBF stores names uppercase; comparison is case-insensitive).
    pub fn open(path: &Path, columns: &[&str], encoding: &'static Encoding) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), columns, encoding)
    }
}

impl<R: Read> DbfReader<R> {
    pub fn from_reader(mut input: R, columns: &[&str], encoding: &'static Encoding) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        input
            .read_exact(&mut header)
            .map_err(|_| Error::Table("truncated header".to_string()))?;

        let remaining = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let header_len = u16::from_le_bytes([header[8], header[9]]) as usize;
        let record_len = u16::from_le_bytes([header[10], header[11]]) as usize;
        if header_len < HEADER_LEN + 1 || record_len == 0 {
            return Err(Error::Table("implausible header geometry".to_string()));
        }

        let mut descriptors = vec![0u8; header_len - HEADER_LEN];
        input
            .read_exact(&mut descriptors)
            .map_err(|_| Error::Table("truncated field descriptors".to_string()))?;

        let mut fields = Vec::new();
        for chunk in descriptors.chunks_exact(DESCRIPTOR_LEN) {
            if chunk[0] == DESCRIPTOR_TERMINATOR {
                break;
            }
            let name_end = chunk[..11].iter().position(|&b| b == 0).unwrap_or(11);
            let name = String::from_utf8_lossy(&chunk[..name_end])
                .trim()
                .to_lowercase();
            fields.push(FieldDescriptor {
                name,
                kind: chunk[11],
                len: chunk[16] as usize,
            });
        }
        if fields.is_empty() {
            return Err(Error::Table("no field descriptors".to_string()));
        }

        let width: usize = 1 + fields.iter().map(|f| f.len).sum::<usize>();
        if width != record_len {
            return Err(Error::Table(format!(
                "record length {record_len} does not match field widths {width}"
            )));
        }
        for &column in columns {
            if !fields.iter().any(|f| f.name == column.to_lowercase()) {
                return Err(Error::Table(format!("table has no column named {column}")));
            }
        }

        let names = Arc::new(fields.iter().map(|f| f.name.clone()).collect());
        Ok(Self {
            input,
            fields,
            names,
            record_len,
            remaining,
            encoding,
        })
    }

    /// Next live record, or `None` when the table is exhausted. Records
    /// flagged as deleted are skipped.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            if self.remaining == 0 {
                return Ok(None);
            }

            let mut flag = [0u8; 1];
            match self.input.read_exact(&mut flag) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            if flag[0] == EOF_MARKER {
                return Ok(None);
            }

            let mut body = vec![0u8; self.record_len - 1];
            self.input
                .read_exact(&mut body)
                .map_err(|_| Error::Table("truncated record".to_string()))?;
            self.remaining -= 1;

            if flag[0] == DELETED_FLAG {
                continue;
            }

            let mut values = Vec::with_capacity(self.fields.len());
            let mut offset = 0;
            for field in &self.fields {
                let raw = &body[offset..offset + field.len];
                offset += field.len;
                values.push(self.decode(field, raw));
            }
            return Ok(Some(Record {
                names: Arc::clone(&self.names),
                values,
            }));
        }
    }

    fn decode(&self, field: &FieldDescriptor, raw: &[u8]) -> Value {
        match field.kind {
            b'D' => {
                let text = String::from_utf8_lossy(raw);
                let text = text.trim();
                Value::Date(NaiveDate::parse_from_str(text, "%Y%m%d").ok())
            }
            b'N' | b'F' => {
                let (decoded, _, _) = self.encoding.decode(raw);
                Value::Text(decoded.trim().to_string())
            }
            _ => {
                // Character and anything unexpected: decoded text, padding stripped.
                let (decoded, _, _) = self.encoding.decode(raw);
                Value::Text(decoded.trim_end().to_string())
            }
        }
    }
}
