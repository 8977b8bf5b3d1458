//! Results of outside calls, stored one JSON document per line.

use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AccessError, Object, Patch, Value};

#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("records io: {0}")]
    Io(#[from] io::Error),
    #[error("malformed record on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot read the call result: {0}")]
    Access(#[from] AccessError),
    #[error("cannot record a {0} value")]
    Unrecordable(&'static str),
    #[error("no more records after {0}")]
    Exhausted(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RecordedValue {
    Nil,
    Bool(bool),
    Fixnum(i64),
    Str(String),
}

/// Outcome of one outside call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Record {
    Returned(RecordedValue),
    Raised(RecordedValue),
}

impl TryFrom<&Value> for RecordedValue {
    type Error = RecordsError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value.object() {
            Object::Nil => Ok(RecordedValue::Nil),
            Object::Bool(value) => Ok(RecordedValue::Bool(*value)),
            Object::Fixnum(value) => Ok(RecordedValue::Fixnum(*value)),
            Object::Str(value) => Ok(RecordedValue::Str(value.clone())),
            _ => Err(RecordsError::Unrecordable(value.type_name())),
        }
    }
}

impl From<RecordedValue> for Value {
    fn from(value: RecordedValue) -> Self {
        match value {
            RecordedValue::Nil => Value::nil(),
            RecordedValue::Bool(value) => Value::bool(value),
            RecordedValue::Fixnum(value) => Value::fixnum(value),
            RecordedValue::Str(value) => Value::string(value),
        }
    }
}

impl From<Record> for Patch {
    fn from(record: Record) -> Self {
        match record {
            Record::Returned(value) => Patch::Return(value.into()),
            Record::Raised(value) => Patch::Raise(value.into()),
        }
    }
}

/// Records file belonging to a program: `<file name>-records` next to it.
#[must_use]
pub fn record_file(program: &Path) -> PathBuf {
    let name = program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    program.with_file_name(format!("{name}-records"))
}

#[derive(Debug)]
pub struct RecordWriter<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn write(&mut self, record: &Record) -> Result<(), RecordsError> {
        serde_json::to_writer(&mut self.writer, record).map_err(io::Error::from)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn flush(&mut self) -> Result<(), RecordsError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[derive(Debug)]
pub struct RecordReader<R: BufRead> {
    reader: R,
    line: usize,
    read: usize,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            read: 0,
        }
    }

    /// Reads the next record, skipping blank lines.
    pub fn next_record(&mut self) -> Result<Record, RecordsError> {
        let mut buffer = String::new();
        loop {
            buffer.clear();
            if self.reader.read_line(&mut buffer)? == 0 {
                return Err(RecordsError::Exhausted(self.read));
            }
            self.line += 1;
            if !buffer.trim().is_empty() {
                break;
            }
        }
        let record = serde_json::from_str(buffer.trim()).map_err(|source| {
            RecordsError::Malformed {
                line: self.line,
                source,
            }
        })?;
        self.read += 1;
        Ok(record)
    }

    #[must_use]
    pub fn read(&self) -> usize {
        self.read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_file_sits_next_to_the_program() {
        assert_eq!(
            record_file(Path::new("/tmp/demo.fh")),
            PathBuf::from("/tmp/demo.fh-records")
        );
    }

    #[test]
    fn writes_one_record_per_line() {
        let mut writer = RecordWriter::new(Vec::new());
        writer
            .write(&Record::Returned(RecordedValue::Fixnum(42)))
            .unwrap();
        writer
            .write(&Record::Raised(RecordedValue::Str("boom".to_string())))
            .unwrap();
        assert_eq!(writer.written(), 2);

        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            text,
            "{\"returned\":{\"type\":\"fixnum\",\"value\":42}}\n\
             {\"raised\":{\"type\":\"str\",\"value\":\"boom\"}}\n"
        );
    }

    #[test]
    fn reader_skips_blank_lines_and_reports_exhaustion() {
        let text = "{\"returned\":{\"type\":\"nil\"}}\n\n{\"returned\":{\"type\":\"bool\",\"value\":true}}\n";
        let mut reader = RecordReader::new(text.as_bytes());
        assert_eq!(
            reader.next_record().unwrap(),
            Record::Returned(RecordedValue::Nil)
        );
        assert_eq!(
            reader.next_record().unwrap(),
            Record::Returned(RecordedValue::Bool(true))
        );
        assert!(matches!(
            reader.next_record(),
            Err(RecordsError::Exhausted(2))
        ));
        assert_eq!(reader.read(), 2);
    }

    #[test]
    fn malformed_lines_report_their_position() {
        let mut reader = RecordReader::new("\nnot json\n".as_bytes());
        assert!(matches!(
            reader.next_record(),
            Err(RecordsError::Malformed { line: 2, .. })
        ));
    }

    #[test]
    fn functions_cannot_be_recorded() {
        let native = Value::native(crate::find_native("print").unwrap());
        assert!(matches!(
            RecordedValue::try_from(&native),
            Err(RecordsError::Unrecordable("native"))
        ));
    }
}
