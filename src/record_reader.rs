use crate::err::{Error, Result};

use log::{debug, trace};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Column names of a participants file, shared by every record read from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headers {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Headers {
    fn from_names(names: Vec<String>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(names.len());

        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(Error::MalformedHeader {
                    message: format!("column {} has an empty name", i + 1),
                });
            }
            if positions.insert(name.clone(), i).is_some() {
                return Err(Error::MalformedHeader {
                    message: format!("column `{}` appears more than once", name),
                });
            }
        }

        Ok(Headers { names, positions })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One data row of the participants file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRecord {
    headers: Arc<Headers>,
    values: Vec<String>,
    line: u64,
}

impl ParticipantRecord {
    /// Returns the value of the column called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.position(name).and_then(|i| self.get_at(i))
    }

    pub fn get_at(&self, column: usize) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    /// Iterates `(column, value)` pairs in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    /// 1-based line in the source file where this row starts.
    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn headers(&self) -> &Arc<Headers> {
        &self.headers
    }
}

/// Lazily reads participant records from a CSV file with a header row.
///
/// Rows whose column count differs from the header are yielded as
/// [`Error::ColumnCountMismatch`], and iteration carries on with the next row.
pub struct RecordReader<R: Read> {
    headers: Arc<Headers>,
    records: csv::StringRecordsIntoIter<R>,
}

impl RecordReader<File> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::FailedToOpenCsv {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Opened participants file {}", path.display());
        Self::build(file, path.to_path_buf())
    }
}

impl<R: Read> RecordReader<R> {
    pub fn from_reader(reader: R) -> Result<Self> {
        Self::build(reader, PathBuf::from("<input>"))
    }

    fn build(reader: R, path: PathBuf) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let header_row = csv_reader
            .headers()
            .map_err(|e| csv_error_to_error(e, 1))?
            .clone();

        if header_row.is_empty() {
            return Err(Error::MissingHeader { path });
        }

        let headers = Headers::from_names(header_row.iter().map(str::to_owned).collect())?;
        debug!("CSV header: {:?}", headers.names());

        Ok(RecordReader {
            headers: Arc::new(headers),
            records: csv_reader.into_records(),
        })
    }

    pub fn headers(&self) -> &Arc<Headers> {
        &self.headers
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<ParticipantRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.records.next()? {
            Ok(row) => row,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or_default();
                return Some(Err(csv_error_to_error(e, line)));
            }
        };

        let line = row.position().map(|p| p.line()).unwrap_or_default();
        trace!("Line {}: {:?}", line, row);

        if row.len() != self.headers.len() {
            return Some(Err(Error::ColumnCountMismatch {
                line,
                expected: self.headers.len(),
                found: row.len(),
            }));
        }

        Some(Ok(ParticipantRecord {
            headers: Arc::clone(&self.headers),
            values: row.iter().map(str::to_owned).collect(),
            line,
        }))
    }
}

fn csv_error_to_error(err: csv::Error, line: u64) -> Error {
    if err.is_io_error() {
        match err.into_kind() {
            csv::ErrorKind::Io(source) => Error::CsvIo { source },
            other => Error::MalformedRow {
                line,
                message: format!("{:?}", other),
            },
        }
    } else {
        Error::MalformedRow {
            line,
            message: err.to_string(),
        }
    }
}
