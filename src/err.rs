use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Errors related to the participants file

    #[error("Failed to open CSV file {}: {source}", path.display())]
    FailedToOpenCsv { path: PathBuf, source: io::Error },

    #[error("CSV file {} has no header row", path.display())]
    MissingHeader { path: PathBuf },

    #[error("CSV header is malformed: {message}")]
    MalformedHeader { message: String },

    #[error("An I/O error has occurred while reading the CSV input: {source}")]
    CsvIo { source: io::Error },

    #[error("Line {line}: expected {expected} columns (as in the header), found {found}")]
    ColumnCountMismatch {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Line {line}: failed to decode row: {message}")]
    MalformedRow { line: u64, message: String },

    /// Errors related to the SVG template

    #[error("Failed to read template {}: {source}", path.display())]
    FailedToReadTemplate { path: PathBuf, source: io::Error },

    #[error("Template is not well-formed markup (byte {position}): {message}")]
    MalformedTemplate { position: u64, message: String },

    #[error("Template root element is `{found}`, expected `svg`")]
    NotAnSvgTemplate { found: String },

    /// Errors related to rendering a bound document

    #[error("Page {index}: failed to parse bound SVG: {message}")]
    InvalidBoundDocument { index: usize, message: String },

    #[error("Page {index}: PDF conversion failed: {message}")]
    ConversionFailed { index: usize, message: String },

    #[error("Page {index}: failed to load {resource}")]
    MissingResource { index: usize, resource: String },

    /// Errors related to writing output files

    #[error("Failed to create output directory {}: {source}", path.display())]
    FailedToCreateOutputDir { path: PathBuf, source: io::Error },

    #[error("Failed to write {}: {source}", path.display())]
    FailedToWriteOutput { path: PathBuf, source: io::Error },
}

/// Coarse classification of an [`Error`], used for reporting and for deciding
/// whether a failure aborts the whole run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Format,
    Template,
    Render,
    Output,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Input => "InputError",
            ErrorKind::Format => "FormatError",
            ErrorKind::Template => "TemplateError",
            ErrorKind::Render => "RenderError",
            ErrorKind::Output => "OutputError",
        };
        f.write_str(name)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FailedToOpenCsv { .. }
            | Error::MissingHeader { .. }
            | Error::MalformedHeader { .. }
            | Error::CsvIo { .. } => ErrorKind::Input,
            Error::ColumnCountMismatch { .. } | Error::MalformedRow { .. } => ErrorKind::Format,
            Error::FailedToReadTemplate { .. }
            | Error::MalformedTemplate { .. }
            | Error::NotAnSvgTemplate { .. } => ErrorKind::Template,
            Error::InvalidBoundDocument { .. }
            | Error::ConversionFailed { .. }
            | Error::MissingResource { .. } => ErrorKind::Render,
            Error::FailedToCreateOutputDir { .. } | Error::FailedToWriteOutput { .. } => {
                ErrorKind::Output
            }
        }
    }

    /// Whether this error can only concern a single record (or page).
    ///
    /// Everything else would recur identically for every record, so the run is aborted.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ColumnCountMismatch { .. }
                | Error::MalformedRow { .. }
                | Error::InvalidBoundDocument { .. }
                | Error::ConversionFailed { .. }
                | Error::MissingResource { .. }
                | Error::FailedToWriteOutput { .. }
        )
    }

    /// Source line of the offending row, when the error is tied to one.
    pub fn line(&self) -> Option<u64> {
        match self {
            Error::ColumnCountMismatch { line, .. } | Error::MalformedRow { line, .. } => {
                Some(*line)
            }
            _ => None,
        }
    }
}
