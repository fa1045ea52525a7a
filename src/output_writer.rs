use crate::err::{Error, Result};
use crate::record_reader::ParticipantRecord;
use crate::renderer::RenderedOutput;

use log::{debug, trace, warn};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const MIN_SEQUENCE_WIDTH: usize = 4;
const EXTENSION: &str = "pdf";

/// How output file names are derived.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NamingStrategy {
    /// Zero-padded, 1-based page number (`0001.pdf`).
    #[default]
    Sequence,
    /// The value of a column of the first record on the page, sanitized.
    /// Falls back to the sequence name when the value is empty.
    Field(String),
}

pub struct OutputWriter {
    dir: PathBuf,
    naming: NamingStrategy,
    prefix: String,
}

impl OutputWriter {
    /// Creates `dir` (and its parents) if needed.
    ///
    /// `prefix` goes through the same character rules as field values, so names never leave
    /// `dir`.
    pub fn create(dir: impl AsRef<Path>, naming: NamingStrategy, prefix: &str) -> Result<Self> {
        let dir = dir.as_ref();

        fs::create_dir_all(dir).map_err(|source| Error::FailedToCreateOutputDir {
            path: dir.to_path_buf(),
            source,
        })?;

        debug!("Writing outputs to {}", dir.display());

        let sanitized = sanitize_prefix(prefix);
        if sanitized != prefix {
            warn!("File name prefix `{}` is used as `{}`", prefix, sanitized);
        }

        Ok(OutputWriter {
            dir: dir.to_path_buf(),
            naming,
            prefix: sanitized,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Derives one unique file name per page, in page order.
    ///
    /// Names only depend on the pages themselves, never on the order in which they finish
    /// rendering. Collisions are compared case-insensitively and resolved with `_2`, `_3`, ...
    pub fn plan_names(&self, pages: &[&[ParticipantRecord]]) -> Vec<String> {
        let width = sequence_width(pages.len());
        let mut taken = HashSet::with_capacity(pages.len());
        let mut names = Vec::with_capacity(pages.len());

        for (i, page) in pages.iter().enumerate() {
            let sequence = format!("{:0width$}", i + 1, width = width);

            let stem = match &self.naming {
                NamingStrategy::Sequence => sequence,
                NamingStrategy::Field(column) => page
                    .first()
                    .and_then(|record| record.get(column))
                    .map(sanitize_file_stem)
                    .filter(|stem| !stem.is_empty())
                    .unwrap_or(sequence),
            };

            let base = format!("{}{}", self.prefix, stem);
            let mut candidate = base.clone();
            let mut suffix = 1;
            while !taken.insert(candidate.to_lowercase()) {
                suffix += 1;
                candidate = format!("{}_{}", base, suffix);
            }

            trace!("Page {} -> {}.{}", i + 1, candidate, EXTENSION);
            names.push(format!("{}.{}", candidate, EXTENSION));
        }

        names
    }

    /// Writes `output` as `name`, replacing any existing file.
    ///
    /// The bytes are written to a temporary file in the same directory first, so a failed
    /// write never leaves a truncated PDF behind.
    pub fn write(&self, name: &str, output: &RenderedOutput) -> Result<PathBuf> {
        let path = self.dir.join(name);
        let to_output_error = |source: std::io::Error| Error::FailedToWriteOutput {
            path: path.clone(),
            source,
        };

        let mut file = NamedTempFile::new_in(&self.dir).map_err(to_output_error)?;
        file.write_all(&output.bytes).map_err(to_output_error)?;
        file.persist(&path).map_err(|e| to_output_error(e.error))?;

        debug!("Wrote {} ({} bytes)", path.display(), output.bytes.len());
        Ok(path)
    }
}

fn sequence_width(count: usize) -> usize {
    count.to_string().len().max(MIN_SEQUENCE_WIDTH)
}

/// Keeps `[A-Za-z0-9._-]`, replaces everything else with `_`, and strips leading dots and
/// underscores so the result is never hidden or a path component like `..`.
pub fn sanitize_file_stem(value: &str) -> String {
    replace_unsafe_chars(value.trim())
        .trim_start_matches(['.', '_'])
        .trim_end_matches(['.', '_'])
        .to_owned()
}

/// Like [`sanitize_file_stem`], but keeps trailing separators such as `table_`.
fn sanitize_prefix(prefix: &str) -> String {
    replace_unsafe_chars(prefix)
        .trim_start_matches(['.', '_'])
        .to_owned()
}

fn replace_unsafe_chars(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_reader::RecordReader;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn records(csv: &str) -> Vec<ParticipantRecord> {
        RecordReader::from_reader(csv.as_bytes())
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    fn single_pages(records: &[ParticipantRecord]) -> Vec<&[ParticipantRecord]> {
        records.chunks(1).collect()
    }

    #[test]
    fn test_sequence_names() {
        let d = tempdir().unwrap();
        let writer = OutputWriter::create(d.path(), NamingStrategy::Sequence, "").unwrap();
        let records = records("name\nA\nB\nC\n");

        assert_eq!(
            writer.plan_names(&single_pages(&records)),
            vec!["0001.pdf", "0002.pdf", "0003.pdf"]
        );
    }

    #[test]
    fn test_sequence_width_grows_with_page_count() {
        assert_eq!(sequence_width(1), 4);
        assert_eq!(sequence_width(9999), 4);
        assert_eq!(sequence_width(10000), 5);
    }

    #[test]
    fn test_field_names_are_sanitized_and_deduplicated() {
        let d = tempdir().unwrap();
        let writer = OutputWriter::create(
            d.path(),
            NamingStrategy::Field("name".to_owned()),
            "open-",
        )
        .unwrap();
        let records = records("name\nAlice Smith\nalice smith\n../etc/passwd\n\"\"\nAlice Smith\n");

        assert_eq!(
            writer.plan_names(&single_pages(&records)),
            vec![
                "open-Alice_Smith.pdf",
                "open-alice_smith_2.pdf",
                "open-etc_passwd.pdf",
                "open-0004.pdf",
                "open-Alice_Smith_3.pdf",
            ]
        );
    }

    #[test]
    fn test_prefix_cannot_leave_the_output_dir() {
        let d = tempdir().unwrap();
        let records = records("name\nA\n");

        for (prefix, expected) in [
            ("table_", "table_0001.pdf"),
            ("sub/", "sub_0001.pdf"),
            ("../", "0001.pdf"),
            ("../../tmp/x-", "tmp_x-0001.pdf"),
        ] {
            let writer = OutputWriter::create(d.path(), NamingStrategy::Sequence, prefix).unwrap();
            let names = writer.plan_names(&single_pages(&records));
            assert_eq!(names, vec![expected], "prefix {:?}", prefix);

            let path = writer
                .write(
                    &names[0],
                    &RenderedOutput {
                        bytes: b"%PDF".to_vec(),
                        width: 1.0,
                        height: 1.0,
                    },
                )
                .unwrap();
            assert_eq!(path.parent(), Some(d.path()));
        }
    }

    #[test]
    fn test_creates_nested_dir_and_overwrites() {
        let d = tempdir().unwrap();
        let dir = d.path().join("nested").join("out");
        let writer = OutputWriter::create(&dir, NamingStrategy::Sequence, "").unwrap();
        assert!(dir.is_dir());

        let first = RenderedOutput {
            bytes: b"%PDF-first".to_vec(),
            width: 1.0,
            height: 1.0,
        };
        let second = RenderedOutput {
            bytes: b"%PDF-second".to_vec(),
            width: 1.0,
            height: 1.0,
        };

        let path = writer.write("0001.pdf", &first).unwrap();
        writer.write("0001.pdf", &second).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"%PDF-second");
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
    }

    #[test]
    fn test_output_dir_under_a_file_is_an_error() {
        let d = tempdir().unwrap();
        let file = d.path().join("occupied");
        fs::write(&file, b"not a directory").unwrap();

        let err = OutputWriter::create(file.join("out"), NamingStrategy::Sequence, "")
            .err()
            .unwrap();
        assert!(matches!(err, Error::FailedToCreateOutputDir { .. }));
        assert!(!err.is_recoverable());
    }
}
