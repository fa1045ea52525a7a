#![allow(dead_code)]
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use std::sync::Once;

static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}

pub fn samples_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("samples")
        .canonicalize()
        .unwrap()
}

/// Holds the public-domain Tuffy font, so rendering does not depend on the host's fonts.
pub fn fonts_dir() -> PathBuf {
    samples_dir().join("fonts")
}

pub fn certificate_template() -> PathBuf {
    samples_dir().join("certificate.svg")
}

pub fn pairs_template() -> PathBuf {
    samples_dir().join("pairs.svg")
}

pub fn malformed_template() -> PathBuf {
    samples_dir().join("malformed.svg")
}

pub fn participants() -> PathBuf {
    samples_dir().join("participants.csv")
}

pub fn single_participant() -> PathBuf {
    samples_dir().join("single_participant.csv")
}

pub fn participants_with_a_short_row() -> PathBuf {
    samples_dir().join("short_row.csv")
}

pub fn pairs() -> PathBuf {
    samples_dir().join("pairs.csv")
}

/// Sorted file names of the PDFs in `dir`.
pub fn pdf_names(dir: &Path) -> Vec<String> {
    if !dir.exists() {
        return vec![];
    }

    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".pdf"))
        .collect();
    names.sort();
    names
}

/// Characters covered by the `/ToUnicode` maps of the fonts embedded in a PDF.
///
/// The maps are written uncompressed, as `<glyph> <utf-16 hex>` lines between `beginbfchar`
/// and `endbfchar`.
pub fn pdf_text_chars(pdf: &[u8]) -> BTreeSet<char> {
    let text = String::from_utf8_lossy(pdf);
    let mut chars = BTreeSet::new();

    for block in text.split("beginbfchar").skip(1) {
        let block = block.split("endbfchar").next().unwrap_or_default();
        for line in block.lines() {
            let Some(unicode) = line.split_whitespace().nth(1) else {
                continue;
            };
            let hex = unicode.trim_start_matches('<').trim_end_matches('>');
            let units: Vec<u16> = (0..hex.len())
                .step_by(4)
                .filter_map(|i| hex.get(i..i + 4))
                .filter_map(|unit| u16::from_str_radix(unit, 16).ok())
                .collect();
            chars.extend(char::decode_utf16(units).filter_map(Result::ok));
        }
    }

    chars
}

/// Panics unless every non-space character of `text` is covered by the PDF's fonts.
pub fn assert_pdf_has_text(pdf: &[u8], text: &str) {
    let chars = pdf_text_chars(pdf);
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        assert!(
            chars.contains(&c),
            "Expected `{}` of `{}` in the PDF text, found {:?}",
            c,
            text,
            chars
        );
    }
}
