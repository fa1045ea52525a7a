//! SVG templates with `{{token}}` placeholders.
//!
//! A [`Template`] is scanned once when loaded. Binding walks the scanned segments and asks a
//! [`ResolverTable`] for the value of every token; tokens the table cannot resolve are copied
//! through untouched, so a template may reference values that a given run does not provide.

use crate::err::{Error, Result};
use crate::record_reader::{Headers, ParticipantRecord};

use log::{debug, warn};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use std::path::Path;

const TOKEN_OPEN: &str = "{{";
const TOKEN_CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(Range<usize>),
    Token { name: String, raw: Range<usize> },
}

#[derive(Debug, Clone)]
pub struct Template {
    text: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::FailedToReadTemplate {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Loaded template {} ({} bytes)", path.display(), text.len());
        Template::parse(text)
    }

    /// Checks that `text` is a well-formed SVG document and scans it for placeholders.
    pub fn parse(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        check_well_formed_svg(&text)?;

        let segments = scan_segments(&text);
        Ok(Template { text, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Distinct token names referenced by the template, sorted.
    pub fn tokens(&self) -> BTreeSet<&str> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Token { name, .. } => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Tokens referenced by the template that no resolver in `table` knows about.
    pub fn unknown_tokens<'t>(&'t self, table: &ResolverTable) -> Vec<&'t str> {
        self.tokens()
            .into_iter()
            .filter(|token| !table.contains(token))
            .collect()
    }

    /// Substitutes every resolvable token. When `escape` is set, values are XML-escaped.
    pub fn bind(
        &self,
        table: &ResolverTable,
        binding: &Binding<'_>,
        escape: bool,
    ) -> BoundDocument {
        let mut svg = String::with_capacity(self.text.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(range) => svg.push_str(&self.text[range.clone()]),
                Segment::Token { name, raw } => match table.resolve(name, binding) {
                    Some(value) if escape => {
                        svg.push_str(&quick_xml::escape::escape(value.as_str()))
                    }
                    Some(value) => svg.push_str(&value),
                    None => svg.push_str(&self.text[raw.clone()]),
                },
            }
        }

        BoundDocument {
            svg,
            index: binding.index,
        }
    }
}

fn is_token_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| matches!(c, '{' | '}' | '<' | '>' | '\n' | '\r'))
}

fn scan_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut cursor = 0;

    while let Some(found) = text[cursor..].find(TOKEN_OPEN) {
        let open = cursor + found;
        let name_start = open + TOKEN_OPEN.len();

        let Some(found) = text[name_start..].find(TOKEN_CLOSE) else {
            break;
        };
        let close = name_start + found;
        let name = text[name_start..close].trim();

        if !is_token_name(name) {
            // `{{{name}}}` and friends: retry one byte later.
            cursor = open + 1;
            continue;
        }

        if literal_start < open {
            segments.push(Segment::Literal(literal_start..open));
        }

        let end = close + TOKEN_CLOSE.len();
        segments.push(Segment::Token {
            name: name.to_owned(),
            raw: open..end,
        });

        cursor = end;
        literal_start = end;
    }

    if literal_start < text.len() {
        segments.push(Segment::Literal(literal_start..text.len()));
    }

    segments
}

fn check_well_formed_svg(text: &str) -> Result<()> {
    let mut reader = Reader::from_str(text);
    let mut depth = 0_usize;
    let mut seen_root = false;

    loop {
        let event = reader.read_event().map_err(|e| Error::MalformedTemplate {
            position: reader.error_position() as u64,
            message: e.to_string(),
        })?;

        match event {
            Event::Start(start) => {
                if depth == 0 {
                    check_root(&start, &mut seen_root, reader.buffer_position() as u64)?;
                }
                depth += 1;
            }
            Event::Empty(start) => {
                if depth == 0 {
                    check_root(&start, &mut seen_root, reader.buffer_position() as u64)?;
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(Error::MalformedTemplate {
            position: text.len() as u64,
            message: format!("{} element(s) left unclosed", depth),
        });
    }

    if !seen_root {
        return Err(Error::MalformedTemplate {
            position: 0,
            message: "document has no root element".to_owned(),
        });
    }

    Ok(())
}

fn check_root(start: &BytesStart<'_>, seen_root: &mut bool, position: u64) -> Result<()> {
    if *seen_root {
        return Err(Error::MalformedTemplate {
            position,
            message: "document has more than one root element".to_owned(),
        });
    }
    *seen_root = true;

    if start.local_name().as_ref() != b"svg" {
        return Err(Error::NotAnSvgTemplate {
            found: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        });
    }

    Ok(())
}

/// The records placed on one output page.
#[derive(Debug, Clone, Copy)]
pub struct Binding<'a> {
    /// Records on this page, in file order. Never empty.
    pub records: &'a [ParticipantRecord],
    /// 1-based page sequence number.
    pub index: usize,
}

pub type Resolver = Box<dyn Fn(&Binding<'_>) -> Option<String> + Send + Sync>;

/// Maps token names to the functions producing their values.
#[derive(Default)]
pub struct ResolverTable {
    resolvers: HashMap<String, Resolver>,
}

impl ResolverTable {
    pub fn new() -> Self {
        ResolverTable::default()
    }

    /// Builds the table for a run:
    /// - `title`, `index` (the page number) and `date` when one is given,
    /// - every CSV column by name, taken from the first record on the page,
    /// - `column[k]` for the k-th record on the page, `k` in `1..=group_size`.
    ///
    /// A column named like a built-in replaces the built-in.
    pub fn for_run(
        headers: &Headers,
        event_title: &str,
        date: Option<&str>,
        group_size: usize,
    ) -> Self {
        let mut table = ResolverTable::new();

        let title = event_title.to_owned();
        table.insert("title", move |_| Some(title.clone()));
        if let Some(date) = date {
            let date = date.to_owned();
            table.insert("date", move |_| Some(date.clone()));
        }
        table.insert("index", |binding| Some(binding.index.to_string()));

        for (column, name) in headers.names().iter().enumerate() {
            let shadowed = table.insert(name.clone(), move |binding| {
                binding.records.first()?.get_at(column).map(str::to_owned)
            });
            if shadowed.is_some() {
                warn!(
                    "CSV column `{}` replaces the built-in `{{{{{}}}}}` placeholder",
                    name, name
                );
            }

            for slot in 0..group_size {
                table.insert(format!("{}[{}]", name, slot + 1), move |binding| {
                    binding.records.get(slot)?.get_at(column).map(str::to_owned)
                });
            }
        }

        table
    }

    /// Registers `resolver` for `token`, returning the resolver it replaced.
    pub fn insert<F>(&mut self, token: impl Into<String>, resolver: F) -> Option<Resolver>
    where
        F: Fn(&Binding<'_>) -> Option<String> + Send + Sync + 'static,
    {
        self.resolvers.insert(token.into(), Box::new(resolver))
    }

    pub fn contains(&self, token: &str) -> bool {
        self.resolvers.contains_key(token)
    }

    pub fn resolve(&self, token: &str, binding: &Binding<'_>) -> Option<String> {
        self.resolvers.get(token).and_then(|resolver| resolver(binding))
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

/// A template with its placeholders filled in for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundDocument {
    svg: String,
    index: usize,
}

impl BoundDocument {
    pub fn new(svg: impl Into<String>, index: usize) -> Self {
        BoundDocument {
            svg: svg.into(),
            index,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.svg
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn into_string(self) -> String {
        self.svg
    }
}
