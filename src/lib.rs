#![deny(unused_must_use)]
#![forbid(unsafe_code)]
//! Turns a CSV file of tournament participants into one PDF certificate per participant (or per
//! group of participants), by filling `{{placeholders}}` in an SVG template.
//!
//! ```no_run
//! use certpress::{Orchestrator, RunSettings};
//!
//! let settings = RunSettings::new("players.csv", "certificate.svg", "Spring Open", "out");
//! let summary = Orchestrator::new(settings).run()?;
//! println!("{} certificates written", summary.outputs.len());
//! # Ok::<(), certpress::err::Error>(())
//! ```

pub use orchestrator::{Orchestrator, RunState, RunSummary, SkippedRecord};
pub use output_writer::{NamingStrategy, OutputWriter};
pub use record_reader::{Headers, ParticipantRecord, RecordReader};
pub use renderer::{RenderedOutput, Renderer};
pub use settings::RunSettings;
pub use template::{Binding, BoundDocument, Resolver, ResolverTable, Template};

pub mod err;
mod orchestrator;
mod output_writer;
mod record_reader;
mod renderer;
mod settings;
pub mod template;

pub use output_writer::sanitize_file_stem;
