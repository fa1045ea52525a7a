use crate::err::{Error, ErrorKind, Result};
use crate::output_writer::OutputWriter;
use crate::record_reader::{ParticipantRecord, RecordReader};
use crate::renderer::Renderer;
use crate::settings::RunSettings;
use crate::template::{Binding, ResolverTable, Template};

use log::{debug, info, warn};
use serde::Serialize;
use std::path::PathBuf;

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

/// Where a run currently is.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Loading,
    /// Number of pages completed so far.
    Processing(usize),
    Done,
    Failed,
}

/// A record that produced no output, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    /// Source line of the record, when known.
    pub line: Option<u64>,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Data rows read from the CSV file, including rejected ones.
    pub records_read: usize,
    /// Records that ended up on a written page.
    pub records_succeeded: usize,
    /// Written files, in page order.
    pub outputs: Vec<PathBuf>,
    pub skipped: Vec<SkippedRecord>,
}

impl RunSummary {
    pub fn records_skipped(&self) -> usize {
        self.skipped.len()
    }

    fn skip(&mut self, line: Option<u64>, err: &Error) {
        self.skipped.push(SkippedRecord {
            line,
            kind: err.kind(),
            reason: err.to_string(),
        });
    }
}

/// Runs the read → bind → render → write pipeline.
pub struct Orchestrator {
    settings: RunSettings,
    state: RunState,
}

impl Orchestrator {
    pub fn new(settings: RunSettings) -> Self {
        Orchestrator {
            settings,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    fn transition(&mut self, next: RunState) {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Processes every record.
    ///
    /// File-level problems (CSV, template, output directory) abort the run and are returned
    /// as an error. Problems with a single record are collected into the summary instead.
    pub fn run(&mut self) -> Result<RunSummary> {
        self.transition(RunState::Loading);

        match self.run_impl() {
            Ok(summary) => {
                self.transition(RunState::Done);
                Ok(summary)
            }
            Err(e) => {
                self.transition(RunState::Failed);
                Err(e)
            }
        }
    }

    fn run_impl(&mut self) -> Result<RunSummary> {
        let settings = self.settings.clone();
        let mut summary = RunSummary::default();

        let template = Template::from_path(settings.get_template_path())?;
        let reader = RecordReader::from_path(settings.get_csv_path())?;
        let writer = OutputWriter::create(
            settings.get_output_dir(),
            settings.get_naming().clone(),
            settings.get_file_prefix(),
        )?;

        let mut records = Vec::new();
        let headers = reader.headers().clone();
        for record in reader {
            summary.records_read += 1;
            match record {
                Ok(record) => records.push(record),
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping record: {}", e);
                    summary.skip(e.line(), &e);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Read {} records ({} rejected) from {}",
            summary.records_read,
            summary.records_skipped(),
            settings.get_csv_path().display()
        );

        if records.is_empty() {
            return Ok(summary);
        }

        let table = ResolverTable::for_run(
            &headers,
            settings.get_event_title(),
            settings.get_date(),
            settings.get_group_size(),
        );
        for token in template.unknown_tokens(&table) {
            warn!(
                "Template placeholder `{{{{{}}}}}` has no value and will be kept as is",
                token
            );
        }

        let renderer = Renderer::new(&settings, settings.get_template_path().parent());

        let pages: Vec<&[ParticipantRecord]> = records.chunks(settings.get_group_size()).collect();
        let names = writer.plan_names(&pages);

        let job = PageJob {
            template: &template,
            table: &table,
            renderer: &renderer,
            writer: &writer,
            escape: settings.should_escape_values(),
        };

        self.transition(RunState::Processing(0));
        let results = self.process_pages(&job, &pages, &names);

        for (page, result) in pages.iter().zip(results) {
            match result {
                Ok(path) => {
                    summary.records_succeeded += page.len();
                    summary.outputs.push(path);
                }
                Err(e) => {
                    warn!("Skipping {} record(s): {}", page.len(), e);
                    for record in page.iter() {
                        summary.skip(Some(record.line()), &e);
                    }
                }
            }
        }

        info!(
            "Wrote {} file(s), {} of {} records succeeded",
            summary.outputs.len(),
            summary.records_succeeded,
            summary.records_read
        );

        Ok(summary)
    }

    /// Returns one result per page, in page order.
    fn process_pages(
        &mut self,
        job: &PageJob<'_>,
        pages: &[&[ParticipantRecord]],
        names: &[String],
    ) -> Vec<Result<PathBuf>> {
        #[cfg(feature = "multithreading")]
        {
            let num_threads = self.settings.get_num_threads();
            if num_threads != 1 {
                match rayon::ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .build()
                {
                    Ok(pool) => {
                        debug!(
                            "Processing {} pages on {} threads",
                            pages.len(),
                            pool.current_num_threads()
                        );
                        let results: Vec<Result<PathBuf>> = pool.install(|| {
                            pages
                                .par_iter()
                                .zip(names.par_iter())
                                .enumerate()
                                .map(|(i, (page, name))| job.process(page, i + 1, name))
                                .collect()
                        });
                        self.transition(RunState::Processing(pages.len()));
                        return results;
                    }
                    Err(e) => warn!("Failed to start worker pool ({}), running sequentially", e),
                }
            }
        }

        let mut results = Vec::with_capacity(pages.len());
        for (i, (page, name)) in pages.iter().zip(names).enumerate() {
            results.push(job.process(page, i + 1, name));
            self.transition(RunState::Processing(i + 1));
        }

        results
    }
}

/// Shared, read-only state for processing one page.
struct PageJob<'a> {
    template: &'a Template,
    table: &'a ResolverTable,
    renderer: &'a Renderer,
    writer: &'a OutputWriter,
    escape: bool,
}

impl PageJob<'_> {
    fn process(&self, records: &[ParticipantRecord], index: usize, name: &str) -> Result<PathBuf> {
        let binding = Binding { records, index };
        let doc = self.template.bind(self.table, &binding, self.escape);
        let output = self.renderer.render(&doc)?;
        self.writer.write(name, &output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    const TEMPLATE: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="100"><rect width="10" height="10"/><text x="10" y="50">{{name}}</text></svg>"#;

    fn settings_in(dir: &std::path::Path, csv: &str) -> RunSettings {
        let csv_path = dir.join("players.csv");
        let svg_path = dir.join("certificate.svg");
        fs::write(&csv_path, csv).unwrap();
        fs::write(&svg_path, TEMPLATE).unwrap();

        RunSettings::new(csv_path, svg_path, "Spring Open", dir.join("out"))
            .num_threads(1)
            .load_system_fonts(false)
            .font_dir(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("samples").join("fonts"))
    }

    #[test]
    fn test_state_reaches_done() {
        let d = tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(settings_in(d.path(), "name\nAlice\nBob\n"));
        assert_eq!(orchestrator.state(), RunState::Idle);

        let summary = orchestrator.run().unwrap();

        assert_eq!(orchestrator.state(), RunState::Done);
        assert_eq!(summary.records_read, 2);
        assert_eq!(summary.records_succeeded, 2);
        assert_eq!(summary.outputs.len(), 2);
        assert!(summary.skipped.is_empty());
    }

    #[test]
    fn test_zero_records_is_done_without_outputs() {
        let d = tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(settings_in(d.path(), "name\n"));

        let summary = orchestrator.run().unwrap();

        assert_eq!(orchestrator.state(), RunState::Done);
        assert_eq!(summary, RunSummary::default());
    }

    #[test]
    fn test_missing_template_fails_the_run() {
        let d = tempdir().unwrap();
        let settings = settings_in(d.path(), "name\nAlice\n");
        fs::remove_file(settings.get_template_path()).unwrap();
        let mut orchestrator = Orchestrator::new(settings);

        let err = orchestrator.run().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Template);
        assert_eq!(orchestrator.state(), RunState::Failed);
        assert!(!d.path().join("out").join("0001.pdf").exists());
    }

    #[test]
    fn test_grouped_pages() {
        let d = tempdir().unwrap();
        let settings = settings_in(d.path(), "name\nA\nB\nC\nD\nE\n").group_size(2);
        let mut orchestrator = Orchestrator::new(settings);

        let summary = orchestrator.run().unwrap();

        assert_eq!(summary.records_succeeded, 5);
        assert_eq!(
            summary
                .outputs
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
            vec!["0001.pdf", "0002.pdf", "0003.pdf"]
        );
        assert_eq!(orchestrator.state(), RunState::Done);
    }

    #[test]
    fn test_pages_without_fonts_are_skipped_as_render_errors() {
        let d = tempdir().unwrap();
        let settings = settings_in(d.path(), "name\nAlice\n");
        let settings = RunSettings::new(
            settings.get_csv_path(),
            settings.get_template_path(),
            "Spring Open",
            settings.get_output_dir(),
        )
        .num_threads(1)
        .load_system_fonts(false);
        let mut orchestrator = Orchestrator::new(settings);

        let summary = orchestrator.run().unwrap();

        assert_eq!(orchestrator.state(), RunState::Done);
        assert_eq!(summary.records_succeeded, 0);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].kind, ErrorKind::Render);
        assert!(summary.outputs.is_empty());
    }

    #[test]
    fn test_unescaped_broken_value_skips_only_its_record() {
        let d = tempdir().unwrap();
        let settings = settings_in(d.path(), "name\nAlice\n<b\nCarol\n").escape_values(false);
        let mut orchestrator = Orchestrator::new(settings);

        let summary = orchestrator.run().unwrap();

        assert_eq!(summary.records_read, 3);
        assert_eq!(summary.records_succeeded, 2);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].line, Some(3));
        assert_eq!(summary.skipped[0].kind, ErrorKind::Render);
        assert!(d.path().join("out").join("0001.pdf").exists());
        assert!(!d.path().join("out").join("0002.pdf").exists());
        assert!(d.path().join("out").join("0003.pdf").exists());
    }
}
