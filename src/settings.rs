use crate::output_writer::NamingStrategy;
use std::path::{Path, PathBuf};

/// Everything a run needs, fixed up front and passed by reference to each stage.
///
/// Built with chained setters:
///
/// ```
/// use certpress::RunSettings;
///
/// let settings = RunSettings::new("players.csv", "certificate.svg", "Spring Open", "out")
///     .num_threads(1)
///     .group_size(2);
/// assert_eq!(settings.get_group_size(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    csv_path: PathBuf,
    template_path: PathBuf,
    event_title: String,
    output_dir: PathBuf,
    date: Option<String>,
    naming: NamingStrategy,
    file_prefix: String,
    group_size: usize,
    num_threads: usize,
    escape_values: bool,
    load_system_fonts: bool,
    font_dirs: Vec<PathBuf>,
    dpi: f32,
}

impl RunSettings {
    pub fn new(
        csv_path: impl AsRef<Path>,
        template_path: impl AsRef<Path>,
        event_title: impl Into<String>,
        output_dir: impl AsRef<Path>,
    ) -> Self {
        RunSettings {
            csv_path: csv_path.as_ref().to_path_buf(),
            template_path: template_path.as_ref().to_path_buf(),
            event_title: event_title.into(),
            output_dir: output_dir.as_ref().to_path_buf(),
            date: None,
            naming: NamingStrategy::Sequence,
            file_prefix: String::new(),
            group_size: 1,
            num_threads: 0,
            escape_values: true,
            load_system_fonts: true,
            font_dirs: Vec::new(),
            dpi: 72.0,
        }
    }

    /// Sets the number of worker threads.
    /// `0` means use all CPU cores.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = if cfg!(feature = "multithreading") {
            num_threads
        } else {
            1
        };
        self
    }

    /// Number of records placed on a single page. Values below 1 are clamped to 1.
    pub fn group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size.max(1);
        self
    }

    pub fn naming(mut self, naming: NamingStrategy) -> Self {
        self.naming = naming;
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Text substituted for `{{date}}`. Without one, `{{date}}` is left in the output as is.
    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// When unset, cell values are inserted into the SVG verbatim.
    pub fn escape_values(mut self, escape: bool) -> Self {
        self.escape_values = escape;
        self
    }

    pub fn load_system_fonts(mut self, load: bool) -> Self {
        self.load_system_fonts = load;
        self
    }

    pub fn font_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.font_dirs.push(dir.as_ref().to_path_buf());
        self
    }

    pub fn dpi(mut self, dpi: f32) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn get_csv_path(&self) -> &Path {
        &self.csv_path
    }

    pub fn get_template_path(&self) -> &Path {
        &self.template_path
    }

    pub fn get_event_title(&self) -> &str {
        &self.event_title
    }

    pub fn get_output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn get_date(&self) -> Option<&str> {
        self.date.as_deref()
    }

    pub fn get_naming(&self) -> &NamingStrategy {
        &self.naming
    }

    pub fn get_file_prefix(&self) -> &str {
        &self.file_prefix
    }

    pub fn get_group_size(&self) -> usize {
        self.group_size
    }

    pub fn get_num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn should_escape_values(&self) -> bool {
        self.escape_values
    }

    pub fn should_load_system_fonts(&self) -> bool {
        self.load_system_fonts
    }

    pub fn get_font_dirs(&self) -> &[PathBuf] {
        &self.font_dirs
    }

    pub fn get_dpi(&self) -> f32 {
        self.dpi
    }
}
