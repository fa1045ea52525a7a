use anyhow::{Context, Result};
use certpress::{NamingStrategy, Orchestrator, RunSettings, RunSummary};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use indoc::indoc;
use log::Level;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::exit;

struct CertPress {
    settings: RunSettings,
    json_summary: bool,
    verbosity_level: Option<Level>,
}

impl CertPress {
    pub fn from_cli_matches(matches: &ArgMatches) -> Result<Self> {
        let csv = matches
            .get_one::<PathBuf>("csv")
            .expect("This is a required argument");
        let svg = matches
            .get_one::<PathBuf>("svg")
            .expect("This is a required argument");
        let title = matches
            .get_one::<String>("title")
            .expect("This is a required argument");
        let output = matches
            .get_one::<PathBuf>("output")
            .expect("This is a required argument");

        let num_threads = matches
            .get_one::<usize>("num-threads")
            .copied()
            .unwrap_or(0);

        let num_threads = match (cfg!(feature = "multithreading"), num_threads) {
            (true, number) => number,
            (false, 0) | (false, 1) => 1,
            (false, _) => {
                eprintln!(
                    "turned on threads, but binary was compiled without `multithreading` feature! processing sequentially"
                );
                1
            }
        };

        let naming = match matches.get_one::<String>("name-by") {
            Some(column) => NamingStrategy::Field(column.clone()),
            None => NamingStrategy::Sequence,
        };

        let mut settings = RunSettings::new(csv, svg, title.as_str(), output)
            .num_threads(num_threads)
            .group_size(*matches.get_one::<usize>("group-size").unwrap_or(&1))
            .naming(naming)
            .escape_values(!matches.get_flag("no-escape"))
            .load_system_fonts(!matches.get_flag("no-system-fonts"))
            .dpi(*matches.get_one::<f32>("dpi").unwrap_or(&72.0));

        if let Some(prefix) = matches.get_one::<String>("prefix") {
            settings = settings.file_prefix(prefix.as_str());
        }
        if let Some(date) = matches.get_one::<String>("date") {
            settings = settings.date(date.as_str());
        }
        if let Some(dirs) = matches.get_many::<PathBuf>("font-dir") {
            for dir in dirs {
                settings = settings.font_dir(dir);
            }
        }

        let verbosity_level = match matches.get_count("verbose") {
            0 => None,
            1 => Some(Level::Info),
            2 => Some(Level::Debug),
            3 => Some(Level::Trace),
            _ => {
                eprintln!("using more than  -vvv does not affect verbosity level");
                Some(Level::Trace)
            }
        };

        Ok(CertPress {
            settings,
            json_summary: matches.get_flag("json"),
            verbosity_level,
        })
    }

    /// Main entry point for `CertPress`
    pub fn run(self) -> Result<()> {
        self.try_to_initialize_logging();

        let csv_path = self.settings.get_csv_path().to_path_buf();
        let template_path = self.settings.get_template_path().to_path_buf();

        let summary = Orchestrator::new(self.settings)
            .run()
            .with_context(|| {
                format!(
                    "Failed to render certificates from `{}` with template `{}`",
                    csv_path.display(),
                    template_path.display()
                )
            })?;

        let stdout = io::stdout();
        let mut out = stdout.lock();
        if self.json_summary {
            serde_json::to_writer_pretty(&mut out, &summary)?;
            writeln!(out)?;
        } else {
            write_summary(&mut out, &summary)?;
        }

        Ok(())
    }

    fn try_to_initialize_logging(&self) {
        let level = self
            .verbosity_level
            .map_or(LevelFilter::Warn, |level| level.to_level_filter());

        match TermLogger::init(
            level,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ) {
            Ok(_) => {}
            Err(e) => eprintln!("Failed to initialize logging: {:?}", e),
        };
    }
}

fn write_summary(out: &mut impl Write, summary: &RunSummary) -> io::Result<()> {
    writeln!(out, "Records read:      {}", summary.records_read)?;
    writeln!(out, "Records succeeded: {}", summary.records_succeeded)?;
    writeln!(out, "Records skipped:   {}", summary.records_skipped())?;
    writeln!(out, "Files written:     {}", summary.outputs.len())?;

    for skipped in &summary.skipped {
        match skipped.line {
            Some(line) => writeln!(
                out,
                "  skipped line {}: {}: {}",
                line, skipped.kind, skipped.reason
            )?,
            None => writeln!(out, "  skipped: {}: {}", skipped.kind, skipped.reason)?,
        }
    }

    Ok(())
}

fn is_a_non_negative_number(value: &str) -> Result<usize, String> {
    value
        .parse::<usize>()
        .map_err(|_| "Expected value to be a non-negative number.".to_owned())
}

fn is_a_positive_number(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err("Expected value to be a positive number.".to_owned()),
    }
}

fn is_a_positive_float(value: &str) -> Result<f32, String> {
    match value.parse::<f32>() {
        Ok(n) if n.is_finite() && n > 0.0 => Ok(n),
        _ => Err("Expected value to be a positive number.".to_owned()),
    }
}

fn command() -> Command {
    Command::new("certpress")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Renders tournament result certificates from a CSV file and an SVG template")
        .long_about(indoc!(r#"
            Renders tournament result certificates from a CSV file and an SVG template.

            Every `{{placeholder}}` in the template is replaced per participant:
                {{title}}        - the event title passed with --title
                {{date}}         - the --date value
                {{index}}        - the page number
                {{<column>}}     - a CSV column of the (first) participant on the page
                {{<column>[k]}}  - a CSV column of the k-th participant, with --group-size

            Placeholders without a value are left in the output as they are.
        "#))
        .arg(
            Arg::new("csv")
                .short('c')
                .long("csv")
                .value_name("CSV")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the participants CSV file (UTF-8, with a header row)."),
        )
        .arg(
            Arg::new("svg")
                .short('s')
                .long("svg")
                .value_name("TEMPLATE")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the SVG template file."),
        )
        .arg(
            Arg::new("title")
                .short('t')
                .long("title")
                .value_name("TITLE")
                .required(true)
                .help("Event title, substituted for {{title}}."),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Directory for the generated PDF files. Will be created if needed, existing files are overwritten."),
        )
        .arg(
            Arg::new("name-by")
                .long("name-by")
                .value_name("COLUMN")
                .help("Name output files after this CSV column instead of a sequence number."),
        )
        .arg(
            Arg::new("prefix")
                .long("prefix")
                .value_name("PREFIX")
                .help("Prefix prepended to every output file name."),
        )
        .arg(
            Arg::new("group-size")
                .short('g')
                .long("group-size")
                .value_name("N")
                .default_value("1")
                .value_parser(is_a_positive_number)
                .help("Number of participants placed on a single page."),
        )
        .arg(
            Arg::new("num-threads")
                .long("threads")
                .value_name("N")
                .default_value("0")
                .value_parser(is_a_non_negative_number)
                .help("Sets the number of worker threads, defaults to number of CPU cores."),
        )
        .arg(
            Arg::new("date")
                .long("date")
                .value_name("TEXT")
                .help("Text substituted for {{date}}. Without it, {{date}} is left as is."),
        )
        .arg(
            Arg::new("font-dir")
                .long("font-dir")
                .value_name("DIR")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .help("Additional directory to load fonts from. Can be passed multiple times."),
        )
        .arg(
            Arg::new("no-system-fonts")
                .long("no-system-fonts")
                .action(ArgAction::SetTrue)
                .help("When set, system fonts are not loaded."),
        )
        .arg(
            Arg::new("no-escape")
                .long("no-escape")
                .action(ArgAction::SetTrue)
                .help("When set, CSV values are inserted into the SVG as-is, allowing markup."),
        )
        .arg(
            Arg::new("dpi")
                .long("dpi")
                .value_name("DPI")
                .default_value("72")
                .value_parser(is_a_positive_float)
                .help("SVG user units per inch. The default maps one user unit to one PDF point."),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the run summary as JSON."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help(indoc!("
                    -v - info, -vv - debug, -vvv - trace.
                    trace output is only available in debug builds, as it is extremely verbose")),
        )
}

fn main() {
    let matches = command().get_matches();

    let result = CertPress::from_cli_matches(&matches).and_then(CertPress::run);

    if let Err(e) = result {
        eprintln!("{:?}", e);
        exit(1);
    }
}
