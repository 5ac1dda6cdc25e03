use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use geokey_core::{
    config::{Compression, Config},
    metadata::SpecVersion,
    ops::{batch::run_on_files, Operation, Outcome, Task, WriteSummary},
};
use humantime::format_duration;
use yansi::{Condition, Paint};

use self::error::CliError;

pub mod add;
pub mod analyze;
pub mod convert;
pub mod error;
pub mod inspect;
pub mod partition;
pub mod sort;

/// Compression codecs selectable on the command line
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum CompressionArg {
    Uncompressed,
    Snappy,
    Zstd,
}

impl From<CompressionArg> for Compression {
    fn from(c: CompressionArg) -> Self {
        match c {
            CompressionArg::Uncompressed => Compression::Uncompressed,
            CompressionArg::Snappy => Compression::Snappy,
            CompressionArg::Zstd => Compression::Zstd,
        }
    }
}

/// Options that override the configuration file
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// A TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of rows per batch
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Number of files processed at the same time
    #[arg(long, global = true)]
    pub parallelism: Option<usize>,

    /// Compression of written files
    #[arg(long, global = true)]
    pub compression: Option<CompressionArg>,
}

impl ConfigArgs {
    /// Reads the configuration file (if any) and applies the overrides
    pub fn load(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_toml_file(path)?,
            None => Config::default(),
        };
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(parallelism) = self.parallelism {
            config.parallelism = parallelism;
        }
        if let Some(compression) = self.compression {
            config.compression = compression.into();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Where the output of a command goes
#[derive(Args, Debug)]
pub struct OutputArgs {
    /// The output file. A directory if several inputs are given.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Replace existing output files
    #[arg(long)]
    pub overwrite: bool,

    /// The metadata version to write. Defaults to the input's version.
    #[arg(long, value_parser = parse_version)]
    pub version: Option<SpecVersion>,

    /// Keep bbox columns when writing native geometry columns
    #[arg(long)]
    pub keep_bbox_column: bool,
}

pub fn parse_version(s: &str) -> Result<SpecVersion, String> {
    s.parse::<SpecVersion>().map_err(|e| e.to_string())
}

/// `true` if messages for the user should be colored
pub fn colored() -> bool {
    Condition::stderr_is_tty() && Condition::clicolor() && Condition::no_color()
}

pub fn elapsed(start: Instant) -> String {
    format_duration(Duration::from_millis(start.elapsed().as_millis() as u64)).to_string()
}

/// Creates one task per input. A single input is written to `output`.
/// Several inputs are written to files of the same name in the directory
/// `output`.
pub fn file_tasks(inputs: Vec<PathBuf>, output: &Path, operation: Operation) -> Result<Vec<Task>> {
    if inputs.len() == 1 && !output.is_dir() {
        return Ok(inputs
            .into_iter()
            .map(|input| Task {
                input,
                output: Some(output.to_path_buf()),
                operation: operation.clone(),
            })
            .collect());
    }

    fs::create_dir_all(output)
        .with_context(|| format!("Unable to create directory `{}'", output.display()))?;
    inputs
        .into_iter()
        .map(|input| {
            let name = input
                .file_name()
                .with_context(|| format!("`{}' is not a file", input.display()))?;
            Ok(Task {
                output: Some(output.join(name)),
                input,
                operation: operation.clone(),
            })
        })
        .collect()
}

/// Runs tasks writing one file each and prints a line per written file
pub fn run_file_tasks(config: &Config, tasks: Vec<Task>) -> Result<()> {
    let start = Instant::now();
    let total = tasks.len();
    let inputs: Vec<PathBuf> = tasks.iter().map(|t| t.input.clone()).collect();
    let results = run_on_files(config, tasks)?;

    let cond = if colored() {
        Condition::ALWAYS
    } else {
        Condition::NEVER
    };
    let mut failed = 0;
    let mut last_error = None;
    for (input, result) in inputs.iter().zip(results) {
        match result {
            Ok(Outcome::Written(s)) => print_written(&s, cond),
            Ok(_) => {}
            Err(err) => {
                failed += 1;
                eprintln!(
                    "{} {}: {err:#}",
                    "✗".red().whenever(cond),
                    input.display()
                );
                last_error = Some(err);
            }
        }
    }

    if total == 1 {
        if let Some(err) = last_error {
            return Err(err);
        }
    } else if failed > 0 {
        return Err(CliError::TaskFailures { failed, total }.into());
    }
    eprintln!("Processed {} file(s) in {}", total, elapsed(start));
    Ok(())
}

fn print_written(summary: &WriteSummary, cond: Condition) {
    eprintln!(
        "{} {} ({} rows, geo metadata {})",
        "✓".green().whenever(cond),
        summary.path.display(),
        summary.rows,
        summary.metadata.version()
    );
}
