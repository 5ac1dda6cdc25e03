use std::{path::PathBuf, time::Instant};

use anyhow::Result;
use clap::Args;
use geokey_core::{
    config::Config,
    metadata::SpecVersion,
    ops::{PartitionRequest, Session},
    partition::{Layout, OnError, PartitionDescriptor},
};
use yansi::{Condition, Paint};

use super::{colored, elapsed, parse_version};

/// Split a file into one file per key or key prefix
#[derive(Args, Debug)]
pub struct PartitionArgs {
    /// The input file
    pub input: PathBuf,

    /// The directory to write partition files to
    #[arg(short, long)]
    pub output: PathBuf,

    /// The column holding the partition key
    #[arg(short, long)]
    pub key_column: String,

    /// Group keys by their first N characters
    #[arg(short, long)]
    pub prefix_length: Option<usize>,

    /// `flat' writes <key>.parquet, `hive' writes <column>=<key>/data.parquet
    #[arg(long, default_value = "flat", value_parser = parse_layout)]
    pub layout: Layout,

    /// Write the key column to the partition files
    #[arg(long, conflicts_with = "drop_key_column")]
    pub retain_key_column: bool,

    /// Leave the key column out of the partition files
    #[arg(long)]
    pub drop_key_column: bool,

    /// Replace existing partition files
    #[arg(long)]
    pub overwrite: bool,

    /// Keep writing other partitions if one fails
    #[arg(long)]
    pub continue_on_error: bool,

    /// Partition even if the layout is too skewed or too fragmented
    #[arg(long)]
    pub force: bool,

    /// Do not analyze the layout before writing
    #[arg(long)]
    pub skip_analysis: bool,

    /// The metadata version of the partition files
    #[arg(long, value_parser = parse_version)]
    pub version: Option<SpecVersion>,

    /// The geometry column of inputs without geo metadata
    #[arg(long)]
    pub geometry_column: Option<String>,
}

fn parse_layout(s: &str) -> Result<Layout, String> {
    s.parse::<Layout>().map_err(|e| e.to_string())
}

/// Run the `partition` command
pub fn run_partition(args: PartitionArgs, config: Config) -> Result<()> {
    let start = Instant::now();

    let retain_key_column = match (args.retain_key_column, args.drop_key_column) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    let descriptor = PartitionDescriptor {
        prefix_length: args.prefix_length,
        layout: args.layout,
        retain_key_column,
        ..PartitionDescriptor::new(args.key_column)
    };
    let request = PartitionRequest {
        overwrite: args.overwrite,
        on_error: if args.continue_on_error {
            OnError::Continue
        } else {
            OnError::FailFast
        },
        force: args.force,
        skip_analysis: args.skip_analysis,
        version: args.version,
        geometry_column: args.geometry_column,
        ..PartitionRequest::new(descriptor)
    };

    let session = Session::new(config)?;
    let summary = session.partition(&args.input, &args.output, &request)?;

    let cond = if colored() {
        Condition::ALWAYS
    } else {
        Condition::NEVER
    };
    eprintln!(
        "{} Wrote {} partition(s) with {} rows to `{}' in {}",
        "✓".green().whenever(cond),
        summary.artifacts.len(),
        summary.rows(),
        args.output.display(),
        elapsed(start)
    );
    Ok(())
}
