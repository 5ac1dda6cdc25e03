use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use geokey_core::{
    config::Config,
    metadata::SpecVersion,
    ops::{Operation, WriteOptions},
};

use super::{file_tasks, parse_version, run_file_tasks};

/// Rewrite files with the geo metadata layout of another version
#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// The input files
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// The output file. A directory if several inputs are given.
    #[arg(short, long)]
    pub output: PathBuf,

    /// The target version: 1.0, 1.1, 2.0 or parquet-geo-only
    #[arg(long = "to", value_parser = parse_version)]
    pub version: SpecVersion,

    /// Replace existing output files
    #[arg(long)]
    pub overwrite: bool,

    /// Keep bbox columns when converting to native geometry columns
    #[arg(long)]
    pub keep_bbox_column: bool,
}

/// Run the `convert` command
pub fn run_convert(args: ConvertArgs, config: Config) -> Result<()> {
    let operation = Operation::Convert {
        version: args.version,
        options: WriteOptions {
            version: Some(args.version),
            overwrite: args.overwrite,
            keep_bbox_column: args.keep_bbox_column,
        },
    };
    let tasks = file_tasks(args.inputs, &args.output, operation)?;
    run_file_tasks(&config, tasks)
}
