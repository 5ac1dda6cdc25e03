use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use geokey_core::{
    config::Config,
    keys::hilbert::{check_order, DEFAULT_ORDER},
    ops::{Operation, WriteOptions},
};

use super::{file_tasks, run_file_tasks, OutputArgs};

/// Sort rows along a space-filling curve
#[derive(Args, Debug)]
pub struct SortArgs {
    #[command(subcommand)]
    pub curve: CurveArgs,
}

#[derive(Subcommand, Debug)]
pub enum CurveArgs {
    /// Sort rows by their rank on a Hilbert curve over the data's extent
    Hilbert {
        /// The input files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,

        /// Order of the curve (1-32)
        #[arg(long, default_value_t = DEFAULT_ORDER)]
        order: u8,
    },
}

/// Run the `sort` command
pub fn run_sort(args: SortArgs, config: Config) -> Result<()> {
    let CurveArgs::Hilbert {
        inputs,
        output,
        order,
    } = args.curve;
    check_order(order)?;

    let operation = Operation::SortHilbert {
        order,
        options: WriteOptions {
            version: output.version,
            overwrite: output.overwrite,
            keep_bbox_column: output.keep_bbox_column,
        },
    };
    let tasks = file_tasks(inputs, &output.output, operation)?;
    run_file_tasks(&config, tasks)
}
