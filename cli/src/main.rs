use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use commands::{
    add::{run_add, AddArgs},
    analyze::{run_analyze, run_preview, AnalyzeArgs, PreviewArgs},
    convert::{run_convert, ConvertArgs},
    error::render_error,
    inspect::{run_inspect, InspectArgs},
    partition::{run_partition, PartitionArgs},
    sort::{run_sort, SortArgs},
    ConfigArgs,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    config: ConfigArgs,

    /// Log more details (repeat for even more)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Add(AddArgs),
    Sort(SortArgs),
    Analyze(AnalyzeArgs),
    Preview(PreviewArgs),
    Partition(PartitionArgs),
    Convert(ConvertArgs),
    Inspect(InspectArgs),
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::new(format!("warn,geokey={level},geokey_core={level}"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = cli.config.load().and_then(|config| {
        debug!(?config, "Loaded configuration");
        match cli.command {
            Commands::Add(args) => run_add(args, config),
            Commands::Sort(args) => run_sort(args, config),
            Commands::Analyze(args) => run_analyze(args, config),
            Commands::Preview(args) => run_preview(args, config),
            Commands::Partition(args) => run_partition(args, config),
            Commands::Convert(args) => run_convert(args, config),
            Commands::Inspect(args) => run_inspect(args, config),
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", render_error(&err));
            ExitCode::FAILURE
        }
    }
}
