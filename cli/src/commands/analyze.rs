use std::{path::PathBuf, time::Instant};

use anyhow::Result;
use clap::{Args, ValueEnum};
use geokey_core::{
    analyze::{report::render, DEFAULT_TOP_PARTITIONS},
    config::Config,
    keys::KeyScheme,
    ops::{AnalyzeRequest, Session},
};

use super::{colored, elapsed};

/// Key schemes that can be analyzed without adding a column first
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum SchemeArg {
    Quadkey,
    H3,
    Kdtree,
}

/// Selects the keys to analyze
#[derive(Args, Debug)]
pub struct KeySelection {
    /// The input file
    pub input: PathBuf,

    /// The key column. Defaults to the scheme's column name.
    #[arg(short, long)]
    pub key_column: Option<String>,

    /// Group keys by their first N characters
    #[arg(short, long)]
    pub prefix_length: Option<usize>,

    /// Derive keys of this scheme if the key column does not exist
    #[arg(long)]
    pub scheme: Option<SchemeArg>,

    /// Resolution (quadkey, H3) or number of iterations (KD-tree) of the
    /// scheme
    #[arg(long)]
    pub resolution: Option<u8>,

    /// The geometry column to derive keys from
    #[arg(long)]
    pub geometry_column: Option<String>,
}

impl KeySelection {
    fn request(self, top: usize) -> AnalyzeRequest {
        let scheme = self.scheme.map(|s| match s {
            SchemeArg::Quadkey => KeyScheme::Quadkey {
                resolution: self.resolution.unwrap_or(12),
                use_centroid: false,
            },
            SchemeArg::H3 => KeyScheme::H3 {
                resolution: self.resolution.unwrap_or(8),
            },
            SchemeArg::Kdtree => KeyScheme::KdTree {
                iterations: self.resolution.unwrap_or(9),
            },
        });
        AnalyzeRequest {
            key_column: self.key_column,
            prefix_length: self.prefix_length,
            scheme,
            top,
            geometry_column: self.geometry_column,
        }
    }
}

/// Analyze the partition layout of a key column
#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub keys: KeySelection,

    /// Number of largest partitions to list
    #[arg(long, default_value_t = DEFAULT_TOP_PARTITIONS)]
    pub top: usize,
}

/// Show the partitions a key column would produce without writing them
#[derive(Args, Debug)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub keys: KeySelection,

    /// Number of partitions to show
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,
}

/// Run the `analyze` command
pub fn run_analyze(args: AnalyzeArgs, config: Config) -> Result<()> {
    let start = Instant::now();
    let session = Session::new(config)?;
    let input = args.keys.input.clone();
    let result = session.analyze_partitions(&input, &args.keys.request(args.top))?;
    print!("{}", render(&result, args.top, colored()));
    eprintln!("Analyzed `{}' in {}", input.display(), elapsed(start));
    Ok(())
}

/// Run the `preview` command
pub fn run_preview(args: PreviewArgs, config: Config) -> Result<()> {
    let session = Session::new(config)?;
    let input = args.keys.input.clone();
    let request = args.keys.request(args.limit);
    let result = session.preview_partitions(&input, &request, args.limit)?;
    print!("{}", render(&result, args.limit, colored()));
    Ok(())
}
