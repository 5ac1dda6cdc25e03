use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use geokey_core::{
    config::Config,
    keys::KeyScheme,
    ops::{AddKeyOptions, Operation, WriteOptions},
};

use super::{file_tasks, run_file_tasks, OutputArgs};

/// Add a spatial key or bbox column
#[derive(Args, Debug)]
pub struct AddArgs {
    #[command(subcommand)]
    pub key: KeyArgs,
}

#[derive(Subcommand, Debug)]
pub enum KeyArgs {
    /// Add a Web Mercator quadkey column
    Quadkey {
        /// Number of quadkey digits (0-23)
        #[arg(short, long, default_value_t = 12)]
        resolution: u8,

        /// Always use the geometry's centroid, even if a bbox column exists
        #[arg(long)]
        use_centroid: bool,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Add an H3 cell column
    H3 {
        /// H3 resolution (0-15)
        #[arg(short, long, default_value_t = 8)]
        resolution: u8,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Add a KD-tree partition column. Keys depend on all rows of a file.
    Kdtree {
        /// Number of median splits (1-20)
        #[arg(short, long, default_value_t = 9)]
        iterations: u8,

        /// Process inputs exceeding the configured row limit
        #[arg(long)]
        allow_large: bool,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Add a bbox struct column covering the geometry column
    Bbox {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug)]
pub struct CommonArgs {
    /// The input files
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Name of the added column
    #[arg(long)]
    pub column: Option<String>,

    /// Replace an existing column of the same name
    #[arg(long)]
    pub overwrite_column: bool,

    /// The geometry column. Defaults to the primary geometry column.
    #[arg(long)]
    pub geometry_column: Option<String>,
}

impl CommonArgs {
    fn options(&self) -> AddKeyOptions {
        AddKeyOptions {
            column_name: self.column.clone(),
            overwrite_column: self.overwrite_column,
            geometry_column: self.geometry_column.clone(),
            write: WriteOptions {
                version: self.output.version,
                overwrite: self.output.overwrite,
                keep_bbox_column: self.output.keep_bbox_column,
            },
        }
    }
}

/// Run the `add` command
pub fn run_add(args: AddArgs, mut config: Config) -> Result<()> {
    let (common, operation) = match args.key {
        KeyArgs::Quadkey {
            resolution,
            use_centroid,
            common,
        } => {
            let scheme = KeyScheme::Quadkey {
                resolution,
                use_centroid,
            };
            let options = common.options();
            (common, Operation::AddKey { scheme, options })
        }
        KeyArgs::H3 { resolution, common } => {
            let options = common.options();
            (
                common,
                Operation::AddKey {
                    scheme: KeyScheme::H3 { resolution },
                    options,
                },
            )
        }
        KeyArgs::Kdtree {
            iterations,
            allow_large,
            common,
        } => {
            config.kdtree.allow_large |= allow_large;
            let options = common.options();
            (
                common,
                Operation::AddKey {
                    scheme: KeyScheme::KdTree { iterations },
                    options,
                },
            )
        }
        KeyArgs::Bbox { common } => {
            let options = common.options();
            (common, Operation::AddBbox(options))
        }
    };

    if let Operation::AddKey { scheme, .. } = &operation {
        scheme.validate()?;
    }
    let tasks = file_tasks(common.inputs, &common.output.output, operation)?;
    run_file_tasks(&config, tasks)
}
