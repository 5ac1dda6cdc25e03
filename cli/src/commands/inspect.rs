use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use geokey_core::{config::Config, ops::Session};
use yansi::{Condition, Paint};

use super::colored;

/// Print the schema and geo metadata of a file
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// The file to inspect
    pub input: PathBuf,

    /// Print the geo metadata envelope as JSON only
    #[arg(long)]
    pub json: bool,
}

/// Run the `inspect` command
pub fn run_inspect(args: InspectArgs, config: Config) -> Result<()> {
    let session = Session::new(config)?;
    let inspection = session.inspect(&args.input)?;

    if args.json {
        if let Some(json) = inspection.metadata.as_ref().map(|m| m.to_json()).transpose()? {
            println!("{}", json.unwrap_or_default());
        }
        return Ok(());
    }

    let cond = if colored() {
        Condition::ALWAYS
    } else {
        Condition::NEVER
    };
    println!("{}", args.input.display().bold().whenever(cond));
    println!("  rows: {}", inspection.rows);
    println!("  columns:");
    for f in inspection.schema.fields() {
        println!("    {}: {}", f.name(), f.data_type());
    }

    let Some(metadata) = inspection.metadata else {
        println!("  no geo metadata");
        return Ok(());
    };
    println!("  geo metadata: {}", metadata.version());
    println!("  primary column: {}", metadata.primary_column());
    for (name, c) in metadata.columns() {
        println!("  {}", name.as_str().bold().whenever(cond));
        println!(
            "    crs: {}",
            c.crs.as_ref().map_or("OGC:CRS84".to_string(), |crs| crs.describe())
        );
        let types: Vec<&str> = c.geometry_types.iter().map(String::as_str).collect();
        println!("    geometry types: {}", types.join(", "));
        if let Some(b) = c.bbox {
            println!("    bbox: [{}, {}, {}, {}]", b[0], b[1], b[2], b[3]);
        }
        if let Some(cov) = c.bbox_covering() {
            println!("    bbox covering: {}", cov.column);
        }
    }
    Ok(())
}
