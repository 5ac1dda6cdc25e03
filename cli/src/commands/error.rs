use geokey_core::error::GeoKeyError;
use thiserror::Error;
use yansi::{Condition, Paint};

use super::colored;

/// Errors of the command line front end
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{failed} of {total} files could not be processed")]
    TaskFailures { failed: usize, total: usize },
}

/// Renders an error for the terminal: the message, its causes and, for
/// domain errors, a hint on what to do about it
pub fn render_error(err: &anyhow::Error) -> String {
    let cond = if colored() {
        Condition::ALWAYS
    } else {
        Condition::NEVER
    };

    let mut out = format!("{} {err}", "error:".red().bold().whenever(cond));
    for cause in err.chain().skip(1) {
        out.push_str(&format!("\n  {} {cause}", "caused by:".yellow().whenever(cond)));
    }

    let hint = match err.downcast_ref::<GeoKeyError>() {
        Some(GeoKeyError::SchemaConflict { .. }) => {
            Some("Pass --overwrite-column to replace the existing column.")
        }
        Some(GeoKeyError::MetadataInconsistency(_)) => {
            Some("Run `geokey inspect' on the input to see its geo metadata.")
        }
        Some(GeoKeyError::LayoutRejected { .. }) => Some(
            "Run `geokey analyze' to inspect the layout, or pass --force to partition anyway.",
        ),
        Some(GeoKeyError::PartialWrite { .. }) => Some(
            "Successfully written partitions were kept. Fix the failures and re-run \
             with --overwrite.",
        ),
        _ => None,
    };
    if let Some(hint) = hint {
        out.push_str(&format!("\n{} {hint}", "hint:".cyan().whenever(cond)));
    }
    out
}
