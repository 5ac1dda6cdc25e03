use std::{fmt, path::PathBuf};

use thiserror::Error;

/// A single partition group that could not be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    /// The (possibly truncated) key value of the group
    pub key: String,

    /// The artifact the group should have been written to
    pub path: PathBuf,

    /// A rendered description of the failure including its causes
    pub message: String,
}

impl fmt::Display for GroupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}' ({}): {}", self.key, self.path.display(), self.message)
    }
}

/// Errors raised by spatial key derivation, partitioning and metadata
/// handling. Library functions return [`anyhow::Result`]; use
/// [`anyhow::Error::downcast_ref`] to find out which of these variants
/// caused a failure.
#[derive(Error, Debug)]
pub enum GeoKeyError {
    /// A parameter is out of range or two options exclude each other
    #[error("Invalid parameter `{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The column to add already exists in the input
    #[error(
        "Column `{column}' already exists in `{}'. Choose another column name.",
        .path.display()
    )]
    SchemaConflict { column: String, path: PathBuf },

    /// The input is too large for the requested operation
    #[error("{operation} refused: {size} {unit} exceed the limit of {limit}. {hint}")]
    UnsupportedScale {
        operation: String,
        size: u64,
        unit: &'static str,
        limit: u64,
        hint: String,
    },

    /// The partition layout was refused by the skew analysis
    #[error("Partition layout rejected: {issues}. {hint}")]
    LayoutRejected { issues: String, hint: String },

    /// The metadata envelope contradicts the data or the target version
    #[error("Inconsistent geo metadata: {0}")]
    MetadataInconsistency(String),

    /// An output artifact already exists and overwriting was not requested
    #[error("Output `{}' already exists. Pass the overwrite flag to replace it.", .0.display())]
    ArtifactExists(PathBuf),

    /// Some partition groups failed in continue-on-error mode
    #[error("{}", partial_write_message(.failures, .succeeded))]
    PartialWrite {
        failures: Vec<GroupFailure>,
        succeeded: usize,
    },

    /// A failure of the geometry or storage engine
    #[error("{operation} failed for `{}'", .path.display())]
    Engine {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

fn partial_write_message(failures: &[GroupFailure], succeeded: &usize) -> String {
    let mut msg = format!(
        "{} of {} partitions failed ({} written):",
        failures.len(),
        failures.len() + succeeded,
        succeeded
    );
    for f in failures {
        msg.push_str("\n  ");
        msg.push_str(&f.to_string());
    }
    msg
}

impl GeoKeyError {
    /// Shorthand for [`GeoKeyError::InvalidParameter`]
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        GeoKeyError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Wraps engine-level errors with the operation and the artifact they
/// happened in
pub trait EngineContext<T> {
    fn engine_context(self, operation: &'static str, path: impl Into<PathBuf>) -> anyhow::Result<T>;
}

impl<T, E> EngineContext<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn engine_context(self, operation: &'static str, path: impl Into<PathBuf>) -> anyhow::Result<T> {
        self.map_err(|e| {
            GeoKeyError::Engine {
                operation,
                path: path.into(),
                source: e.into(),
            }
            .into()
        })
    }
}
