use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{analyze::SkewPolicy, error::GeoKeyError};

/// Number of rows processed per streamed batch
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Number of rows above which KD-tree derivation needs an explicit override
pub const DEFAULT_KDTREE_MAX_ROWS: u64 = 50_000_000;

/// Compression codec used for written artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Uncompressed,
    #[default]
    Snappy,
    Zstd,
}

/// Limits guarding the KD-tree derivation, whose cost grows with both the
/// number of rows and the number of iterations
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KdTreeLimits {
    /// Maximum number of rows processed without an override
    pub max_rows: u64,

    /// Explicit override to process inputs above `max_rows`
    pub allow_large: bool,
}

impl Default for KdTreeLimits {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_KDTREE_MAX_ROWS,
            allow_large: false,
        }
    }
}

/// Settings threaded through every operation. Nothing is read from the
/// process environment; the CLI builds this from a TOML file and flags.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rows per streamed batch. Memory use of the streaming paths is
    /// proportional to this value.
    pub batch_size: usize,

    /// Maximum number of rows per row group in written files
    pub row_group_size: usize,

    /// Compression codec for written files
    pub compression: Compression,

    /// Number of files processed concurrently by batch operations.
    /// `1` processes them one after the other.
    pub parallelism: usize,

    /// KD-tree safety limits
    pub kdtree: KdTreeLimits,

    /// Thresholds for the partition skew analysis
    pub skew: SkewPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            row_group_size: DEFAULT_BATCH_SIZE,
            compression: Compression::default(),
            parallelism: 1,
            kdtree: KdTreeLimits::default(),
            skew: SkewPolicy::default(),
        }
    }
}

impl Config {
    /// Parses a configuration from a TOML document. Missing keys take
    /// their default values.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("configuration malformed")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read configuration file `{}'", path.display()))?;
        Self::from_toml_str(&s)
    }

    /// Checks that all values are usable
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(GeoKeyError::invalid("batch_size", "must be greater than 0").into());
        }
        if self.row_group_size == 0 {
            return Err(GeoKeyError::invalid("row_group_size", "must be greater than 0").into());
        }
        if self.parallelism == 0 {
            return Err(GeoKeyError::invalid("parallelism", "must be at least 1").into());
        }
        self.skew.validate()
    }
}

#[cfg(test)]
mod tests {
    use assertor::{assert_that, EqualityAssertion};
    use pretty_assertions::assert_eq;

    use crate::error::GeoKeyError;

    use super::{Compression, Config, DEFAULT_BATCH_SIZE};

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_that!(config.batch_size).is_equal_to(DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn partial_document() {
        let config = Config::from_toml_str(
            r#"
            batch_size = 5000
            compression = "zstd"

            [kdtree]
            allow_large = true

            [skew]
            max_skew_ratio = 4.0
            "#,
        )
        .unwrap();
        assert_that!(config.batch_size).is_equal_to(5000);
        assert_that!(config.compression).is_equal_to(Compression::Zstd);
        assert!(config.kdtree.allow_large);
        assert_that!(config.kdtree.max_rows).is_equal_to(50_000_000);
        assert_that!(config.skew.max_skew_ratio).is_equal_to(4.0);
        assert_that!(config.skew.max_partitions).is_equal_to(10_000);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = Config::from_toml_str("batch_size = 0").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GeoKeyError>(),
            Some(GeoKeyError::InvalidParameter { .. })
        ));
    }
}
