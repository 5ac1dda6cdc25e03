//! Splitting a table into one file per distinct key (or key prefix)

use std::{
    fmt::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::Result;
use arrow::datatypes::Schema;

use crate::{
    analyze::{truncate_key, NULL_PARTITION},
    error::GeoKeyError,
};

pub mod writer;

/// File name of the single file inside each Hive partition directory
pub const HIVE_FILE_NAME: &str = "data.parquet";

/// How partition files are laid out in the target directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// `<dir>/<key>.parquet`
    #[default]
    Flat,

    /// `<dir>/<column>=<key>/data.parquet`
    Hive,
}

impl FromStr for Layout {
    type Err = GeoKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(Layout::Flat),
            "hive" => Ok(Layout::Hive),
            _ => Err(GeoKeyError::invalid(
                "layout",
                format!("unknown layout `{s}'. Use `flat' or `hive'."),
            )),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Flat => f.write_str("flat"),
            Layout::Hive => f.write_str("hive"),
        }
    }
}

/// What to do when writing a partition fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnError {
    /// Stop at the first failure
    #[default]
    FailFast,

    /// Write all other partitions and report all failures at the end
    Continue,
}

/// Describes how a table should be partitioned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    /// The column holding the partition key
    pub key_column: String,

    /// Group by the first `n` characters of the key instead of the full key
    pub prefix_length: Option<usize>,

    pub layout: Layout,

    /// Whether the key column is written to the partition files. `None`
    /// selects the layout's default.
    pub retain_key_column: Option<bool>,
}

impl PartitionDescriptor {
    pub fn new(key_column: impl Into<String>) -> Self {
        Self {
            key_column: key_column.into(),
            prefix_length: None,
            layout: Layout::default(),
            retain_key_column: None,
        }
    }

    /// Whether the key column ends up in the partition files. Flat files
    /// are named after the key, so the column is left out by default. Hive
    /// readers expect it, so it is kept by default.
    pub fn retains_key_column(&self) -> bool {
        self.retain_key_column.unwrap_or(match self.layout {
            Layout::Flat => false,
            Layout::Hive => true,
        })
    }

    /// Checks the descriptor against the schema of the input
    pub fn validate(&self, schema: &Schema, path: &Path) -> Result<()> {
        if self.prefix_length == Some(0) {
            return Err(GeoKeyError::invalid("prefix_length", "must be greater than 0").into());
        }
        if schema.field_with_name(&self.key_column).is_err() {
            return Err(GeoKeyError::invalid(
                "key_column",
                format!(
                    "column `{}' does not exist in `{}'. Add a spatial key column first.",
                    self.key_column,
                    path.display()
                ),
            )
            .into());
        }
        Ok(())
    }

    /// The name of the partition a key belongs to
    pub fn partition_name(&self, key: Option<&str>) -> String {
        match key {
            Some(k) => sanitize_key(truncate_key(k, self.prefix_length)),
            None => NULL_PARTITION.to_string(),
        }
    }

    /// The file a partition is written to
    pub fn artifact_path(&self, dir: &Path, partition_name: &str) -> PathBuf {
        match self.layout {
            Layout::Flat => dir.join(format!("{partition_name}.parquet")),
            Layout::Hive => dir
                .join(format!("{}={partition_name}", self.key_column))
                .join(HIVE_FILE_NAME),
        }
    }
}

/// Makes a key usable as a file or directory name. Characters that are not
/// allowed in file names or Hive partition values are escaped as `%XX`, so
/// distinct keys always get distinct names. Empty keys end up in the null
/// partition, like in Hive.
pub fn sanitize_key(key: &str) -> String {
    if key.is_empty() {
        return NULL_PARTITION.to_string();
    }
    if key == "." || key == ".." {
        return key.replace('.', "%2E");
    }
    let mut s = String::with_capacity(key.len());
    for c in key.chars() {
        if needs_escape(c) {
            let _ = write!(s, "%{:02X}", c as u32);
        } else {
            s.push(c);
        }
    }
    s
}

/// The characters Hive escapes in partition values
fn needs_escape(c: char) -> bool {
    c.is_ascii_control()
        || matches!(
            c,
            '"' | '#' | '%' | '\'' | '*' | '/' | ':' | '=' | '?' | '\\' | '{' | '[' | ']' | '^'
        )
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeSet,
        path::{Path, PathBuf},
    };

    use arrow::datatypes::{DataType, Field, Schema};
    use assertor::{assert_that, EqualityAssertion};

    use crate::{analyze::NULL_PARTITION, error::GeoKeyError};

    use super::{sanitize_key, Layout, PartitionDescriptor};

    #[test]
    fn retention_defaults() {
        let mut d = PartitionDescriptor::new("kdtree_cell");
        assert!(!d.retains_key_column());
        d.layout = Layout::Hive;
        assert!(d.retains_key_column());
        d.retain_key_column = Some(false);
        assert!(!d.retains_key_column());
        d.layout = Layout::Flat;
        d.retain_key_column = Some(true);
        assert!(d.retains_key_column());
    }

    #[test]
    fn artifact_paths() {
        let mut d = PartitionDescriptor::new("quadkey");
        d.prefix_length = Some(3);
        let name = d.partition_name(Some("02301"));
        assert_that!(name.clone()).is_equal_to("023".to_string());
        assert_that!(d.artifact_path(Path::new("out"), &name))
            .is_equal_to(PathBuf::from("out/023.parquet"));

        d.layout = Layout::Hive;
        assert_that!(d.artifact_path(Path::new("out"), &name))
            .is_equal_to(PathBuf::from("out/quadkey=023/data.parquet"));
        assert_that!(d.partition_name(None)).is_equal_to(NULL_PARTITION.to_string());
    }

    #[test]
    fn keys_are_sanitized() {
        assert_that!(sanitize_key("a/b\\c")).is_equal_to("a%2Fb%5Cc".to_string());
        assert_that!(sanitize_key("x=1:2")).is_equal_to("x%3D1%3A2".to_string());
        assert_that!(sanitize_key("100%")).is_equal_to("100%25".to_string());
        assert_that!(sanitize_key("..")).is_equal_to("%2E%2E".to_string());
        assert_that!(sanitize_key("a.b")).is_equal_to("a.b".to_string());
        assert_that!(sanitize_key("")).is_equal_to(NULL_PARTITION.to_string());
        assert_that!(sanitize_key("8828308281fffff")).is_equal_to("8828308281fffff".to_string());
    }

    #[test]
    fn distinct_keys_keep_distinct_names() {
        let keys = ["a/b", "a_b", "a%2Fb", "a:b", ".", "%2E", "", "a b"];
        let names: BTreeSet<String> = keys.iter().map(|k| sanitize_key(k)).collect();
        assert_that!(names.len()).is_equal_to(keys.len());
    }

    #[test]
    fn validation() {
        let schema = Schema::new(vec![Field::new("h3_cell", DataType::Utf8, true)]);
        let mut d = PartitionDescriptor::new("h3_cell");
        assert!(d.validate(&schema, Path::new("in.parquet")).is_ok());

        d.prefix_length = Some(0);
        assert!(d.validate(&schema, Path::new("in.parquet")).is_err());

        let d = PartitionDescriptor::new("quadkey");
        let err = d.validate(&schema, Path::new("in.parquet")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GeoKeyError>(),
            Some(GeoKeyError::InvalidParameter { .. })
        ));

        assert_that!("HIVE".parse::<Layout>().unwrap()).is_equal_to(Layout::Hive);
    }
}
