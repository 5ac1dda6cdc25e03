//! Analysis of the partition layout a key column would produce. The
//! analysis counts rows per distinct key (or key prefix), summarizes the
//! distribution and flags layouts that are likely to perform badly.

use std::{cmp::Reverse, fmt};

use anyhow::{Context, Result};
use arrow::{
    array::{make_array, Array, ArrayRef, AsArray},
    compute::cast,
    datatypes::DataType,
};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::warn;

use crate::error::GeoKeyError;

pub mod report;

/// Name used for rows whose key is null
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Number of largest partitions kept in an analysis result
pub const DEFAULT_TOP_PARTITIONS: usize = 10;

/// Thresholds of the skew analysis. The defaults are empirical and meant to
/// be tuned per deployment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SkewPolicy {
    /// More partitions than this block the partitioning unless forced
    pub max_partitions: usize,

    /// Partitions with fewer rows than this count as tiny
    pub tiny_partition_rows: u64,

    /// Warn if more than this fraction of all partitions is tiny
    pub tiny_partition_fraction: f64,

    /// Warn if the largest partition has more than this many times the
    /// mean number of rows
    pub max_skew_ratio: f64,
}

impl Default for SkewPolicy {
    fn default() -> Self {
        Self {
            max_partitions: 10_000,
            tiny_partition_rows: 100,
            tiny_partition_fraction: 0.5,
            max_skew_ratio: 10.0,
        }
    }
}

impl SkewPolicy {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.tiny_partition_fraction) {
            return Err(GeoKeyError::invalid(
                "skew.tiny_partition_fraction",
                "must be between 0 and 1",
            )
            .into());
        }
        if self.max_skew_ratio < 1.0 {
            return Err(GeoKeyError::invalid("skew.max_skew_ratio", "must be at least 1").into());
        }
        Ok(())
    }
}

/// A problem found in a partition layout
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionIssue {
    /// The layout has more partitions than allowed
    TooManyPartitions { count: usize, limit: usize },

    /// Most partitions contain only a handful of rows
    ManyTinyPartitions {
        tiny: usize,
        count: usize,
        threshold: u64,
    },

    /// One partition is much larger than the average
    DominantPartition { key: String, skew_ratio: f64 },

    /// All rows end up in a single partition
    SinglePartition,

    /// Some rows have no key
    NullKeys { rows: u64 },
}

impl PartitionIssue {
    /// Blocking issues stop a partitioning run unless it is forced
    pub fn is_blocking(&self) -> bool {
        matches!(self, PartitionIssue::TooManyPartitions { .. })
    }

    /// A short machine-readable tag
    pub fn tag(&self) -> &'static str {
        match self {
            PartitionIssue::TooManyPartitions { .. } => "too_many_partitions",
            PartitionIssue::ManyTinyPartitions { .. } => "many_tiny_partitions",
            PartitionIssue::DominantPartition { .. } => "dominant_partition",
            PartitionIssue::SinglePartition => "single_partition",
            PartitionIssue::NullKeys { .. } => "null_keys",
        }
    }

    /// What the user can do about the issue
    pub fn remediation(&self) -> &'static str {
        match self {
            PartitionIssue::TooManyPartitions { .. } | PartitionIssue::ManyTinyPartitions { .. } => {
                "Use a coarser resolution or a shorter prefix length."
            }
            PartitionIssue::DominantPartition { .. } => {
                "Use a finer resolution or a KD-tree key, which adapts to the data distribution."
            }
            PartitionIssue::SinglePartition => "Use a finer resolution or a longer prefix length.",
            PartitionIssue::NullKeys { .. } => {
                "Rows with empty geometries are written to a separate partition."
            }
        }
    }
}

impl fmt::Display for PartitionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionIssue::TooManyPartitions { count, limit } => {
                write!(f, "{count} partitions exceed the limit of {limit}")
            }
            PartitionIssue::ManyTinyPartitions {
                tiny,
                count,
                threshold,
            } => write!(
                f,
                "{tiny} of {count} partitions have fewer than {threshold} rows"
            ),
            PartitionIssue::DominantPartition { key, skew_ratio } => write!(
                f,
                "partition `{key}' has {skew_ratio:.1} times the mean number of rows"
            ),
            PartitionIssue::SinglePartition => write!(f, "all rows fall into a single partition"),
            PartitionIssue::NullKeys { rows } => write!(f, "{rows} rows have no key"),
        }
    }
}

/// What to do with a layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No issues found
    Proceed,

    /// Issues found but partitioning may go ahead
    Warn,

    /// Partitioning must not go ahead unless forced
    Block,
}

/// Summary of a partition layout
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionAnalysisResult {
    pub partition_count: usize,
    pub total_rows: u64,
    pub min_rows: u64,
    pub max_rows: u64,
    pub mean_rows: f64,

    /// Ratio between the largest partition and the mean
    pub skew_ratio: f64,

    /// The largest partitions in descending order of size. Partitions of
    /// equal size are ordered by key.
    pub largest_partitions: Vec<(String, u64)>,

    pub warnings: Vec<PartitionIssue>,
}

impl PartitionAnalysisResult {
    /// Classifies the layout. `force` downgrades blocking issues to
    /// warnings.
    pub fn verdict(&self, force: bool) -> Verdict {
        if self.warnings.iter().any(|w| w.is_blocking()) && !force {
            Verdict::Block
        } else if self.warnings.is_empty() {
            Verdict::Proceed
        } else {
            Verdict::Warn
        }
    }

    /// Logs all issues and fails if the layout is blocked
    pub fn enforce(&self, force: bool) -> Result<()> {
        for w in &self.warnings {
            warn!(issue = w.tag(), "{w}. {}", w.remediation());
        }
        if self.verdict(force) == Verdict::Block {
            let blocking: Vec<&PartitionIssue> =
                self.warnings.iter().filter(|w| w.is_blocking()).collect();
            return Err(GeoKeyError::LayoutRejected {
                issues: blocking.iter().map(|w| w.to_string()).collect::<Vec<_>>().join("; "),
                hint: format!(
                    "{} Pass the force flag to partition anyway.",
                    blocking.first().map_or("", |w| w.remediation())
                ),
            }
            .into());
        }
        Ok(())
    }
}

/// Truncates a key to its first `prefix_length` characters
pub fn truncate_key(key: &str, prefix_length: Option<usize>) -> &str {
    match prefix_length {
        Some(n) => match key.char_indices().nth(n) {
            Some((i, _)) => &key[..i],
            None => key,
        },
        None => key,
    }
}

/// Converts a key column to a `Utf8` array
pub fn string_keys(keys: &dyn Array) -> Result<ArrayRef> {
    match keys.data_type() {
        DataType::Utf8 => Ok(make_array(keys.to_data())),
        _ => cast(keys, &DataType::Utf8).context("Unable to convert key column to strings"),
    }
}

/// Counts rows per distinct key
#[derive(Debug, Default)]
pub struct PartitionCounter {
    prefix_length: Option<usize>,
    counts: FxHashMap<String, u64>,
    null_rows: u64,
}

impl PartitionCounter {
    /// Creates a counter that groups keys by their first `prefix_length`
    /// characters (or by their full value if `None`)
    pub fn new(prefix_length: Option<usize>) -> Self {
        Self {
            prefix_length,
            ..Default::default()
        }
    }

    /// Counts one key. Null and empty keys are counted for the null
    /// partition.
    pub fn add(&mut self, key: Option<&str>) {
        match key.map(|k| truncate_key(k, self.prefix_length)) {
            Some(k) if !k.is_empty() => match self.counts.get_mut(k) {
                Some(c) => *c += 1,
                None => {
                    self.counts.insert(k.to_string(), 1);
                }
            },
            _ => self.null_rows += 1,
        }
    }

    /// Counts all keys of a key column. Non-string columns are converted to
    /// their string representation.
    pub fn add_array(&mut self, keys: &dyn Array) -> Result<()> {
        let keys = string_keys(keys)?;
        for k in keys.as_string::<i32>() {
            self.add(k);
        }
        Ok(())
    }

    /// The distinct keys counted so far. `None` stands for null keys.
    pub fn keys(&self) -> impl Iterator<Item = Option<&str>> {
        self.counts
            .keys()
            .map(|k| Some(k.as_str()))
            .chain((self.null_rows > 0).then_some(None))
    }

    /// Summarizes the counted keys
    pub fn finish(self, policy: &SkewPolicy, top: usize) -> PartitionAnalysisResult {
        let mut counts = self.counts;
        if self.null_rows > 0 {
            *counts.entry(NULL_PARTITION.to_string()).or_default() += self.null_rows;
        }
        summarize(counts.into_iter().collect(), self.null_rows, policy, top)
    }
}

fn summarize(
    mut counts: Vec<(String, u64)>,
    null_rows: u64,
    policy: &SkewPolicy,
    top: usize,
) -> PartitionAnalysisResult {
    counts.sort_by(|a, b| (Reverse(a.1), &a.0).cmp(&(Reverse(b.1), &b.0)));

    let partition_count = counts.len();
    let total_rows: u64 = counts.iter().map(|c| c.1).sum();
    let max_rows = counts.first().map_or(0, |c| c.1);
    let min_rows = counts.last().map_or(0, |c| c.1);
    let mean_rows = if partition_count > 0 {
        total_rows as f64 / partition_count as f64
    } else {
        0.0
    };
    let skew_ratio = if mean_rows > 0.0 {
        max_rows as f64 / mean_rows
    } else {
        0.0
    };

    let mut warnings = Vec::new();
    if partition_count > policy.max_partitions {
        warnings.push(PartitionIssue::TooManyPartitions {
            count: partition_count,
            limit: policy.max_partitions,
        });
    }
    let tiny = counts
        .iter()
        .filter(|c| c.1 < policy.tiny_partition_rows)
        .count();
    if partition_count > 1 && tiny as f64 > policy.tiny_partition_fraction * partition_count as f64
    {
        warnings.push(PartitionIssue::ManyTinyPartitions {
            tiny,
            count: partition_count,
            threshold: policy.tiny_partition_rows,
        });
    }
    if partition_count > 1 && skew_ratio > policy.max_skew_ratio {
        warnings.push(PartitionIssue::DominantPartition {
            key: counts[0].0.clone(),
            skew_ratio,
        });
    }
    if partition_count == 1 {
        warnings.push(PartitionIssue::SinglePartition);
    }
    if null_rows > 0 {
        warnings.push(PartitionIssue::NullKeys { rows: null_rows });
    }

    counts.truncate(top);

    PartitionAnalysisResult {
        partition_count,
        total_rows,
        min_rows,
        max_rows,
        mean_rows,
        skew_ratio,
        largest_partitions: counts,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, Int32Array, StringArray};
    use assertor::{assert_that, EqualityAssertion, VecAssertion};
    use pretty_assertions::assert_eq;

    use crate::error::GeoKeyError;

    use super::{
        truncate_key, PartitionCounter, PartitionIssue, SkewPolicy, Verdict, NULL_PARTITION,
    };

    fn count(keys: &[Option<&str>], prefix: Option<usize>) -> PartitionCounter {
        let mut c = PartitionCounter::new(prefix);
        let arr: ArrayRef = Arc::new(StringArray::from(keys.to_vec()));
        c.add_array(&arr).unwrap();
        c
    }

    #[test]
    fn truncation_counts_characters() {
        assert_that!(truncate_key("0231", Some(2))).is_equal_to("02");
        assert_that!(truncate_key("0231", Some(10))).is_equal_to("0231");
        assert_that!(truncate_key("0231", None)).is_equal_to("0231");
        assert_that!(truncate_key("äöü", Some(1))).is_equal_to("ä");
        assert_that!(truncate_key("0231", Some(0))).is_equal_to("");
    }

    #[test]
    fn summary_statistics() {
        let keys = [
            Some("0210"),
            Some("0211"),
            Some("0211"),
            Some("0300"),
            Some("0300"),
            Some("0300"),
        ];
        let r = count(&keys, None).finish(&SkewPolicy::default(), 10);
        assert_that!(r.partition_count).is_equal_to(3);
        assert_that!(r.total_rows).is_equal_to(6);
        assert_that!(r.min_rows).is_equal_to(1);
        assert_that!(r.max_rows).is_equal_to(3);
        assert_that!(r.mean_rows).is_equal_to(2.0);
        assert_that!(r.skew_ratio).is_equal_to(1.5);
        assert_eq!(
            r.largest_partitions,
            vec![
                ("0300".to_string(), 3),
                ("0211".to_string(), 2),
                ("0210".to_string(), 1)
            ]
        );

        // three partitions with fewer than 100 rows each
        assert_that!(r.warnings).contains(PartitionIssue::ManyTinyPartitions {
            tiny: 3,
            count: 3,
            threshold: 100,
        });
        assert_that!(r.verdict(false)).is_equal_to(Verdict::Warn);
    }

    #[test]
    fn prefix_grouping() {
        let keys = [Some("0210"), Some("0211"), Some("0300")];
        let r = count(&keys, Some(2)).finish(&SkewPolicy::default(), 10);
        assert_eq!(
            r.largest_partitions,
            vec![("02".to_string(), 2), ("03".to_string(), 1)]
        );
    }

    #[test]
    fn dominant_partition() {
        let mut c = PartitionCounter::new(None);
        for _ in 0..1000 {
            c.add(Some("a"));
        }
        for k in ["b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m"] {
            for _ in 0..200 {
                c.add(Some(k));
            }
        }
        let policy = SkewPolicy {
            max_skew_ratio: 3.0,
            ..Default::default()
        };
        let r = c.finish(&policy, 3);
        assert_that!(r.largest_partitions.len()).is_equal_to(3);
        assert!(r
            .warnings
            .iter()
            .any(|w| matches!(w, PartitionIssue::DominantPartition { key, .. } if key == "a")));
        assert!(!r
            .warnings
            .iter()
            .any(|w| matches!(w, PartitionIssue::ManyTinyPartitions { .. })));
    }

    #[test]
    fn too_many_partitions_blocks() {
        let mut c = PartitionCounter::new(None);
        for i in 0..20 {
            c.add(Some(i.to_string().as_str()));
        }
        let policy = SkewPolicy {
            max_partitions: 10,
            ..Default::default()
        };
        let r = c.finish(&policy, 5);
        assert_that!(r.verdict(false)).is_equal_to(Verdict::Block);
        assert_that!(r.verdict(true)).is_equal_to(Verdict::Warn);

        let err = r.enforce(false).unwrap_err();
        match err.downcast_ref::<GeoKeyError>() {
            Some(GeoKeyError::LayoutRejected { issues, hint }) => {
                assert_that!(issues.clone())
                    .is_equal_to("20 partitions exceed the limit of 10".to_string());
                assert!(hint.contains("force"));
            }
            e => panic!("Unexpected error: {e:?}"),
        }
        assert!(r.enforce(true).is_ok());
    }

    #[test]
    fn single_partition_and_nulls() {
        let r = count(&[Some("x"), None, Some("x")], None).finish(&SkewPolicy::default(), 10);
        assert_that!(r.partition_count).is_equal_to(2);
        assert_that!(r.largest_partitions[1].0.clone()).is_equal_to(NULL_PARTITION.to_string());
        assert_that!(r.warnings).contains(PartitionIssue::NullKeys { rows: 1 });

        let r = count(&[Some("x")], None).finish(&SkewPolicy::default(), 10);
        assert_that!(r.warnings).contains(PartitionIssue::SinglePartition);
    }

    #[test]
    fn empty_keys_join_the_null_partition() {
        let r = count(&[Some(""), None, Some(NULL_PARTITION), Some("x")], None)
            .finish(&SkewPolicy::default(), 10);
        assert_eq!(
            r.largest_partitions,
            vec![(NULL_PARTITION.to_string(), 3), ("x".to_string(), 1)]
        );
        assert_that!(r.warnings).contains(PartitionIssue::NullKeys { rows: 2 });
    }

    #[test]
    fn non_string_keys() {
        let mut c = PartitionCounter::new(None);
        c.add_array(&Int32Array::from(vec![1, 1, 2])).unwrap();
        let r = c.finish(&SkewPolicy::default(), 10);
        assert_eq!(
            r.largest_partitions,
            vec![("1".to_string(), 2), ("2".to_string(), 1)]
        );
    }

    #[test]
    fn empty_input() {
        let r = PartitionCounter::new(None).finish(&SkewPolicy::default(), 10);
        assert_that!(r.partition_count).is_equal_to(0);
        assert_that!(r.skew_ratio).is_equal_to(0.0);
        assert_that!(r.verdict(false)).is_equal_to(Verdict::Proceed);
    }
}
