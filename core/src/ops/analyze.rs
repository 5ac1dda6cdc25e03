use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::{
    analyze::{PartitionAnalysisResult, PartitionCounter, DEFAULT_TOP_PARTITIONS},
    engine::GeometryEngine,
    error::GeoKeyError,
    keys::{columns::KeyColumns, KeyScheme, RowKeyDeriver, KDTREE_COLUMN},
    metadata::covering::find_bbox_column,
    storage::{Storage, TableSource},
};

use super::{add::KeyColumn, Input, Session};

/// What to analyze. Either an existing key column is counted, or the keys of
/// a scheme are derived on the fly without writing them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeRequest {
    /// The key column. Defaults to the scheme's conventional column name.
    pub key_column: Option<String>,

    /// Group by the first `n` characters of the key. Ignored for KD-tree
    /// keys, which are always analyzed at full length.
    pub prefix_length: Option<usize>,

    /// Scheme to derive keys with if the key column does not exist
    pub scheme: Option<KeyScheme>,

    /// Number of largest partitions to report
    pub top: usize,

    /// The geometry column to derive keys from
    pub geometry_column: Option<String>,
}

impl Default for AnalyzeRequest {
    fn default() -> Self {
        Self {
            key_column: None,
            prefix_length: None,
            scheme: None,
            top: DEFAULT_TOP_PARTITIONS,
            geometry_column: None,
        }
    }
}

impl AnalyzeRequest {
    /// Analyzes an existing key column
    pub fn column(key_column: impl Into<String>) -> Self {
        Self {
            key_column: Some(key_column.into()),
            ..Default::default()
        }
    }

    /// Analyzes the keys a scheme would produce
    pub fn scheme(scheme: KeyScheme) -> Self {
        Self {
            scheme: Some(scheme),
            ..Default::default()
        }
    }

    fn key_column(&self) -> Result<String> {
        match (&self.key_column, self.scheme) {
            (Some(c), _) => Ok(c.clone()),
            (None, Some(s)) => Ok(s.default_column_name().to_string()),
            (None, None) => Err(GeoKeyError::invalid(
                "key_column",
                "either a key column or a key scheme is required",
            )
            .into()),
        }
    }
}

/// The prefix length keys are grouped by. KD-tree paths are never
/// truncated. `scheme` is the scheme that produced the key column, if
/// known.
fn effective_prefix(
    scheme: Option<KeyScheme>,
    key_column: &str,
    prefix_length: Option<usize>,
) -> Option<usize> {
    let is_kdtree = match scheme {
        Some(s) => !s.supports_prefix(),
        None => key_column == KDTREE_COLUMN,
    };
    if is_kdtree && prefix_length.is_some() {
        warn!(
            column = key_column,
            "KD-tree keys are analyzed at full length. Ignoring prefix length."
        );
        return None;
    }
    prefix_length
}

impl<S: Storage, E: GeometryEngine> Session<S, E> {
    /// Counts the rows per partition a key column (or a key scheme) would
    /// produce and checks the layout against the configured skew policy.
    /// Nothing is written.
    #[instrument(level = "debug", skip(self))]
    pub fn analyze_partitions(
        &self,
        input: &Path,
        request: &AnalyzeRequest,
    ) -> Result<PartitionAnalysisResult> {
        let counter = self.count_partitions(input, request)?;
        let result = counter.finish(&self.config.skew, request.top);
        info!(
            partitions = result.partition_count,
            rows = result.total_rows,
            skew_ratio = result.skew_ratio,
            "Analyzed partitions"
        );
        Ok(result)
    }

    /// Like [`Session::analyze_partitions`] but reports the `limit` largest
    /// partitions. Meant for showing the layout before partitioning.
    pub fn preview_partitions(
        &self,
        input: &Path,
        request: &AnalyzeRequest,
        limit: usize,
    ) -> Result<PartitionAnalysisResult> {
        let request = AnalyzeRequest {
            top: limit,
            ..request.clone()
        };
        self.analyze_partitions(input, &request)
    }

    /// Counts the keys of a file without summarizing them
    pub(crate) fn count_partitions(
        &self,
        input: &Path,
        request: &AnalyzeRequest,
    ) -> Result<PartitionCounter> {
        if let Some(scheme) = request.scheme {
            scheme.validate()?;
        }
        if request.prefix_length == Some(0) {
            return Err(GeoKeyError::invalid("prefix_length", "must be greater than 0").into());
        }
        let key_column = request.key_column()?;

        let source = self.storage.open(input)?;
        let has_column = source.schema().field_with_name(&key_column).is_ok();
        let recorded = KeyColumns::read(source.key_value_metadata()).scheme(&key_column);
        drop(source);

        if has_column {
            // the scheme recorded for the column wins over the requested one
            let prefix_length =
                effective_prefix(recorded.or(request.scheme), &key_column, request.prefix_length);
            return self.count_column(input, &key_column, prefix_length);
        }
        let prefix_length = effective_prefix(request.scheme, &key_column, request.prefix_length);

        let Some(scheme) = request.scheme else {
            return Err(GeoKeyError::invalid(
                "key_column",
                format!(
                    "column `{key_column}' does not exist in `{}'. Add a spatial key column \
                     first or name a key scheme to analyze.",
                    input.display()
                ),
            )
            .into());
        };

        debug!(?scheme, "Deriving keys for analysis");
        let mut counter = PartitionCounter::new(prefix_length);
        let Input {
            source,
            schema,
            metadata,
            geometry_column,
            ..
        } = self.open_input(input, request.geometry_column.as_deref())?;
        let mut keys = if scheme.is_row_local() {
            KeyColumn::Rows {
                deriver: RowKeyDeriver::new(scheme, &self.engine)?,
                engine: &self.engine,
                covering: metadata
                    .column(&geometry_column)
                    .and_then(|c| c.bbox_covering().cloned())
                    .or_else(|| find_bbox_column(&schema, &geometry_column)),
                geometry_column,
            }
        } else {
            KeyColumn::Precomputed {
                keys: self.kdtree_keys(input, &geometry_column, source.num_rows(), scheme)?,
                offset: 0,
            }
        };
        for batch in source {
            counter.add_array(keys.next(&batch?)?.as_ref())?;
        }
        Ok(counter)
    }

    /// Counts the values of an existing key column. Only that column is
    /// read.
    pub(crate) fn count_column(
        &self,
        input: &Path,
        key_column: &str,
        prefix_length: Option<usize>,
    ) -> Result<PartitionCounter> {
        debug!(column = key_column, "Counting existing key column");
        let mut counter = PartitionCounter::new(prefix_length);
        for batch in self.storage.open_columns(input, &[key_column])? {
            let batch = batch?;
            let keys = batch
                .column_by_name(key_column)
                .with_context(|| format!("Key column `{key_column}' is missing"))?;
            counter.add_array(keys.as_ref())?;
        }
        Ok(counter)
    }
}
