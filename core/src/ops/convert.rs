use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument};

use crate::{
    engine::GeometryEngine,
    metadata::SpecVersion,
    preserve::{PlanOptions, Rewrite, RewritePlan},
    storage::Storage,
};

use super::{check_output, Input, Session, WriteOptions, WriteSummary};

impl<S: Storage, E: GeometryEngine> Session<S, E> {
    /// Rewrites a file with the metadata layout of another version. The
    /// data itself is copied unchanged, except for bbox columns that are
    /// dropped when converting to a version with native geometry columns.
    #[instrument(level = "debug", skip(self, options))]
    pub fn convert(
        &self,
        input: &Path,
        output: &Path,
        version: SpecVersion,
        options: &WriteOptions,
    ) -> Result<WriteSummary> {
        check_output(input, output, options.overwrite)?;

        let Input {
            source,
            schema,
            metadata,
            key_value,
            ..
        } = self.open_input(input, None)?;
        let from = metadata.version();
        let plan = RewritePlan::new(
            Rewrite::VersionConversion,
            &schema,
            &metadata,
            &PlanOptions {
                keep_bbox_column: options.keep_bbox_column,
                ..PlanOptions::new(version)
            },
        )?;

        let summary = self.write_output(output, &plan, &key_value, source)?;
        info!(
            %from,
            to = %version,
            dropped = ?plan.dropped(),
            rows = summary.rows,
            "Converted geo metadata"
        );
        Ok(summary)
    }
}
