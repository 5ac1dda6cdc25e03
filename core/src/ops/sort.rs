use std::path::Path;

use anyhow::{Context, Result};
use arrow::{
    array::UInt32Array,
    compute::{concat_batches, take_record_batch},
};
use geo::Rect;
use tracing::{debug, info, instrument};

use crate::{
    engine::{decode_column, GeometryEngine},
    keys::{
        bbox_center,
        hilbert::{check_order, HilbertCurve},
    },
    metadata::covering::read_bbox_array,
    preserve::{PlanOptions, Rewrite, RewritePlan},
    storage::Storage,
    util::extend_rect::{rect_to_bounds, ExtendRect},
};

use super::{check_output, Input, Session, WriteOptions, WriteSummary};

impl<S: Storage, E: GeometryEngine> Session<S, E> {
    /// Sorts all rows along a Hilbert curve of the given order laid over
    /// the extent of the data. Each row is represented by the centre of its
    /// bounding box. Rows without a geometry are moved to the end. Rows of
    /// equal rank keep their original order.
    ///
    /// The whole table is held in memory while sorting.
    #[instrument(level = "debug", skip(self, options))]
    pub fn sort_hilbert(
        &self,
        input: &Path,
        output: &Path,
        order: u8,
        options: &WriteOptions,
    ) -> Result<WriteSummary> {
        check_order(order)?;
        check_output(input, output, options.overwrite)?;

        let input_data = self.open_input(input, None)?;
        let covering = Self::bbox_covering(&input_data);
        let Input {
            source,
            schema,
            metadata,
            key_value,
            geometry_column,
        } = input_data;

        let plan = RewritePlan::new(
            Rewrite::RowsReordered,
            &schema,
            &metadata,
            &PlanOptions {
                keep_bbox_column: options.keep_bbox_column,
                ..PlanOptions::new(options.version.unwrap_or(metadata.version()))
            },
        )?;

        let batches = source.collect::<Result<Vec<_>>>()?;
        let table = concat_batches(&schema, &batches).context("Unable to combine batches")?;
        drop(batches);

        let array = table
            .column_by_name(&geometry_column)
            .with_context(|| format!("Geometry column `{geometry_column}' is missing"))?;
        let bounds: Vec<Option<[f64; 4]>> = match covering
            .as_ref()
            .and_then(|c| table.column_by_name(&c.column).map(|a| (c, a)))
        {
            Some((c, a)) => {
                debug!(column = c.column.as_str(), "Using bbox column");
                read_bbox_array(a.as_ref(), c)?
            }
            None => decode_column(&self.engine, array.as_ref())
                .with_context(|| format!("Invalid geometry in column `{geometry_column}'"))?
                .iter()
                .map(|g| {
                    g.as_ref()
                        .and_then(|g| self.engine.bbox(g))
                        .map(|r| rect_to_bounds(&r))
                })
                .collect(),
        };

        let mut extent: Option<Rect> = None;
        for b in bounds.iter().flatten() {
            extent.extend_bounds(*b);
        }

        let mut indices: Vec<u32> = (0..table.num_rows() as u32).collect();
        if let Some(extent) = extent {
            let curve = HilbertCurve::new(rect_to_bounds(&extent), order)?;
            let ranks: Vec<u64> = bounds
                .iter()
                .map(|b| match b {
                    Some(b) => {
                        let c = bbox_center(*b);
                        curve.rank(c.x(), c.y())
                    }
                    None => u64::MAX,
                })
                .collect();
            indices.sort_by_key(|i| ranks[*i as usize]);
        }

        let sorted = take_record_batch(&table, &UInt32Array::from(indices))
            .context("Unable to reorder rows")?;
        drop(table);

        let batch_size = self.config.batch_size;
        let slices = (0..sorted.num_rows())
            .step_by(batch_size)
            .map(|offset| Ok(sorted.slice(offset, batch_size.min(sorted.num_rows() - offset))));
        let summary = self.write_output(output, &plan, &key_value, slices)?;
        info!(rows = summary.rows, order, output = %output.display(), "Sorted rows along Hilbert curve");
        Ok(summary)
    }
}
