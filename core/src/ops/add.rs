use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use geo::Point;
use serde_json::Map;
use tracing::{debug, info, instrument};

use crate::{
    engine::{decode_column, GeometryEngine},
    error::GeoKeyError,
    keys::{columns::KeyColumns, kdtree::KdTreeBuilder, BitString, KeyScheme, RowKeyDeriver},
    metadata::{
        covering::{
            bbox_array, bbox_field, find_bbox_column, read_bbox_array, BboxCoveringRef,
            BBOX_COLUMN,
        },
        Covering, GeoFileMetadata,
    },
    preserve::{PlanOptions, Rewrite, RewritePlan},
    storage::{Storage, TableSource},
};

use super::{check_output, schema_with_column, with_column, AddKeyOptions, Input, Session, WriteSummary};

/// Produces the values of an added key column batch by batch
pub(crate) enum KeyColumn<'a, E> {
    /// Keys computed from each row on its own
    Rows {
        deriver: RowKeyDeriver<'a, E>,
        engine: &'a E,
        geometry_column: String,
        covering: Option<BboxCoveringRef>,
    },

    /// Keys computed in advance over the whole dataset, handed out in
    /// row order
    Precomputed {
        keys: Vec<Option<BitString>>,
        offset: usize,
    },
}

impl<'a, E: GeometryEngine> KeyColumn<'a, E> {
    /// The keys of the next batch of rows
    pub(crate) fn next(&mut self, batch: &RecordBatch) -> Result<ArrayRef> {
        match self {
            KeyColumn::Rows {
                deriver,
                engine,
                geometry_column,
                covering,
            } => {
                let geometries = batch
                    .column_by_name(geometry_column)
                    .with_context(|| format!("Geometry column `{geometry_column}' is missing"))?;
                let geometries = decode_column(*engine, geometries.as_ref())
                    .with_context(|| format!("Invalid geometry in column `{geometry_column}'"))?;
                let bboxes = match covering
                    .as_ref()
                    .and_then(|c| batch.column_by_name(&c.column).map(|a| (c, a)))
                {
                    Some((c, a)) => read_bbox_array(a.as_ref(), c)?,
                    None => vec![None; batch.num_rows()],
                };
                let keys = geometries
                    .iter()
                    .zip(bboxes)
                    .map(|(g, b)| match g {
                        Some(g) => Ok(deriver.derive(g, b)?.map(|k| k.to_column_value())),
                        None => Ok(None),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Arc::new(StringArray::from(keys)))
            }

            KeyColumn::Precomputed { keys, offset } => {
                let end = *offset + batch.num_rows();
                let slice = keys.get(*offset..end).with_context(|| {
                    format!("Input has more rows than the {} keys computed", keys.len())
                })?;
                *offset = end;
                Ok(Arc::new(StringArray::from_iter(
                    slice.iter().map(|k| k.as_ref().map(BitString::as_str)),
                )))
            }
        }
    }
}

impl<S: Storage, E: GeometryEngine> Session<S, E> {
    /// Adds a column with a spatial key of every row and writes the result
    /// to `output`
    #[instrument(level = "debug", skip(self, options))]
    pub fn add_spatial_key(
        &self,
        input: &Path,
        output: &Path,
        scheme: KeyScheme,
        options: &AddKeyOptions,
    ) -> Result<WriteSummary> {
        scheme.validate()?;
        check_output(input, output, options.write.overwrite)?;

        let column_name = options
            .column_name
            .clone()
            .unwrap_or_else(|| scheme.default_column_name().to_string());
        let Input {
            source,
            schema,
            metadata,
            mut key_value,
            geometry_column,
        } = self.open_input(input, options.geometry_column.as_deref())?;
        let replace = replaced_column(input, &schema, &metadata, &column_name, options)?;

        let mut key_columns = KeyColumns::read(&key_value);
        key_columns.insert(column_name.as_str(), scheme);
        key_columns.write_to(&mut key_value)?;

        let working = schema_with_column(
            &schema,
            replace,
            Field::new(column_name.as_str(), DataType::Utf8, true),
        );
        let plan = RewritePlan::new(
            Rewrite::ColumnAdded,
            &working,
            &metadata,
            &PlanOptions {
                keep_bbox_column: options.write.keep_bbox_column,
                ..PlanOptions::new(options.write.version.unwrap_or(metadata.version()))
            },
        )?;

        let mut keys = if scheme.is_row_local() {
            let covering = match scheme {
                KeyScheme::Quadkey {
                    use_centroid: false,
                    ..
                } => metadata
                    .column(&geometry_column)
                    .and_then(|c| c.bbox_covering().cloned())
                    .or_else(|| find_bbox_column(&schema, &geometry_column)),
                _ => None,
            };
            KeyColumn::Rows {
                deriver: RowKeyDeriver::new(scheme, &self.engine)?,
                engine: &self.engine,
                geometry_column: geometry_column.clone(),
                covering,
            }
        } else {
            KeyColumn::Precomputed {
                keys: self.kdtree_keys(input, &geometry_column, source.num_rows(), scheme)?,
                offset: 0,
            }
        };

        let batches = source.map(|b| {
            let b = b?;
            let k = keys.next(&b)?;
            with_column(&b, replace, &working, k)
        });
        let summary = self.write_output(output, &plan, &key_value, batches)?;
        info!(
            column = column_name.as_str(),
            rows = summary.rows,
            output = %output.display(),
            "Added spatial key column"
        );
        Ok(summary)
    }

    /// Computes KD-tree keys for all rows of a file. Only the geometry
    /// column is read, and only the centroids are kept in memory.
    pub(crate) fn kdtree_keys(
        &self,
        input: &Path,
        geometry_column: &str,
        rows: u64,
        scheme: KeyScheme,
    ) -> Result<Vec<Option<BitString>>> {
        let KeyScheme::KdTree { iterations } = scheme else {
            return Err(GeoKeyError::invalid("scheme", "not a KD-tree scheme").into());
        };
        let builder = KdTreeBuilder::new(iterations)?;
        builder.check_scale(rows, &self.config.kdtree)?;

        let mut centroids: Vec<Option<Point>> = Vec::with_capacity(rows as usize);
        for batch in self.storage.open_columns(input, &[geometry_column])? {
            let batch = batch?;
            let array = batch
                .column_by_name(geometry_column)
                .with_context(|| format!("Geometry column `{geometry_column}' is missing"))?;
            let geometries = decode_column(&self.engine, array.as_ref())
                .with_context(|| format!("Invalid geometry in column `{geometry_column}'"))?;
            centroids.extend(
                geometries
                    .iter()
                    .map(|g| g.as_ref().and_then(|g| self.engine.centroid(g))),
            );
        }
        debug!(points = centroids.len(), iterations, "Building KD-tree");
        Ok(builder.build(&centroids))
    }

    /// Adds a bbox struct column with the bounds of every geometry and
    /// declares it as covering of the geometry column
    #[instrument(level = "debug", skip(self, options))]
    pub fn add_bbox_column(
        &self,
        input: &Path,
        output: &Path,
        options: &AddKeyOptions,
    ) -> Result<WriteSummary> {
        check_output(input, output, options.write.overwrite)?;

        let Input {
            source,
            schema,
            metadata,
            mut key_value,
            geometry_column,
        } = self.open_input(input, options.geometry_column.as_deref())?;
        let column_name = options.column_name.clone().unwrap_or_else(|| {
            if geometry_column == metadata.primary_column() {
                BBOX_COLUMN.to_string()
            } else {
                format!("{geometry_column}_bbox")
            }
        });
        let replace = replaced_column(input, &schema, &metadata, &column_name, options)?;
        if replace.is_some() {
            let mut key_columns = KeyColumns::read(&key_value);
            if key_columns.remove(&column_name).is_some() {
                key_columns.write_to(&mut key_value)?;
            }
        }

        // a replaced column may have been the covering of another column
        let (version, primary, mut columns, extra) = metadata.into_parts();
        for c in columns.values_mut() {
            if c.bbox_covering().map(|b| &b.column) == Some(&column_name) {
                c.covering = None;
            }
        }
        if let Some(c) = columns.get_mut(&geometry_column) {
            c.covering = Some(Covering {
                bbox: BboxCoveringRef::new(column_name.as_str()),
                extra: Map::new(),
            });
        }
        let metadata = GeoFileMetadata::new(version, primary, columns)?.with_extra(extra);

        let working = schema_with_column(&schema, replace, bbox_field(&column_name));
        let plan = RewritePlan::new(
            Rewrite::ColumnAdded,
            &working,
            &metadata,
            &PlanOptions {
                keep_bbox_column: true,
                ..PlanOptions::new(options.write.version.unwrap_or(version))
            },
        )?;

        let batches = source.map(|b| {
            let b = b?;
            let array = b
                .column_by_name(&geometry_column)
                .with_context(|| format!("Geometry column `{geometry_column}' is missing"))?;
            let rects: Vec<_> = decode_column(&self.engine, array.as_ref())
                .with_context(|| format!("Invalid geometry in column `{geometry_column}'"))?
                .iter()
                .map(|g| g.as_ref().and_then(|g| self.engine.bbox(g)))
                .collect();
            with_column(&b, replace, &working, Arc::new(bbox_array(&rects)?))
        });
        let summary = self.write_output(output, &plan, &key_value, batches)?;
        info!(
            column = column_name.as_str(),
            rows = summary.rows,
            output = %output.display(),
            "Added bbox column"
        );
        Ok(summary)
    }
}

/// The index of an existing column the added column replaces. Fails if
/// the column exists and replacing was not requested, or if it is a
/// geometry column.
fn replaced_column(
    input: &Path,
    schema: &Schema,
    metadata: &GeoFileMetadata,
    column_name: &str,
    options: &AddKeyOptions,
) -> Result<Option<usize>> {
    let Ok(i) = schema.index_of(column_name) else {
        return Ok(None);
    };
    if metadata.column(column_name).is_some() {
        return Err(GeoKeyError::invalid(
            "column_name",
            format!("`{column_name}' is a geometry column and cannot be replaced"),
        )
        .into());
    }
    if !options.overwrite_column {
        return Err(GeoKeyError::SchemaConflict {
            column: column_name.to_string(),
            path: input.to_path_buf(),
        }
        .into());
    }
    debug!(column = column_name, "Replacing existing column");
    Ok(Some(i))
}
