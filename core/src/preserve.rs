//! Keeps geo metadata consistent when a file is rewritten. A [`RewritePlan`]
//! is made once per output from the source file's metadata, the kind of
//! rewrite and the target version. It decides which columns survive, how
//! geometry fields are annotated and which metadata fields are carried
//! forward. The statistics that have to be recomputed are gathered while
//! the batches are written and merged in at the end.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::{bail, Context, Result};
use arrow::{
    datatypes::{Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    error::GeoKeyError,
    metadata::{
        covering::{find_bbox_column, is_bbox_struct, BboxCoveringRef},
        crs::for_native_target,
        native::{annotate_field, strip_field},
        stats::ColumnStats,
        Covering, GeoColumnMetadata, GeoFileMetadata, SpecVersion, GEO_METADATA_KEY,
    },
};

/// The kind of change a rewrite applies to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    /// A column (e.g. a spatial key) was added
    ColumnAdded,

    /// Rows were reordered (e.g. sorted)
    RowsReordered,

    /// Some columns were removed
    ColumnsDropped,

    /// A subset of the rows was selected (e.g. one partition)
    RowsFiltered,

    /// Geometry values were transformed to another CRS
    Reprojected,

    /// Only the metadata layout changes
    FormatOnly,

    /// The file is rewritten for another metadata version
    VersionConversion,
}

impl Rewrite {
    /// `true` if bbox and geometry types have to be recomputed. They are
    /// only carried forward by rewrites that touch neither geometry values
    /// nor the row set.
    pub fn recomputes_stats(&self) -> bool {
        !matches!(self, Rewrite::FormatOnly)
    }
}

/// Options controlling the output layout of a rewrite
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOptions {
    /// The metadata version to write
    pub target: SpecVersion,

    /// Keep bbox struct columns even if the target has native geometry
    /// columns, which carry their bounds themselves
    pub keep_bbox_column: bool,

    /// Columns to leave out of the output
    pub drop_columns: Vec<String>,
}

impl PlanOptions {
    pub fn new(target: SpecVersion) -> Self {
        Self {
            target,
            keep_bbox_column: false,
            drop_columns: Vec::new(),
        }
    }
}

/// Output schema and metadata template of one rewritten file
#[derive(Debug, Clone)]
pub struct RewritePlan {
    rewrite: Rewrite,
    target: SpecVersion,
    schema: SchemaRef,
    projection: Vec<usize>,
    dropped: Vec<String>,
    primary_column: String,
    columns: BTreeMap<String, GeoColumnMetadata>,
    extra: Map<String, Value>,
}

impl RewritePlan {
    /// Plans the rewrite of a file. `working` is the schema of the batches
    /// that will be passed to [`RewritePlan::apply`], i.e. the input schema
    /// plus any added columns. Fails if the source metadata contradicts the
    /// data.
    pub fn new(
        rewrite: Rewrite,
        working: &Schema,
        source: &GeoFileMetadata,
        options: &PlanOptions,
    ) -> Result<Self> {
        source.check_schema(working)?;

        let profile = options.target.profile();
        if options.drop_columns.iter().any(|c| c == source.primary_column()) {
            return Err(GeoKeyError::invalid(
                "drop_columns",
                format!(
                    "the primary geometry column `{}' cannot be dropped",
                    source.primary_column()
                ),
            )
            .into());
        }

        let mut dropped: Vec<String> = options.drop_columns.clone();
        let mut columns = BTreeMap::new();
        for (name, source_column) in source.columns() {
            if dropped.contains(name) {
                continue;
            }
            let mut c = source_column.clone();

            let covering = match c.covering.take() {
                Some(cov) => Some(cov),
                None => detect_covering(working, name, name == source.primary_column()).map(
                    |bbox| Covering {
                        bbox,
                        extra: Map::new(),
                    },
                ),
            };
            c.covering = match covering {
                Some(cov) if dropped.contains(&cov.bbox.column) => None,
                Some(cov) if profile.native && !options.keep_bbox_column => {
                    debug!(
                        column = cov.bbox.column.as_str(),
                        "Dropping bbox column redundant with native geometry type"
                    );
                    dropped.push(cov.bbox.column.clone());
                    None
                }
                Some(cov) if profile.covering => Some(cov),
                _ => None,
            };

            if profile.native {
                c.crs = for_native_target(c.crs.take(), name);
            }
            columns.insert(name.clone(), c);
        }

        let mut fields: Vec<Field> = Vec::new();
        let mut projection = Vec::new();
        for (i, f) in working.fields().iter().enumerate() {
            if dropped.contains(f.name()) {
                continue;
            }
            let field = match columns.get(f.name()) {
                Some(c) if profile.native => annotate_field(&strip_field(f), c.crs.as_ref()),
                _ => strip_field(f),
            };
            fields.push(field);
            projection.push(i);
        }

        let (_, primary_column, _, extra) = source.clone().into_parts();
        Ok(Self {
            rewrite,
            target: options.target,
            schema: Arc::new(Schema::new(fields)),
            projection,
            dropped,
            primary_column,
            columns,
            extra,
        })
    }

    /// The schema of the written batches
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn target(&self) -> SpecVersion {
        self.target
    }

    /// The columns left out of the output
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    /// The geometry columns of the output
    pub fn geometry_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// `true` if statistics have to be gathered for [`RewritePlan::metadata`]
    pub fn needs_stats(&self) -> bool {
        self.rewrite.recomputes_stats()
    }

    /// Converts a working batch into an output batch
    pub fn apply(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let projected = batch
            .project(&self.projection)
            .context("Unable to select output columns")?;
        RecordBatch::try_new(self.schema.clone(), projected.columns().to_vec())
            .context("Batch does not match output schema")
    }

    /// Builds the metadata of the output. `stats` must cover the rows
    /// actually written if [`RewritePlan::needs_stats`] is `true`.
    pub fn metadata(&self, stats: Option<&BTreeMap<String, ColumnStats>>) -> Result<GeoFileMetadata> {
        let mut columns = self.columns.clone();
        if self.needs_stats() {
            let Some(stats) = stats else {
                bail!("{:?} rewrites need recomputed geometry statistics", self.rewrite);
            };
            for (name, c) in columns.iter_mut() {
                let s = stats.get(name).cloned().unwrap_or_default();
                c.bbox = s.bounds();
                c.geometry_types = s.geometry_types;
            }
        }
        Ok(
            GeoFileMetadata::new(self.target, self.primary_column.clone(), columns)?
                .with_extra(self.extra.clone()),
        )
    }
}

/// The key/value metadata of a rewritten file: all entries of the source
/// except its geo envelope, followed by the new envelope if the target
/// version has one
pub fn output_key_value(
    source: &[(String, String)],
    metadata: &GeoFileMetadata,
) -> Result<Vec<(String, String)>> {
    let mut kv: Vec<(String, String)> = source
        .iter()
        .filter(|(k, _)| k != GEO_METADATA_KEY)
        .cloned()
        .collect();
    kv.extend(metadata.to_key_value()?);
    Ok(kv)
}

fn detect_covering(schema: &Schema, geometry_column: &str, primary: bool) -> Option<BboxCoveringRef> {
    if primary {
        return find_bbox_column(schema, geometry_column);
    }
    let name = format!("{geometry_column}_bbox");
    schema
        .field_with_name(&name)
        .ok()
        .filter(|f| is_bbox_struct(f.data_type()))
        .map(|_| BboxCoveringRef::new(name))
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use arrow::{
        array::{ArrayRef, BinaryArray, Int64Array},
        datatypes::{DataType, Field, Schema},
        record_batch::RecordBatch,
    };
    use assertor::{assert_that, EqualityAssertion};
    use geo::{coord, Rect};
    use pretty_assertions::assert_eq;

    use crate::{
        error::GeoKeyError,
        metadata::{
            covering::{bbox_array, bbox_field, BboxCoveringRef},
            crs::{default_crs, Crs},
            native::is_native,
            stats::ColumnStats,
            GeoColumnMetadata, GeoFileMetadata, SpecVersion,
        },
    };

    use super::{output_key_value, PlanOptions, Rewrite, RewritePlan};

    fn source(crs: Option<Crs>) -> GeoFileMetadata {
        let mut columns = BTreeMap::new();
        columns.insert(
            "geometry".to_string(),
            GeoColumnMetadata {
                crs,
                bbox: Some([0.0, 0.0, 1.0, 1.0]),
                geometry_types: ["Point".to_string()].into(),
                ..GeoColumnMetadata::wkb()
            },
        );
        GeoFileMetadata::new(SpecVersion::V1_1, "geometry", columns).unwrap()
    }

    fn working_schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("geometry", DataType::Binary, true),
            bbox_field("bbox"),
        ])
    }

    fn stats(bbox: [f64; 4]) -> BTreeMap<String, ColumnStats> {
        let mut m = BTreeMap::new();
        m.insert(
            "geometry".to_string(),
            ColumnStats {
                bbox: Some(Rect::new(
                    coord! { x: bbox[0], y: bbox[1] },
                    coord! { x: bbox[2], y: bbox[3] },
                )),
                geometry_types: ["Polygon".to_string()].into(),
                rows: 1,
            },
        );
        m
    }

    #[test]
    fn v1_1_detects_covering() {
        let plan = RewritePlan::new(
            Rewrite::ColumnAdded,
            &working_schema(),
            &source(None),
            &PlanOptions::new(SpecVersion::V1_1),
        )
        .unwrap();
        assert_that!(plan.schema().fields().len()).is_equal_to(3);
        let m = plan.metadata(Some(&stats([1.0, 2.0, 3.0, 4.0]))).unwrap();
        assert_that!(m.primary().bbox_covering().cloned())
            .is_equal_to(Some(BboxCoveringRef::new("bbox")));
        assert_that!(m.primary().bbox).is_equal_to(Some([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(
            m.primary().geometry_types.iter().cloned().collect::<Vec<_>>(),
            vec!["Polygon".to_string()]
        );
    }

    #[test]
    fn v1_0_has_no_covering_but_keeps_column() {
        let plan = RewritePlan::new(
            Rewrite::RowsReordered,
            &working_schema(),
            &source(None),
            &PlanOptions::new(SpecVersion::V1_0),
        )
        .unwrap();
        assert_that!(plan.schema().fields().len()).is_equal_to(3);
        let m = plan.metadata(Some(&stats([0.0, 0.0, 1.0, 1.0]))).unwrap();
        assert_that!(m.primary().covering.clone()).is_equal_to(None);
    }

    #[test]
    fn native_target_drops_bbox_column_and_string_crs() {
        let plan = RewritePlan::new(
            Rewrite::VersionConversion,
            &working_schema(),
            &source(Some(Crs::AuthorityCode("EPSG:4326".into()))),
            &PlanOptions::new(SpecVersion::V2_0),
        )
        .unwrap();
        let schema = plan.schema();
        assert!(schema.field_with_name("bbox").is_err());
        assert!(is_native(schema.field_with_name("geometry").unwrap()));
        assert_that!(plan.dropped().to_vec()).is_equal_to(vec!["bbox".to_string()]);

        let m = plan.metadata(Some(&stats([0.0, 0.0, 1.0, 1.0]))).unwrap();
        assert_that!(m.primary().crs.clone()).is_equal_to(None);
        assert_that!(m.primary().covering.clone()).is_equal_to(None);
        assert!(m.to_json().unwrap().unwrap().contains("2.0.0"));
    }

    #[test]
    fn native_target_keeps_bbox_column_on_request() {
        let options = PlanOptions {
            keep_bbox_column: true,
            ..PlanOptions::new(SpecVersion::V2_0)
        };
        let plan = RewritePlan::new(
            Rewrite::ColumnAdded,
            &working_schema(),
            &source(Some(Crs::Projjson(default_crs()))),
            &options,
        )
        .unwrap();
        assert!(plan.schema().field_with_name("bbox").is_ok());
        let m = plan.metadata(Some(&stats([0.0, 0.0, 1.0, 1.0]))).unwrap();
        assert!(m.primary().covering.is_some());
        assert_that!(m.primary().crs.clone()).is_equal_to(Some(Crs::Projjson(default_crs())));
    }

    #[test]
    fn format_only_keeps_stats() {
        let plan = RewritePlan::new(
            Rewrite::FormatOnly,
            &working_schema(),
            &source(None),
            &PlanOptions::new(SpecVersion::V1_1),
        )
        .unwrap();
        assert!(!plan.needs_stats());
        let m = plan.metadata(None).unwrap();
        assert_that!(m.primary().bbox).is_equal_to(Some([0.0, 0.0, 1.0, 1.0]));
    }

    #[test]
    fn recomputing_rewrites_require_stats() {
        let plan = RewritePlan::new(
            Rewrite::RowsFiltered,
            &working_schema(),
            &source(None),
            &PlanOptions::new(SpecVersion::V1_1),
        )
        .unwrap();
        assert!(plan.metadata(None).is_err());
    }

    #[test]
    fn dropping_columns() {
        let options = PlanOptions {
            drop_columns: vec!["bbox".to_string(), "id".to_string()],
            ..PlanOptions::new(SpecVersion::V1_1)
        };
        let plan =
            RewritePlan::new(Rewrite::ColumnsDropped, &working_schema(), &source(None), &options)
                .unwrap();
        assert_that!(plan.schema().fields().len()).is_equal_to(1);
        let m = plan.metadata(Some(&stats([0.0, 0.0, 1.0, 1.0]))).unwrap();
        assert_that!(m.primary().covering.clone()).is_equal_to(None);

        let options = PlanOptions {
            drop_columns: vec!["geometry".to_string()],
            ..PlanOptions::new(SpecVersion::V1_1)
        };
        let err = RewritePlan::new(Rewrite::ColumnsDropped, &working_schema(), &source(None), &options)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GeoKeyError>(),
            Some(GeoKeyError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn key_value_replaces_envelope() {
        let source_kv = vec![
            ("geo".to_string(), "{}".to_string()),
            ("owner".to_string(), "me".to_string()),
        ];
        let kv = output_key_value(&source_kv, &source(None)).unwrap();
        assert_that!(kv.len()).is_equal_to(2);
        assert_that!(kv[0].clone()).is_equal_to(("owner".to_string(), "me".to_string()));
        assert_that!(kv[1].0.clone()).is_equal_to("geo".to_string());
        assert!(kv[1].1.contains("1.1.0"));

        let geo_only = GeoFileMetadata::fresh(SpecVersion::ParquetGeoOnly, "geometry");
        let kv = output_key_value(&source_kv, &geo_only).unwrap();
        assert_that!(kv).is_equal_to(vec![("owner".to_string(), "me".to_string())]);
    }

    #[test]
    fn apply_projects_batches() {
        let options = PlanOptions {
            drop_columns: vec!["id".to_string()],
            ..PlanOptions::new(SpecVersion::ParquetGeoOnly)
        };
        let schema = Arc::new(working_schema());
        let plan = RewritePlan::new(Rewrite::ColumnsDropped, &schema, &source(None), &options)
            .unwrap();

        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![1])),
            Arc::new(BinaryArray::from(vec![Some(&[1u8, 2, 3][..])])),
            Arc::new(bbox_array(&[None]).unwrap()),
        ];
        let batch = RecordBatch::try_new(schema, columns).unwrap();
        let out = plan.apply(&batch).unwrap();
        assert_that!(out.num_columns()).is_equal_to(1);
        assert!(is_native(out.schema().field(0)));
        assert_that!(plan.metadata(Some(&stats([0.0, 0.0, 1.0, 1.0]))).unwrap().to_key_value().unwrap())
            .is_equal_to(None);
    }
}
