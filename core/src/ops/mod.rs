//! The operations exposed to the command line. Every operation runs on a
//! [`Session`], which bundles the configuration with a storage and a
//! geometry engine. A session processes one file at a time. Work on several
//! files uses one session per file (see [`batch::run_on_files`]).

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use arrow::{
    array::ArrayRef,
    datatypes::{Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use tracing::debug;

use crate::{
    analyze::PartitionAnalysisResult,
    config::Config,
    engine::{GeoEngine, GeometryEngine},
    error::GeoKeyError,
    keys::KeyScheme,
    metadata::{
        covering::{find_bbox_column, BboxCoveringRef},
        guess_geometry_column,
        native::is_wkb_type,
        stats::StatsAccumulator,
        GeoFileMetadata, SpecVersion,
    },
    partition::writer::PartitionSummary,
    preserve::{output_key_value, RewritePlan},
    storage::{parquet::ParquetStorage, Storage, TableSink, TableSource},
};

pub mod add;
pub mod analyze;
pub mod batch;
pub mod convert;
pub mod partition;
pub mod sort;

pub use self::{analyze::AnalyzeRequest, partition::PartitionRequest};

/// Version written for inputs without any geo metadata
pub const DEFAULT_VERSION: SpecVersion = SpecVersion::V1_1;

/// Options shared by all operations writing a single output file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// The metadata version of the output. Defaults to the input's version.
    pub version: Option<SpecVersion>,

    /// Replace the output file if it exists
    pub overwrite: bool,

    /// Keep bbox columns even if the target version has native geometry
    /// columns
    pub keep_bbox_column: bool,
}

/// Options of the operations adding a column
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddKeyOptions {
    /// Name of the new column. Defaults to the scheme's conventional name.
    pub column_name: Option<String>,

    /// Replace a column of the same name instead of refusing
    pub overwrite_column: bool,

    /// The geometry column to derive keys from. Defaults to the primary
    /// geometry column.
    pub geometry_column: Option<String>,

    pub write: WriteOptions,
}

/// A file written by an operation
#[derive(Debug, Clone, PartialEq)]
pub struct WriteSummary {
    pub path: PathBuf,
    pub rows: u64,
    pub metadata: GeoFileMetadata,
}

/// What a file contains, as reported by [`Session::inspect`]
#[derive(Debug, Clone)]
pub struct Inspection {
    pub rows: u64,
    pub schema: SchemaRef,

    /// `None` if the file has no geo metadata
    pub metadata: Option<GeoFileMetadata>,
}

/// All operations that can be applied to a file
#[derive(Debug, Clone)]
pub enum Operation {
    AddKey {
        scheme: KeyScheme,
        options: AddKeyOptions,
    },
    AddBbox(AddKeyOptions),
    SortHilbert {
        order: u8,
        options: WriteOptions,
    },
    Convert {
        version: SpecVersion,
        options: WriteOptions,
    },
    Analyze(AnalyzeRequest),
    Partition(PartitionRequest),
    Inspect,
}

/// The result of an [`Operation`]
#[derive(Debug, Clone)]
pub enum Outcome {
    Written(WriteSummary),
    Analysis(PartitionAnalysisResult),
    Partitioned(PartitionSummary),
    Inspected(Inspection),
}

/// An operation bound to its input and output
#[derive(Debug, Clone)]
pub struct Task {
    pub input: PathBuf,

    /// The output file (or directory for partitioning)
    pub output: Option<PathBuf>,

    pub operation: Operation,
}

/// Configuration, storage and geometry engine for processing one file at a
/// time
pub struct Session<S = ParquetStorage, E = GeoEngine> {
    config: Config,
    storage: S,
    engine: E,
}

impl Session {
    /// Creates a session for Parquet files
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage: ParquetStorage::new(&config),
            engine: GeoEngine,
            config,
        })
    }
}

/// An opened input file together with its resolved geo metadata
pub(crate) struct Input<T> {
    pub source: T,
    pub schema: SchemaRef,
    pub metadata: GeoFileMetadata,
    pub key_value: Vec<(String, String)>,

    /// The geometry column keys are derived from
    pub geometry_column: String,
}

impl<S: Storage, E: GeometryEngine> Session<S, E> {
    pub fn with_parts(config: Config, storage: S, engine: E) -> Self {
        Self {
            config,
            storage,
            engine,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs an operation
    pub fn run(&self, task: &Task) -> Result<Outcome> {
        let output = || {
            task.output.as_deref().ok_or_else(|| {
                anyhow::Error::from(GeoKeyError::invalid(
                    "output",
                    "this operation needs an output path",
                ))
            })
        };
        let input = task.input.as_path();
        Ok(match &task.operation {
            Operation::AddKey { scheme, options } => {
                Outcome::Written(self.add_spatial_key(input, output()?, *scheme, options)?)
            }
            Operation::AddBbox(options) => {
                Outcome::Written(self.add_bbox_column(input, output()?, options)?)
            }
            Operation::SortHilbert { order, options } => {
                Outcome::Written(self.sort_hilbert(input, output()?, *order, options)?)
            }
            Operation::Convert { version, options } => {
                Outcome::Written(self.convert(input, output()?, *version, options)?)
            }
            Operation::Analyze(request) => {
                Outcome::Analysis(self.analyze_partitions(input, request)?)
            }
            Operation::Partition(request) => {
                Outcome::Partitioned(self.partition(input, output()?, request)?)
            }
            Operation::Inspect => Outcome::Inspected(self.inspect(input)?),
        })
    }

    /// Reports the size, schema and geo metadata of a file
    pub fn inspect(&self, input: &Path) -> Result<Inspection> {
        let source = self.storage.open(input)?;
        let schema = source.schema();
        let metadata = GeoFileMetadata::read(&schema, source.key_value_metadata())
            .with_context(|| format!("Invalid geo metadata in `{}'", input.display()))?;
        Ok(Inspection {
            rows: source.num_rows(),
            schema,
            metadata,
        })
    }

    /// Opens an input file and resolves its geo metadata. Files without
    /// metadata get fresh metadata for their conventionally named geometry
    /// column.
    pub(crate) fn open_input(
        &self,
        path: &Path,
        geometry_column: Option<&str>,
    ) -> Result<Input<S::Source>> {
        let source = self.storage.open(path)?;
        let schema = source.schema();
        let key_value = source.key_value_metadata().to_vec();

        let metadata = GeoFileMetadata::read(&schema, &key_value)
            .with_context(|| format!("Invalid geo metadata in `{}'", path.display()))?;
        let metadata = match metadata {
            Some(m) => m,
            None => {
                let primary = geometry_column
                    .map(str::to_string)
                    .or_else(|| guess_geometry_column(&schema))
                    .ok_or_else(|| {
                        GeoKeyError::invalid(
                            "geometry_column",
                            format!(
                                "`{}' has no geo metadata and no geometry column was found. \
                                 Name the geometry column explicitly.",
                                path.display()
                            ),
                        )
                    })?;
                debug!(column = primary.as_str(), "Input has no geo metadata");
                GeoFileMetadata::fresh(DEFAULT_VERSION, primary)
            }
        };

        let geometry_column = geometry_column
            .unwrap_or(metadata.primary_column())
            .to_string();
        match schema.field_with_name(&geometry_column) {
            Ok(f) if is_wkb_type(f.data_type()) => {}
            Ok(f) => {
                return Err(GeoKeyError::invalid(
                    "geometry_column",
                    format!(
                        "column `{geometry_column}' has type `{}' but must contain WKB",
                        f.data_type()
                    ),
                )
                .into())
            }
            Err(_) => {
                return Err(GeoKeyError::invalid(
                    "geometry_column",
                    format!(
                        "column `{geometry_column}' does not exist in `{}'",
                        path.display()
                    ),
                )
                .into())
            }
        }
        metadata
            .check_schema(&schema)
            .with_context(|| format!("Invalid geo metadata in `{}'", path.display()))?;

        Ok(Input {
            source,
            schema,
            metadata,
            key_value,
            geometry_column,
        })
    }

    /// The bbox column covering a geometry column, if there is one
    pub(crate) fn bbox_covering(input: &Input<S::Source>) -> Option<BboxCoveringRef> {
        input
            .metadata
            .column(&input.geometry_column)
            .and_then(|c| c.bbox_covering().cloned())
            .or_else(|| find_bbox_column(&input.schema, &input.geometry_column))
    }

    /// Writes a stream of working batches to `output` according to `plan`.
    /// If writing fails after the output was created, the partial file is
    /// removed. Earlier failures leave an existing file alone.
    pub(crate) fn write_output(
        &self,
        output: &Path,
        plan: &RewritePlan,
        key_value: &[(String, String)],
        batches: impl Iterator<Item = Result<RecordBatch>>,
    ) -> Result<WriteSummary> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Unable to create directory `{}'", parent.display()))?;
        }
        let sink = self.storage.create(output, plan.schema())?;
        let result = self.write_to_sink(sink, plan, key_value, batches);
        if result.is_err() {
            if let Err(e) = fs::remove_file(output) {
                debug!(error = %e, output = %output.display(), "Unable to remove partial output");
            }
        }
        let (rows, metadata) = result?;
        Ok(WriteSummary {
            path: output.to_path_buf(),
            rows,
            metadata,
        })
    }

    fn write_to_sink(
        &self,
        mut sink: S::Sink,
        plan: &RewritePlan,
        key_value: &[(String, String)],
        batches: impl Iterator<Item = Result<RecordBatch>>,
    ) -> Result<(u64, GeoFileMetadata)> {
        let mut stats = StatsAccumulator::new(&self.engine, plan.geometry_columns());
        for batch in batches {
            let out = plan.apply(&batch?)?;
            if plan.needs_stats() {
                stats.update(&out)?;
            }
            sink.write(&out)?;
        }
        let metadata = plan.metadata(Some(stats.stats()))?;
        let rows = sink.finish(output_key_value(key_value, &metadata)?)?;
        Ok((rows, metadata))
    }
}

/// Refuses to replace existing outputs unless asked to, and refuses to
/// write over the input
pub(crate) fn check_output(input: &Path, output: &Path, overwrite: bool) -> Result<()> {
    if input == output
        || matches!((input.canonicalize(), output.canonicalize()), (Ok(a), Ok(b)) if a == b)
    {
        return Err(GeoKeyError::invalid(
            "output",
            format!("`{}' cannot be both input and output", output.display()),
        )
        .into());
    }
    if !overwrite && output.exists() {
        return Err(GeoKeyError::ArtifactExists(output.to_path_buf()).into());
    }
    Ok(())
}

/// Adds a column to a batch, optionally replacing the column at index
/// `replace`. `schema` is the schema of the result.
pub(crate) fn with_column(
    batch: &RecordBatch,
    replace: Option<usize>,
    schema: &SchemaRef,
    column: ArrayRef,
) -> Result<RecordBatch> {
    let mut columns = batch.columns().to_vec();
    if let Some(i) = replace {
        columns.remove(i);
    }
    columns.push(column);
    RecordBatch::try_new(schema.clone(), columns).context("Unable to add column")
}

/// The schema of batches after [`with_column`]
pub(crate) fn schema_with_column(schema: &Schema, replace: Option<usize>, field: Field) -> SchemaRef {
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    if let Some(i) = replace {
        fields.remove(i);
    }
    fields.push(field);
    Arc::new(Schema::new(fields))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{path::Path, sync::Arc};

    use arrow::{
        array::{ArrayRef, BinaryArray, Int64Array},
        datatypes::{DataType, Field, Schema},
        record_batch::RecordBatch,
    };
    use geo::{point, Geometry};

    use crate::{
        config::Config,
        engine::{GeoEngine, GeometryEngine},
        metadata::GeoFileMetadata,
        storage::{parquet::ParquetStorage, Storage, TableSink},
    };

    /// Writes a file with an `id` and a `geometry` column containing the
    /// given points, optionally with geo metadata
    pub fn write_points(path: &Path, points: &[(f64, f64)], metadata: Option<&GeoFileMetadata>) {
        let engine = GeoEngine;
        let wkb: Vec<Option<Vec<u8>>> = points
            .iter()
            .map(|(x, y)| Some(engine.encode(&Geometry::Point(point! { x: *x, y: *y })).unwrap()))
            .collect();
        write_wkb(path, &wkb, metadata);
    }

    /// Writes a file with an `id` and a `geometry` column containing the
    /// given WKB values as they are
    pub fn write_wkb(path: &Path, wkb: &[Option<Vec<u8>>], metadata: Option<&GeoFileMetadata>) {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("geometry", DataType::Binary, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from_iter_values(0..wkb.len() as i64)),
            Arc::new(BinaryArray::from(
                wkb.iter().map(|w| w.as_deref()).collect::<Vec<_>>(),
            )),
        ];
        let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();

        let storage = ParquetStorage::new(&Config::default());
        let mut sink = storage.create(path, schema).unwrap();
        sink.write(&batch).unwrap();
        let kv = metadata
            .map(|m| m.to_key_value().unwrap().into_iter().collect())
            .unwrap_or_default();
        sink.finish(kv).unwrap();
    }

    /// Little-endian WKB of a point. With `z` it is an ISO `Point Z`.
    pub fn point_wkb(x: f64, y: f64, z: Option<f64>) -> Vec<u8> {
        let mut v = vec![1];
        v.extend(if z.is_some() { 1001u32 } else { 1u32 }.to_le_bytes());
        for c in [Some(x), Some(y), z].into_iter().flatten() {
            v.extend(c.to_le_bytes());
        }
        v
    }

    /// Little-endian WKB of an empty point
    pub fn empty_point_wkb() -> Vec<u8> {
        point_wkb(f64::NAN, f64::NAN, None)
    }

    /// Little-endian WKB of an empty polygon
    pub fn empty_polygon_wkb() -> Vec<u8> {
        let mut v = vec![1];
        v.extend(3u32.to_le_bytes());
        v.extend(0u32.to_le_bytes());
        v
    }
}
