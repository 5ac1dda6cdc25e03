use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use arrow::{
    datatypes::{Schema, SchemaRef},
    record_batch::{RecordBatch, RecordBatchReader},
};
use parquet::{
    arrow::{
        arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder},
        ArrowWriter, ProjectionMask,
    },
    basic::{Compression as ParquetCompression, ZstdLevel},
    file::{metadata::KeyValue, properties::WriterProperties},
};
use tracing::debug;

use crate::{
    config::{Compression, Config},
    error::EngineContext,
};

use super::{Storage, TableSink, TableSource};

/// Key/value entry in which the Arrow writer stores the Arrow schema
const ARROW_SCHEMA_KEY: &str = "ARROW:schema";

/// An implementation of the [`Storage`] trait for Apache Parquet files
#[derive(Debug, Clone)]
pub struct ParquetStorage {
    batch_size: usize,
    row_group_size: usize,
    compression: Compression,
}

impl ParquetStorage {
    pub fn new(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            row_group_size: config.row_group_size,
            compression: config.compression,
        }
    }

    fn writer_properties(&self) -> WriterProperties {
        let compression = match self.compression {
            Compression::Uncompressed => ParquetCompression::UNCOMPRESSED,
            Compression::Snappy => ParquetCompression::SNAPPY,
            Compression::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
        };
        WriterProperties::builder()
            .set_compression(compression)
            .set_max_row_group_size(self.row_group_size)
            .build()
    }

    fn open_with(&self, path: &Path, columns: Option<&[&str]>) -> Result<ParquetSource> {
        let file =
            File::open(path).with_context(|| format!("Unable to open `{}'", path.display()))?;
        let builder =
            ParquetRecordBatchReaderBuilder::try_new(file).engine_context("Reading metadata", path)?;

        let file_metadata = builder.metadata().file_metadata();
        let num_rows = file_metadata.num_rows().max(0) as u64;
        let key_value = file_metadata
            .key_value_metadata()
            .map(|kv| {
                kv.iter()
                    .filter(|e| e.key != ARROW_SCHEMA_KEY)
                    .map(|e| (e.key.clone(), e.value.clone().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();

        let mut builder = builder.with_batch_size(self.batch_size);
        if let Some(columns) = columns {
            let mask = ProjectionMask::columns(builder.parquet_schema(), columns.iter().copied());
            builder = builder.with_projection(mask);
        }
        let reader = builder.build().engine_context("Reading", path)?;

        // file-level metadata is exposed separately
        let schema = Arc::new(Schema::new(reader.schema().fields().clone()));

        debug!(path = %path.display(), num_rows, "Opened parquet file");
        Ok(ParquetSource {
            path: path.to_path_buf(),
            reader,
            schema,
            key_value,
            num_rows,
        })
    }
}

impl Storage for ParquetStorage {
    type Source = ParquetSource;
    type Sink = ParquetSink;

    fn open(&self, path: &Path) -> Result<ParquetSource> {
        self.open_with(path, None)
    }

    fn open_columns(&self, path: &Path, columns: &[&str]) -> Result<ParquetSource> {
        self.open_with(path, Some(columns))
    }

    fn create(&self, path: &Path, schema: SchemaRef) -> Result<ParquetSink> {
        let file =
            File::create(path).with_context(|| format!("Unable to create `{}'", path.display()))?;
        let writer = ArrowWriter::try_new(file, schema, Some(self.writer_properties()))
            .engine_context("Writing", path)?;
        Ok(ParquetSink {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }
}

/// Reads record batches from a Parquet file
pub struct ParquetSource {
    path: PathBuf,
    reader: ParquetRecordBatchReader,
    schema: SchemaRef,
    key_value: Vec<(String, String)>,
    num_rows: u64,
}

impl Iterator for ParquetSource {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.reader.next()?;
        Some(batch.engine_context("Reading", &self.path).and_then(|b| {
            RecordBatch::try_new(self.schema.clone(), b.columns().to_vec())
                .engine_context("Reading", &self.path)
        }))
    }
}

impl TableSource for ParquetSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn key_value_metadata(&self) -> &[(String, String)] {
        &self.key_value
    }

    fn num_rows(&self) -> u64 {
        self.num_rows
    }
}

/// Writes record batches to a Parquet file
pub struct ParquetSink {
    path: PathBuf,
    writer: ArrowWriter<File>,
    rows: u64,
}

impl TableSink for ParquetSink {
    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.writer
            .write(batch)
            .engine_context("Writing", &self.path)?;
        self.rows += batch.num_rows() as u64;
        Ok(())
    }

    fn finish(mut self, key_value_metadata: Vec<(String, String)>) -> Result<u64> {
        for (k, v) in key_value_metadata {
            self.writer.append_key_value_metadata(KeyValue::new(k, v));
        }
        self.writer.close().engine_context("Writing", &self.path)?;
        debug!(path = %self.path.display(), rows = self.rows, "Wrote parquet file");
        Ok(self.rows)
    }
}
