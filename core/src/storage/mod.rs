pub mod parquet;

use std::path::Path;

use anyhow::Result;
use arrow::{datatypes::SchemaRef, record_batch::RecordBatch};

/// A table that is read batch by batch
pub trait TableSource: Iterator<Item = Result<RecordBatch>> {
    /// The schema of all batches. It never carries file-level metadata,
    /// which is available through [`TableSource::key_value_metadata`].
    fn schema(&self) -> SchemaRef;

    /// The file's key/value metadata except for entries owned by the
    /// storage engine
    fn key_value_metadata(&self) -> &[(String, String)];

    /// The total number of rows in the table
    fn num_rows(&self) -> u64;
}

/// A table that is written batch by batch
pub trait TableSink {
    /// Appends a batch. Its schema must match the one the sink was created
    /// with.
    fn write(&mut self, batch: &RecordBatch) -> Result<()>;

    /// Attaches the given key/value metadata, completes the file and
    /// returns the number of rows written
    fn finish(self, key_value_metadata: Vec<(String, String)>) -> Result<u64>;
}

/// Access to tables stored in files
pub trait Storage {
    type Source: TableSource;
    type Sink: TableSink;

    /// Opens a table for reading
    fn open(&self, path: &Path) -> Result<Self::Source>;

    /// Opens a table for reading only the given top-level columns
    fn open_columns(&self, path: &Path, columns: &[&str]) -> Result<Self::Source>;

    /// Creates a new table, replacing an existing file at the same path
    fn create(&self, path: &Path, schema: SchemaRef) -> Result<Self::Sink>;
}
