use std::{
    collections::hash_map::Entry,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use arrow::{
    array::{AsArray, UInt32Array},
    compute::take_record_batch,
    record_batch::RecordBatch,
};
use itertools::Itertools;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::{
    analyze::string_keys,
    engine::GeometryEngine,
    error::{GeoKeyError, GroupFailure},
    metadata::stats::StatsAccumulator,
    preserve::{output_key_value, RewritePlan},
    storage::{Storage, TableSink},
};

use super::{OnError, PartitionDescriptor};

/// A partition file that was written successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionArtifact {
    /// The (possibly truncated and sanitized) key of the partition
    pub name: String,
    pub path: PathBuf,
    pub rows: u64,
}

/// The result of a partitioning run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSummary {
    /// Written partitions ordered by name
    pub artifacts: Vec<PartitionArtifact>,
}

impl PartitionSummary {
    pub fn rows(&self) -> u64 {
        self.artifacts.iter().map(|a| a.rows).sum()
    }
}

/// Behaviour of a [`PartitionWriter`] towards existing files and failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriterOptions {
    /// Replace existing partition files
    pub overwrite: bool,

    pub on_error: OnError,
}

struct Group<'a, K, E> {
    path: PathBuf,
    sink: Option<K>,
    stats: StatsAccumulator<'a, E>,
}

/// Distributes the rows of a stream of batches to one file per partition.
/// Files are opened when the first row of their partition arrives, after
/// checking that they do not exist yet (unless overwriting).
pub struct PartitionWriter<'a, S: Storage, E> {
    storage: &'a S,
    engine: &'a E,
    descriptor: &'a PartitionDescriptor,
    dir: PathBuf,
    plan: RewritePlan,
    key_value: Vec<(String, String)>,
    options: WriterOptions,
    groups: FxHashMap<String, Group<'a, S::Sink, E>>,
    failures: Vec<GroupFailure>,
}

impl<'a, S: Storage, E: GeometryEngine> PartitionWriter<'a, S, E> {
    /// Creates a writer. `plan` defines the layout and metadata of every
    /// partition file. `key_value` is the key/value metadata of the input,
    /// which is copied to every partition.
    pub fn new(
        storage: &'a S,
        engine: &'a E,
        descriptor: &'a PartitionDescriptor,
        dir: impl Into<PathBuf>,
        plan: RewritePlan,
        key_value: Vec<(String, String)>,
        options: WriterOptions,
    ) -> Self {
        Self {
            storage,
            engine,
            descriptor,
            dir: dir.into(),
            plan,
            key_value,
            options,
            groups: FxHashMap::default(),
            failures: Vec::new(),
        }
    }

    /// Checks up front that none of the given partitions' files exist. Lets
    /// fail-fast runs refuse before anything is written.
    pub fn check_artifacts<'n>(&self, names: impl IntoIterator<Item = &'n str>) -> Result<()> {
        if self.options.overwrite {
            return Ok(());
        }
        for name in names {
            let path = self.descriptor.artifact_path(&self.dir, name);
            if path.exists() {
                return Err(GeoKeyError::ArtifactExists(path).into());
            }
        }
        Ok(())
    }

    /// Writes the rows of a batch to their partitions
    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        let keys = batch
            .column_by_name(&self.descriptor.key_column)
            .with_context(|| format!("Key column `{}' is missing", self.descriptor.key_column))?;
        let keys = string_keys(keys.as_ref())?;

        let mut rows: FxHashMap<String, Vec<u32>> = FxHashMap::default();
        for (i, k) in keys.as_string::<i32>().iter().enumerate() {
            rows.entry(self.descriptor.partition_name(k))
                .or_default()
                .push(i as u32);
        }

        for (name, indices) in rows.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            let part = take_record_batch(batch, &UInt32Array::from(indices))
                .context("Unable to select partition rows")?;
            if let Err(err) = self.write_group(&name, &part) {
                self.fail(name, err)?;
            }
        }
        Ok(())
    }

    fn write_group(&mut self, name: &str, rows: &RecordBatch) -> Result<()> {
        let group = match self.groups.entry(name.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let path = self.descriptor.artifact_path(&self.dir, name);
                let sink = open_sink(self.storage, &self.plan, &path, self.options.overwrite)
                    .with_context(|| format!("Unable to create partition `{name}'"));
                let stats = StatsAccumulator::new(self.engine, self.plan.geometry_columns());
                let group = e.insert(Group {
                    path,
                    sink: None,
                    stats,
                });
                group.sink = Some(sink?);
                group
            }
        };

        // a failed group is not written to anymore
        let Some(sink) = group.sink.as_mut() else {
            return Ok(());
        };
        let out = self.plan.apply(rows)?;
        if self.plan.needs_stats() {
            group.stats.update(&out)?;
        }
        sink.write(&out)
    }

    /// Handles the failure of a partition according to the error mode
    fn fail(&mut self, name: String, err: anyhow::Error) -> Result<()> {
        let path = match self.groups.get_mut(&name) {
            Some(g) => {
                // drop the incomplete file
                if g.sink.take().is_some() {
                    let _ = fs::remove_file(&g.path);
                }
                g.path.clone()
            }
            None => self.descriptor.artifact_path(&self.dir, &name),
        };

        match self.options.on_error {
            OnError::FailFast => {
                self.discard();
                Err(err)
            }
            OnError::Continue => {
                warn!(partition = name.as_str(), "Partition failed: {err:#}");
                self.failures.push(GroupFailure {
                    key: name,
                    path,
                    message: format!("{err:#}"),
                });
                Ok(())
            }
        }
    }

    /// Stops writing and removes all partition files written so far
    pub fn abort(mut self) {
        self.discard();
    }

    /// Removes all files that have not been completed
    fn discard(&mut self) {
        for g in self.groups.values_mut() {
            if g.sink.take().is_some() {
                let _ = fs::remove_file(&g.path);
            }
        }
    }

    /// Completes all partition files, each with metadata computed from its
    /// own rows. In continue mode, returns [`GeoKeyError::PartialWrite`] if
    /// any partition failed.
    pub fn finish(mut self) -> Result<PartitionSummary> {
        let names: Vec<String> = self.groups.keys().sorted().cloned().collect();
        let mut artifacts = Vec::with_capacity(names.len());
        for name in names {
            let Some(mut group) = self.groups.remove(&name) else {
                continue;
            };
            let Some(sink) = group.sink.take() else {
                continue;
            };
            let path = group.path.clone();
            let result = self
                .plan
                .metadata(Some(group.stats.stats()))
                .and_then(|m| output_key_value(&self.key_value, &m))
                .and_then(|kv| sink.finish(kv));
            match result {
                Ok(rows) => {
                    debug!(partition = name.as_str(), rows, "Partition written");
                    artifacts.push(PartitionArtifact { name, path, rows });
                }
                Err(err) => {
                    let _ = fs::remove_file(&path);
                    self.groups.insert(name.clone(), group);
                    self.fail(name, err)?;
                }
            }
        }

        if !self.failures.is_empty() {
            return Err(GeoKeyError::PartialWrite {
                failures: self.failures,
                succeeded: artifacts.len(),
            }
            .into());
        }
        Ok(PartitionSummary { artifacts })
    }
}

fn open_sink<S: Storage>(storage: &S, plan: &RewritePlan, path: &Path, overwrite: bool) -> Result<S::Sink> {
    if !overwrite && path.exists() {
        return Err(GeoKeyError::ArtifactExists(path.to_path_buf()).into());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Unable to create directory `{}'", parent.display()))?;
    }
    storage.create(path, plan.schema())
}
