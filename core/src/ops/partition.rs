use std::{fs, path::Path};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::{
    analyze::DEFAULT_TOP_PARTITIONS,
    engine::GeometryEngine,
    error::GeoKeyError,
    keys::columns::KeyColumns,
    metadata::SpecVersion,
    partition::{
        writer::{PartitionSummary, PartitionWriter, WriterOptions},
        OnError, PartitionDescriptor,
    },
    preserve::{PlanOptions, Rewrite, RewritePlan},
    storage::Storage,
};

use super::{Input, Session};

/// A request to split a file into partitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRequest {
    pub descriptor: PartitionDescriptor,

    /// Replace existing partition files
    pub overwrite: bool,

    pub on_error: OnError,

    /// Partition even if the analysis blocks the layout
    pub force: bool,

    /// Do not analyze the layout before partitioning. Saves one pass over
    /// the key column.
    pub skip_analysis: bool,

    /// The metadata version of the partition files. Defaults to the input's
    /// version.
    pub version: Option<SpecVersion>,

    /// The geometry column of inputs without geo metadata
    pub geometry_column: Option<String>,
}

impl PartitionRequest {
    pub fn new(descriptor: PartitionDescriptor) -> Self {
        Self {
            descriptor,
            overwrite: false,
            on_error: OnError::default(),
            force: false,
            skip_analysis: false,
            version: None,
            geometry_column: None,
        }
    }
}

impl<S: Storage, E: GeometryEngine> Session<S, E> {
    /// Writes the rows of a file to one file per partition in `dir`. Unless
    /// skipped, the layout is analyzed first and refused if it is blocked
    /// by the skew policy (and `force` is not set). Each partition file gets
    /// geo metadata describing its own rows.
    #[instrument(
        level = "debug",
        skip(self, request),
        fields(key_column = request.descriptor.key_column.as_str())
    )]
    pub fn partition(
        &self,
        input: &Path,
        dir: &Path,
        request: &PartitionRequest,
    ) -> Result<PartitionSummary> {
        let descriptor = &request.descriptor;
        if dir.is_file() || dir == input {
            return Err(GeoKeyError::invalid(
                "output",
                format!("`{}' must be a directory", dir.display()),
            )
            .into());
        }

        let Input {
            source,
            schema,
            metadata,
            key_value,
            ..
        } = self.open_input(input, request.geometry_column.as_deref())?;
        descriptor.validate(&schema, input)?;
        if metadata.column(&descriptor.key_column).is_some() {
            return Err(GeoKeyError::invalid(
                "key_column",
                format!("`{}' is a geometry column", descriptor.key_column),
            )
            .into());
        }

        let mut names = Vec::new();
        if !request.skip_analysis {
            let counter =
                self.count_column(input, &descriptor.key_column, descriptor.prefix_length)?;
            names = counter
                .keys()
                .map(|k| descriptor.partition_name(k))
                .collect();
            counter
                .finish(&self.config.skew, DEFAULT_TOP_PARTITIONS)
                .enforce(request.force)?;
        }

        let mut key_value = key_value;
        let mut options = PlanOptions::new(request.version.unwrap_or(metadata.version()));
        if !descriptor.retains_key_column() {
            options.drop_columns.push(descriptor.key_column.clone());
            let mut key_columns = KeyColumns::read(&key_value);
            if key_columns.remove(&descriptor.key_column).is_some() {
                key_columns.write_to(&mut key_value)?;
            }
        }
        let plan = RewritePlan::new(Rewrite::RowsFiltered, &schema, &metadata, &options)?;

        let mut writer = PartitionWriter::new(
            &self.storage,
            &self.engine,
            descriptor,
            dir,
            plan,
            key_value,
            WriterOptions {
                overwrite: request.overwrite,
                on_error: request.on_error,
            },
        );
        if request.on_error == OnError::FailFast {
            writer.check_artifacts(names.iter().map(String::as_str))?;
        }

        fs::create_dir_all(dir)
            .with_context(|| format!("Unable to create directory `{}'", dir.display()))?;
        debug!(partitions = names.len(), dir = %dir.display(), "Writing partitions");
        for batch in source {
            if let Err(err) = batch.and_then(|b| writer.write_batch(&b)) {
                writer.abort();
                return Err(err);
            }
        }

        let summary = writer.finish()?;
        info!(
            partitions = summary.artifacts.len(),
            rows = summary.rows(),
            dir = %dir.display(),
            layout = %descriptor.layout,
            "Partitioned file"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use assertor::{assert_that, EqualityAssertion};
    use tempdir::TempDir;

    use crate::{
        analyze::SkewPolicy,
        config::Config,
        error::GeoKeyError,
        keys::{columns::KeyColumns, KeyScheme, QUADKEY_COLUMN},
        ops::{test_support::write_points, AddKeyOptions, Session},
        partition::{Layout, OnError, PartitionDescriptor},
        storage::{parquet::ParquetStorage, Storage, TableSource},
    };

    use super::PartitionRequest;

    fn keyed_input(dir: &TempDir, points: &[(f64, f64)]) -> std::path::PathBuf {
        let input = dir.path().join("in.parquet");
        let keyed = dir.path().join("keyed.parquet");
        write_points(&input, points, None);
        Session::new(Config::default())
            .unwrap()
            .add_spatial_key(
                &input,
                &keyed,
                KeyScheme::Quadkey {
                    resolution: 2,
                    use_centroid: true,
                },
                &AddKeyOptions::default(),
            )
            .unwrap();
        keyed
    }

    #[test]
    fn too_many_partitions_are_refused_unless_forced() {
        let dir = TempDir::new("geokey_ops_partition").unwrap();
        let keyed = keyed_input(&dir, &[(10.0, 10.0), (-10.0, 10.0), (-10.0, -10.0)]);
        let out = dir.path().join("parts");

        let config = Config {
            skew: SkewPolicy {
                max_partitions: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let session = Session::new(config).unwrap();
        let request = PartitionRequest::new(PartitionDescriptor::new(QUADKEY_COLUMN));
        let err = session.partition(&keyed, &out, &request).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GeoKeyError>(),
            Some(GeoKeyError::LayoutRejected { .. })
        ));
        assert!(err.to_string().starts_with("Partition layout rejected: 3 partitions"));
        assert!(!out.exists());

        let request = PartitionRequest {
            force: true,
            ..request
        };
        let summary = session.partition(&keyed, &out, &request).unwrap();
        assert_that!(summary.artifacts.len()).is_equal_to(3);
        assert_that!(summary.rows()).is_equal_to(3);
    }

    #[test]
    fn fail_fast_checks_all_artifacts_first() {
        let dir = TempDir::new("geokey_ops_partition").unwrap();
        let keyed = keyed_input(&dir, &[(10.0, 10.0), (-10.0, -10.0)]);
        let out = dir.path().join("parts");

        let session = Session::new(Config::default()).unwrap();
        let request = PartitionRequest::new(PartitionDescriptor::new(QUADKEY_COLUMN));
        let summary = session.partition(&keyed, &out, &request).unwrap();
        assert_that!(summary.artifacts.len()).is_equal_to(2);

        // remove one partition so that only the other one exists
        std::fs::remove_file(&summary.artifacts[0].path).unwrap();
        let err = session.partition(&keyed, &out, &request).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GeoKeyError>(),
            Some(GeoKeyError::ArtifactExists(_))
        ));
        assert!(!summary.artifacts[0].path.exists());

        let request = PartitionRequest {
            on_error: OnError::Continue,
            ..request
        };
        let err = session.partition(&keyed, &out, &request).unwrap_err();
        match err.downcast_ref::<GeoKeyError>() {
            Some(GeoKeyError::PartialWrite {
                failures,
                succeeded,
            }) => {
                assert_that!(failures.len()).is_equal_to(1);
                assert_that!(*succeeded).is_equal_to(1);
            }
            e => panic!("Unexpected error: {e:?}"),
        }
        assert!(summary.artifacts[0].path.exists());
    }

    #[test]
    fn geometry_column_is_not_a_key() {
        let dir = TempDir::new("geokey_ops_partition").unwrap();
        let keyed = keyed_input(&dir, &[(10.0, 10.0)]);
        let err = Session::new(Config::default())
            .unwrap()
            .partition(
                &keyed,
                &dir.path().join("parts"),
                &PartitionRequest::new(PartitionDescriptor::new("geometry")),
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GeoKeyError>(),
            Some(GeoKeyError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn dropped_key_column_is_forgotten() {
        let dir = TempDir::new("geokey_ops_partition").unwrap();
        let keyed = keyed_input(&dir, &[(10.0, 10.0), (-10.0, -10.0)]);
        let storage = ParquetStorage::new(&Config::default());
        let session = Session::new(Config::default()).unwrap();
        let scheme_of = |path: &std::path::Path| {
            KeyColumns::read(storage.open(path).unwrap().key_value_metadata())
                .scheme(QUADKEY_COLUMN)
        };
        assert!(scheme_of(&keyed).is_some());

        let request = PartitionRequest::new(PartitionDescriptor::new(QUADKEY_COLUMN));
        let flat = session
            .partition(&keyed, &dir.path().join("flat"), &request)
            .unwrap();
        for a in &flat.artifacts {
            assert!(scheme_of(&a.path).is_none());
        }

        let request = PartitionRequest::new(PartitionDescriptor {
            layout: Layout::Hive,
            ..PartitionDescriptor::new(QUADKEY_COLUMN)
        });
        let hive = session
            .partition(&keyed, &dir.path().join("hive"), &request)
            .unwrap();
        for a in &hive.artifacts {
            assert_that!(scheme_of(&a.path)).is_equal_to(Some(KeyScheme::Quadkey {
                resolution: 2,
                use_centroid: true,
            }));
        }
    }
}
