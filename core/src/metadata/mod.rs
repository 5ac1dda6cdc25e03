//! The versioned geo metadata of a file. Depending on the target version
//! the metadata is stored as a JSON document in the file's key/value
//! metadata under the `geo` key, as native type annotations on the geometry
//! columns, or both.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

use anyhow::{Context, Result};
use arrow::datatypes::Schema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GeoKeyError;

use self::{covering::BboxCoveringRef, crs::Crs};

pub mod covering;
pub mod crs;
pub mod native;
pub mod stats;

/// The key/value metadata key holding the JSON envelope
pub const GEO_METADATA_KEY: &str = "geo";

/// Names under which geometry columns are found in files without geo
/// metadata
pub const GEOMETRY_COLUMN_CANDIDATES: [&str; 4] = ["geometry", "geom", "wkb_geometry", "the_geom"];

/// The supported metadata layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecVersion {
    V1_0,
    V1_1,
    V2_0,
    ParquetGeoOnly,
}

/// What a [`SpecVersion`] writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionProfile {
    /// Whether the JSON envelope is written
    pub envelope: bool,

    /// Whether geometry columns carry a native type annotation
    pub native: bool,

    /// The version recorded in the envelope
    pub version: Option<&'static str>,

    /// Whether bbox coverings can be recorded
    pub covering: bool,
}

impl SpecVersion {
    pub const ALL: [SpecVersion; 4] = [
        SpecVersion::V1_0,
        SpecVersion::V1_1,
        SpecVersion::V2_0,
        SpecVersion::ParquetGeoOnly,
    ];

    pub fn profile(&self) -> VersionProfile {
        match self {
            SpecVersion::V1_0 => VersionProfile {
                envelope: true,
                native: false,
                version: Some("1.0.0"),
                covering: false,
            },
            SpecVersion::V1_1 => VersionProfile {
                envelope: true,
                native: false,
                version: Some("1.1.0"),
                covering: true,
            },
            SpecVersion::V2_0 => VersionProfile {
                envelope: true,
                native: true,
                version: Some("2.0.0"),
                covering: true,
            },
            SpecVersion::ParquetGeoOnly => VersionProfile {
                envelope: false,
                native: true,
                version: None,
                covering: false,
            },
        }
    }

    /// Maps a version string found in an envelope to a layout. Pre-1.0
    /// drafts are treated like 1.0.
    pub fn from_envelope_version(v: &str) -> Result<Self> {
        if v.starts_with("1.0") || v.starts_with("0.") {
            Ok(SpecVersion::V1_0)
        } else if v.starts_with("1.") {
            Ok(SpecVersion::V1_1)
        } else if v.starts_with("2.") {
            Ok(SpecVersion::V2_0)
        } else {
            Err(GeoKeyError::MetadataInconsistency(format!(
                "unsupported geo metadata version `{v}'"
            ))
            .into())
        }
    }
}

impl FromStr for SpecVersion {
    type Err = GeoKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1.0" | "1.0.0" => Ok(SpecVersion::V1_0),
            "1.1" | "1.1.0" => Ok(SpecVersion::V1_1),
            "2.0" | "2.0.0" => Ok(SpecVersion::V2_0),
            "parquet-geo-only" | "parquet_geo_only" => Ok(SpecVersion::ParquetGeoOnly),
            _ => Err(GeoKeyError::invalid(
                "version",
                format!("unknown version `{s}'. Use one of 1.0, 1.1, 2.0, parquet-geo-only."),
            )),
        }
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecVersion::V1_0 => f.write_str("1.0"),
            SpecVersion::V1_1 => f.write_str("1.1"),
            SpecVersion::V2_0 => f.write_str("2.0"),
            SpecVersion::ParquetGeoOnly => f.write_str("parquet-geo-only"),
        }
    }
}

/// How geometries of a column are encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Encoding {
    Wkb,

    /// Any other encoding name, kept as found
    Other(String),
}

impl From<String> for Encoding {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("wkb") {
            Encoding::Wkb
        } else {
            Encoding::Other(s)
        }
    }
}

impl From<Encoding> for String {
    fn from(e: Encoding) -> Self {
        match e {
            Encoding::Wkb => "WKB".to_string(),
            Encoding::Other(s) => s,
        }
    }
}

/// Additional coverings of a geometry column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Covering {
    pub bbox: BboxCoveringRef,

    /// Other covering kinds, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata of one geometry column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoColumnMetadata {
    pub encoding: Encoding,

    /// `None` means OGC:CRS84
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<Crs>,

    #[serde(default)]
    pub geometry_types: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covering: Option<Covering>,

    /// Keys not interpreted here (e.g. `orientation`, `edges`, `epoch`)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GeoColumnMetadata {
    /// Metadata of a WKB column whose geometry types and extent are not
    /// known yet
    pub fn wkb() -> Self {
        Self {
            encoding: Encoding::Wkb,
            crs: None,
            geometry_types: BTreeSet::new(),
            bbox: None,
            covering: None,
            extra: Map::new(),
        }
    }

    /// The bbox covering reference, if any
    pub fn bbox_covering(&self) -> Option<&BboxCoveringRef> {
        self.covering.as_ref().map(|c| &c.bbox)
    }
}

/// The serialized form of [`GeoFileMetadata`]
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: String,
    primary_column: String,
    columns: BTreeMap<String, GeoColumnMetadata>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Geo metadata of a whole file. Instances are always valid: the primary
/// column is one of the described columns and bboxes are well-formed.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFileMetadata {
    version: SpecVersion,
    primary_column: String,
    columns: BTreeMap<String, GeoColumnMetadata>,
    extra: Map<String, Value>,
}

impl GeoFileMetadata {
    /// Creates and validates file metadata
    pub fn new(
        version: SpecVersion,
        primary_column: impl Into<String>,
        columns: BTreeMap<String, GeoColumnMetadata>,
    ) -> Result<Self> {
        let m = Self {
            version,
            primary_column: primary_column.into(),
            columns,
            extra: Map::new(),
        };
        m.validate()?;
        Ok(m)
    }

    /// Metadata for a file with a single WKB geometry column and nothing
    /// known about it yet
    pub fn fresh(version: SpecVersion, primary_column: impl Into<String>) -> Self {
        let primary_column = primary_column.into();
        let mut columns = BTreeMap::new();
        columns.insert(primary_column.clone(), GeoColumnMetadata::wkb());
        Self {
            version,
            primary_column,
            columns,
            extra: Map::new(),
        }
    }

    /// Copies the top-level keys not interpreted here from another instance
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.columns.contains_key(&self.primary_column) {
            return Err(GeoKeyError::MetadataInconsistency(format!(
                "primary column `{}' is not among the described columns",
                self.primary_column
            ))
            .into());
        }
        for (name, c) in &self.columns {
            if let Some(b) = c.bbox {
                if b.iter().any(|v| !v.is_finite()) || b[1] > b[3] {
                    return Err(GeoKeyError::MetadataInconsistency(format!(
                        "bbox of column `{name}' is malformed: {b:?}"
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    pub fn version(&self) -> SpecVersion {
        self.version
    }

    pub fn primary_column(&self) -> &str {
        &self.primary_column
    }

    pub fn columns(&self) -> &BTreeMap<String, GeoColumnMetadata> {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&GeoColumnMetadata> {
        self.columns.get(name)
    }

    /// The metadata of the primary geometry column
    pub fn primary(&self) -> &GeoColumnMetadata {
        // validated on construction
        &self.columns[&self.primary_column]
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Renders the JSON envelope. Returns `None` for versions without one.
    pub fn to_json(&self) -> Result<Option<String>> {
        let profile = self.version.profile();
        let Some(version) = profile.version.filter(|_| profile.envelope) else {
            return Ok(None);
        };
        let envelope = Envelope {
            version: version.to_string(),
            primary_column: self.primary_column.clone(),
            columns: self.columns.clone(),
            extra: self.extra.clone(),
        };
        Ok(Some(
            serde_json::to_string(&envelope).context("Unable to serialize geo metadata")?,
        ))
    }

    /// The key/value entry to store in a file, if the version has one
    pub fn to_key_value(&self) -> Result<Option<(String, String)>> {
        Ok(self
            .to_json()?
            .map(|json| (GEO_METADATA_KEY.to_string(), json)))
    }

    /// Parses a JSON envelope
    pub fn from_json(json: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(json)
            .map_err(|e| GeoKeyError::MetadataInconsistency(format!("malformed geo metadata: {e}")))?;
        let m = Self {
            version: SpecVersion::from_envelope_version(&envelope.version)?,
            primary_column: envelope.primary_column,
            columns: envelope.columns,
            extra: envelope.extra,
        };
        m.validate()?;
        Ok(m)
    }

    /// Reads the metadata of a file from its schema and key/value metadata.
    /// The envelope takes precedence. Files without one but with native
    /// geometry columns are [`SpecVersion::ParquetGeoOnly`]. Returns `None`
    /// for files without any geo metadata.
    pub fn read(schema: &Schema, key_value: &[(String, String)]) -> Result<Option<Self>> {
        if let Some((_, json)) = key_value.iter().find(|(k, _)| k == GEO_METADATA_KEY) {
            return Self::from_json(json).map(Some);
        }

        let native = native::native_columns(schema)?;
        let Some((first, _)) = native.first() else {
            return Ok(None);
        };
        let primary_column = first.clone();
        let columns = native
            .into_iter()
            .map(|(name, crs)| {
                (
                    name,
                    GeoColumnMetadata {
                        crs,
                        ..GeoColumnMetadata::wkb()
                    },
                )
            })
            .collect();
        Self::new(SpecVersion::ParquetGeoOnly, primary_column, columns).map(Some)
    }

    /// Checks that the metadata matches a schema: all described columns
    /// exist and all coverings refer to existing struct columns
    pub fn check_schema(&self, schema: &Schema) -> Result<()> {
        for (name, c) in &self.columns {
            if schema.field_with_name(name).is_err() {
                return Err(GeoKeyError::MetadataInconsistency(format!(
                    "geometry column `{name}' does not exist"
                ))
                .into());
            }
            if let Some(cov) = c.bbox_covering() {
                covering::check_covering(schema, name, cov)?;
            }
        }
        Ok(())
    }

    /// Deconstructs the metadata for building a derived instance
    pub fn into_parts(
        self,
    ) -> (
        SpecVersion,
        String,
        BTreeMap<String, GeoColumnMetadata>,
        Map<String, Value>,
    ) {
        (self.version, self.primary_column, self.columns, self.extra)
    }
}

/// Finds the geometry column of a file without geo metadata by its
/// conventional name
pub fn guess_geometry_column(schema: &Schema) -> Option<String> {
    GEOMETRY_COLUMN_CANDIDATES
        .iter()
        .filter_map(|n| schema.field_with_name(n).ok())
        .find(|f| native::is_wkb_type(f.data_type()))
        .map(|f| f.name().clone())
}
