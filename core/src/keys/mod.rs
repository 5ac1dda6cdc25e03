//! Spatial keys derived from row geometries. All derivations are pure
//! functions of the scheme parameters and the geometry, so re-running them
//! on the same data always reproduces the same keys and therefore the same
//! partition layout.

use std::{fmt, str::FromStr};

use anyhow::Result;
use geo::{Geometry, Point};
use serde::{Deserialize, Serialize};

use crate::{engine::GeometryEngine, error::GeoKeyError};

pub mod columns;
pub mod h3;
pub mod hilbert;
pub mod kdtree;
pub mod quadkey;

/// A string consisting only of `0` and `1` characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitString(String);

impl BitString {
    /// Renders the lowest `count` bits of `bits` (most significant first)
    /// after a leading `0`
    pub(crate) fn from_bits(bits: u32, count: u8) -> Self {
        let mut s = String::with_capacity(count as usize + 1);
        s.push('0');
        for i in (0..count).rev() {
            s.push(if (bits >> i) & 1 == 1 { '1' } else { '0' });
        }
        BitString(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for BitString {
    type Err = GeoKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.chars().all(|c| c == '0' || c == '1') {
            Ok(BitString(s.to_string()))
        } else {
            Err(GeoKeyError::invalid(
                "bits",
                format!("`{s}' must only contain `0' and `1'"),
            ))
        }
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A spatial key of one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpatialKey {
    /// Rank along a Hilbert curve. Only used for ordering.
    Hilbert(u64),

    /// A Web Mercator quadtree tile
    Quadkey { resolution: u8, value: String },

    /// An H3 cell
    H3Cell { resolution: u8, value: String },

    /// A KD-tree partition path
    KdPath { iterations: u8, bits: BitString },
}

impl SpatialKey {
    /// The value stored in a key column
    pub fn to_column_value(&self) -> String {
        match self {
            SpatialKey::Hilbert(rank) => rank.to_string(),
            SpatialKey::Quadkey { value, .. } | SpatialKey::H3Cell { value, .. } => value.clone(),
            SpatialKey::KdPath { bits, .. } => bits.to_string(),
        }
    }
}

/// Default name of the column holding quadkeys
pub const QUADKEY_COLUMN: &str = "quadkey";

/// Default name of the column holding H3 cells
pub const H3_COLUMN: &str = "h3_cell";

/// Default name of the column holding KD-tree paths
pub const KDTREE_COLUMN: &str = "kdtree_cell";

/// A partition key scheme with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum KeyScheme {
    /// Quadkeys of the given resolution (0–23). If `use_centroid` is
    /// `false` and a bbox column is available, the centre of the bbox is
    /// used instead of the geometry's centroid.
    Quadkey { resolution: u8, use_centroid: bool },

    /// H3 cells of the given resolution (0–15) containing the centroid
    H3 { resolution: u8 },

    /// KD-tree paths after the given number of iterations (1–20)
    KdTree { iterations: u8 },
}

impl KeyScheme {
    /// Checks the scheme's parameters
    pub fn validate(&self) -> Result<()> {
        match *self {
            KeyScheme::Quadkey { resolution, .. } => quadkey::check_resolution(resolution),
            KeyScheme::H3 { resolution } => h3::resolution(resolution).map(|_| ()),
            KeyScheme::KdTree { iterations } => kdtree::KdTreeBuilder::new(iterations).map(|_| ()),
        }
    }

    /// The conventional name of the key column
    pub fn default_column_name(&self) -> &'static str {
        match self {
            KeyScheme::Quadkey { .. } => QUADKEY_COLUMN,
            KeyScheme::H3 { .. } => H3_COLUMN,
            KeyScheme::KdTree { .. } => KDTREE_COLUMN,
        }
    }

    /// `true` if keys can be computed row by row. KD-tree keys depend on
    /// all other rows.
    pub fn is_row_local(&self) -> bool {
        !matches!(self, KeyScheme::KdTree { .. })
    }

    /// `true` if the keys of this scheme may be truncated to a prefix for
    /// coarser grouping. KD-tree keys already encode their depth.
    pub fn supports_prefix(&self) -> bool {
        self.is_row_local()
    }
}

/// Derives keys of row-local schemes one geometry at a time
pub struct RowKeyDeriver<'a, E> {
    scheme: KeyScheme,
    engine: &'a E,
}

impl<'a, E: GeometryEngine> RowKeyDeriver<'a, E> {
    /// Creates a deriver for a row-local scheme
    pub fn new(scheme: KeyScheme, engine: &'a E) -> Result<Self> {
        if !scheme.is_row_local() {
            return Err(GeoKeyError::invalid(
                "scheme",
                "KD-tree keys depend on the whole dataset and cannot be derived row by row",
            )
            .into());
        }
        scheme.validate()?;
        Ok(Self { scheme, engine })
    }

    /// Computes the key of a single geometry. `bbox` is the precomputed
    /// bounding box of the row if the input has a bbox column. Returns
    /// `None` for empty geometries.
    pub fn derive(&self, geom: &Geometry, bbox: Option<[f64; 4]>) -> Result<Option<SpatialKey>> {
        match self.scheme {
            KeyScheme::Quadkey {
                resolution,
                use_centroid,
            } => {
                let p = match bbox {
                    Some(b) if !use_centroid => Some(bbox_center(b)),
                    _ => self.engine.centroid(geom),
                };
                p.map(|p| {
                    anyhow::Ok(SpatialKey::Quadkey {
                        resolution,
                        value: quadkey::quadkey(p.x(), p.y(), resolution)?,
                    })
                })
                .transpose()
            }

            KeyScheme::H3 { resolution } => {
                let res = h3::resolution(resolution)?;
                self.engine
                    .centroid(geom)
                    .map(|p| {
                        anyhow::Ok(SpatialKey::H3Cell {
                            resolution,
                            value: h3::h3_cell(p.x(), p.y(), res)?,
                        })
                    })
                    .transpose()
            }

            KeyScheme::KdTree { .. } => unreachable!("rejected in RowKeyDeriver::new"),
        }
    }
}

/// The centre of a `[xmin, ymin, xmax, ymax]` box
pub fn bbox_center(b: [f64; 4]) -> Point {
    Point::new((b[0] + b[2]) / 2.0, (b[1] + b[3]) / 2.0)
}
