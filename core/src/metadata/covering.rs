//! Bounding box coverings: struct columns holding the precomputed bounds of
//! each row's geometry, and the metadata entries pointing at them.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::{
    array::{Array, ArrayRef, AsArray, Float64Array, StructArray},
    buffer::NullBuffer,
    compute::cast,
    datatypes::{DataType, Field, Fields, Float64Type, Schema},
};
use geo::Rect;
use serde::{Deserialize, Serialize};

use crate::{error::GeoKeyError, util::extend_rect::rect_to_bounds};

/// Names of the four fields of a bbox struct column
pub const BBOX_FIELDS: [&str; 4] = ["xmin", "ymin", "xmax", "ymax"];

/// Conventional name of the bbox column of the primary geometry column
pub const BBOX_COLUMN: &str = "bbox";

/// A reference from a geometry column to the struct column covering it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBboxCovering", into = "RawBboxCovering")]
pub struct BboxCoveringRef {
    /// The struct column
    pub column: String,

    /// The fields of the struct column in `[xmin, ymin, xmax, ymax]` order
    pub fields: [String; 4],
}

impl BboxCoveringRef {
    /// A reference to a column using the conventional field names
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            fields: BBOX_FIELDS.map(String::from),
        }
    }
}

/// The serialized form: `{"xmin": ["bbox", "xmin"], ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawBboxCovering {
    xmin: [String; 2],
    ymin: [String; 2],
    xmax: [String; 2],
    ymax: [String; 2],
}

impl TryFrom<RawBboxCovering> for BboxCoveringRef {
    type Error = GeoKeyError;

    fn try_from(raw: RawBboxCovering) -> Result<Self, Self::Error> {
        let [c0, f0] = raw.xmin;
        let [c1, f1] = raw.ymin;
        let [c2, f2] = raw.xmax;
        let [c3, f3] = raw.ymax;
        if c0 != c1 || c0 != c2 || c0 != c3 {
            return Err(GeoKeyError::MetadataInconsistency(format!(
                "bbox covering refers to more than one column (`{c0}', `{c1}', `{c2}', `{c3}')"
            )));
        }
        Ok(BboxCoveringRef {
            column: c0,
            fields: [f0, f1, f2, f3],
        })
    }
}

impl From<BboxCoveringRef> for RawBboxCovering {
    fn from(c: BboxCoveringRef) -> Self {
        let [f0, f1, f2, f3] = c.fields;
        RawBboxCovering {
            xmin: [c.column.clone(), f0],
            ymin: [c.column.clone(), f1],
            xmax: [c.column.clone(), f2],
            ymax: [c.column, f3],
        }
    }
}

/// `true` if the data type is a struct with the four bbox fields, all of
/// them numeric
pub fn is_bbox_struct(data_type: &DataType) -> bool {
    match data_type {
        DataType::Struct(fields) => BBOX_FIELDS.iter().all(|name| {
            fields
                .iter()
                .any(|f| f.name() == name && f.data_type().is_floating())
        }),
        _ => false,
    }
}

/// Looks for a struct column covering `geometry_column`. Conventional names
/// (`bbox`, `<geometry_column>_bbox`) win over other struct columns that
/// happen to contain the four field names.
pub fn find_bbox_column(schema: &Schema, geometry_column: &str) -> Option<BboxCoveringRef> {
    let conventional = [BBOX_COLUMN.to_string(), format!("{geometry_column}_bbox")];
    let candidate = conventional
        .iter()
        .filter_map(|n| schema.field_with_name(n).ok())
        .find(|f| is_bbox_struct(f.data_type()))
        .or_else(|| {
            schema
                .fields()
                .iter()
                .map(|f| f.as_ref())
                .find(|f| is_bbox_struct(f.data_type()))
        })?;
    Some(BboxCoveringRef::new(candidate.name()))
}

/// Makes sure a covering refers to an existing struct column with the
/// referenced fields
pub fn check_covering(schema: &Schema, geometry_column: &str, covering: &BboxCoveringRef) -> Result<()> {
    let field = schema.field_with_name(&covering.column).map_err(|_| {
        GeoKeyError::MetadataInconsistency(format!(
            "the bbox covering of column `{geometry_column}' refers to column `{}', which \
             does not exist",
            covering.column
        ))
    })?;
    let DataType::Struct(fields) = field.data_type() else {
        return Err(GeoKeyError::MetadataInconsistency(format!(
            "the bbox covering of column `{geometry_column}' refers to column `{}', which \
             is not a struct",
            covering.column
        ))
        .into());
    };
    for name in &covering.fields {
        if !fields.iter().any(|f| f.name() == name) {
            return Err(GeoKeyError::MetadataInconsistency(format!(
                "the bbox covering of column `{geometry_column}' refers to field `{}.{name}', \
                 which does not exist",
                covering.column
            ))
            .into());
        }
    }
    Ok(())
}

/// The field of a bbox struct column
pub fn bbox_field(name: &str) -> Field {
    Field::new(name, DataType::Struct(bbox_fields()), true)
}

fn bbox_fields() -> Fields {
    BBOX_FIELDS
        .iter()
        .map(|n| Field::new(*n, DataType::Float64, false))
        .collect()
}

/// Builds a bbox struct column from per-row bounding boxes. Rows without a
/// bounding box (null or empty geometries) are null.
pub fn bbox_array(rects: &[Option<Rect>]) -> Result<StructArray> {
    let mut values: [Vec<f64>; 4] = Default::default();
    for r in rects {
        let b = r.as_ref().map(rect_to_bounds).unwrap_or([0.0; 4]);
        for (v, x) in values.iter_mut().zip(b) {
            v.push(x);
        }
    }
    let columns: Vec<ArrayRef> = values
        .into_iter()
        .map(|v| Arc::new(Float64Array::from(v)) as ArrayRef)
        .collect();
    let nulls = NullBuffer::from(rects.iter().map(Option::is_some).collect::<Vec<_>>());
    StructArray::try_new(bbox_fields(), columns, Some(nulls))
        .context("Unable to build bbox column")
}

/// Reads the bounds of every row from a bbox struct column
pub fn read_bbox_array(array: &dyn Array, covering: &BboxCoveringRef) -> Result<Vec<Option<[f64; 4]>>> {
    let Some(s) = array.as_struct_opt() else {
        bail!("Column `{}' is not a struct column", covering.column);
    };
    let mut children = Vec::with_capacity(4);
    for name in &covering.fields {
        let child = s
            .column_by_name(name)
            .with_context(|| format!("Column `{}' has no field `{name}'", covering.column))?;
        children.push(cast(child, &DataType::Float64).with_context(|| {
            format!("Field `{}.{name}' is not numeric", covering.column)
        })?);
    }
    let children: Vec<_> = children
        .iter()
        .map(|c| c.as_primitive::<Float64Type>())
        .collect();

    Ok((0..s.len())
        .map(|i| {
            if s.is_null(i) || children.iter().any(|c| c.is_null(i)) {
                None
            } else {
                Some([
                    children[0].value(i),
                    children[1].value(i),
                    children[2].value(i),
                    children[3].value(i),
                ])
            }
        })
        .collect())
}
