//! The geometry capabilities consumed by key derivation and metadata
//! computation. Everything else in this crate treats geometries as opaque
//! WKB values and only talks to them through [`GeometryEngine`].

use anyhow::{bail, Context, Result};
use arrow::{
    array::{Array, AsArray},
    datatypes::DataType,
};
use geo::{BoundingRect, Centroid, Geometry, Point, Rect};
use geozero::{
    wkb::{Ewkb, Wkb},
    CoordDimensions, ToGeo, ToWkb,
};

mod wkb;

pub use self::wkb::{WkbHeader, WkbKind};

/// Point and bounding box extraction on WKB-encoded geometries
pub trait GeometryEngine {
    /// Decodes a WKB or extended WKB value. Empty geometries are `None`.
    fn decode(&self, wkb: &[u8]) -> Result<Option<Geometry>>;

    /// Encodes a geometry as two-dimensional WKB
    fn encode(&self, geom: &Geometry) -> Result<Vec<u8>>;

    /// Returns the centroid of the geometry or `None` if it is empty
    fn centroid(&self, geom: &Geometry) -> Option<Point>;

    /// Returns the bounding box of the geometry or `None` if it is empty
    fn bbox(&self, geom: &Geometry) -> Option<Rect>;

    /// Returns the GeoParquet name of a WKB value's type including its
    /// dimension suffix, e.g. `Point Z`
    fn geometry_type(&self, wkb: &[u8]) -> Result<String> {
        Ok(WkbHeader::parse(wkb)?.type_name())
    }
}

/// A [`GeometryEngine`] backed by the `geo` and `geozero` crates. It holds no
/// state, so every session can simply create its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoEngine;

impl GeometryEngine for GeoEngine {
    fn decode(&self, wkb: &[u8]) -> Result<Option<Geometry>> {
        let header = WkbHeader::parse(wkb).context("Unable to decode WKB geometry")?;
        if header.empty {
            return Ok(None);
        }
        let geom = if header.extended {
            Ewkb(wkb.to_vec()).to_geo()
        } else {
            Wkb(wkb.to_vec()).to_geo()
        };
        geom.map(Some).context("Unable to decode WKB geometry")
    }

    fn encode(&self, geom: &Geometry) -> Result<Vec<u8>> {
        geom.to_wkb(CoordDimensions::xy())
            .context("Unable to encode geometry as WKB")
    }

    fn centroid(&self, geom: &Geometry) -> Option<Point> {
        geom.centroid()
    }

    fn bbox(&self, geom: &Geometry) -> Option<Rect> {
        geom.bounding_rect()
    }
}

/// Returns the raw WKB values of a geometry column. Nulls are `None`.
pub fn wkb_values(array: &dyn Array) -> Result<Vec<Option<&[u8]>>> {
    match array.data_type() {
        DataType::Binary => Ok(array.as_binary::<i32>().iter().collect()),
        DataType::LargeBinary => Ok(array.as_binary::<i64>().iter().collect()),
        t => bail!("Geometry column must contain WKB values but has type `{t}'"),
    }
}

/// Decodes all values of a geometry column. Nulls and empty geometries are
/// `None`.
pub fn decode_column<E: GeometryEngine>(engine: &E, array: &dyn Array) -> Result<Vec<Option<Geometry>>> {
    wkb_values(array)?
        .into_iter()
        .map(|v| match v {
            Some(wkb) => engine.decode(wkb),
            None => Ok(None),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use arrow::array::{BinaryArray, Int32Array, LargeBinaryArray};
    use assertor::{assert_that, EqualityAssertion, OptionAssertion};
    use geo::{coord, line_string, point, polygon, Geometry, MultiPoint};

    use super::{
        decode_column,
        wkb::tests::{empty_le, wkb_le},
        wkb_values, GeoEngine, GeometryEngine,
    };

    #[test]
    fn wkb_round_trip() {
        let engine = GeoEngine;
        let geom = Geometry::Point(point! { x: -122.4, y: 37.8 });
        let wkb = engine.encode(&geom).unwrap();
        assert_that!(engine.decode(&wkb).unwrap()).is_equal_to(Some(geom));
    }

    #[test]
    fn centroid_and_bbox_of_polygon() {
        let engine = GeoEngine;
        let geom = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 4.0, y: 0.0),
            (x: 4.0, y: 2.0),
            (x: 0.0, y: 2.0),
        ]);
        let c = engine.centroid(&geom).unwrap();
        assert_that!(c.x()).is_equal_to(2.0);
        assert_that!(c.y()).is_equal_to(1.0);

        let bbox = engine.bbox(&geom).unwrap();
        assert_that!(bbox.min()).is_equal_to(coord! { x: 0.0, y: 0.0 });
        assert_that!(bbox.max()).is_equal_to(coord! { x: 4.0, y: 2.0 });
        let wkb = engine.encode(&geom).unwrap();
        assert_that!(engine.geometry_type(&wkb).unwrap()).is_equal_to("Polygon".to_string());
    }

    #[test]
    fn empty_geometry_has_no_centroid() {
        let engine = GeoEngine;
        let geom = Geometry::MultiPoint(MultiPoint::<f64>(vec![]));
        assert_that!(engine.centroid(&geom)).is_none();
        assert_that!(engine.bbox(&geom)).is_none();
    }

    #[test]
    fn geometry_type_names() {
        let engine = GeoEngine;
        let ls = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)]);
        let wkb = engine.encode(&ls).unwrap();
        assert_that!(engine.geometry_type(&wkb).unwrap()).is_equal_to("LineString".to_string());

        let wkb = wkb_le(1001, None, &[1.0, 2.0, 3.0]);
        assert_that!(engine.geometry_type(&wkb).unwrap()).is_equal_to("Point Z".to_string());
    }

    #[test]
    fn empty_wkb_decodes_to_none() {
        let engine = GeoEngine;
        let point = wkb_le(1, None, &[f64::NAN, f64::NAN]);
        assert_that!(engine.decode(&point).unwrap()).is_none();
        assert_that!(engine.geometry_type(&point).unwrap()).is_equal_to("Point".to_string());

        for code in [2, 3, 6, 7] {
            assert_that!(engine.decode(&empty_le(code)).unwrap()).is_none();
        }

        let a = BinaryArray::from(vec![Some(point.as_slice()), Some(&empty_le(3)[..]), None]);
        let geoms = decode_column(&engine, &a).unwrap();
        assert!(geoms.iter().all(Option::is_none));
    }

    #[test]
    fn three_dimensional_wkb_keeps_xy() {
        let engine = GeoEngine;
        let iso = wkb_le(1001, None, &[-122.4, 37.8, 12.0]);
        assert_that!(engine.decode(&iso).unwrap())
            .is_equal_to(Some(Geometry::Point(point! { x: -122.4, y: 37.8 })));

        let ewkb = wkb_le(0xa000_0001, Some(4326), &[-122.4, 37.8, 12.0]);
        assert_that!(engine.decode(&ewkb).unwrap())
            .is_equal_to(Some(Geometry::Point(point! { x: -122.4, y: 37.8 })));
        assert_that!(engine.geometry_type(&ewkb).unwrap()).is_equal_to("Point Z".to_string());
    }

    #[test]
    fn decode_binary_columns() {
        let engine = GeoEngine;
        let wkb = engine
            .encode(&Geometry::Point(point! { x: 1.0, y: 2.0 }))
            .unwrap();
        let a = BinaryArray::from(vec![Some(wkb.as_slice()), None]);
        let geoms = decode_column(&engine, &a).unwrap();
        assert_that!(geoms.len()).is_equal_to(2);
        assert!(geoms[1].is_none());

        let a = LargeBinaryArray::from(vec![Some(wkb.as_slice())]);
        assert_that!(wkb_values(&a).unwrap()).is_equal_to(vec![Some(wkb.as_slice())]);

        assert!(wkb_values(&Int32Array::from(vec![1])).is_err());
    }

    #[test]
    fn garbage_is_not_wkb() {
        let engine = GeoEngine;
        assert!(engine.decode(&[0xff, 0x00, 0x12]).is_err());
    }
}
