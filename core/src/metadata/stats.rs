use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use geo::Rect;

use crate::{
    engine::{wkb_values, GeometryEngine},
    util::extend_rect::{rect_to_bounds, ExtendRect},
};

/// Bounding box and geometry types of one geometry column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnStats {
    pub bbox: Option<Rect>,
    pub geometry_types: BTreeSet<String>,
    pub rows: u64,
}

impl ColumnStats {
    /// The bounding box as `[xmin, ymin, xmax, ymax]`
    pub fn bounds(&self) -> Option<[f64; 4]> {
        self.bbox.as_ref().map(rect_to_bounds)
    }
}

/// Computes [`ColumnStats`] of geometry columns over a stream of batches
pub struct StatsAccumulator<'a, E> {
    engine: &'a E,
    stats: BTreeMap<String, ColumnStats>,
}

impl<'a, E: GeometryEngine> StatsAccumulator<'a, E> {
    /// Creates an accumulator for the given geometry columns
    pub fn new(engine: &'a E, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            engine,
            stats: columns
                .into_iter()
                .map(|c| (c.into(), ColumnStats::default()))
                .collect(),
        }
    }

    /// Adds all geometries of a batch. Columns missing from the batch are
    /// ignored.
    pub fn update(&mut self, batch: &RecordBatch) -> Result<()> {
        for (name, stats) in self.stats.iter_mut() {
            let Some(array) = batch.column_by_name(name) else {
                continue;
            };
            for wkb in wkb_values(array.as_ref())?.into_iter().flatten() {
                let invalid = || format!("Invalid geometry in column `{name}'");
                let geometry_type = self.engine.geometry_type(wkb).with_context(invalid)?;
                // empty geometries have a type but no extent
                if let Some(geom) = self.engine.decode(wkb).with_context(invalid)? {
                    if let Some(r) = self.engine.bbox(&geom) {
                        stats.bbox.extend_rect(&r);
                    }
                }
                stats.geometry_types.insert(geometry_type);
            }
            stats.rows += batch.num_rows() as u64;
        }
        Ok(())
    }

    /// The statistics gathered so far
    pub fn stats(&self) -> &BTreeMap<String, ColumnStats> {
        &self.stats
    }

    pub fn finish(self) -> BTreeMap<String, ColumnStats> {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::BinaryArray,
        datatypes::{DataType, Field, Schema},
        record_batch::RecordBatch,
    };
    use assertor::{assert_that, EqualityAssertion};
    use geo::{point, polygon, Geometry};

    use crate::engine::{GeoEngine, GeometryEngine};

    use super::StatsAccumulator;

    fn batch(geoms: &[Option<Geometry>]) -> RecordBatch {
        let engine = GeoEngine;
        let wkb: Vec<Option<Vec<u8>>> = geoms
            .iter()
            .map(|g| g.as_ref().map(|g| engine.encode(g).unwrap()))
            .collect();
        let a = BinaryArray::from(wkb.iter().map(|w| w.as_deref()).collect::<Vec<_>>());
        let schema = Schema::new(vec![Field::new("geometry", DataType::Binary, true)]);
        RecordBatch::try_new(Arc::new(schema), vec![Arc::new(a)]).unwrap()
    }

    #[test]
    fn accumulates_over_batches() {
        let engine = GeoEngine;
        let mut acc = StatsAccumulator::new(&engine, ["geometry", "missing"]);
        acc.update(&batch(&[
            Some(Geometry::Point(point! { x: 1.0, y: 5.0 })),
            None,
        ]))
        .unwrap();
        acc.update(&batch(&[Some(Geometry::Polygon(polygon![
            (x: -2.0, y: 0.0),
            (x: 0.0, y: 0.0),
            (x: 0.0, y: 2.0),
        ]))]))
        .unwrap();

        let stats = acc.finish();
        let s = &stats["geometry"];
        assert_that!(s.bounds()).is_equal_to(Some([-2.0, 0.0, 1.0, 5.0]));
        assert_that!(s.geometry_types.iter().cloned().collect::<Vec<_>>())
            .is_equal_to(vec!["Point".to_string(), "Polygon".to_string()]);
        assert_that!(s.rows).is_equal_to(3);
        assert_that!(stats["missing"].bounds()).is_equal_to(None);
    }

    #[test]
    fn empty_and_three_dimensional_geometries() {
        let engine = GeoEngine;
        let mut empty_point = vec![1];
        empty_point.extend(1u32.to_le_bytes());
        empty_point.extend(f64::NAN.to_le_bytes());
        empty_point.extend(f64::NAN.to_le_bytes());
        let mut point_z = vec![1];
        point_z.extend(1001u32.to_le_bytes());
        for c in [3.0f64, 4.0, 100.0] {
            point_z.extend(c.to_le_bytes());
        }

        let a = BinaryArray::from(vec![Some(empty_point.as_slice()), Some(point_z.as_slice())]);
        let schema = Schema::new(vec![Field::new("geometry", DataType::Binary, true)]);
        let batch = RecordBatch::try_new(Arc::new(schema), vec![Arc::new(a)]).unwrap();

        let mut acc = StatsAccumulator::new(&engine, ["geometry"]);
        acc.update(&batch).unwrap();
        let stats = acc.finish();
        let s = &stats["geometry"];
        assert_that!(s.bounds()).is_equal_to(Some([3.0, 4.0, 3.0, 4.0]));
        assert_that!(s.geometry_types.iter().cloned().collect::<Vec<_>>())
            .is_equal_to(vec!["Point".to_string(), "Point Z".to_string()]);
        assert_that!(s.rows).is_equal_to(2);
    }
}
