//! Ranks along a Hilbert space-filling curve laid over the extent of a
//! dataset. Sorting rows by their rank places spatially close rows next to
//! each other, which is what makes row-group statistics useful for spatial
//! pruning. Ranks only define an order and are never used as partition keys.

use anyhow::Result;

use crate::error::GeoKeyError;

/// Bits per axis used when no order is requested explicitly
pub const DEFAULT_ORDER: u8 = 16;

/// Maximum bits per axis. Two axes of 32 bits fill a `u64` rank.
pub const MAX_ORDER: u8 = 32;

/// Checks that the number of bits per axis is supported
pub fn check_order(order: u8) -> Result<()> {
    if order == 0 || order > MAX_ORDER {
        return Err(GeoKeyError::invalid(
            "order",
            format!("Hilbert order must be between 1 and {MAX_ORDER}, got {order}"),
        )
        .into());
    }
    Ok(())
}

/// A Hilbert curve of a given order over a fixed extent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HilbertCurve {
    extent: [f64; 4],
    order: u8,
}

impl HilbertCurve {
    /// Creates a curve over `extent` (`[xmin, ymin, xmax, ymax]`) with
    /// `2^order` cells per axis
    pub fn new(extent: [f64; 4], order: u8) -> Result<Self> {
        check_order(order)?;
        if extent.iter().any(|v| !v.is_finite()) || extent[0] > extent[2] || extent[1] > extent[3]
        {
            return Err(GeoKeyError::invalid(
                "extent",
                format!("not a valid bounding box: {extent:?}"),
            )
            .into());
        }
        Ok(Self { extent, order })
    }

    /// The extent the curve covers
    pub fn extent(&self) -> [f64; 4] {
        self.extent
    }

    /// Returns the rank of the cell containing the given point. Points
    /// outside the extent are clamped to its border.
    pub fn rank(&self, x: f64, y: f64) -> u64 {
        let cx = self.cell(x, self.extent[0], self.extent[2]);
        let cy = self.cell(y, self.extent[1], self.extent[3]);
        xy2d(self.order, cx, cy)
    }

    fn cell(&self, v: f64, min: f64, max: f64) -> u64 {
        let width = max - min;
        if width <= 0.0 || !v.is_finite() {
            return 0;
        }
        let cells = (1u64 << self.order) as f64;
        let max_cell = (1u64 << self.order) - 1;
        let c = ((v - min) / width * cells).floor();
        if c <= 0.0 {
            0
        } else {
            (c as u64).min(max_cell)
        }
    }
}

/// Maps a cell of a `2^order` x `2^order` grid to its distance along the
/// Hilbert curve
fn xy2d(order: u8, mut x: u64, mut y: u64) -> u64 {
    let n: u64 = 1u64 << order;
    let mut d: u64 = 0;
    let mut s = n >> 1;
    while s > 0 {
        let rx = u64::from(x & s > 0);
        let ry = u64::from(y & s > 0);
        d += s * s * ((3 * rx) ^ ry);

        // rotate the quadrant
        if ry == 0 {
            if rx == 1 {
                x = n - 1 - x;
                y = n - 1 - y;
            }
            std::mem::swap(&mut x, &mut y);
        }

        s >>= 1;
    }
    d
}

#[cfg(test)]
mod tests {
    use assertor::{assert_that, EqualityAssertion};
    use rustc_hash::FxHashMap;

    use crate::error::GeoKeyError;

    use super::{xy2d, HilbertCurve, DEFAULT_ORDER};

    #[test]
    fn first_order_curve() {
        assert_that!(xy2d(1, 0, 0)).is_equal_to(0);
        assert_that!(xy2d(1, 0, 1)).is_equal_to(1);
        assert_that!(xy2d(1, 1, 1)).is_equal_to(2);
        assert_that!(xy2d(1, 1, 0)).is_equal_to(3);
    }

    /// Every cell gets a distinct rank and cells with consecutive ranks are
    /// neighbours
    #[test]
    fn ranks_form_a_continuous_path() {
        let order = 4;
        let n = 1u64 << order;
        let mut cells = FxHashMap::default();
        for x in 0..n {
            for y in 0..n {
                assert!(cells.insert(xy2d(order, x, y), (x, y)).is_none());
            }
        }
        assert_that!(cells.len() as u64).is_equal_to(n * n);
        for d in 1..n * n {
            let (x0, y0) = cells[&(d - 1)];
            let (x1, y1) = cells[&d];
            assert_that!(x0.abs_diff(x1) + y0.abs_diff(y1)).is_equal_to(1);
        }
    }

    #[test]
    fn maximum_order_does_not_overflow() {
        let max = (1u64 << 32) - 1;
        let d = xy2d(32, max, 0);
        assert_that!(d).is_equal_to(u64::MAX);
    }

    #[test]
    fn rank_uses_extent() {
        let curve = HilbertCurve::new([-10.0, -10.0, 10.0, 10.0], 1).unwrap();
        assert_that!(curve.rank(-5.0, -5.0)).is_equal_to(0);
        assert_that!(curve.rank(-5.0, 5.0)).is_equal_to(1);
        assert_that!(curve.rank(5.0, 5.0)).is_equal_to(2);
        assert_that!(curve.rank(5.0, -5.0)).is_equal_to(3);

        // the upper border belongs to the last cell
        assert_that!(curve.rank(10.0, -10.0)).is_equal_to(3);

        // outside points are clamped
        assert_that!(curve.rank(-50.0, -50.0)).is_equal_to(0);
    }

    #[test]
    fn degenerate_extent() {
        let curve = HilbertCurve::new([3.0, 4.0, 3.0, 4.0], DEFAULT_ORDER).unwrap();
        assert_that!(curve.rank(3.0, 4.0)).is_equal_to(0);
    }

    #[test]
    fn invalid_parameters() {
        for r in [
            HilbertCurve::new([0.0, 0.0, 1.0, 1.0], 0),
            HilbertCurve::new([0.0, 0.0, 1.0, 1.0], 33),
            HilbertCurve::new([1.0, 0.0, 0.0, 1.0], 8),
            HilbertCurve::new([f64::NAN, 0.0, 1.0, 1.0], 8),
        ] {
            assert!(matches!(
                r.unwrap_err().downcast_ref::<GeoKeyError>(),
                Some(GeoKeyError::InvalidParameter { .. })
            ));
        }
    }
}
