use geo::{coord, Rect};

/// Trait to grow bounding boxes while scanning geometries
///
/// # Examples
///
/// ```rust
/// use geo::{coord, Rect};
/// use geokey_core::util::extend_rect::ExtendRect;
///
/// let mut bbox: Option<Rect> = None;
/// bbox.extend_rect(&Rect::new(
///     coord! { x: 1.0, y: 2.0 },
///     coord! { x: 4.0, y: 5.0 },
/// ));
/// bbox.extend_rect(&Rect::new(
///     coord! { x: -3.0, y: 3.0 },
///     coord! { x: 2.0, y: 9.0 },
/// ));
///
/// let bbox = bbox.unwrap();
/// assert_eq!(bbox.min(), coord! { x: -3.0, y: 2.0 });
/// assert_eq!(bbox.max(), coord! { x: 4.0, y: 9.0 });
/// ```
pub trait ExtendRect {
    /// Extends the box so it overlaps the given other rectangle
    fn extend_rect(&mut self, other: &Rect);

    /// Extends the box so it overlaps the given box given as
    /// `[xmin, ymin, xmax, ymax]`
    fn extend_bounds(&mut self, bounds: [f64; 4]) {
        self.extend_rect(&rect_from_bounds(bounds));
    }
}

impl ExtendRect for Rect {
    fn extend_rect(&mut self, other: &Rect) {
        let min = self.min();
        let other_min = other.min();
        self.set_min((min.x.min(other_min.x), min.y.min(other_min.y)));
        let max = self.max();
        let other_max = other.max();
        self.set_max((max.x.max(other_max.x), max.y.max(other_max.y)));
    }
}

impl ExtendRect for Option<Rect> {
    fn extend_rect(&mut self, other: &Rect) {
        match self {
            Some(r) => r.extend_rect(other),
            None => *self = Some(*other),
        }
    }
}

/// Converts a rectangle to GeoParquet bbox order `[xmin, ymin, xmax, ymax]`
pub fn rect_to_bounds(r: &Rect) -> [f64; 4] {
    [r.min().x, r.min().y, r.max().x, r.max().y]
}

/// Converts GeoParquet bbox order `[xmin, ymin, xmax, ymax]` to a rectangle
pub fn rect_from_bounds(b: [f64; 4]) -> Rect {
    Rect::new(coord! { x: b[0], y: b[1] }, coord! { x: b[2], y: b[3] })
}
