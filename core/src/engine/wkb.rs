//! Reads the header of WKB values. The geometry type, its dimensions and
//! whether it is empty are taken from the raw bytes, since empty points and
//! Z/M coordinates do not survive the conversion to `geo` types.

use anyhow::{bail, Context, Result};

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;
const EWKB_TYPE_MASK: u32 = 0x0fff_ffff;

/// The base type of a WKB geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WkbKind {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl WkbKind {
    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => WkbKind::Point,
            2 => WkbKind::LineString,
            3 => WkbKind::Polygon,
            4 => WkbKind::MultiPoint,
            5 => WkbKind::MultiLineString,
            6 => WkbKind::MultiPolygon,
            7 => WkbKind::GeometryCollection,
            _ => return None,
        })
    }

    /// The GeoParquet name of the type without dimension suffix
    pub fn name(&self) -> &'static str {
        match self {
            WkbKind::Point => "Point",
            WkbKind::LineString => "LineString",
            WkbKind::Polygon => "Polygon",
            WkbKind::MultiPoint => "MultiPoint",
            WkbKind::MultiLineString => "MultiLineString",
            WkbKind::MultiPolygon => "MultiPolygon",
            WkbKind::GeometryCollection => "GeometryCollection",
        }
    }
}

/// What the first bytes of a WKB value say about the geometry. Both ISO type
/// codes (1000/2000/3000 offsets) and extended WKB flags are understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WkbHeader {
    pub kind: WkbKind,
    pub has_z: bool,
    pub has_m: bool,

    /// `true` if the value uses the extended (PostGIS) type flags
    pub extended: bool,

    /// `true` for points with NaN coordinates and for geometries without
    /// any parts
    pub empty: bool,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl Cursor<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let b = self
            .bytes
            .get(self.pos..self.pos + N)
            .and_then(|b| <[u8; N]>::try_from(b).ok())
            .with_context(|| format!("WKB value ends unexpectedly at byte {}", self.pos))?;
        self.pos += N;
        Ok(b)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take::<4>()?;
        Ok(if self.little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn f64(&mut self) -> Result<f64> {
        let b = self.take::<8>()?;
        Ok(if self.little_endian {
            f64::from_le_bytes(b)
        } else {
            f64::from_be_bytes(b)
        })
    }
}

impl WkbHeader {
    /// Parses the header of a WKB or extended WKB value
    pub fn parse(wkb: &[u8]) -> Result<Self> {
        let little_endian = match wkb.first() {
            Some(0) => false,
            Some(1) => true,
            Some(b) => bail!("Invalid WKB byte order marker {b}"),
            None => bail!("WKB value is empty"),
        };
        let mut cursor = Cursor {
            bytes: wkb,
            pos: 1,
            little_endian,
        };

        let code = cursor.u32()?;
        let extended = code & (EWKB_Z | EWKB_M | EWKB_SRID) != 0;
        let (base, has_z, has_m) = if extended {
            if code & EWKB_SRID != 0 {
                cursor.u32()?;
            }
            (code & EWKB_TYPE_MASK, code & EWKB_Z != 0, code & EWKB_M != 0)
        } else {
            let dims = code / 1000;
            (code % 1000, matches!(dims, 1 | 3), matches!(dims, 2 | 3))
        };
        let Some(kind) = WkbKind::from_code(base) else {
            bail!("Unknown WKB geometry type {code}");
        };

        let empty = if kind == WkbKind::Point {
            let dims = 2 + usize::from(has_z) + usize::from(has_m);
            let mut all_nan = true;
            for _ in 0..dims {
                all_nan &= cursor.f64()?.is_nan();
            }
            all_nan
        } else {
            cursor.u32()? == 0
        };

        Ok(WkbHeader {
            kind,
            has_z,
            has_m,
            extended,
            empty,
        })
    }

    /// The GeoParquet type name including the dimension suffix, e.g.
    /// `Point Z`
    pub fn type_name(&self) -> String {
        let suffix = match (self.has_z, self.has_m) {
            (true, true) => " ZM",
            (true, false) => " Z",
            (false, true) => " M",
            (false, false) => "",
        };
        format!("{}{suffix}", self.kind.name())
    }
}
