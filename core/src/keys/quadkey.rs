//! Quadkeys identify tiles of the Web Mercator quadtree. A quadkey has one
//! digit per zoom level. Each digit selects one of the four children of the
//! tile addressed by the preceding digits:
//!
//! ```text
//! +---+---+
//! | 0 | 1 |
//! +---+---+
//! | 2 | 3 |
//! +---+---+
//! ```
//!
//! Keys of finer resolutions therefore share their prefix with the tiles
//! that contain them, which makes prefix truncation a cheap way to coarsen a
//! partitioning.
//!
//! # Example
//!
//! ```rust
//! use geokey_core::keys::quadkey::quadkey;
//!
//! let key = quadkey(-122.4, 37.8, 10).unwrap();
//! assert_eq!(key, "0230102033");
//! assert!(quadkey(-122.4, 37.8, 4).unwrap().starts_with("0230"));
//! ```

use std::f64::consts::PI;

use anyhow::Result;

use crate::error::GeoKeyError;

/// The finest supported resolution
pub const MAX_RESOLUTION: u8 = 23;

/// Web Mercator cannot represent the poles. Latitudes are clamped to this
/// value.
const MAX_LATITUDE: f64 = 85.051_128_78;

/// Fails with [`GeoKeyError::InvalidParameter`] if `resolution` is out of
/// range
pub fn check_resolution(resolution: u8) -> Result<()> {
    if resolution > MAX_RESOLUTION {
        return Err(GeoKeyError::invalid(
            "resolution",
            format!("quadkey resolution must be between 0 and {MAX_RESOLUTION}, got {resolution}"),
        )
        .into());
    }
    Ok(())
}

/// Returns the column and row of the tile containing the given location at
/// the given level
pub fn tile_xy(lon: f64, lat: f64, level: u8) -> (u32, u32) {
    let lon = lon.clamp(-180.0, 180.0);
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);

    let x = (lon + 180.0) / 360.0;
    let sin_lat = (lat * PI / 180.0).sin();
    let y = 0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * PI);

    let size = (1u64 << level) as f64;
    let max = (1u64 << level) - 1;
    let tx = ((x * size).floor().max(0.0) as u64).min(max);
    let ty = ((y * size).floor().max(0.0) as u64).min(max);
    (tx as u32, ty as u32)
}

/// Interleaves tile coordinates into a quadkey string of `level` digits
pub fn tile_to_quadkey(tx: u32, ty: u32, level: u8) -> String {
    let mut key = String::with_capacity(level as usize);
    for i in (1..=level).rev() {
        let mask = 1u32 << (i - 1);
        let mut digit = b'0';
        if tx & mask != 0 {
            digit += 1;
        }
        if ty & mask != 0 {
            digit += 2;
        }
        key.push(digit as char);
    }
    key
}

/// Computes the quadkey of the tile containing the given location
pub fn quadkey(lon: f64, lat: f64, resolution: u8) -> Result<String> {
    check_resolution(resolution)?;
    let (tx, ty) = tile_xy(lon, lat, resolution);
    Ok(tile_to_quadkey(tx, ty, resolution))
}
