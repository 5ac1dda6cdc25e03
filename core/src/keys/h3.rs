use anyhow::{Context, Result};
use h3o::{LatLng, Resolution};

use crate::error::GeoKeyError;

/// The finest H3 resolution
pub const MAX_RESOLUTION: u8 = 15;

/// Converts a numeric resolution to an H3 [`Resolution`]
pub fn resolution(resolution: u8) -> Result<Resolution> {
    Resolution::try_from(resolution).map_err(|_| {
        GeoKeyError::invalid(
            "resolution",
            format!("H3 resolution must be between 0 and {MAX_RESOLUTION}, got {resolution}"),
        )
        .into()
    })
}

/// Returns the H3 cell containing the given location as a lower-case
/// hexadecimal string. The string form is used instead of the 64-bit cell
/// index because not every consumer of the written files can handle
/// unsigned 64-bit integers.
pub fn h3_cell(lon: f64, lat: f64, res: Resolution) -> Result<String> {
    let ll = LatLng::new(lat, lon)
        .with_context(|| format!("Invalid coordinate for H3 cell: ({lon}, {lat})"))?;
    let cell = ll.to_cell(res);
    Ok(format!("{cell:x}"))
}
