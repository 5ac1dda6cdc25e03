//! Coordinate reference systems as they appear in geo metadata. A CRS is
//! either a structured PROJJSON document or a short `authority:code`
//! string. A missing CRS always means OGC:CRS84.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// The CRS of a geometry column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Crs {
    /// A string such as `EPSG:4326`
    AuthorityCode(String),

    /// A structured PROJJSON document
    Projjson(Value),
}

impl Crs {
    /// Interprets a user-supplied CRS. Values that look like a JSON object
    /// are parsed as PROJJSON, everything else is taken as an authority
    /// code.
    pub fn parse(s: &str) -> Result<Crs> {
        let s = s.trim();
        if s.starts_with('{') {
            let v: Value = serde_json::from_str(s).context("CRS is not valid PROJJSON")?;
            Ok(Crs::Projjson(v))
        } else {
            Ok(Crs::AuthorityCode(s.to_string()))
        }
    }

    /// `true` if the CRS is a structured document that can be embedded in
    /// a native geometry type
    pub fn is_structured(&self) -> bool {
        matches!(self, Crs::Projjson(_))
    }

    /// `true` if this CRS denotes OGC:CRS84
    pub fn is_default(&self) -> bool {
        match self {
            Crs::AuthorityCode(s) => {
                let s = s.to_ascii_uppercase();
                s == "OGC:CRS84" || s == "CRS84"
            }
            Crs::Projjson(v) => {
                let id = &v["id"];
                id["authority"].as_str() == Some("OGC")
                    && id["code"].as_str() == Some("CRS84")
            }
        }
    }

    /// A short human readable description
    pub fn describe(&self) -> String {
        match self {
            Crs::AuthorityCode(s) => s.clone(),
            Crs::Projjson(v) => {
                let id = &v["id"];
                match (id["authority"].as_str(), &id["code"]) {
                    (Some(a), Value::String(c)) => format!("{a}:{c}"),
                    (Some(a), Value::Number(c)) => format!("{a}:{c}"),
                    _ => v["name"].as_str().unwrap_or("PROJJSON").to_string(),
                }
            }
        }
    }
}

/// Adapts a column's CRS to a target that stores it in a native geometry
/// type. Only PROJJSON can be embedded there, so authority strings are
/// dropped, which makes readers fall back to the default CRS.
pub fn for_native_target(crs: Option<Crs>, column: &str) -> Option<Crs> {
    match crs {
        Some(Crs::AuthorityCode(code)) => {
            warn!(
                column,
                crs = code.as_str(),
                "Native geometry types can only carry PROJJSON. Dropping CRS \
                 `{code}', readers will assume OGC:CRS84."
            );
            None
        }
        crs => crs,
    }
}

/// The PROJJSON document of OGC:CRS84 (WGS 84 with longitude/latitude axis
/// order)
pub fn default_crs() -> Value {
    serde_json::json!({
        "$schema": "https://proj.org/schemas/v0.7/projjson.schema.json",
        "type": "GeographicCRS",
        "name": "WGS 84 (CRS84)",
        "datum_ensemble": {
            "name": "World Geodetic System 1984 ensemble",
            "members": [
                { "name": "World Geodetic System 1984 (Transit)" },
                { "name": "World Geodetic System 1984 (G730)" },
                { "name": "World Geodetic System 1984 (G873)" },
                { "name": "World Geodetic System 1984 (G1150)" },
                { "name": "World Geodetic System 1984 (G1674)" },
                { "name": "World Geodetic System 1984 (G1762)" },
                { "name": "World Geodetic System 1984 (G2139)" }
            ],
            "ellipsoid": {
                "name": "WGS 84",
                "semi_major_axis": 6378137,
                "inverse_flattening": 298.257223563
            },
            "accuracy": "2.0",
            "id": { "authority": "EPSG", "code": 6326 }
        },
        "coordinate_system": {
            "subtype": "ellipsoidal",
            "axis": [
                {
                    "name": "Geodetic longitude",
                    "abbreviation": "Lon",
                    "direction": "east",
                    "unit": "degree"
                },
                {
                    "name": "Geodetic latitude",
                    "abbreviation": "Lat",
                    "direction": "north",
                    "unit": "degree"
                }
            ]
        },
        "scope": "Not known.",
        "area": "World.",
        "bbox": {
            "south_latitude": -90,
            "west_longitude": -180,
            "north_latitude": 90,
            "east_longitude": 180
        },
        "id": { "authority": "OGC", "code": "CRS84" }
    })
}

#[cfg(test)]
mod tests {
    use assertor::{assert_that, EqualityAssertion};
    use serde_json::json;

    use super::{default_crs, for_native_target, Crs};

    #[test]
    fn parse_and_serialize() {
        let c = Crs::parse("EPSG:3857").unwrap();
        assert_that!(c.clone()).is_equal_to(Crs::AuthorityCode("EPSG:3857".to_string()));
        assert_that!(serde_json::to_string(&c).unwrap()).is_equal_to(r#""EPSG:3857""#.to_string());

        let c = Crs::parse(r#"{"type": "GeographicCRS", "id": {"authority": "EPSG", "code": 4326}}"#)
            .unwrap();
        assert!(c.is_structured());
        assert_that!(c.describe()).is_equal_to("EPSG:4326".to_string());

        assert!(Crs::parse("{not json").is_err());
    }

    #[test]
    fn untagged_deserialization() {
        let c: Crs = serde_json::from_value(json!("OGC:CRS84")).unwrap();
        assert!(c.is_default());
        let c: Crs = serde_json::from_value(default_crs()).unwrap();
        assert!(c.is_structured());
        assert!(c.is_default());
        assert_that!(c.describe()).is_equal_to("OGC:CRS84".to_string());
    }

    #[test]
    fn native_targets_drop_authority_codes() {
        assert_that!(for_native_target(Some(Crs::AuthorityCode("EPSG:4326".into())), "geometry"))
            .is_equal_to(None);
        let p = Crs::Projjson(default_crs());
        assert_that!(for_native_target(Some(p.clone()), "geometry")).is_equal_to(Some(p));
        assert_that!(for_native_target(None, "geometry")).is_equal_to(None);
    }
}
