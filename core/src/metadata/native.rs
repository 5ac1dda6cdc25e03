//! Native geometry type annotations. Geometry columns of native targets are
//! marked with the `geoarrow.wkb` Arrow extension type, whose metadata
//! carries the CRS as PROJJSON.

use std::collections::HashMap;

use anyhow::{Context, Result};
use arrow::datatypes::{DataType, Field, Schema};
use serde_json::{json, Value};

use super::crs::Crs;

/// Field metadata key holding the extension type name
pub const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";

/// Field metadata key holding the extension type metadata
pub const EXTENSION_METADATA_KEY: &str = "ARROW:extension:metadata";

/// Extension name of WKB-encoded geometries
pub const GEOARROW_WKB: &str = "geoarrow.wkb";

/// Marks a WKB field as a native geometry column. Authority-code CRSs must
/// have been downgraded before (see [`super::crs::for_native_target`]).
pub fn annotate_field(field: &Field, crs: Option<&Crs>) -> Field {
    let ext = match crs {
        Some(Crs::Projjson(v)) => json!({ "crs": v }).to_string(),
        _ => "{}".to_string(),
    };
    let mut metadata = field.metadata().clone();
    metadata.insert(EXTENSION_NAME_KEY.to_string(), GEOARROW_WKB.to_string());
    metadata.insert(EXTENSION_METADATA_KEY.to_string(), ext);
    field.clone().with_metadata(metadata)
}

/// Removes a geometry extension annotation from a field
pub fn strip_field(field: &Field) -> Field {
    if !is_native(field) {
        return field.clone();
    }
    let metadata: HashMap<String, String> = field
        .metadata()
        .iter()
        .filter(|(k, _)| k.as_str() != EXTENSION_NAME_KEY && k.as_str() != EXTENSION_METADATA_KEY)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    field.clone().with_metadata(metadata)
}

/// `true` if the field is annotated as a native geometry column
pub fn is_native(field: &Field) -> bool {
    field.metadata().get(EXTENSION_NAME_KEY).map(String::as_str) == Some(GEOARROW_WKB)
}

/// Reads the CRS from a native geometry annotation
pub fn native_crs(field: &Field) -> Result<Option<Crs>> {
    let Some(ext) = field.metadata().get(EXTENSION_METADATA_KEY) else {
        return Ok(None);
    };
    if ext.is_empty() {
        return Ok(None);
    }
    let v: Value = serde_json::from_str(ext).with_context(|| {
        format!("Malformed geometry extension metadata on column `{}'", field.name())
    })?;
    Ok(match v.get("crs") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(Crs::AuthorityCode(s.clone())),
        Some(v) => Some(Crs::Projjson(v.clone())),
    })
}

/// All fields of the schema annotated as native geometry columns with their
/// CRS
pub fn native_columns(schema: &Schema) -> Result<Vec<(String, Option<Crs>)>> {
    schema
        .fields()
        .iter()
        .filter(|f| is_native(f))
        .map(|f| Ok((f.name().clone(), native_crs(f)?)))
        .collect()
}

/// `true` if values of this type can hold WKB
pub fn is_wkb_type(data_type: &DataType) -> bool {
    matches!(data_type, DataType::Binary | DataType::LargeBinary)
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::{DataType, Field, Schema};
    use assertor::{assert_that, EqualityAssertion};

    use crate::metadata::crs::{default_crs, Crs};

    use super::{annotate_field, is_native, native_columns, native_crs, strip_field};

    #[test]
    fn annotate_and_strip() {
        let f = Field::new("geometry", DataType::Binary, true);
        let crs = Crs::Projjson(default_crs());
        let a = annotate_field(&f, Some(&crs));
        assert!(is_native(&a));
        assert_that!(native_crs(&a).unwrap()).is_equal_to(Some(crs));

        let s = strip_field(&a);
        assert!(!is_native(&s));
        assert_that!(s).is_equal_to(f);
    }

    #[test]
    fn without_crs() {
        let f = annotate_field(&Field::new("geom", DataType::LargeBinary, true), None);
        assert_that!(native_crs(&f).unwrap()).is_equal_to(None);

        let schema = Schema::new(vec![f, Field::new("id", DataType::Int64, false)]);
        assert_that!(native_columns(&schema).unwrap())
            .is_equal_to(vec![("geom".to_string(), None)]);
    }
}
