use std::path::Path;

use geo::Geometry;
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, JsonValue};
use log::warn;

use super::{io_error, level_of, moe_column};
use crate::data::crs::Crs;
use crate::data::model::{AttributeTable, Estimate, GeographyRecord};
use crate::data::request::GeographyLevel;
use crate::error::{Error, ExportFormatError};

const LEVEL_MEMBER: &str = "census_level";

// ---------------------------------------------------------------------------
// GeoJSON writer
// ---------------------------------------------------------------------------

/// Properties per feature: `GEOID`, `NAME`, then `<label>` and `<label>_moe`
/// for each variable. The collection names its geography level in a
/// `census_level` member; coordinates outside WGS84 get a legacy `crs` member.
pub(super) fn write_geojson(table: &AttributeTable, path: &Path) -> Result<(), ExportFormatError> {
    let features = table
        .records
        .iter()
        .map(|rec| {
            let mut props = JsonObject::new();
            props.insert("GEOID".into(), JsonValue::from(rec.geoid.clone()));
            props.insert("NAME".into(), JsonValue::from(rec.name.clone()));
            for label in &table.variables {
                let est = rec.values.get(label).copied().unwrap_or_default();
                props.insert(label.clone(), JsonValue::from(est.estimate));
                props.insert(moe_column(label), JsonValue::from(est.moe));
            }
            Feature {
                bbox: None,
                geometry: rec
                    .geometry
                    .as_ref()
                    .map(|g| geojson::Geometry::new(geojson::Value::from(g))),
                id: Some(geojson::feature::Id::String(rec.geoid.clone())),
                properties: Some(props),
                foreign_members: None,
            }
        })
        .collect();

    let mut members = JsonObject::new();
    members.insert(LEVEL_MEMBER.into(), JsonValue::from(table.level.api_name()));
    if table.crs != Crs::Wgs84 {
        members.insert(
            "crs".into(),
            serde_json::json!({
                "type": "name",
                "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", table.crs.epsg()) }
            }),
        );
    }

    let collection = GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(members),
    });
    std::fs::write(path, collection.to_string()).map_err(io_error(path))
}

// ---------------------------------------------------------------------------
// GeoJSON reader
// ---------------------------------------------------------------------------

/// Read a FeatureCollection written by [`export`](super::export).
///
/// Numeric properties become variables; a `<label>_moe` property is paired
/// with `<label>` as its margin of error.
pub fn read_geojson(path: &Path) -> Result<AttributeTable, Error> {
    let text = std::fs::read_to_string(path).map_err(io_error(path))?;
    let geojson: GeoJson = text
        .parse()
        .map_err(|e| ExportFormatError::Write(format!("parsing {}: {e}", path.display())))?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(ExportFormatError::Write(format!("{} is not a FeatureCollection", path.display())).into());
    };

    let members = collection.foreign_members.as_ref();
    let crs = members.and_then(declared_crs).unwrap_or(Crs::Wgs84);
    let declared_level = members.and_then(declared_level);

    let mut variables: Vec<String> = Vec::new();
    let mut records = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let props = feature.properties.unwrap_or_default();
        let geoid = props
            .get("GEOID")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ExportFormatError::Write("feature without GEOID".into()))?
            .to_string();
        let name = props.get("NAME").and_then(|v| v.as_str()).unwrap_or_default();
        let mut rec = GeographyRecord::new(geoid, name);

        for (key, value) in &props {
            if key == "GEOID" || key == "NAME" || key.ends_with("_moe") {
                continue;
            }
            if !(value.is_number() || value.is_null()) {
                continue;
            }
            if !variables.contains(key) {
                variables.push(key.clone());
            }
            let moe = props.get(&moe_column(key)).and_then(|v| v.as_f64());
            rec.values.insert(key.clone(), Estimate::new(value.as_f64(), moe));
        }

        rec.geometry = match feature.geometry {
            Some(g) => Some(Geometry::<f64>::try_from(g).map_err(|e| {
                ExportFormatError::Write(format!("{}: {e}", rec.geoid))
            })?),
            None => {
                warn!("{} has no geometry", rec.geoid);
                None
            }
        };
        records.push(rec);
    }

    let level = match declared_level {
        Some(level) => level,
        None => level_of(records.first().map(|r: &GeographyRecord| r.geoid.len()), path)?,
    };
    Ok(AttributeTable::from_records(level, crs, variables, records))
}

fn declared_level(members: &JsonObject) -> Option<GeographyLevel> {
    let name = members.get(LEVEL_MEMBER)?.as_str()?;
    GeographyLevel::ALL.into_iter().find(|level| level.api_name() == name)
}

/// EPSG code from a legacy `"crs": {"type": "name", ...}` member.
fn declared_crs(members: &JsonObject) -> Option<Crs> {
    let name = members.get("crs")?.get("properties")?.get("name")?.as_str()?;
    let code = name.rsplit(':').next()?.parse().ok()?;
    Some(Crs::from_epsg(code))
}

#[cfg(test)]
mod tests {
    use super::super::export;
    use super::super::tests::{empty_table, sample_table};
    use super::*;
    use geo::{Area, BoundingRect};

    #[test]
    fn test_geojson_round_trip_keeps_crs_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracts.geojson");
        export(&sample_table(), &path, Crs::Nad83).unwrap();

        let back = read_geojson(&path).unwrap();
        assert_eq!(back.crs, Crs::Nad83);
        assert_eq!(back.len(), 2);
        assert_eq!(back.variables, vec!["median_rent", "pct_black"]);
        let first = back.get("55079000101").unwrap();
        assert_eq!(first.values["median_rent"], Estimate::new(Some(950.0), Some(45.0)));
        assert_eq!(back.get("55079000200").unwrap().values["median_rent"], Estimate::default());

        let original = sample_table();
        let (a, b) = (
            original.records[0].geometry.as_ref().unwrap(),
            first.geometry.as_ref().unwrap(),
        );
        assert!((a.unsigned_area() - b.unsigned_area()).abs() < 1e-12);
        assert_eq!(a.bounding_rect(), b.bounding_rect());
    }

    #[test]
    fn test_wgs84_output_has_no_crs_member() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracts.json");
        export(&sample_table(), &path, Crs::Wgs84).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("urn:ogc:def:crs"));
        assert_eq!(read_geojson(&path).unwrap().crs, Crs::Wgs84);
    }

    #[test]
    fn test_web_mercator_export_is_reprojected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracts.geojson");
        export(&sample_table(), &path, Crs::WebMercator).unwrap();
        let back = read_geojson(&path).unwrap();
        assert_eq!(back.crs, Crs::WebMercator);
        let rect = back.records[0].geometry.as_ref().unwrap().bounding_rect().unwrap();
        // -87.95° is roughly -9.79 million metres east.
        assert!(rect.min().x < -9_700_000.0 && rect.min().x > -9_800_000.0);
    }

    #[test]
    fn test_empty_table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.geojson");
        export(&empty_table(), &path, Crs::Wgs84).unwrap();
        let back = read_geojson(&path).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.level, GeographyLevel::Tract);
        assert_eq!(back.crs, Crs::Wgs84);
    }

    #[test]
    fn test_level_inferred_without_member() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("places.geojson");
        std::fs::write(
            &path,
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"GEOID":"5553000","NAME":"Milwaukee"},"geometry":null}]}"#,
        )
        .unwrap();
        assert_eq!(read_geojson(&path).unwrap().level, GeographyLevel::Place);

        std::fs::write(&path, r#"{"type":"FeatureCollection","features":[]}"#).unwrap();
        let err = read_geojson(&path).unwrap_err();
        assert!(matches!(err, Error::ExportFormat(ExportFormatError::Write(_))));
    }
}
