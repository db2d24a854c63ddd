use std::collections::BTreeSet;
use std::path::Path;

use geo::{Geometry, MultiPolygon};
use log::warn;
use shapefile::dbase::{self, FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::record::EsriShape;
use shapefile::{Multipoint, Point, Polygon, Polyline, Shape, Writer};

use super::{io_error, level_of};
use crate::data::crs::Crs;
use crate::data::model::{AttributeTable, Estimate, GeographyRecord};
use crate::error::{Error, ExportFormatError};

/// dBASE field names hold at most ten characters.
const MAX_FIELD_NAME: usize = 10;
const MOE_SUFFIX: &str = "_moe";

// ---------------------------------------------------------------------------
// Field naming
// ---------------------------------------------------------------------------

/// Estimate and MOE field names for each label: ASCII, at most ten
/// characters, unique ignoring case across every field in the table.
fn field_names(labels: &[String]) -> Vec<(String, String)> {
    let mut taken: BTreeSet<String> = ["geoid", "name"].iter().map(|s| s.to_string()).collect();
    labels
        .iter()
        .map(|label| {
            let clean: String = label
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
                .collect();
            let estimate = unique_name(&clean, "", &mut taken);
            let moe = unique_name(&clean, MOE_SUFFIX, &mut taken);
            (estimate, moe)
        })
        .collect()
}

/// `stem` truncated so that `stem + suffix` fits a field name, with a
/// counter before the suffix until the whole name is unused.
fn unique_name(stem: &str, suffix: &str, taken: &mut BTreeSet<String>) -> String {
    let max = MAX_FIELD_NAME - suffix.len();
    let mut candidate = format!("{}{suffix}", stem.chars().take(max).collect::<String>());
    let mut n = 1;
    while taken.contains(&candidate.to_ascii_lowercase()) {
        let counter = n.to_string();
        let keep = max.saturating_sub(counter.len());
        candidate = format!("{}{counter}{suffix}", stem.chars().take(keep).collect::<String>());
        n += 1;
    }
    taken.insert(candidate.to_ascii_lowercase());
    candidate
}

fn field_name(name: &str) -> Result<FieldName, ExportFormatError> {
    FieldName::try_from(name).map_err(|e| ExportFormatError::Write(format!("field '{name}': {e:?}")))
}

fn write_error(e: impl std::fmt::Display) -> ExportFormatError {
    ExportFormatError::Write(e.to_string())
}

// ---------------------------------------------------------------------------
// Shape families
// ---------------------------------------------------------------------------

/// A shapefile holds exactly one of these.
enum Shapes {
    Polygons(Vec<Polygon>),
    Lines(Vec<Polyline>),
    Points(Vec<Point>),
    MultiPoints(Vec<Multipoint>),
}

fn family(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
            "polygon"
        }
        Geometry::LineString(_) | Geometry::MultiLineString(_) | Geometry::Line(_) => "line",
        Geometry::Point(_) => "point",
        Geometry::MultiPoint(_) => "multipoint",
        Geometry::GeometryCollection(_) => "collection",
    }
}

fn collect_shapes(records: &[GeographyRecord]) -> Result<Shapes, ExportFormatError> {
    let mut geometries = Vec::with_capacity(records.len());
    for rec in records {
        let g = rec.geometry.as_ref().ok_or_else(|| ExportFormatError::MissingGeometry {
            geoid: rec.geoid.clone(),
        })?;
        geometries.push(g);
    }
    let Some(first) = geometries.first().map(|g| family(g)) else {
        return Ok(Shapes::Polygons(Vec::new()));
    };
    if let Some(other) = geometries.iter().map(|g| family(g)).find(|f| *f != first) {
        return Err(ExportFormatError::MixedGeometry { first, other });
    }

    let shapes = match first {
        "polygon" => Shapes::Polygons(
            geometries
                .into_iter()
                .map(|g| Polygon::from(as_multipolygon(g)))
                .collect(),
        ),
        "line" => Shapes::Lines(
            geometries
                .into_iter()
                .filter_map(|g| match g {
                    Geometry::LineString(l) => Some(Polyline::from(l.clone())),
                    Geometry::Line(l) => Some(Polyline::from(geo::LineString::from(*l))),
                    Geometry::MultiLineString(m) => Some(Polyline::from(m.clone())),
                    _ => None,
                })
                .collect(),
        ),
        "point" => Shapes::Points(
            geometries
                .into_iter()
                .filter_map(|g| match g {
                    Geometry::Point(p) => Some(Point::from(*p)),
                    _ => None,
                })
                .collect(),
        ),
        "multipoint" => Shapes::MultiPoints(
            geometries
                .into_iter()
                .filter_map(|g| match g {
                    Geometry::MultiPoint(m) => Some(Multipoint::from(m.clone())),
                    _ => None,
                })
                .collect(),
        ),
        _ => {
            return Err(ExportFormatError::Write(
                "geometry collections cannot be written to a shapefile".into(),
            ))
        }
    };
    Ok(shapes)
}

fn as_multipolygon(g: &Geometry<f64>) -> MultiPolygon<f64> {
    match g {
        Geometry::Polygon(p) => MultiPolygon::new(vec![p.clone()]),
        Geometry::MultiPolygon(m) => m.clone(),
        Geometry::Rect(r) => MultiPolygon::new(vec![r.to_polygon()]),
        Geometry::Triangle(t) => MultiPolygon::new(vec![t.to_polygon()]),
        _ => MultiPolygon::new(Vec::new()),
    }
}

// ---------------------------------------------------------------------------
// Shapefile writer
// ---------------------------------------------------------------------------

/// Write `.shp`, `.shx`, `.dbf` and, for known systems, `.prj`.
pub(super) fn write_shapefile(table: &AttributeTable, path: &Path) -> Result<(), ExportFormatError> {
    let shapes = collect_shapes(&table.records)?;
    let names = field_names(&table.variables);

    let mut builder = TableWriterBuilder::new()
        // The width records the level, so an empty file still reads back.
        .add_character_field(field_name("GEOID")?, geoid_width(table))
        .add_character_field(field_name("NAME")?, 254);
    for (estimate, moe) in &names {
        builder = builder
            .add_numeric_field(field_name(estimate)?, 18, 4)
            .add_numeric_field(field_name(moe)?, 18, 4);
    }

    let records: Vec<Record> = table
        .records
        .iter()
        .map(|rec| {
            let mut record = Record::default();
            record.insert("GEOID".into(), FieldValue::Character(Some(rec.geoid.clone())));
            record.insert("NAME".into(), FieldValue::Character(Some(rec.name.clone())));
            for (label, (estimate, moe)) in table.variables.iter().zip(&names) {
                let value = rec.values.get(label).copied().unwrap_or_default();
                record.insert(estimate.clone(), FieldValue::Numeric(value.estimate));
                record.insert(moe.clone(), FieldValue::Numeric(value.moe));
            }
            record
        })
        .collect();

    match shapes {
        Shapes::Polygons(s) => write_all(path, builder, &s, &records)?,
        Shapes::Lines(s) => write_all(path, builder, &s, &records)?,
        Shapes::Points(s) => write_all(path, builder, &s, &records)?,
        Shapes::MultiPoints(s) => write_all(path, builder, &s, &records)?,
    }

    match table.crs.wkt() {
        Some(wkt) => {
            let prj = path.with_extension("prj");
            std::fs::write(&prj, wkt).map_err(io_error(&prj))?;
        }
        None => warn!("no WKT for {}; {} written without .prj", table.crs, path.display()),
    }
    Ok(())
}

fn geoid_width(table: &AttributeTable) -> u8 {
    let longest = table.records.iter().map(|r| r.geoid.len()).max().unwrap_or(0);
    u8::try_from(longest.max(table.level.geoid_len())).unwrap_or(u8::MAX)
}

fn write_all<S: EsriShape>(
    path: &Path,
    builder: TableWriterBuilder,
    shapes: &[S],
    records: &[Record],
) -> Result<(), ExportFormatError> {
    let mut writer = Writer::from_path(path, builder).map_err(write_error)?;
    for (shape, record) in shapes.iter().zip(records) {
        writer.write_shape_and_record(shape, record).map_err(write_error)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Shapefile reader
// ---------------------------------------------------------------------------

/// Read a shapefile written by [`export`](super::export).
///
/// Field names come back truncated; a `*_moe` field is paired with the
/// estimate field before it. A missing or unrecognised `.prj` is read as WGS84.
pub fn read_shapefile(path: &Path) -> Result<AttributeTable, Error> {
    let crs = match std::fs::read_to_string(path.with_extension("prj")) {
        Ok(wkt) => Crs::from_wkt(&wkt).unwrap_or_else(|| {
            warn!("unrecognised .prj next to {}; assuming WGS84", path.display());
            Crs::Wgs84
        }),
        Err(_) => Crs::Wgs84,
    };

    let dbf = dbase::Reader::from_path(path.with_extension("dbf")).map_err(write_error)?;
    let fields: Vec<String> = dbf.fields().iter().map(|f| f.name().to_string()).collect();
    let declared_width = dbf
        .fields()
        .iter()
        .find(|f| f.name() == "GEOID")
        .map(|f| usize::from(f.length()));
    drop(dbf);

    // (estimate field, optional moe field) in file order.
    let mut pairs: Vec<(String, Option<String>)> = Vec::new();
    for name in fields.iter().filter(|n| *n != "GEOID" && *n != "NAME") {
        let pairs_with_last = name.ends_with(MOE_SUFFIX) && pairs.last().is_some_and(|(_, m)| m.is_none());
        match pairs.last_mut() {
            Some(last) if pairs_with_last => last.1 = Some(name.clone()),
            _ => pairs.push((name.clone(), None)),
        }
    }

    let rows = shapefile::read(path).map_err(write_error)?;
    let mut records = Vec::with_capacity(rows.len());
    for (shape, record) in rows {
        let text = |key: &str| match record.get(key) {
            Some(FieldValue::Character(Some(s))) => s.trim().to_string(),
            _ => String::new(),
        };
        let number = |key: &str| match record.get(key) {
            Some(FieldValue::Numeric(v)) => *v,
            Some(FieldValue::Float(v)) => v.map(f64::from),
            _ => None,
        };
        let mut rec = GeographyRecord::new(text("GEOID"), text("NAME"));
        for (estimate, moe) in &pairs {
            let moe = moe.as_deref().and_then(number);
            rec.values.insert(estimate.clone(), Estimate::new(number(estimate), moe));
        }
        rec.geometry = match shape {
            Shape::NullShape => None,
            other => Some(
                Geometry::<f64>::try_from(other)
                    .map_err(|e| ExportFormatError::Write(format!("{}: {e:?}", rec.geoid)))?,
            ),
        };
        records.push(rec);
    }

    let level = level_of(records.first().map(|r: &GeographyRecord| r.geoid.len()).or(declared_width), path)?;
    let variables = pairs.into_iter().map(|(estimate, _)| estimate).collect();
    Ok(AttributeTable::from_records(level, crs, variables, records))
}
