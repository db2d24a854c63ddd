//! Writing attribute tables to GIS and tabular files, and reading them back.
//!
//! ```text
//!   AttributeTable ──► to_crs(target) ──┬─► .shp      shapefile + .prj
//!                                       ├─► .geojson  FeatureCollection
//!                                       ├─► .csv      geometry as GeoJSON text
//!                                       └─► .parquet  same columns via Arrow
//! ```

mod json;
mod shp;
mod tabular;

use std::path::Path;

use geo::Geometry;
use log::info;

use crate::data::crs::Crs;
use crate::data::model::AttributeTable;
use crate::data::request::GeographyLevel;
use crate::error::{Error, ExportFormatError};

pub use self::json::read_geojson;
pub use self::shp::read_shapefile;
pub use self::tabular::to_record_batch;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Write `table` to `path`, reprojected to `target`. Dispatch by extension.
///
/// Supported formats:
/// * `.shp`               – ESRI shapefile with `.shx`, `.dbf` and `.prj`
/// * `.geojson` / `.json` – GeoJSON FeatureCollection
/// * `.csv`               – one row per unit, geometry as GeoJSON text
/// * `.parquet` / `.pq`   – same columns as CSV
pub fn export(table: &AttributeTable, path: &Path, target: Crs) -> Result<(), Error> {
    if path.file_stem().is_none() {
        return Err(ExportFormatError::MissingFileName(path.to_path_buf()).into());
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if !matches!(ext.as_str(), "shp" | "geojson" | "json" | "csv" | "parquet" | "pq") {
        return Err(ExportFormatError::UnsupportedExtension(ext).into());
    }

    let table = table.clone().to_crs(target)?;
    match ext.as_str() {
        "shp" => shp::write_shapefile(&table, path)?,
        "geojson" | "json" => json::write_geojson(&table, path)?,
        "csv" => tabular::write_csv(&table, path)?,
        _ => tabular::write_parquet(&table, path)?,
    }
    info!("wrote {} {} rows to {} ({target})", table.len(), table.level, path.display());
    Ok(())
}

// -- shared helpers --

fn estimate_column(label: &str) -> String {
    format!("{label}_est")
}

fn moe_column(label: &str) -> String {
    format!("{label}_moe")
}

fn geometry_text(geometry: &Geometry<f64>) -> Result<String, ExportFormatError> {
    let value = geojson::Value::from(geometry);
    serde_json::to_string(&geojson::Geometry::new(value))
        .map_err(|e| ExportFormatError::Write(format!("encoding geometry: {e}")))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExportFormatError + '_ {
    move |source| ExportFormatError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Level of a re-imported table, from the length of its GEOIDs.
fn level_of(geoid_len: Option<usize>, path: &Path) -> Result<GeographyLevel, ExportFormatError> {
    geoid_len
        .and_then(GeographyLevel::from_geoid_len)
        .ok_or_else(|| ExportFormatError::Write(format!("cannot tell geography level of {}", path.display())))
}
