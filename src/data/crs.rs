use std::f64::consts::PI;
use std::fmt;

use geo::{Coord, Geometry, MapCoords};
use serde::{Deserialize, Serialize};

use crate::error::ProjectionMismatchError;

// ---------------------------------------------------------------------------
// Coordinate reference systems
// ---------------------------------------------------------------------------

/// WGS84 semi-major axis, used as the sphere radius by Web Mercator.
const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Web Mercator is undefined at the poles; latitudes are clamped here.
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Coordinate reference systems the pipeline can tag and convert between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", from = "u32")]
pub enum Crs {
    /// NAD83 geographic (EPSG:4269), the native system of TIGER/Line data.
    Nad83,
    /// WGS84 geographic (EPSG:4326), the GeoJSON default.
    Wgs84,
    /// Spherical Web Mercator (EPSG:3857), metres.
    WebMercator,
    /// Any other EPSG code. Carried through, never reprojected.
    Other(u32),
}

impl Crs {
    pub fn epsg(self) -> u32 {
        match self {
            Crs::Nad83 => 4269,
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::Other(code) => code,
        }
    }

    pub fn from_epsg(code: u32) -> Self {
        match code {
            4269 => Crs::Nad83,
            4326 => Crs::Wgs84,
            3857 | 900913 => Crs::WebMercator,
            other => Crs::Other(other),
        }
    }

    /// Whether coordinates are longitude/latitude degrees.
    pub fn is_geographic(self) -> bool {
        matches!(self, Crs::Nad83 | Crs::Wgs84)
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, Crs::Other(_))
    }

    /// Well-known text for the `.prj` sidecar of a shapefile.
    pub fn wkt(self) -> Option<&'static str> {
        match self {
            Crs::Nad83 => Some(
                r#"GEOGCS["GCS_North_American_1983",DATUM["D_North_American_1983",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#,
            ),
            Crs::Wgs84 => Some(
                r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#,
            ),
            Crs::WebMercator => Some(
                r#"PROJCS["WGS_1984_Web_Mercator_Auxiliary_Sphere",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Mercator_Auxiliary_Sphere"],PARAMETER["False_Easting",0.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",0.0],PARAMETER["Standard_Parallel_1",0.0],PARAMETER["Auxiliary_Sphere_Type",0.0],UNIT["Meter",1.0]]"#,
            ),
            Crs::Other(_) => None,
        }
    }

    /// Guess the CRS of a `.prj` WKT string. Unknown text yields `None`.
    pub fn from_wkt(wkt: &str) -> Option<Self> {
        if wkt.contains("Mercator_Auxiliary_Sphere") || wkt.contains("Pseudo_Mercator") {
            Some(Crs::WebMercator)
        } else if wkt.contains("North_American_1983") && wkt.starts_with("GEOGCS") {
            Some(Crs::Nad83)
        } else if wkt.contains("WGS_1984") && wkt.starts_with("GEOGCS") {
            Some(Crs::Wgs84)
        } else {
            None
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl From<Crs> for u32 {
    fn from(crs: Crs) -> u32 {
        crs.epsg()
    }
}

impl From<u32> for Crs {
    fn from(code: u32) -> Crs {
        Crs::from_epsg(code)
    }
}

// ---------------------------------------------------------------------------
// Reprojection
// ---------------------------------------------------------------------------

/// Convert one geometry between coordinate systems.
///
/// NAD83 and WGS84 differ by less than two metres across the conterminous
/// U.S.; the two are treated as coordinate-identical.
pub fn reproject(
    geometry: &Geometry<f64>,
    from: Crs,
    to: Crs,
) -> Result<Geometry<f64>, ProjectionMismatchError> {
    if from == to {
        return Ok(geometry.clone());
    }
    if !from.is_supported() || !to.is_supported() {
        return Err(ProjectionMismatchError { left: from, right: to });
    }
    let converted = match (from.is_geographic(), to.is_geographic()) {
        (true, true) => geometry.clone(),
        (true, false) => geometry.map_coords(lonlat_to_mercator),
        (false, true) => geometry.map_coords(mercator_to_lonlat),
        (false, false) => geometry.clone(),
    };
    Ok(converted)
}

fn lonlat_to_mercator(c: Coord<f64>) -> Coord<f64> {
    let lat = c.y.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    Coord {
        x: EARTH_RADIUS_M * c.x.to_radians(),
        y: EARTH_RADIUS_M * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln(),
    }
}

fn mercator_to_lonlat(c: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (c.x / EARTH_RADIUS_M).to_degrees(),
        y: (2.0 * (c.y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Coord};

    fn max_delta(a: &Geometry<f64>, b: &Geometry<f64>) -> f64 {
        use geo::CoordsIter;
        a.coords_iter()
            .zip(b.coords_iter())
            .map(|(p, q): (Coord<f64>, Coord<f64>)| (p.x - q.x).abs().max((p.y - q.y).abs()))
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_mercator_round_trip() {
        let tract: Geometry<f64> = polygon![
            (x: -87.95, y: 43.02),
            (x: -87.90, y: 43.02),
            (x: -87.90, y: 43.06),
            (x: -87.95, y: 43.06),
            (x: -87.95, y: 43.02),
        ]
        .into();
        let there = reproject(&tract, Crs::Wgs84, Crs::WebMercator).unwrap();
        assert!(max_delta(&tract, &there) > 1_000.0);
        let back = reproject(&there, Crs::WebMercator, Crs::Wgs84).unwrap();
        assert!(max_delta(&tract, &back) < 1e-9);
    }

    #[test]
    fn test_known_mercator_coordinate() {
        let p: Geometry<f64> = geo::Point::new(180.0, 0.0).into();
        let m = reproject(&p, Crs::Nad83, Crs::WebMercator).unwrap();
        let Geometry::Point(m) = m else {
            panic!("point expected")
        };
        assert!((m.x() - 20_037_508.342_789_244).abs() < 1e-6);
        assert!(m.y().abs() < 1e-6);
    }

    #[test]
    fn test_unsupported_crs_is_rejected() {
        let p: Geometry<f64> = geo::Point::new(1.0, 2.0).into();
        let err = reproject(&p, Crs::Other(2263), Crs::Wgs84).unwrap_err();
        assert_eq!(err.left, Crs::Other(2263));
        // Same tag on both sides needs no conversion.
        assert!(reproject(&p, Crs::Other(2263), Crs::Other(2263)).is_ok());
    }

    #[test]
    fn test_epsg_mapping() {
        assert_eq!(Crs::from_epsg(4269), Crs::Nad83);
        assert_eq!(Crs::from_epsg(900913), Crs::WebMercator);
        assert_eq!(Crs::Other(32616).to_string(), "EPSG:32616");
        assert_eq!(Crs::from_wkt(Crs::Nad83.wkt().unwrap()), Some(Crs::Nad83));
        assert_eq!(Crs::from_wkt(Crs::WebMercator.wkt().unwrap()), Some(Crs::WebMercator));
    }
}
