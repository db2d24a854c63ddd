use std::collections::BTreeMap;
use std::fmt;

use geo::{Geometry, LineString, MultiLineString};
use serde::{Deserialize, Serialize};

use super::crs::{reproject, Crs};
use super::request::GeographyLevel;
use crate::error::ProjectionMismatchError;

// ---------------------------------------------------------------------------
// Estimate – a single cell of an attribute table
// ---------------------------------------------------------------------------

/// Census sentinels meaning "no estimate could be computed".
const MISSING_SENTINELS: [f64; 7] = [
    -111_111_111.0,
    -222_222_222.0,
    -333_333_333.0,
    -555_555_555.0,
    -666_666_666.0,
    -888_888_888.0,
    -999_999_999.0,
];

/// An estimate with its margin of error. `None` is the explicit missing marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub estimate: Option<f64>,
    pub moe: Option<f64>,
}

impl Estimate {
    pub fn new(estimate: Option<f64>, moe: Option<f64>) -> Self {
        Estimate { estimate, moe }
    }

    /// Interpret one raw API cell, mapping sentinels and blanks to `None`.
    pub fn parse_cell(raw: Option<&str>) -> Option<f64> {
        let value: f64 = raw?.trim().parse().ok()?;
        if MISSING_SENTINELS.contains(&value) || !value.is_finite() {
            None
        } else {
            Some(value)
        }
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.estimate, self.moe) {
            (Some(e), Some(m)) => write!(f, "{e} ± {m}"),
            (Some(e), None) => write!(f, "{e}"),
            (None, _) => write!(f, "<missing>"),
        }
    }
}

// ---------------------------------------------------------------------------
// Spatial – anything carrying an optional geometry
// ---------------------------------------------------------------------------

/// Rows that can take part in a spatial predicate.
pub trait Spatial {
    fn geometry(&self) -> Option<&Geometry<f64>>;
}

// ---------------------------------------------------------------------------
// AttributeTable – wide form, one row per geography unit
// ---------------------------------------------------------------------------

/// One geography unit with its estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct GeographyRecord {
    pub geoid: String,
    pub name: String,
    /// Variable label → estimate.
    pub values: BTreeMap<String, Estimate>,
    pub geometry: Option<Geometry<f64>>,
}

impl GeographyRecord {
    pub fn new(geoid: impl Into<String>, name: impl Into<String>) -> Self {
        GeographyRecord {
            geoid: geoid.into(),
            name: name.into(),
            values: BTreeMap::new(),
            geometry: None,
        }
    }

    /// Estimate for `label`, missing when the label is absent.
    pub fn estimate(&self, label: &str) -> Option<f64> {
        self.values.get(label).and_then(|e| e.estimate)
    }
}

impl Spatial for GeographyRecord {
    fn geometry(&self) -> Option<&Geometry<f64>> {
        self.geometry.as_ref()
    }
}

/// Wide attribute table: one row per GEOID, one estimate column per variable.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeTable {
    pub level: GeographyLevel,
    pub crs: Crs,
    /// Variable labels in request order.
    pub variables: Vec<String>,
    /// Rows sorted by GEOID.
    pub records: Vec<GeographyRecord>,
}

impl AttributeTable {
    /// Build a table from records, keeping one row per GEOID.
    ///
    /// A later record with the same GEOID has its values merged into the
    /// earlier one; this is how chunked fetches of the same region combine.
    pub fn from_records(
        level: GeographyLevel,
        crs: Crs,
        variables: Vec<String>,
        records: impl IntoIterator<Item = GeographyRecord>,
    ) -> Self {
        let mut by_geoid: BTreeMap<String, GeographyRecord> = BTreeMap::new();
        for rec in records {
            match by_geoid.get_mut(&rec.geoid) {
                Some(existing) => {
                    existing.values.extend(rec.values);
                    if existing.geometry.is_none() {
                        existing.geometry = rec.geometry;
                    }
                }
                None => {
                    by_geoid.insert(rec.geoid.clone(), rec);
                }
            }
        }
        AttributeTable {
            level,
            crs,
            variables,
            records: by_geoid.into_values().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, geoid: &str) -> Option<&GeographyRecord> {
        self.records
            .binary_search_by(|r| r.geoid.as_str().cmp(geoid))
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn has_geometry(&self) -> bool {
        self.records.iter().any(|r| r.geometry.is_some())
    }

    /// Reproject every geometry into `target`.
    pub fn to_crs(mut self, target: Crs) -> Result<Self, ProjectionMismatchError> {
        if self.crs == target {
            return Ok(self);
        }
        for rec in &mut self.records {
            if let Some(g) = &rec.geometry {
                rec.geometry = Some(reproject(g, self.crs, target)?);
            }
        }
        self.crs = target;
        Ok(self)
    }

    /// Pivot to the long form: one row per (unit, variable).
    pub fn to_tidy(&self) -> TidyTable {
        let mut rows = Vec::with_capacity(self.records.len() * self.variables.len());
        let mut geometries = BTreeMap::new();
        for rec in &self.records {
            for label in &self.variables {
                let est = rec.values.get(label).copied().unwrap_or_default();
                rows.push(TidyRow {
                    geoid: rec.geoid.clone(),
                    name: rec.name.clone(),
                    variable: label.clone(),
                    estimate: est.estimate,
                    moe: est.moe,
                });
            }
            if let Some(g) = &rec.geometry {
                geometries.insert(rec.geoid.clone(), g.clone());
            }
        }
        TidyTable {
            level: self.level,
            crs: self.crs,
            variables: self.variables.clone(),
            rows,
            geometries,
        }
    }

    /// Per-variable summary over non-missing estimates.
    pub fn summary(&self) -> Vec<ColumnSummary> {
        self.variables
            .iter()
            .map(|label| {
                let values: Vec<f64> = self
                    .records
                    .iter()
                    .filter_map(|r| r.estimate(label))
                    .collect();
                ColumnSummary::from_values(label, &values, self.records.len())
            })
            .collect()
    }
}

/// Descriptive statistics for one variable column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub variable: String,
    pub count: usize,
    pub missing: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

impl ColumnSummary {
    fn from_values(label: &str, values: &[f64], rows: usize) -> Self {
        let mean = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
        ColumnSummary {
            variable: label.to_string(),
            count: values.len(),
            missing: rows - values.len(),
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            mean,
        }
    }
}

// ---------------------------------------------------------------------------
// TidyTable – long form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TidyRow {
    pub geoid: String,
    pub name: String,
    pub variable: String,
    pub estimate: Option<f64>,
    pub moe: Option<f64>,
}

/// Long attribute table. Geometry is held once per unit rather than per row.
#[derive(Debug, Clone, PartialEq)]
pub struct TidyTable {
    pub level: GeographyLevel,
    pub crs: Crs,
    pub variables: Vec<String>,
    pub rows: Vec<TidyRow>,
    pub geometries: BTreeMap<String, Geometry<f64>>,
}

impl TidyTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Pivot back to the wide form.
    pub fn to_wide(&self) -> AttributeTable {
        let mut records: BTreeMap<&str, GeographyRecord> = BTreeMap::new();
        for row in &self.rows {
            let rec = records
                .entry(row.geoid.as_str())
                .or_insert_with(|| GeographyRecord::new(row.geoid.clone(), row.name.clone()));
            rec.values
                .insert(row.variable.clone(), Estimate::new(row.estimate, row.moe));
        }
        for (geoid, rec) in records.iter_mut() {
            rec.geometry = self.geometries.get(*geoid).cloned();
        }
        AttributeTable {
            level: self.level,
            crs: self.crs,
            variables: self.variables.clone(),
            records: records.into_values().collect(),
        }
    }
}

/// Result of an attribute fetch, in the shape the request asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeData {
    Wide(AttributeTable),
    Tidy(TidyTable),
}

impl AttributeData {
    pub fn into_wide(self) -> AttributeTable {
        match self {
            AttributeData::Wide(t) => t,
            AttributeData::Tidy(t) => t.to_wide(),
        }
    }
}

// ---------------------------------------------------------------------------
// GeometryLayer – reference geometry without statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: String,
    pub name: Option<String>,
    /// Feature class such as a MAF/TIGER feature class code or road type.
    pub class: Option<String>,
    pub geometry: Geometry<f64>,
}

impl Spatial for Feature {
    fn geometry(&self) -> Option<&Geometry<f64>> {
        Some(&self.geometry)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeometryLayer {
    /// Service layer name, e.g. "Incorporated Places".
    pub name: String,
    pub crs: Crs,
    pub features: Vec<Feature>,
}

impl GeometryLayer {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Keep features whose name equals `name`, ignoring ASCII case.
    pub fn filter_by_name(&self, name: &str) -> GeometryLayer {
        GeometryLayer {
            name: self.name.clone(),
            crs: self.crs,
            features: self
                .features
                .iter()
                .filter(|f| f.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
                .cloned()
                .collect(),
        }
    }

    pub fn to_crs(mut self, target: Crs) -> Result<Self, ProjectionMismatchError> {
        if self.crs == target {
            return Ok(self);
        }
        for f in &mut self.features {
            f.geometry = reproject(&f.geometry, self.crs, target)?;
        }
        self.crs = target;
        Ok(self)
    }

    /// Outline of every polygon in the layer, for drawing a boundary over a
    /// choropleth. Derived from this layer so overlay and join always agree.
    pub fn boundary_lines(&self) -> MultiLineString<f64> {
        let mut lines: Vec<LineString<f64>> = Vec::new();
        for f in &self.features {
            collect_rings(&f.geometry, &mut lines);
        }
        MultiLineString::new(lines)
    }
}

fn collect_rings(geometry: &Geometry<f64>, out: &mut Vec<LineString<f64>>) {
    match geometry {
        Geometry::Polygon(p) => {
            out.push(p.exterior().clone());
            out.extend(p.interiors().iter().cloned());
        }
        Geometry::MultiPolygon(mp) => {
            for p in &mp.0 {
                out.push(p.exterior().clone());
                out.extend(p.interiors().iter().cloned());
            }
        }
        Geometry::GeometryCollection(gc) => {
            for g in &gc.0 {
                collect_rings(g, out);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// JoinedTable
// ---------------------------------------------------------------------------

/// Spatial predicate evaluated between an attribute row and the reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Any shared point, boundary contact included.
    #[default]
    Intersects,
    /// Entirely inside the reference, not merely touching it.
    Within,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Intersects => write!(f, "intersects"),
            Predicate::Within => write!(f, "within"),
        }
    }
}

/// Attribute rows that passed a spatial predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedTable {
    pub table: AttributeTable,
    pub predicate: Predicate,
    /// Row count of the attribute table before filtering.
    pub input_rows: usize,
}

impl JoinedTable {
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn dropped(&self) -> usize {
        self.input_rows - self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn record(geoid: &str, rent: Option<f64>) -> GeographyRecord {
        let mut rec = GeographyRecord::new(geoid, format!("Tract {geoid}"));
        rec.values
            .insert("median_rent".into(), Estimate::new(rent, rent.map(|r| r / 10.0)));
        rec.values
            .insert("pct_black".into(), Estimate::new(Some(12.5), None));
        rec
    }

    fn sample_table() -> AttributeTable {
        let mut with_geom = record("55079000101", Some(950.0));
        with_geom.geometry = Some(
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)].into(),
        );
        AttributeTable::from_records(
            GeographyLevel::Tract,
            Crs::Nad83,
            vec!["median_rent".into(), "pct_black".into()],
            vec![with_geom, record("55079000102", None), record("55079000200", Some(1100.0))],
        )
    }

    #[test]
    fn test_parse_cell_sentinels() {
        assert_eq!(Estimate::parse_cell(Some("1234")), Some(1234.0));
        assert_eq!(Estimate::parse_cell(Some("-666666666")), None);
        assert_eq!(Estimate::parse_cell(Some("-222222222")), None);
        assert_eq!(Estimate::parse_cell(Some("")), None);
        assert_eq!(Estimate::parse_cell(None), None);
        assert_eq!(Estimate::parse_cell(Some("-3.5")), Some(-3.5));
    }

    #[test]
    fn test_from_records_merges_duplicate_geoids() {
        let mut a = GeographyRecord::new("55079", "Milwaukee County");
        a.values.insert("x".into(), Estimate::new(Some(1.0), None));
        let mut b = GeographyRecord::new("55079", "Milwaukee County");
        b.values.insert("y".into(), Estimate::new(Some(2.0), None));
        let t = AttributeTable::from_records(
            GeographyLevel::County,
            Crs::Nad83,
            vec!["x".into(), "y".into()],
            vec![a, b],
        );
        assert_eq!(t.len(), 1);
        assert_eq!(t.records[0].estimate("x"), Some(1.0));
        assert_eq!(t.records[0].estimate("y"), Some(2.0));
    }

    #[test]
    fn test_wide_tidy_round_trip() {
        let wide = sample_table();
        let tidy = wide.to_tidy();
        assert_eq!(tidy.len(), 6);
        let units: std::collections::BTreeSet<&str> = tidy.rows.iter().map(|r| r.geoid.as_str()).collect();
        assert_eq!(units.len(), 3);
        assert_eq!(tidy.geometries.len(), 1);
        assert_eq!(tidy.to_wide(), wide);
    }

    #[test]
    fn test_get_by_geoid() {
        let t = sample_table();
        assert_eq!(t.get("55079000200").unwrap().estimate("median_rent"), Some(1100.0));
        assert!(t.get("55079999999").is_none());
    }

    #[test]
    fn test_summary_counts_missing() {
        let s = sample_table().summary();
        assert_eq!(s[0].variable, "median_rent");
        assert_eq!(s[0].count, 2);
        assert_eq!(s[0].missing, 1);
        assert_eq!(s[0].min, Some(950.0));
        assert_eq!(s[0].max, Some(1100.0));
        assert_eq!(s[0].mean, Some(1025.0));
    }

    #[test]
    fn test_boundary_lines_and_name_filter() {
        let layer = GeometryLayer {
            name: "Incorporated Places".into(),
            crs: Crs::Nad83,
            features: vec![
                Feature {
                    id: "5553000".into(),
                    name: Some("Milwaukee".into()),
                    class: Some("C1".into()),
                    geometry: polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 0.0)].into(),
                },
                Feature {
                    id: "5584675".into(),
                    name: Some("Wauwatosa".into()),
                    class: Some("C1".into()),
                    geometry: polygon![(x: 5.0, y: 5.0), (x: 6.0, y: 5.0), (x: 6.0, y: 6.0), (x: 5.0, y: 5.0)].into(),
                },
            ],
        };
        let city = layer.filter_by_name("milwaukee");
        assert_eq!(city.len(), 1);
        assert_eq!(city.features[0].id, "5553000");
        assert_eq!(city.boundary_lines().0.len(), 1);
        assert_eq!(layer.boundary_lines().0.len(), 2);
    }
}
