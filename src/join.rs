//! Spatial filtering of attribute tables against a reference layer.
//!
//! A join never adds rows or columns: each attribute row is kept when its
//! geometry satisfies the predicate against any reference feature, and
//! dropped otherwise.

use std::borrow::Cow;

use geo::{BoundingRect, Geometry, Intersects, Rect, Relate};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::data::crs::Crs;
use crate::data::model::{AttributeTable, GeometryLayer, JoinedTable, Predicate, Spatial, TidyTable};
use crate::error::ProjectionMismatchError;

/// How the joiner reconciles coordinate systems that differ.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrsPolicy {
    /// Reproject the reference layer into the attribute table's CRS.
    #[default]
    Reproject,
    /// Refuse to join across coordinate systems.
    Strict,
}

// ---------------------------------------------------------------------------
// Predicate evaluation
// ---------------------------------------------------------------------------

/// Whether `candidate` satisfies `predicate` against `reference`.
pub fn satisfies(candidate: &Geometry<f64>, reference: &Geometry<f64>, predicate: Predicate) -> bool {
    let (Some(a), Some(b)) = (candidate.bounding_rect(), reference.bounding_rect()) else {
        return false;
    };
    if !a.intersects(&b) {
        return false;
    }
    let matrix = candidate.relate(reference);
    match predicate {
        Predicate::Intersects => matrix.is_intersects(),
        Predicate::Within => matrix.is_within(),
    }
}

/// Return indices of rows passing `predicate` against any reference geometry.
///
/// A row passes when:
/// * it has a geometry, and
/// * that geometry satisfies the predicate for at least one reference.
///
/// Rows without geometry never pass.
pub fn matching_indices<T: Spatial>(
    rows: &[T],
    references: &[Geometry<f64>],
    predicate: Predicate,
) -> Vec<usize> {
    let envelopes: Vec<Option<Rect<f64>>> = references.iter().map(|g| g.bounding_rect()).collect();
    let Some(extent) = envelopes.iter().flatten().copied().reduce(merge_rects) else {
        return Vec::new();
    };

    rows.iter()
        .enumerate()
        .filter(|(_, row)| {
            let Some(geom) = row.geometry() else {
                return false;
            };
            // Cheap rejection against the whole layer before any DE-9IM work.
            match geom.bounding_rect() {
                Some(bbox) if bbox.intersects(&extent) => {}
                _ => return false,
            }
            references.iter().any(|r| satisfies(geom, r, predicate))
        })
        .map(|(i, _)| i)
        .collect()
}

fn merge_rects(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    let (amin, amax) = (a.min(), a.max());
    let (bmin, bmax) = (b.min(), b.max());
    Rect::new(
        (amin.x.min(bmin.x), amin.y.min(bmin.y)),
        (amax.x.max(bmax.x), amax.y.max(bmax.y)),
    )
}

// ---------------------------------------------------------------------------
// SpatialJoiner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpatialJoiner {
    pub predicate: Predicate,
    pub crs_policy: CrsPolicy,
}

impl SpatialJoiner {
    pub fn new(predicate: Predicate) -> Self {
        SpatialJoiner {
            predicate,
            crs_policy: CrsPolicy::default(),
        }
    }

    pub fn with_crs_policy(mut self, policy: CrsPolicy) -> Self {
        self.crs_policy = policy;
        self
    }

    /// Bring the reference layer into `target`, or explain why it can't be.
    fn reconcile<'a>(
        &self,
        target: Crs,
        reference: &'a GeometryLayer,
    ) -> Result<Cow<'a, GeometryLayer>, ProjectionMismatchError> {
        if reference.crs == target {
            return Ok(Cow::Borrowed(reference));
        }
        let mismatch = ProjectionMismatchError {
            left: target,
            right: reference.crs,
        };
        match self.crs_policy {
            CrsPolicy::Strict => Err(mismatch),
            CrsPolicy::Reproject if !target.is_supported() || !reference.crs.is_supported() => {
                Err(mismatch)
            }
            CrsPolicy::Reproject => {
                info!("reprojecting '{}' from {} to {target}", reference.name, reference.crs);
                Ok(Cow::Owned(reference.clone().to_crs(target)?))
            }
        }
    }

    /// Keep the attribute rows that satisfy the predicate against `reference`.
    pub fn join(
        &self,
        table: AttributeTable,
        reference: &GeometryLayer,
    ) -> Result<JoinedTable, ProjectionMismatchError> {
        let reference = self.reconcile(table.crs, reference)?;
        if !table.has_geometry() {
            warn!("attribute table has no geometry; every row is dropped");
        }

        let geometries: Vec<Geometry<f64>> =
            reference.features.iter().map(|f| f.geometry.clone()).collect();
        let keep = matching_indices(&table.records, &geometries, self.predicate);

        let input_rows = table.len();
        let AttributeTable {
            level,
            crs,
            variables,
            records,
        } = table;
        let mut keep = keep.into_iter().peekable();
        let records = records
            .into_iter()
            .enumerate()
            .filter_map(|(i, rec)| keep.next_if_eq(&i).map(|_| rec))
            .collect();

        let joined = JoinedTable {
            table: AttributeTable {
                level,
                crs,
                variables,
                records,
            },
            predicate: self.predicate,
            input_rows,
        };
        info!(
            "{} of {input_rows} {} rows {} '{}'",
            joined.len(),
            joined.table.level,
            self.predicate,
            reference.name
        );
        Ok(joined)
    }

    /// Join a long-form table: rows of a unit are kept or dropped together.
    pub fn join_tidy(
        &self,
        table: &TidyTable,
        reference: &GeometryLayer,
    ) -> Result<TidyTable, ProjectionMismatchError> {
        Ok(self.join(table.to_wide(), reference)?.table.to_tidy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Estimate, Feature, GeographyRecord};
    use crate::data::request::GeographyLevel;
    use geo::{polygon, Polygon};

    fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]
    }

    fn tract(geoid: &str, geometry: Option<Polygon<f64>>) -> GeographyRecord {
        let mut rec = GeographyRecord::new(geoid, format!("Census Tract {geoid}"));
        rec.values.insert("pop".into(), Estimate::new(Some(1000.0), Some(50.0)));
        rec.geometry = geometry.map(Into::into);
        rec
    }

    fn city(crs: Crs) -> GeometryLayer {
        GeometryLayer {
            name: "Incorporated Places".into(),
            crs,
            features: vec![Feature {
                id: "5553000".into(),
                name: Some("Milwaukee".into()),
                class: Some("G4110".into()),
                geometry: square(0.0, 0.0, 10.0).into(),
            }],
        }
    }

    /// Inside, straddling, edge-touching, corner-touching, outside, no geometry.
    fn tracts() -> AttributeTable {
        AttributeTable::from_records(
            GeographyLevel::Tract,
            Crs::Nad83,
            vec!["pop".into()],
            vec![
                tract("01", Some(square(1.0, 1.0, 2.0))),
                tract("02", Some(square(9.0, 4.0, 2.0))),
                tract("03", Some(square(10.0, 0.0, 2.0))),
                tract("04", Some(square(10.0, 10.0, 2.0))),
                tract("05", Some(square(20.0, 20.0, 2.0))),
                tract("06", None),
            ],
        )
    }

    fn geoids(t: &JoinedTable) -> Vec<&str> {
        t.table.records.iter().map(|r| r.geoid.as_str()).collect()
    }

    #[test]
    fn test_intersects_includes_touching() {
        let joined = SpatialJoiner::new(Predicate::Intersects)
            .join(tracts(), &city(Crs::Nad83))
            .unwrap();
        assert_eq!(geoids(&joined), vec!["01", "02", "03", "04"]);
        assert_eq!(joined.input_rows, 6);
        assert_eq!(joined.dropped(), 2);
    }

    #[test]
    fn test_within_excludes_touching_and_straddling() {
        let joined = SpatialJoiner::new(Predicate::Within)
            .join(tracts(), &city(Crs::Nad83))
            .unwrap();
        assert_eq!(geoids(&joined), vec!["01"]);
    }

    #[test]
    fn test_inside_sharing_an_edge_is_within() {
        let table = AttributeTable::from_records(
            GeographyLevel::Tract,
            Crs::Nad83,
            vec![],
            vec![tract("07", Some(square(0.0, 0.0, 3.0)))],
        );
        let joined = SpatialJoiner::new(Predicate::Within)
            .join(table, &city(Crs::Nad83))
            .unwrap();
        assert_eq!(joined.len(), 1);
    }

    #[test]
    fn test_intersects_is_superset_of_within() {
        let reference = city(Crs::Nad83);
        let within = SpatialJoiner::new(Predicate::Within).join(tracts(), &reference).unwrap();
        let intersects = SpatialJoiner::new(Predicate::Intersects)
            .join(tracts(), &reference)
            .unwrap();
        assert!(intersects.len() <= tracts().len());
        assert!(within.len() <= intersects.len());
        for rec in &within.table.records {
            assert!(intersects.table.get(&rec.geoid).is_some());
        }
        // Rows pass through untouched.
        assert_eq!(intersects.table.get("02"), tracts().get("02"));
    }

    #[test]
    fn test_reference_is_reprojected() {
        // Reference in Web Mercator, attributes in NAD83 degrees.
        let mercator = city(Crs::Wgs84).to_crs(Crs::WebMercator).unwrap();
        let joined = SpatialJoiner::new(Predicate::Intersects)
            .join(tracts(), &mercator)
            .unwrap();
        assert_eq!(joined.table.crs, Crs::Nad83);
        let kept = geoids(&joined);
        assert!(kept.contains(&"01") && kept.contains(&"02"));
        assert!(!kept.contains(&"05") && !kept.contains(&"06"));
    }

    #[test]
    fn test_strict_policy_rejects_mismatch() {
        let err = SpatialJoiner::new(Predicate::Intersects)
            .with_crs_policy(CrsPolicy::Strict)
            .join(tracts(), &city(Crs::Wgs84))
            .unwrap_err();
        assert_eq!(err.left, Crs::Nad83);
        assert_eq!(err.right, Crs::Wgs84);
    }

    #[test]
    fn test_unknown_crs_cannot_be_reconciled() {
        let err = SpatialJoiner::default()
            .join(tracts(), &city(Crs::Other(2263)))
            .unwrap_err();
        assert_eq!(err.right, Crs::Other(2263));
    }

    #[test]
    fn test_empty_reference_keeps_nothing() {
        let mut empty = city(Crs::Nad83);
        empty.features.clear();
        let joined = SpatialJoiner::default().join(tracts(), &empty).unwrap();
        assert!(joined.is_empty());
    }

    #[test]
    fn test_join_tidy_keeps_units_whole() {
        let tidy = tracts().to_tidy();
        let joined = SpatialJoiner::new(Predicate::Within)
            .join_tidy(&tidy, &city(Crs::Nad83))
            .unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined.rows[0].geoid, "01");
    }
}
