use std::cell::RefCell;

use census_geo::error::RemoteFetchError;
use census_geo::export::read_geojson;
use census_geo::{
    Analysis, AnalysisConfig, Crs, Error, GeographyLevel, JoinedTable, Predicate, Render, Transport,
};
use serde_json::json;
use url::Url;

/// Serves canned bodies by URL substring, first match wins.
struct Canned {
    routes: Vec<(&'static str, String)>,
    seen: RefCell<Vec<String>>,
}

impl Canned {
    fn milwaukee() -> Self {
        let counties = r#"[["NAME","state","county"],["Milwaukee County, Wisconsin","55","079"]]"#;
        let rents = r#"[["NAME","B25064_001E","B25064_001M","state","county","tract"],
            ["Census Tract 1","900","40","55","079","000100"],
            ["Census Tract 2","1100","55","55","079","000200"],
            ["Census Tract 3","-666666666","-222222222","55","079","000300"]]"#;
        let catalogue = r#"{"layers":[{"id":8,"name":"Census Tracts"},{"id":28,"name":"Incorporated Places"}]}"#;
        let tracts = feature_collection(&[
            feature("55079000100", "1", square(1.0, 1.0, 2.0)),
            feature("55079000200", "2", square(9.0, 4.0, 2.0)),
            feature("55079000300", "3", square(20.0, 20.0, 2.0)),
        ]);
        let places = feature_collection(&[
            feature("5553000", "Milwaukee", square(0.0, 0.0, 10.0)),
            feature("5584675", "Wauwatosa", square(-10.0, 0.0, 9.0)),
        ]);
        Canned {
            routes: vec![
                ("get=NAME&for=county", counties.to_string()),
                ("for=tract", rents.to_string()),
                ("MapServer?f=json", catalogue.to_string()),
                ("MapServer/8/query", tracts),
                ("MapServer/28/query", places),
            ],
            seen: RefCell::new(Vec::new()),
        }
    }
}

impl Transport for Canned {
    fn get(&self, url: &Url) -> Result<String, RemoteFetchError> {
        let text = url.to_string();
        self.seen.borrow_mut().push(text.clone());
        self.routes
            .iter()
            .find(|(needle, _)| text.contains(needle))
            .map(|(_, body)| body.clone())
            .ok_or(RemoteFetchError::Status {
                url: text,
                status: 404,
                body: String::new(),
            })
    }
}

fn square(x0: f64, y0: f64, size: f64) -> serde_json::Value {
    json!({
        "type": "Polygon",
        "coordinates": [[[x0, y0], [x0 + size, y0], [x0 + size, y0 + size], [x0, y0 + size], [x0, y0]]]
    })
}

fn feature(geoid: &str, name: &str, geometry: serde_json::Value) -> serde_json::Value {
    json!({
        "type": "Feature",
        "properties": { "GEOID": geoid, "BASENAME": name },
        "geometry": geometry
    })
}

fn feature_collection(features: &[serde_json::Value]) -> String {
    json!({ "type": "FeatureCollection", "features": features }).to_string()
}

fn config(reference: Option<serde_json::Value>, export: Option<&std::path::Path>) -> AnalysisConfig {
    let mut doc = json!({
        "request": { "level": "tract", "state": "Wisconsin", "counties": ["Milwaukee"], "year": 2022 },
        "variables": { "median_rent": "B25064_001E" },
        "client": {
            "census_base_url": "https://census.test/data",
            "tigerweb_base_url": "https://tiger.test/TIGERweb",
            "api_key": "KEY"
        }
    });
    if let Some(reference) = reference {
        doc["reference"] = reference;
    }
    if let Some(path) = export {
        doc["export"] = json!({ "path": path });
    }
    AnalysisConfig::parse(&doc.to_string()).unwrap()
}

#[test]
fn within_city_keeps_only_inner_tracts_and_exports_them() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("milwaukee.geojson");
    let canned = Canned::milwaukee();
    let cfg = config(
        Some(json!({ "layer": "place", "name": "Milwaukee", "predicate": "within" })),
        Some(&out),
    );

    let output = Analysis::new(&canned, cfg).run().unwrap();
    assert_eq!(output.joined.input_rows, 3);
    assert_eq!(output.joined.predicate, Predicate::Within);
    let kept: Vec<&str> = output.joined.table.records.iter().map(|r| r.geoid.as_str()).collect();
    assert_eq!(kept, vec!["55079000100"]);

    let reference = output.reference.as_ref().unwrap();
    assert_eq!(reference.len(), 1);
    assert_eq!(output.overlay.as_ref().unwrap().0.len(), 1);

    let exported = read_geojson(&out).unwrap();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported.crs, Crs::Wgs84);
    assert_eq!(exported.level, GeographyLevel::Tract);
    assert_eq!(exported.records[0].estimate("median_rent"), Some(900.0));

    // Geometry was requested for the join even though the request left it off.
    assert!(canned.seen.borrow().iter().any(|u| u.contains("MapServer/8/query")));
}

#[test]
fn intersects_keeps_touching_and_straddling_tracts() {
    let canned = Canned::milwaukee();
    let cfg = config(Some(json!({ "layer": "place", "name": "milwaukee" })), None);
    let output = Analysis::new(&canned, cfg).run().unwrap();
    assert_eq!(output.joined.len(), 2);
    assert_eq!(output.joined.dropped(), 1);
    // The suppressed estimate survives as an explicit missing value.
    assert!(output.joined.table.records.iter().all(|r| r.values.contains_key("median_rent")));
}

#[test]
fn without_reference_every_row_is_kept_and_tiger_is_not_called() {
    let canned = Canned::milwaukee();
    let output = Analysis::new(&canned, config(None, None)).run().unwrap();
    assert_eq!(output.joined.len(), 3);
    assert!(output.reference.is_none());
    let third = output.joined.table.get("55079000300").unwrap();
    assert_eq!(third.estimate("median_rent"), None);
    assert!(!canned.seen.borrow().iter().any(|u| u.contains("MapServer")));
}

#[test]
fn unknown_reference_name_is_an_error() {
    let canned = Canned::milwaukee();
    let cfg = config(Some(json!({ "layer": "place", "name": "Madison" })), None);
    let err = Analysis::new(&canned, cfg).run().unwrap_err();
    assert!(matches!(err, Error::RemoteFetch(RemoteFetchError::Empty(_))));
}

struct Recorder {
    calls: RefCell<Vec<(String, usize)>>,
}

impl Render for Recorder {
    fn render(&self, table: &JoinedTable, column: &str) -> Result<(), Error> {
        self.calls.borrow_mut().push((column.to_string(), table.len()));
        Ok(())
    }
}

#[test]
fn renderer_receives_the_joined_table() {
    let canned = Canned::milwaukee();
    let cfg = config(Some(json!({ "layer": "place", "name": "Milwaukee", "predicate": "within" })), None);
    let output = Analysis::new(&canned, cfg).run().unwrap();

    let recorder = Recorder {
        calls: RefCell::new(Vec::new()),
    };
    let renderer: &dyn Render = &recorder;
    renderer.render(&output.joined, "median_rent").unwrap();
    assert_eq!(recorder.calls.borrow().as_slice(), &[("median_rent".to_string(), 1)]);
}
