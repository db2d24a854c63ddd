//! Client and analysis configuration.
//!
//! `ClientConfig` points the fetchers at the remote services; `AnalysisConfig`
//! is the JSON document the `census-geo run` command executes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::crs::Crs;
use crate::data::model::Predicate;
use crate::data::request::{GeographyRequestBuilder, Resolution};
use crate::fetch::geometry::LayerKind;
use crate::join::CrsPolicy;

pub const CENSUS_API_URL: &str = "https://api.census.gov/data";
pub const TIGERWEB_URL: &str = "https://tigerweb.geo.census.gov/arcgis/rest/services/TIGERweb";

/// Environment variable holding a Census Data API key.
pub const API_KEY_ENV: &str = "CENSUS_API_KEY";

/// Where the fetchers send requests and how they tag returned geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub census_base_url: String,
    pub tigerweb_base_url: String,
    /// Optional Data API key. Anonymous access is rate limited.
    pub api_key: Option<String>,
    /// CRS geometry is requested in from TIGERweb.
    pub output_crs: Crs,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            census_base_url: CENSUS_API_URL.to_string(),
            tigerweb_base_url: TIGERWEB_URL.to_string(),
            api_key: None,
            output_crs: Crs::Nad83,
        }
    }
}

impl ClientConfig {
    /// Defaults plus `CENSUS_API_KEY` when set and non-empty.
    pub fn from_env() -> Self {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty());
        ClientConfig {
            api_key,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// AnalysisConfig – one fetch → join → export run
// ---------------------------------------------------------------------------

/// Reference layer the attribute table is filtered against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceConfig {
    pub layer: LayerKind,
    /// Keep only features with this name (e.g. a city) before joining.
    pub name: Option<String>,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub predicate: Predicate,
    #[serde(default)]
    pub crs_policy: CrsPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub path: PathBuf,
    /// EPSG code written to the output. Defaults to WGS84.
    #[serde(default = "default_export_crs")]
    pub crs: Crs,
}

fn default_export_crs() -> Crs {
    Crs::Wgs84
}

/// A complete analysis, loaded from JSON:
///
/// ```json
/// {
///   "request": { "level": "tract", "state": "WI", "counties": ["Milwaukee"],
///                "year": 2022, "geometry": true, "shape": "wide" },
///   "variables": { "median_rent": "B25064_001", "pct_black": "DP05_0038PE" },
///   "reference": { "layer": "place", "name": "Milwaukee" },
///   "export": { "path": "milwaukee_tracts.shp" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub request: GeographyRequestBuilder,
    /// Label → variable code. Order is preserved from the file.
    pub variables: Vec<(String, String)>,
    pub reference: Option<ReferenceConfig>,
    pub export: Option<ExportConfig>,
    #[serde(default)]
    pub client: Option<ClientConfig>,
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_str(text).context("invalid JSON")?;
        // Variables are written as an object for readability but their order
        // matters, so they are read back as pairs.
        let variables = raw
            .get("variables")
            .and_then(|v| v.as_object())
            .context("'variables' must be an object of label → code")?
            .iter()
            .map(|(label, code)| {
                code.as_str()
                    .map(|c| (label.clone(), c.to_string()))
                    .with_context(|| format!("variable '{label}' must map to a string code"))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut rest = raw;
        if let Some(obj) = rest.as_object_mut() {
            obj.insert(
                "variables".into(),
                serde_json::to_value(&variables).context("re-encoding variables")?,
            );
        }
        serde_json::from_value(rest).context("invalid analysis config")
    }

    pub fn client(&self) -> ClientConfig {
        let mut client = self.client.clone().unwrap_or_else(ClientConfig::from_env);
        if client.api_key.is_none() {
            client.api_key = ClientConfig::from_env().api_key;
        }
        client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::request::{GeographyLevel, OutputShape};

    const SAMPLE: &str = r#"{
        "request": { "level": "tract", "state": "WI", "counties": ["Milwaukee"],
                     "year": 2022, "geometry": true, "shape": "wide" },
        "variables": { "pct_black": "DP05_0038PE", "median_rent": "B25064_001" },
        "reference": { "layer": "place", "name": "Milwaukee", "predicate": "within" },
        "export": { "path": "out/tracts.geojson" }
    }"#;

    #[test]
    fn test_parse_analysis_config() {
        let cfg = AnalysisConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.request.level, Some(GeographyLevel::Tract));
        assert_eq!(cfg.request.shape, OutputShape::Wide);
        assert_eq!(cfg.variables[0].0, "pct_black");
        assert_eq!(cfg.variables[1].1, "B25064_001");
        let reference = cfg.reference.unwrap();
        assert_eq!(reference.layer, LayerKind::Place);
        assert_eq!(reference.predicate, Predicate::Within);
        assert_eq!(reference.crs_policy, CrsPolicy::Reproject);
        let export = cfg.export.unwrap();
        assert_eq!(export.crs, Crs::Wgs84);
    }

    #[test]
    fn test_variables_must_be_strings() {
        let bad = r#"{ "request": {}, "variables": { "rent": 5 } }"#;
        assert!(AnalysisConfig::parse(bad).is_err());
    }

    #[test]
    fn test_client_defaults() {
        let c = ClientConfig::default();
        assert_eq!(c.output_crs, Crs::Nad83);
        assert!(c.census_base_url.starts_with("https://api.census.gov"));
    }
}
