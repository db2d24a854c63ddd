use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::fips::state_fips;
use crate::error::RequestError;

/// First vintage TIGERweb publishes ACS-aligned boundaries for.
const FIRST_GEOMETRY_YEAR: u16 = 2013;

// ---------------------------------------------------------------------------
// Geography levels, surveys and request options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeographyLevel {
    State,
    County,
    Tract,
    BlockGroup,
    Place,
}

impl GeographyLevel {
    pub const ALL: [GeographyLevel; 5] = [
        GeographyLevel::State,
        GeographyLevel::County,
        GeographyLevel::Place,
        GeographyLevel::Tract,
        GeographyLevel::BlockGroup,
    ];

    /// Name used in the Census API `for=` clause and response header.
    pub fn api_name(self) -> &'static str {
        match self {
            GeographyLevel::State => "state",
            GeographyLevel::County => "county",
            GeographyLevel::Tract => "tract",
            GeographyLevel::BlockGroup => "block group",
            GeographyLevel::Place => "place",
        }
    }

    /// Response columns that concatenate, in order, into the GEOID.
    pub fn geoid_columns(self) -> &'static [&'static str] {
        match self {
            GeographyLevel::State => &["state"],
            GeographyLevel::County => &["state", "county"],
            GeographyLevel::Tract => &["state", "county", "tract"],
            GeographyLevel::BlockGroup => &["state", "county", "tract", "block group"],
            GeographyLevel::Place => &["state", "place"],
        }
    }

    /// Level implied by a GEOID's length, for tables read back from disk.
    pub fn from_geoid(geoid: &str) -> Option<Self> {
        Self::from_geoid_len(geoid.len())
    }

    pub fn from_geoid_len(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.geoid_len() == len)
    }

    /// Characters in a GEOID at this level.
    pub fn geoid_len(self) -> usize {
        match self {
            GeographyLevel::State => 2,
            GeographyLevel::County => 5,
            GeographyLevel::Place => 7,
            GeographyLevel::Tract => 11,
            GeographyLevel::BlockGroup => 12,
        }
    }

    pub fn accepts_county_filter(self) -> bool {
        matches!(
            self,
            GeographyLevel::County | GeographyLevel::Tract | GeographyLevel::BlockGroup
        )
    }
}

impl fmt::Display for GeographyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// American Community Survey product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Survey {
    Acs1,
    Acs3,
    #[default]
    Acs5,
}

impl Survey {
    pub fn path(self) -> &'static str {
        match self {
            Survey::Acs1 => "acs1",
            Survey::Acs3 => "acs3",
            Survey::Acs5 => "acs5",
        }
    }

    /// Whether the Census Bureau released this product for `year`.
    pub fn published(self, year: u16) -> bool {
        match self {
            // The 2020 1-year estimates were withheld.
            Survey::Acs1 => year >= 2005 && year != 2020,
            Survey::Acs3 => (2007..=2013).contains(&year),
            Survey::Acs5 => year >= 2009,
        }
    }
}

/// Wide: one column per variable. Tidy: one row per (unit, variable).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputShape {
    Wide,
    #[default]
    Tidy,
}

/// Boundary detail. Cartographic ("cb") shapes are generalized and clipped to
/// the shoreline; full-resolution shapes match the Bureau's reference maps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    #[default]
    Cartographic,
    Full,
}

// ---------------------------------------------------------------------------
// VariableSpec
// ---------------------------------------------------------------------------

/// A normalized provider variable code without its estimate/MOE suffix,
/// e.g. `B25064_001` or `DP05_0038P`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableCode(String);

impl VariableCode {
    pub fn parse(raw: &str) -> Result<Self, RequestError> {
        let upper = raw.trim().to_ascii_uppercase();
        let invalid = || RequestError::InvalidVariableCode(raw.to_string());
        let (head, cell) = upper.rsplit_once('_').ok_or_else(invalid)?;

        // Table id plus optional middle segments (`S1701_C03`, `CP03_2019`).
        let head_ok = head.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && head
                .split('_')
                .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric()));
        let digits = cell.chars().take_while(|c| c.is_ascii_digit()).count();
        let base_suffix = match &cell[digits..] {
            "" | "E" => "",
            "P" | "PE" => "P",
            _ => return Err(invalid()),
        };
        if !head_ok || digits == 0 {
            return Err(invalid());
        }
        Ok(VariableCode(format!("{head}_{}{base_suffix}", &cell[..digits])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn estimate_column(&self) -> String {
        format!("{}E", self.0)
    }

    pub fn moe_column(&self) -> String {
        format!("{}M", self.0)
    }

    /// Sub-dataset the code belongs to, appended after the survey path.
    pub fn dataset(&self) -> Option<&'static str> {
        let code = self.0.as_str();
        if code.starts_with("DP") {
            Some("profile")
        } else if code.starts_with("CP") {
            Some("cprofile")
        } else if code.starts_with('S') && code[1..].starts_with(|c: char| c.is_ascii_digit()) {
            Some("subject")
        } else {
            None
        }
    }
}

impl fmt::Display for VariableCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-readable label → provider code, in a fixed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSpec {
    entries: Vec<(String, VariableCode)>,
}

impl VariableSpec {
    pub fn new<L, C>(pairs: impl IntoIterator<Item = (L, C)>) -> Result<Self, RequestError>
    where
        L: Into<String>,
        C: AsRef<str>,
    {
        let mut entries = Vec::new();
        let mut labels = BTreeSet::new();
        let mut codes = BTreeSet::new();
        for (label, code) in pairs {
            let label = label.into();
            let code = VariableCode::parse(code.as_ref())?;
            if label.trim().is_empty() {
                return Err(RequestError::InvalidVariableCode(code.0));
            }
            if !labels.insert(label.clone()) {
                return Err(RequestError::DuplicateVariable(label));
            }
            if !codes.insert(code.clone()) {
                return Err(RequestError::DuplicateVariable(code.0));
            }
            entries.push((label, code));
        }
        if entries.is_empty() {
            return Err(RequestError::NoVariables);
        }
        Ok(VariableSpec { entries })
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|(l, _)| l.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariableCode)> {
        self.entries.iter().map(|(l, c)| (l.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// GeographyRequest
// ---------------------------------------------------------------------------

/// Everything one attribute fetch needs. Build with [`GeographyRequest::builder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeographyRequest {
    pub level: GeographyLevel,
    /// 2-digit state FIPS code.
    pub state: String,
    /// County names as given; empty means every county in the state.
    pub counties: Vec<String>,
    pub year: u16,
    pub survey: Survey,
    pub shape: OutputShape,
    pub geometry: bool,
    pub resolution: Resolution,
}

impl GeographyRequest {
    pub fn builder(level: GeographyLevel) -> GeographyRequestBuilder {
        GeographyRequestBuilder {
            level: Some(level),
            ..Default::default()
        }
    }
}

/// Unvalidated request options. Also the on-disk form inside an analysis config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeographyRequestBuilder {
    pub level: Option<GeographyLevel>,
    pub state: Option<String>,
    pub counties: Vec<String>,
    pub year: Option<u16>,
    pub survey: Survey,
    pub shape: OutputShape,
    pub geometry: bool,
    pub resolution: Resolution,
}

impl GeographyRequestBuilder {
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn counties<S: Into<String>>(mut self, counties: impl IntoIterator<Item = S>) -> Self {
        self.counties = counties.into_iter().map(Into::into).collect();
        self
    }

    pub fn year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }

    pub fn survey(mut self, survey: Survey) -> Self {
        self.survey = survey;
        self
    }

    pub fn shape(mut self, shape: OutputShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn geometry(mut self, geometry: bool) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Check every option combination before anything touches the network.
    pub fn build(self) -> Result<GeographyRequest, RequestError> {
        let level = self.level.ok_or(RequestError::Missing("level"))?;
        let state_input = self.state.ok_or(RequestError::Missing("state"))?;
        let state = state_fips(&state_input)
            .ok_or_else(|| RequestError::UnknownState(state_input.clone()))?;
        let year = self.year.ok_or(RequestError::Missing("year"))?;

        if !self.counties.is_empty() && !level.accepts_county_filter() {
            return Err(RequestError::CountyFilterUnsupported {
                level: level.api_name(),
            });
        }
        if !self.survey.published(year) {
            return Err(RequestError::UnsupportedVintage {
                survey: self.survey.path(),
                year,
            });
        }
        if self.geometry && year < FIRST_GEOMETRY_YEAR {
            return Err(RequestError::GeometryUnavailable(
                "ACS boundary",
                "vintages 2013 and later",
            ));
        }

        let mut seen = BTreeSet::new();
        let counties = self
            .counties
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty() && seen.insert(c.to_ascii_lowercase()))
            .collect();

        Ok(GeographyRequest {
            level,
            state: state.to_string(),
            counties,
            year,
            survey: self.survey,
            shape: self.shape,
            geometry: self.geometry,
            resolution: self.resolution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_code_normalization() {
        assert_eq!(VariableCode::parse("B25064_001E").unwrap().as_str(), "B25064_001");
        assert_eq!(VariableCode::parse("b25064_001").unwrap().as_str(), "B25064_001");
        let dp = VariableCode::parse("DP05_0038PE").unwrap();
        assert_eq!(dp.as_str(), "DP05_0038P");
        assert_eq!(dp.estimate_column(), "DP05_0038PE");
        assert_eq!(dp.moe_column(), "DP05_0038PM");
        assert!(VariableCode::parse("B25064_001M").is_err());
        assert!(VariableCode::parse("median rent").is_err());
        assert!(VariableCode::parse("_001").is_err());
    }

    #[test]
    fn test_level_from_geoid() {
        assert_eq!(GeographyLevel::from_geoid("55079000101"), Some(GeographyLevel::Tract));
        assert_eq!(GeographyLevel::from_geoid("550790001011"), Some(GeographyLevel::BlockGroup));
        assert_eq!(GeographyLevel::from_geoid("5553000"), Some(GeographyLevel::Place));
        assert_eq!(GeographyLevel::from_geoid("5507"), None);
        assert_eq!(GeographyLevel::from_geoid_len(GeographyLevel::County.geoid_len()), Some(GeographyLevel::County));
    }

    #[test]
    fn test_variable_dataset_routing() {
        let ds = |c: &str| VariableCode::parse(c).unwrap().dataset();
        assert_eq!(ds("B03002_004"), None);
        assert_eq!(ds("DP05_0038PE"), Some("profile"));
        assert_eq!(ds("S1701_C03_001E"), Some("subject"));
        assert_eq!(ds("CP03_2019_062E"), Some("cprofile"));
        assert_eq!(
            VariableCode::parse("S1701_C03_001E").unwrap().as_str(),
            "S1701_C03_001"
        );
    }

    #[test]
    fn test_variable_spec_rejects_duplicates() {
        let err = VariableSpec::new([("rent", "B25064_001"), ("rent", "B25064_002")]).unwrap_err();
        assert_eq!(err, RequestError::DuplicateVariable("rent".into()));
        let err = VariableSpec::new([("a", "B25064_001E"), ("b", "B25064_001")]).unwrap_err();
        assert_eq!(err, RequestError::DuplicateVariable("B25064_001".into()));
        let empty: [(&str, &str); 0] = [];
        assert_eq!(VariableSpec::new(empty).unwrap_err(), RequestError::NoVariables);
    }

    #[test]
    fn test_builder_resolves_state_and_dedups_counties() {
        let req = GeographyRequest::builder(GeographyLevel::Tract)
            .state("Wisconsin")
            .counties(["Milwaukee", "Waukesha", " milwaukee "])
            .year(2022)
            .geometry(true)
            .build()
            .unwrap();
        assert_eq!(req.state, "55");
        assert_eq!(req.counties, vec!["Milwaukee", "Waukesha"]);
        assert_eq!(req.survey, Survey::Acs5);
        assert_eq!(req.shape, OutputShape::Tidy);
    }

    #[test]
    fn test_builder_rejects_invalid_combinations() {
        let place = GeographyRequest::builder(GeographyLevel::Place)
            .state("WI")
            .counties(["Milwaukee"])
            .year(2022)
            .build();
        assert_eq!(
            place.unwrap_err(),
            RequestError::CountyFilterUnsupported { level: "place" }
        );

        let acs1_2020 = GeographyRequest::builder(GeographyLevel::County)
            .state("WI")
            .year(2020)
            .survey(Survey::Acs1)
            .build();
        assert!(matches!(
            acs1_2020.unwrap_err(),
            RequestError::UnsupportedVintage { year: 2020, .. }
        ));

        let old_geometry = GeographyRequest::builder(GeographyLevel::County)
            .state("WI")
            .year(2010)
            .geometry(true)
            .build();
        assert!(matches!(
            old_geometry.unwrap_err(),
            RequestError::GeometryUnavailable(..)
        ));

        let no_year = GeographyRequest::builder(GeographyLevel::County).state("WI").build();
        assert_eq!(no_year.unwrap_err(), RequestError::Missing("year"));

        let bad_state = GeographyRequest::builder(GeographyLevel::County)
            .state("Atlantis")
            .year(2022)
            .build();
        assert_eq!(bad_state.unwrap_err(), RequestError::UnknownState("Atlantis".into()));
    }
}
