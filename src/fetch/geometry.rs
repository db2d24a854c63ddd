use std::collections::BTreeMap;

use geo::{BoundingRect, Geometry, GeometryCollection};
use geojson::{Feature as GeoJsonFeature, FeatureCollection, JsonObject, JsonValue};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

use super::transport::Transport;
use crate::config::ClientConfig;
use crate::data::crs::{reproject, Crs};
use crate::data::model::{Feature, GeometryLayer, Predicate};
use crate::data::request::{GeographyLevel, Resolution};
use crate::error::{Error, RemoteFetchError, RequestError};
use crate::join::matching_indices;

/// Hard stop for runaway paging.
const MAX_PAGES: usize = 1_000;

// ---------------------------------------------------------------------------
// Layer kinds
// ---------------------------------------------------------------------------

/// TIGERweb layers the fetcher knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    State,
    County,
    Tract,
    BlockGroup,
    Place,
    DesignatedPlace,
    PrimaryRoads,
    SecondaryRoads,
    AreaWater,
    LinearWater,
}

impl LayerKind {
    /// Layer title inside its MapServer.
    pub fn layer_name(self) -> &'static str {
        match self {
            LayerKind::State => "States",
            LayerKind::County => "Counties",
            LayerKind::Tract => "Census Tracts",
            LayerKind::BlockGroup => "Census Block Groups",
            LayerKind::Place => "Incorporated Places",
            LayerKind::DesignatedPlace => "Census Designated Places",
            LayerKind::PrimaryRoads => "Primary Roads",
            LayerKind::SecondaryRoads => "Secondary Roads",
            LayerKind::AreaWater => "Area Hydrography",
            LayerKind::LinearWater => "Linear Hydrography",
        }
    }

    /// MapServer publishing the layer.
    pub fn service(self, year: Option<u16>, resolution: Resolution) -> String {
        match self {
            LayerKind::PrimaryRoads | LayerKind::SecondaryRoads => "Transportation".into(),
            LayerKind::AreaWater | LayerKind::LinearWater => "Hydro".into(),
            _ => match (year, resolution) {
                (Some(y), Resolution::Full) => format!("tigerWMS_ACS{y}"),
                (Some(y), Resolution::Cartographic) => format!("Generalized_ACS{y}"),
                (None, Resolution::Full) => "tigerWMS_Current".into(),
                (None, Resolution::Cartographic) => "Generalized_TAB2020".into(),
            },
        }
    }

    /// Boundary layers carry STATE/COUNTY columns; roads and water don't.
    pub fn has_state_field(self) -> bool {
        !matches!(
            self,
            LayerKind::PrimaryRoads
                | LayerKind::SecondaryRoads
                | LayerKind::AreaWater
                | LayerKind::LinearWater
        )
    }

    pub fn has_county_field(self) -> bool {
        matches!(self, LayerKind::County | LayerKind::Tract | LayerKind::BlockGroup)
    }
}

impl From<GeographyLevel> for LayerKind {
    fn from(level: GeographyLevel) -> Self {
        match level {
            GeographyLevel::State => LayerKind::State,
            GeographyLevel::County => LayerKind::County,
            GeographyLevel::Tract => LayerKind::Tract,
            GeographyLevel::BlockGroup => LayerKind::BlockGroup,
            GeographyLevel::Place => LayerKind::Place,
        }
    }
}

// ---------------------------------------------------------------------------
// LayerRequest
// ---------------------------------------------------------------------------

/// A boundary used to pre-filter a layer to intersecting features.
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    pub geometry: Geometry<f64>,
    pub crs: Crs,
}

impl Boundary {
    /// All features of `layer` as one boundary.
    pub fn from_layer(layer: &GeometryLayer) -> Self {
        let parts: Vec<Geometry<f64>> = layer.features.iter().map(|f| f.geometry.clone()).collect();
        Boundary {
            geometry: Geometry::GeometryCollection(GeometryCollection(parts)),
            crs: layer.crs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerRequest {
    pub kind: LayerKind,
    /// 2-digit state FIPS code.
    pub state: Option<String>,
    /// 3-digit county FIPS codes.
    pub counties: Vec<String>,
    /// Vintage; `None` selects the current service.
    pub year: Option<u16>,
    pub resolution: Resolution,
    pub filter_by: Option<Boundary>,
}

impl LayerRequest {
    pub fn new(kind: LayerKind) -> Self {
        LayerRequest {
            kind,
            state: None,
            counties: Vec::new(),
            year: None,
            resolution: Resolution::default(),
            filter_by: None,
        }
    }

    pub fn state(mut self, fips: impl Into<String>) -> Self {
        self.state = Some(fips.into());
        self
    }

    pub fn counties(mut self, fips: Vec<String>) -> Self {
        self.counties = fips;
        self
    }

    pub fn year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }

    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn filter_by(mut self, boundary: Boundary) -> Self {
        self.filter_by = Some(boundary);
        self
    }

    /// State and county codes end up quoted inside the `where` clause, so
    /// only plain FIPS digits are let through.
    fn validate(&self) -> Result<(), RequestError> {
        if let Some(state) = &self.state {
            if !is_fips(state, 2) {
                return Err(RequestError::InvalidFips {
                    field: "state",
                    value: state.clone(),
                });
            }
        }
        if let Some(county) = self.counties.iter().find(|c| !is_fips(c, 3)) {
            return Err(RequestError::InvalidFips {
                field: "county",
                value: county.clone(),
            });
        }
        Ok(())
    }

    /// SQL `where` clause for the layer query.
    fn where_clause(&self) -> String {
        let mut terms = Vec::new();
        if self.kind.has_state_field() {
            if let Some(state) = &self.state {
                terms.push(format!("STATE='{state}'"));
            }
        }
        if self.kind.has_county_field() && !self.counties.is_empty() {
            let list: Vec<String> = self.counties.iter().map(|c| format!("'{c}'")).collect();
            terms.push(format!("COUNTY IN ({})", list.join(",")));
        }
        if terms.is_empty() {
            "1=1".to_string()
        } else {
            terms.join(" AND ")
        }
    }
}

fn is_fips(code: &str, digits: usize) -> bool {
    code.len() == digits && code.bytes().all(|b| b.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// GeometryFetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ServiceCatalogue {
    #[serde(default)]
    layers: Vec<CatalogueLayer>,
}

#[derive(Debug, Deserialize)]
struct CatalogueLayer {
    id: u32,
    name: String,
}

/// Fetches boundary, road and water layers from TIGERweb.
pub struct GeometryFetcher<T: Transport> {
    transport: T,
    config: ClientConfig,
}

impl<T: Transport> GeometryFetcher<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        GeometryFetcher { transport, config }
    }

    /// Fetch one layer. Roads and water without a state or boundary are
    /// refused rather than downloading the whole country.
    pub fn fetch(&self, request: &LayerRequest) -> Result<GeometryLayer, Error> {
        request.validate()?;
        let out_crs = self.config.output_crs;
        let boundary = match &request.filter_by {
            Some(b) => Some(reproject(&b.geometry, b.crs, out_crs)?),
            None if !request.kind.has_state_field() => {
                let state = request
                    .state
                    .as_ref()
                    .ok_or(RequestError::UnboundedLayer(request.kind.layer_name()))?;
                Some(self.state_outline(state, request.year)?)
            }
            None => None,
        };

        let service = request.kind.service(request.year, request.resolution);
        let layer_id = self.layer_id(&service, request.kind.layer_name())?;
        let query_url = self.url(&format!("{service}/MapServer/{layer_id}/query"))?;

        let mut features = Vec::new();
        let mut offset = 0usize;
        for page in 0.. {
            if page == MAX_PAGES {
                return Err(RemoteFetchError::Malformed(format!(
                    "{service} kept paging past {MAX_PAGES} pages"
                ))
                .into());
            }
            let mut url = query_url.clone();
            {
                let mut q = url.query_pairs_mut();
                q.append_pair("where", &request.where_clause())
                    .append_pair("outFields", "*")
                    .append_pair("returnGeometry", "true")
                    .append_pair("outSR", &out_crs.epsg().to_string())
                    .append_pair("f", "geojson");
                if let Some(envelope) = boundary.as_ref().and_then(|b| b.bounding_rect()) {
                    let (min, max) = (envelope.min(), envelope.max());
                    q.append_pair("geometry", &format!("{},{},{},{}", min.x, min.y, max.x, max.y))
                        .append_pair("geometryType", "esriGeometryEnvelope")
                        .append_pair("inSR", &out_crs.epsg().to_string())
                        .append_pair("spatialRel", "esriSpatialRelIntersects");
                }
                if offset > 0 {
                    q.append_pair("resultOffset", &offset.to_string());
                }
            }

            let body = self.transport.get(&url)?;
            let page_result = parse_feature_page(&body)?;
            debug!(
                "{service}/{layer_id} page {page}: {} of {} features usable",
                page_result.features.len(),
                page_result.served
            );
            // The offset counts what the server sent, usable or not.
            offset += page_result.served;
            let exhausted = page_result.served == 0;
            let more = page_result.more;
            features.extend(page_result.features);
            if !more || exhausted {
                break;
            }
        }

        // The service filtered by envelope; keep only true intersections.
        if let Some(boundary) = boundary {
            let before = features.len();
            let mut keep = matching_indices(&features, &[boundary], Predicate::Intersects)
                .into_iter()
                .peekable();
            features = features
                .into_iter()
                .enumerate()
                .filter_map(|(i, f)| keep.next_if_eq(&i).map(|_| f))
                .collect();
            debug!("boundary filter kept {} of {before} features", features.len());
        }

        if features.is_empty() {
            return Err(RemoteFetchError::Empty(format!("{service}/{}", request.kind.layer_name())).into());
        }
        info!("fetched {} '{}' features", features.len(), request.kind.layer_name());
        Ok(GeometryLayer {
            name: request.kind.layer_name().to_string(),
            crs: out_crs,
            features,
        })
    }

    /// Geometry for each GEOID of a boundary layer.
    pub fn fetch_by_geoid(
        &self,
        request: &LayerRequest,
    ) -> Result<BTreeMap<String, Geometry<f64>>, Error> {
        let layer = self.fetch(request)?;
        Ok(layer
            .features
            .into_iter()
            .map(|f| (f.id, f.geometry))
            .collect())
    }

    fn state_outline(&self, state: &str, year: Option<u16>) -> Result<Geometry<f64>, Error> {
        let mut req = LayerRequest::new(LayerKind::State).state(state);
        req.year = year;
        let layer = self.fetch(&req)?;
        Ok(Boundary::from_layer(&layer).geometry)
    }

    /// Resolve a layer title to its numeric id in the service catalogue.
    fn layer_id(&self, service: &str, layer: &str) -> Result<u32, Error> {
        let mut url = self.url(&format!("{service}/MapServer"))?;
        url.query_pairs_mut().append_pair("f", "json");
        let body = self.transport.get(&url)?;
        check_service_error(&body)?;
        let catalogue: ServiceCatalogue = serde_json::from_str(&body)
            .map_err(|e| RemoteFetchError::Malformed(format!("{service} catalogue: {e}")))?;

        let exact = catalogue
            .layers
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(layer));
        // Some vintages prefix titles with the year ("2020 Census Tracts").
        let suffixed = || {
            catalogue
                .layers
                .iter()
                .find(|l| l.name.to_ascii_lowercase().ends_with(&layer.to_ascii_lowercase()))
        };
        exact
            .or_else(suffixed)
            .map(|l| l.id)
            .ok_or_else(|| {
                RemoteFetchError::UnknownLayer {
                    service: service.to_string(),
                    layer: layer.to_string(),
                }
                .into()
            })
    }

    fn url(&self, path: &str) -> Result<Url, RemoteFetchError> {
        let base = self.config.tigerweb_base_url.trim_end_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|e| RemoteFetchError::Malformed(format!("bad TIGERweb URL: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// ArcGIS answers errors with HTTP 200 and an `error` object.
fn check_service_error(body: &str) -> Result<(), RemoteFetchError> {
    let Ok(value) = serde_json::from_str::<JsonValue>(body) else {
        return Ok(());
    };
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        let details: Vec<&str> = err
            .get("details")
            .and_then(|d| d.as_array())
            .map(|d| d.iter().filter_map(|s| s.as_str()).collect())
            .unwrap_or_default();
        return Err(RemoteFetchError::Service(if details.is_empty() {
            message.to_string()
        } else {
            format!("{message} ({})", details.join("; "))
        }));
    }
    Ok(())
}

/// One page of a layer query.
struct FeaturePage {
    /// Features that converted; others are logged and skipped.
    features: Vec<Feature>,
    /// Features the server sent, including skipped ones.
    served: usize,
    /// The server holds more features past this page.
    more: bool,
}

fn parse_feature_page(body: &str) -> Result<FeaturePage, RemoteFetchError> {
    check_service_error(body)?;
    let collection: FeatureCollection = serde_json::from_str(body)
        .map_err(|e| RemoteFetchError::Malformed(format!("GeoJSON page: {e}")))?;

    let more = collection
        .foreign_members
        .as_ref()
        .is_some_and(exceeded_transfer_limit);

    let served = collection.features.len();
    let mut features = Vec::with_capacity(served);
    for raw in collection.features {
        match convert_feature(raw) {
            Ok(f) => features.push(f),
            Err(reason) => warn!("skipping feature: {reason}"),
        }
    }
    Ok(FeaturePage {
        features,
        served,
        more,
    })
}

fn exceeded_transfer_limit(members: &JsonObject) -> bool {
    let flag = |v: Option<&JsonValue>| v.and_then(|v| v.as_bool()).unwrap_or(false);
    flag(members.get("exceededTransferLimit"))
        || flag(
            members
                .get("properties")
                .and_then(|p| p.get("exceededTransferLimit")),
        )
}

fn convert_feature(raw: GeoJsonFeature) -> Result<Feature, String> {
    let text = |key: &str| -> Option<String> {
        match raw.property(key)? {
            JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };
    let id = ["GEOID", "LINEARID", "HYDROID", "OBJECTID"]
        .iter()
        .find_map(|k| text(k))
        .or_else(|| raw.id.as_ref().map(|id| match id {
            geojson::feature::Id::String(s) => s.clone(),
            geojson::feature::Id::Number(n) => n.to_string(),
        }))
        .ok_or("feature has no identifier")?;
    let name = ["BASENAME", "NAME", "FULLNAME"].iter().find_map(|k| text(k));
    let class = text("MTFCC");

    let geometry = raw
        .geometry
        .ok_or_else(|| format!("{id} has no geometry"))?;
    let geometry = Geometry::<f64>::try_from(geometry).map_err(|e| format!("{id}: {e}"))?;
    Ok(Feature {
        id,
        name,
        class,
        geometry,
    })
}
