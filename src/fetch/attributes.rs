use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use url::Url;

use super::geometry::{GeometryFetcher, LayerKind, LayerRequest};
use super::transport::Transport;
use crate::config::ClientConfig;
use crate::data::fips::state_name;
use crate::data::model::{AttributeData, AttributeTable, Estimate, GeographyRecord};
use crate::data::request::{GeographyLevel, GeographyRequest, OutputShape, Survey, VariableCode, VariableSpec};
use crate::error::{Error, RemoteFetchError};

/// The Data API accepts 50 `get` columns; NAME plus an estimate and MOE per variable.
const MAX_VARIABLES_PER_CALL: usize = 24;

/// Suffixes the API appends to county names.
const COUNTY_SUFFIXES: &[&str] = &[
    " county",
    " parish",
    " borough",
    " census area",
    " city and borough",
    " municipality",
    " municipio",
    " city",
];

// ---------------------------------------------------------------------------
// Response table – header row plus data rows
// ---------------------------------------------------------------------------

/// A Census Data API response: the first row names the columns.
struct ApiTable {
    header: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl ApiTable {
    fn parse(body: &str, url: &str) -> Result<Self, RemoteFetchError> {
        if body.trim().is_empty() {
            return Err(RemoteFetchError::Empty(url.to_string()));
        }
        let raw: Vec<Vec<JsonValue>> = serde_json::from_str(body).map_err(|e| {
            if body.trim_start().starts_with("error") {
                RemoteFetchError::Service(body.trim().to_string())
            } else {
                RemoteFetchError::Malformed(format!("Data API table: {e}"))
            }
        })?;
        let mut rows = raw.into_iter();
        let header = rows
            .next()
            .ok_or_else(|| RemoteFetchError::Empty(url.to_string()))?
            .into_iter()
            .map(|v| cell_text(v).unwrap_or_default())
            .collect();
        let rows: Vec<Vec<Option<String>>> = rows
            .map(|r| r.into_iter().map(cell_text).collect())
            .collect();
        if rows.is_empty() {
            return Err(RemoteFetchError::Empty(url.to_string()));
        }
        Ok(ApiTable { header, rows })
    }

    fn column(&self, name: &str) -> Result<usize, RemoteFetchError> {
        self.header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| RemoteFetchError::Malformed(format!("response has no '{name}' column")))
    }
}

fn cell_text(v: JsonValue) -> Option<String> {
    match v {
        JsonValue::String(s) => Some(s),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Variable catalogue
// ---------------------------------------------------------------------------

/// One entry of a dataset's `variables.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    pub name: String,
    pub label: String,
    pub concept: Option<String>,
    pub group: Option<String>,
}

#[derive(Deserialize)]
struct VariableCatalogue {
    variables: BTreeMap<String, VariableEntry>,
}

#[derive(Deserialize)]
struct VariableEntry {
    #[serde(default)]
    label: String,
    concept: Option<String>,
    group: Option<String>,
}

/// A county as the Data API names it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct County {
    pub fips: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// AttributeFetcher
// ---------------------------------------------------------------------------

/// Fetches ACS estimates from the Census Data API.
pub struct AttributeFetcher<T: Transport> {
    transport: T,
    config: ClientConfig,
}

impl<T: Transport> AttributeFetcher<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        AttributeFetcher { transport, config }
    }

    /// Fetch `variables` for `request`, shaped as the request asks.
    pub fn fetch(&self, request: &GeographyRequest, variables: &VariableSpec) -> Result<AttributeData, Error> {
        let table = self.fetch_wide(request, variables)?;
        Ok(match request.shape {
            OutputShape::Wide => AttributeData::Wide(table),
            OutputShape::Tidy => AttributeData::Tidy(table.to_tidy()),
        })
    }

    /// Fetch `variables` for `request` as a wide table, whatever its shape.
    pub fn fetch_wide(&self, request: &GeographyRequest, variables: &VariableSpec) -> Result<AttributeTable, Error> {
        let counties = self.resolve_counties(request)?;
        let in_clauses = self.region_clauses(request, &counties);

        // Group variables by sub-dataset, then split into API-sized chunks.
        let mut by_dataset: BTreeMap<Option<&'static str>, Vec<(&str, &VariableCode)>> = BTreeMap::new();
        for (label, code) in variables.iter() {
            by_dataset.entry(code.dataset()).or_default().push((label, code));
        }

        let mut records = Vec::new();
        for (dataset, vars) in &by_dataset {
            for chunk in vars.chunks(MAX_VARIABLES_PER_CALL) {
                for (for_clause, ins) in &in_clauses {
                    let url = self.data_url(request.year, request.survey, *dataset, chunk, for_clause, ins)?;
                    let table = self.get_table(&url)?;
                    records.extend(parse_records(&table, request.level, chunk)?);
                }
            }
        }

        let mut table = AttributeTable::from_records(
            request.level,
            self.config.output_crs,
            variables.labels(),
            records,
        );
        if table.is_empty() {
            return Err(RemoteFetchError::Empty(format!("{} {}", request.level, request.state)).into());
        }
        info!(
            "fetched {} {} rows × {} variables for state {}",
            table.len(),
            request.level,
            variables.len(),
            request.state
        );

        if request.geometry {
            self.attach_geometry(&mut table, request, &counties)?;
        }
        Ok(table)
    }

    /// Resolve the request's county names to FIPS codes, in request order.
    /// Names that land on the same county are kept once.
    ///
    /// Tract and block-group requests without counties expand to every
    /// county in the state, since those levels are fetched county by county.
    pub fn resolve_counties(&self, request: &GeographyRequest) -> Result<Vec<County>, Error> {
        let needs_all = matches!(request.level, GeographyLevel::Tract | GeographyLevel::BlockGroup);
        if request.counties.is_empty() && !needs_all {
            return Ok(Vec::new());
        }

        let mut url = self.base_url(request.year, request.survey, None)?;
        url.query_pairs_mut()
            .append_pair("get", "NAME")
            .append_pair("for", "county:*")
            .append_pair("in", &format!("state:{}", request.state));
        self.add_key(&mut url);
        let table = self.get_table(&url)?;
        let name_col = table.column("NAME")?;
        let county_col = table.column("county")?;

        let all: Vec<County> = table
            .rows
            .iter()
            .filter_map(|r| {
                Some(County {
                    fips: r.get(county_col)?.clone()?,
                    name: r.get(name_col)?.clone()?,
                })
            })
            .collect();
        if request.counties.is_empty() {
            return Ok(all);
        }

        let state = || {
            state_name(&request.state)
                .unwrap_or(request.state.as_str())
                .to_string()
        };
        let mut resolved: Vec<County> = Vec::new();
        for wanted in &request.counties {
            let scored: Vec<(CountyMatch, &County)> = all
                .iter()
                .filter_map(|c| county_match(&c.name, &c.fips, wanted).map(|m| (m, c)))
                .collect();
            let best = scored.iter().map(|(m, _)| *m).max();
            let candidates: Vec<&County> = scored
                .iter()
                .filter(|(m, _)| Some(*m) == best)
                .map(|(_, c)| *c)
                .collect();
            let county = match candidates.as_slice() {
                [] => {
                    return Err(RemoteFetchError::UnknownCounty {
                        state: state(),
                        name: wanted.clone(),
                    }
                    .into())
                }
                [one] => (*one).clone(),
                many => {
                    let names: Vec<&str> = many.iter().map(|c| c.name.as_str()).collect();
                    return Err(RemoteFetchError::AmbiguousCounty {
                        state: state(),
                        name: wanted.clone(),
                        candidates: names.join("; "),
                    }
                    .into());
                }
            };
            if resolved.iter().any(|c| c.fips == county.fips) {
                debug!("'{wanted}' repeats {}", county.name);
                continue;
            }
            resolved.push(county);
        }
        Ok(resolved)
    }

    /// List the variables a dataset publishes, sorted by name.
    pub fn list_variables(
        &self,
        year: u16,
        survey: Survey,
        dataset: Option<&str>,
    ) -> Result<Vec<VariableInfo>, Error> {
        let base = self.base_url(year, survey, dataset)?;
        let url = Url::parse(&format!("{}/variables.json", base.as_str().trim_end_matches('/')))
            .map_err(|e| RemoteFetchError::Malformed(format!("bad Data API URL: {e}")))?;
        let body = self.transport.get(&url).map_err(service_error)?;
        let catalogue: VariableCatalogue = serde_json::from_str(&body)
            .map_err(|e| RemoteFetchError::Malformed(format!("variables.json: {e}")))?;
        let vars: Vec<VariableInfo> = catalogue
            .variables
            .into_iter()
            // Drop the pseudo-variables describing the query language itself.
            .filter(|(name, _)| name.contains('_'))
            .map(|(name, v)| VariableInfo {
                name,
                label: v.label,
                concept: v.concept,
                group: v.group,
            })
            .collect();
        if vars.is_empty() {
            return Err(RemoteFetchError::Empty(url.to_string()).into());
        }
        Ok(vars)
    }

    // -- request building --

    fn base_url(&self, year: u16, survey: Survey, dataset: Option<&str>) -> Result<Url, RemoteFetchError> {
        let base = self.config.census_base_url.trim_end_matches('/');
        let path = match dataset {
            Some(ds) => format!("{base}/{year}/acs/{}/{ds}", survey.path()),
            None => format!("{base}/{year}/acs/{}", survey.path()),
        };
        Url::parse(&path).map_err(|e| RemoteFetchError::Malformed(format!("bad Data API URL: {e}")))
    }

    fn add_key(&self, url: &mut Url) {
        if let Some(key) = &self.config.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
    }

    /// `for` clause and `in` clauses, one pair per API call.
    fn region_clauses(&self, request: &GeographyRequest, counties: &[County]) -> Vec<(String, Vec<String>)> {
        let state_in = format!("state:{}", request.state);
        let level = request.level.api_name();
        match request.level {
            GeographyLevel::State => vec![(format!("state:{}", request.state), Vec::new())],
            GeographyLevel::County if counties.is_empty() => {
                vec![("county:*".to_string(), vec![state_in])]
            }
            GeographyLevel::County => {
                let codes: Vec<&str> = counties.iter().map(|c| c.fips.as_str()).collect();
                vec![(format!("county:{}", codes.join(",")), vec![state_in])]
            }
            GeographyLevel::Tract | GeographyLevel::BlockGroup => counties
                .iter()
                .map(|c| {
                    (
                        format!("{level}:*"),
                        vec![state_in.clone(), format!("county:{}", c.fips)],
                    )
                })
                .collect(),
            GeographyLevel::Place => vec![("place:*".to_string(), vec![state_in])],
        }
    }

    fn data_url(
        &self,
        year: u16,
        survey: Survey,
        dataset: Option<&str>,
        vars: &[(&str, &VariableCode)],
        for_clause: &str,
        in_clauses: &[String],
    ) -> Result<Url, RemoteFetchError> {
        let mut columns = vec!["NAME".to_string()];
        for (_, code) in vars {
            columns.push(code.estimate_column());
            columns.push(code.moe_column());
        }
        let mut url = self.base_url(year, survey, dataset)?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("get", &columns.join(","));
            q.append_pair("for", for_clause);
            for clause in in_clauses {
                q.append_pair("in", clause);
            }
        }
        self.add_key(&mut url);
        Ok(url)
    }

    fn get_table(&self, url: &Url) -> Result<ApiTable, RemoteFetchError> {
        let body = self.transport.get(url).map_err(service_error)?;
        ApiTable::parse(&body, url.path())
    }

    // -- geometry --

    fn attach_geometry(
        &self,
        table: &mut AttributeTable,
        request: &GeographyRequest,
        counties: &[County],
    ) -> Result<(), Error> {
        let mut layer_request = LayerRequest::new(request.level.into())
            .state(request.state.clone())
            .year(request.year)
            .resolution(request.resolution);
        if !request.counties.is_empty() {
            layer_request = layer_request.counties(counties.iter().map(|c| c.fips.clone()).collect());
        }
        let geometry_fetcher = GeometryFetcher::new(&self.transport, self.config.clone());
        let mut shapes = geometry_fetcher.fetch_by_geoid(&layer_request)?;
        // Place rows mix incorporated places with census designated places,
        // which TIGERweb publishes as a second layer.
        if request.level == GeographyLevel::Place {
            let designated = LayerRequest {
                kind: LayerKind::DesignatedPlace,
                ..layer_request
            };
            match geometry_fetcher.fetch_by_geoid(&designated) {
                Ok(more) => shapes.extend(more),
                Err(Error::RemoteFetch(RemoteFetchError::Empty(_))) => {
                    debug!("no census designated places in state {}", request.state)
                }
                Err(e) => return Err(e),
            }
        }

        let mut missing = 0usize;
        for rec in &mut table.records {
            rec.geometry = shapes.remove(&rec.geoid);
            if rec.geometry.is_none() {
                missing += 1;
                debug!("no boundary for {}", rec.geoid);
            }
        }
        if missing > 0 {
            warn!("{missing} of {} rows have no boundary", table.len());
        }
        table.crs = self.config.output_crs;
        Ok(())
    }
}

/// A 400 from the Data API carries its complaint ("error: unknown variable ...") in the body.
fn service_error(err: RemoteFetchError) -> RemoteFetchError {
    match err {
        RemoteFetchError::Status { status: 400, body, .. } if !body.is_empty() => {
            RemoteFetchError::Service(body)
        }
        other => other,
    }
}

/// How closely an API county answers a requested name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CountyMatch {
    /// Equal once the county-type suffix is dropped ("Richmond").
    Suffix,
    /// The FIPS code or the full name ("Richmond city").
    Exact,
}

fn county_match(api_name: &str, fips: &str, wanted: &str) -> Option<CountyMatch> {
    let wanted = wanted.trim().to_ascii_lowercase();
    if wanted == fips {
        return Some(CountyMatch::Exact);
    }
    // "Milwaukee County, Wisconsin" → "milwaukee county"
    let full = api_name
        .split(',')
        .next()
        .unwrap_or(api_name)
        .trim()
        .to_ascii_lowercase();
    if full == wanted {
        return Some(CountyMatch::Exact);
    }
    COUNTY_SUFFIXES
        .iter()
        .any(|suffix| full.strip_suffix(suffix) == Some(wanted.as_str()))
        .then_some(CountyMatch::Suffix)
}

/// Convert one response table into records for the variables in `chunk`.
fn parse_records(
    table: &ApiTable,
    level: GeographyLevel,
    chunk: &[(&str, &VariableCode)],
) -> Result<Vec<GeographyRecord>, RemoteFetchError> {
    let name_col = table.column("NAME")?;
    let geoid_cols = level
        .geoid_columns()
        .iter()
        .map(|c| table.column(c))
        .collect::<Result<Vec<_>, _>>()?;
    let var_cols = chunk
        .iter()
        .map(|(label, code)| -> Result<_, RemoteFetchError> {
            Ok((
                *label,
                table.column(&code.estimate_column())?,
                table.column(&code.moe_column())?,
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    table
        .rows
        .iter()
        .map(|row| {
            let cell = |i: usize| row.get(i).and_then(|c| c.as_deref());
            let geoid: String = geoid_cols
                .iter()
                .map(|&i| cell(i).unwrap_or_default())
                .collect();
            let mut rec = GeographyRecord::new(geoid, cell(name_col).unwrap_or_default());
            for (label, est, moe) in &var_cols {
                rec.values.insert(
                    label.to_string(),
                    Estimate::new(Estimate::parse_cell(cell(*est)), Estimate::parse_cell(cell(*moe))),
                );
            }
            Ok(rec)
        })
        .collect()
}
