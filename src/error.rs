//! Error types for census-geo.
//!
//! Every failure propagates to the caller; nothing in the pipeline retries or
//! falls back to partial results.

use std::path::PathBuf;

use thiserror::Error;

use crate::data::crs::Crs;

/// Failure talking to one of the remote services.
#[derive(Debug, Error)]
pub enum RemoteFetchError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    /// The service answered but reported an error (invalid variable, bad where clause, ...).
    #[error("service error: {0}")]
    Service(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("no rows returned by {0}")]
    Empty(String),
    #[error("no county named '{name}' in state {state}")]
    UnknownCounty { state: String, name: String },
    #[error("county '{name}' in state {state} is ambiguous: {candidates}")]
    AmbiguousCounty {
        state: String,
        name: String,
        candidates: String,
    },
    #[error("layer '{layer}' not published by {service}")]
    UnknownLayer { service: String, layer: String },
}

/// A spatial operation was attempted across coordinate systems that cannot
/// be reconciled.
#[derive(Debug, Error)]
#[error("coordinate systems {left} and {right} are not reconciled")]
pub struct ProjectionMismatchError {
    pub left: Crs,
    pub right: Crs,
}

/// The export target cannot be written.
#[derive(Debug, Error)]
pub enum ExportFormatError {
    #[error("unsupported export extension '.{0}'")]
    UnsupportedExtension(String),
    #[error("export path {0} has no file name")]
    MissingFileName(PathBuf),
    #[error("row {geoid} has no geometry; shapefiles need one per row")]
    MissingGeometry { geoid: String },
    #[error("shapefiles hold a single geometry family, found {first} and {other}")]
    MixedGeometry { first: &'static str, other: &'static str },
    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Write(String),
}

/// A request that can never succeed, rejected before any network traffic.
#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("unknown state '{0}'")]
    UnknownState(String),
    #[error("{level} geographies cannot be filtered by county")]
    CountyFilterUnsupported { level: &'static str },
    #[error("no variables requested")]
    NoVariables,
    #[error("duplicate variable {0}")]
    DuplicateVariable(String),
    #[error("invalid variable code '{0}'")]
    InvalidVariableCode(String),
    #[error("{survey} is not published for {year}")]
    UnsupportedVintage { survey: &'static str, year: u16 },
    #[error("{0} geometry is only published for {1}")]
    GeometryUnavailable(&'static str, &'static str),
    #[error("layer {0} spans the whole country; supply a state or a boundary filter")]
    UnboundedLayer(&'static str),
    #[error("missing required field '{0}'")]
    Missing(&'static str),
    #[error("{field} '{value}' is not a FIPS code")]
    InvalidFips { field: &'static str, value: String },
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    RemoteFetch(#[from] RemoteFetchError),
    #[error(transparent)]
    ProjectionMismatch(#[from] ProjectionMismatchError),
    #[error(transparent)]
    ExportFormat(#[from] ExportFormatError),
    #[error(transparent)]
    Request(#[from] RequestError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
