//! Census estimates and TIGER boundaries: fetch, join spatially, export.

pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod fetch;
pub mod join;
pub mod pipeline;
pub mod render;

pub use config::{AnalysisConfig, ClientConfig};
pub use data::crs::Crs;
pub use data::model::{
    AttributeData, AttributeTable, Estimate, GeographyRecord, GeometryLayer, JoinedTable, Predicate,
    TidyTable,
};
pub use data::request::{GeographyLevel, GeographyRequest, OutputShape, Resolution, Survey, VariableSpec};
pub use error::{Error, Result};
pub use fetch::{AttributeFetcher, GeometryFetcher, HttpTransport, LayerKind, LayerRequest, Transport};
pub use join::{CrsPolicy, SpatialJoiner};
pub use pipeline::{Analysis, AnalysisOutput};
pub use render::Render;
