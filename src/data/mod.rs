//! Data layer: requests, tables, layers and coordinate systems.
//!
//! Architecture:
//! ```text
//!  state name / FIPS, counties, variables
//!        │
//!        ▼
//!   ┌──────────┐
//!   │ request   │  validate → GeographyRequest + VariableSpec
//!   └──────────┘
//!        │  (fetch)
//!        ▼
//!   ┌──────────────────┐
//!   │ model             │  AttributeTable ⇄ TidyTable, GeometryLayer
//!   └──────────────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  crs      │  tag + reproject geometry between EPSG codes
//!   └──────────┘
//! ```

pub mod crs;
pub mod fips;
pub mod model;
pub mod request;
