//! Remote acquisition: Census Data API attributes and TIGERweb geometry.
//!
//! Both fetchers are generic over a [`Transport`] so the network can be
//! swapped for canned responses.

pub mod attributes;
pub mod geometry;
pub mod transport;

pub use attributes::{AttributeFetcher, County, VariableInfo};
pub use geometry::{Boundary, GeometryFetcher, LayerKind, LayerRequest};
pub use transport::{HttpTransport, Transport};
