use geo::MultiLineString;
use log::info;

use crate::config::{AnalysisConfig, ClientConfig, ReferenceConfig};
use crate::data::model::{AttributeTable, GeometryLayer, JoinedTable, Predicate};
use crate::data::request::{GeographyRequest, VariableSpec};
use crate::error::{Error, RemoteFetchError};
use crate::export::export;
use crate::fetch::{AttributeFetcher, GeometryFetcher, LayerRequest, Transport};
use crate::join::SpatialJoiner;

// ---------------------------------------------------------------------------
// Analysis – fetch → reference → join → export
// ---------------------------------------------------------------------------

/// Everything one analysis run produced.
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    /// Rows that passed the join. Without a reference layer every fetched
    /// row is kept.
    pub joined: JoinedTable,
    /// The reference layer after any name filter.
    pub reference: Option<GeometryLayer>,
    /// Outline of the reference layer, for drawing over a choropleth.
    pub overlay: Option<MultiLineString<f64>>,
}

/// One run of an [`AnalysisConfig`] against a transport.
pub struct Analysis<T: Transport> {
    transport: T,
    config: AnalysisConfig,
}

impl<T: Transport> Analysis<T> {
    pub fn new(transport: T, config: AnalysisConfig) -> Self {
        Analysis { transport, config }
    }

    pub fn run(&self) -> Result<AnalysisOutput, Error> {
        let mut builder = self.config.request.clone();
        if self.config.reference.is_some() && !builder.geometry {
            info!("reference layer configured; fetching boundaries for the join");
            builder.geometry = true;
        }
        let request = builder.build()?;
        let variables = VariableSpec::new(self.config.variables.iter().map(|(l, c)| (l.as_str(), c)))?;
        let client = self.config.client();

        let table = AttributeFetcher::new(&self.transport, client.clone())
            .fetch(&request, &variables)?
            .into_wide();

        let output = match &self.config.reference {
            Some(reference) => {
                let layer = self.fetch_reference(&request, reference, &client)?;
                let joined = SpatialJoiner::new(reference.predicate)
                    .with_crs_policy(reference.crs_policy)
                    .join(table, &layer)?;
                AnalysisOutput {
                    joined,
                    overlay: Some(layer.boundary_lines()),
                    reference: Some(layer),
                }
            }
            None => AnalysisOutput {
                joined: unfiltered(table),
                reference: None,
                overlay: None,
            },
        };

        if let Some(target) = &self.config.export {
            export(&output.joined.table, &target.path, target.crs)?;
        }
        Ok(output)
    }

    fn fetch_reference(
        &self,
        request: &GeographyRequest,
        reference: &ReferenceConfig,
        client: &ClientConfig,
    ) -> Result<GeometryLayer, Error> {
        let layer_request = LayerRequest::new(reference.layer)
            .state(request.state.clone())
            .year(request.year)
            .resolution(reference.resolution);
        let layer = GeometryFetcher::new(&self.transport, client.clone()).fetch(&layer_request)?;

        let Some(name) = &reference.name else {
            return Ok(layer);
        };
        let named = layer.filter_by_name(name);
        if named.is_empty() {
            return Err(RemoteFetchError::Empty(format!("no '{}' feature named '{name}'", layer.name)).into());
        }
        info!("reference '{name}': {} of {} features", named.len(), layer.len());
        Ok(named)
    }
}

fn unfiltered(table: AttributeTable) -> JoinedTable {
    JoinedTable {
        input_rows: table.len(),
        table,
        predicate: Predicate::default(),
    }
}
