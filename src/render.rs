use crate::data::model::JoinedTable;
use crate::error::Error;

/// Draws one variable of a joined table, for example as a choropleth.
///
/// The crate ships no renderer; plotting and map front ends implement this.
/// Boundary overlays come from [`GeometryLayer::boundary_lines`] of the same
/// reference layer the table was joined against.
///
/// [`GeometryLayer::boundary_lines`]: crate::data::model::GeometryLayer::boundary_lines
pub trait Render {
    fn render(&self, table: &JoinedTable, column: &str) -> Result<(), Error>;
}
