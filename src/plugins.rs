//! The plugin seam: named analyses that turn a session into a result grid.

use crate::context::Context;
use crate::error::Result;
use crate::renderers::{Column, TreeGrid};

/// An analysis run against a session context.
///
/// Plugins hold only their own parameters (layer and catalog names, filters);
/// everything else is read from the context at run time. Rows are produced
/// lazily, and a row that cannot be built surfaces as an error in the stream
/// rather than aborting the grid.
pub trait Plugin {
    /// Dotted plugin name, e.g. `windows.mutantscan`
    const NAME: &'static str;

    /// Columns every row of `run` will carry, in order.
    fn columns() -> Vec<Column>;

    fn run<'a>(&'a self, context: &'a Context) -> Result<TreeGrid<'a>>;
}
