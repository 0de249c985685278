//! Mutant (mutex) objects found by pool tag.

use crate::context::Context;
use crate::error::Result;
use crate::objects::utility::or_not_applicable;
use crate::objects::Object;
use crate::os::windows::classes::{object_name, KMutant};
use crate::os::windows::poolscanner::PoolScanner;
use crate::plugins::Plugin;
use crate::renderers::{CellValue, Column, ColumnKind, TreeGrid, TreeRow};

#[derive(Debug, Clone)]
pub struct MutantScan {
    pub layer: String,
    pub catalog: String,
}

impl MutantScan {
    /// Protected and unprotected mutant pool tags.
    pub const TAGS: [&'static [u8]; 2] = [b"Mut\xe1", b"Muta"];

    pub fn new(layer: impl Into<String>, catalog: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            catalog: catalog.into(),
        }
    }

    /// Every `_KMUTANT` body found in `layer_name`, in ascending offset.
    pub fn scan_mutants(
        context: &Context,
        layer_name: &str,
        catalog_name: &str,
    ) -> Result<impl Iterator<Item = Object>> {
        let catalog = context.catalog(catalog_name)?;
        let constraints = PoolScanner::builtin_constraints(catalog, &Self::TAGS)?;
        Ok(PoolScanner::generate_pool_scan(context, layer_name, catalog_name, constraints)?.map(|found| found.object))
    }
}

/// Name of a mutant; unnamed mutants yield an empty string.
fn mutant_name(mutant: &Object, max_length: usize) -> Result<String> {
    let name = match mutant.as_class::<KMutant>() {
        Some(classed) => classed.name(max_length)?,
        None => object_name(&mutant.container_of("Body", "_OBJECT_HEADER")?, max_length)?,
    };
    Ok(name.unwrap_or_default())
}

impl Plugin for MutantScan {
    const NAME: &'static str = "windows.mutantscan";

    fn columns() -> Vec<Column> {
        vec![
            Column::new("Offset", ColumnKind::Hex),
            Column::new("Name", ColumnKind::Str),
        ]
    }

    fn run<'a>(&'a self, context: &'a Context) -> Result<TreeGrid<'a>> {
        let max_length = context.config().strings.unicode_max_length;
        let rows = Self::scan_mutants(context, &self.layer, &self.catalog)?.map(move |mutant| {
            Ok(TreeRow::new(vec![
                CellValue::Hex(mutant.offset()),
                or_not_applicable(mutant_name(&mutant, max_length))?,
            ]))
        });
        Ok(TreeGrid::new(Self::columns(), rows))
    }
}
