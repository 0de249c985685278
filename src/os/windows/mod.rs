//! Windows kernel support.

pub mod classes;
pub mod mutantscan;
pub mod poolscanner;

pub use classes::{KMutant, ListEntry, ObjectHeader, PoolHeader, UnicodeString};
pub use mutantscan::MutantScan;
pub use poolscanner::{PoolObject, PoolScanner};

use crate::error::Result;
use crate::symbols::Catalog;
use std::sync::Arc;
use tracing::debug;

/// Bind the Windows behaviour classes to `catalog`.
///
/// `_POOL_HEADER` is optional: some catalogs ship without it, and pool
/// scanning then falls back to generic member access.
pub fn register_classes(catalog: &mut Catalog) -> Result<()> {
    catalog.set_type_class("_KMUTANT", Arc::new(KMutant))?;
    catalog.set_type_class("_OBJECT_HEADER", Arc::new(ObjectHeader))?;
    catalog.set_type_class("_UNICODE_STRING", Arc::new(UnicodeString))?;
    catalog.set_type_class("_LIST_ENTRY", Arc::new(ListEntry))?;
    if catalog.has_type("_POOL_HEADER") {
        catalog.set_type_class("_POOL_HEADER", Arc::new(PoolHeader))?;
    } else {
        debug!("Catalog has no _POOL_HEADER, leaving it unclassed");
    }
    Ok(())
}
