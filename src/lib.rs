//! Memory-forensics core: layered address spaces, symbol catalogs and typed
//! object views over captured memory.
//!
//! A session [`Context`] holds named [`layers`] (a captured file, and page
//! table translations stacked on top of it) and symbol [`Catalog`]s loaded from
//! ISF JSON. [`Object`]s interpret bytes at an offset as a catalog type,
//! [`aslr`] recovers the kernel load offset, and [`scanner`] finds structures
//! by tag. The [`os`] modules build plugins for specific kernels on top.

pub mod aslr;
pub mod config;
pub mod context;
pub mod error;
pub mod layers;
pub mod logging;
pub mod objects;
pub mod os;
pub mod plugins;
pub mod ranges;
pub mod renderers;
pub mod scanner;
pub mod symbols;

pub use config::SessionConfig;
pub use context::{Context, Module};
pub use error::{Result, StrataError};
pub use layers::{BufferLayer, FileLayer, IntelLayer, Layer, PagingMode};
pub use objects::{Object, Value};
pub use plugins::Plugin;
pub use renderers::{CellValue, Column, ColumnKind, TreeGrid, TreeRow};
pub use symbols::Catalog;
