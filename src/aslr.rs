//! Kernel load offset resolution.
//!
//! A kernel image built with KASLR is loaded at a random displacement from
//! its link-time addresses. The displacement is recovered by finding a symbol
//! whose contents are known (a version banner) in the layer and comparing
//! where it was found with where the catalog says it should be.

use crate::config::AslrConfig;
use crate::context::{Context, Module};
use crate::error::{Result, StrataError};
use crate::layers::Layer;
use crate::scanner::windows;
use crate::symbols::Catalog;
use std::sync::Arc;
use tracing::{debug, info};

/// Window size used while searching for the anchor signature.
const SEARCH_CHUNK: u64 = 16 * 1024 * 1024;

/// A symbol and the bytes it is known to start with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureAnchor {
    pub symbol: String,
    pub signature: Vec<u8>,
}

impl SignatureAnchor {
    pub fn new(symbol: impl Into<String>, signature: impl Into<Vec<u8>>) -> Self {
        Self {
            symbol: symbol.into(),
            signature: signature.into(),
        }
    }

    /// The Linux kernel version banner.
    pub fn linux() -> Self {
        Self::new("linux_banner", b"Linux version ".to_vec())
    }

    /// The XNU kernel version string.
    pub fn mac() -> Self {
        Self::new("_version", b"Darwin Kernel Version ".to_vec())
    }
}

/// Compute the load offset of the kernel described by `catalog` in `layer`.
///
/// Returns the first (lowest address) signature hit whose displacement from
/// the symbol's static address is a multiple of `config.alignment`. The result
/// depends only on the layer contents and the catalog, so repeated calls agree.
pub fn compute_kernel_offset(
    catalog: &Catalog,
    layer: &dyn Layer,
    anchor: &SignatureAnchor,
    config: &AslrConfig,
) -> Result<i64> {
    let _span = crate::span_trace!("compute_kernel_offset", layer = layer.name(), symbol = %anchor.symbol).entered();
    let not_found = || StrataError::OffsetNotFound {
        symbol: anchor.symbol.clone(),
    };
    let symbol = catalog.symbol(&anchor.symbol)?;
    let signature = match symbol.constant_data.as_deref() {
        Some(data) if !data.is_empty() => data,
        _ => anchor.signature.as_slice(),
    };
    if signature.is_empty() {
        return Err(not_found());
    }
    let alignment = config.alignment.max(1) as i64;
    let expected = symbol.address & layer.address_mask();
    let finder = memchr::memmem::Finder::new(signature);

    let overlap = signature.len() as u64 - 1;
    for window in windows(&layer.mapped_ranges(), SEARCH_CHUNK, overlap) {
        let data = layer.read_padded(window.start, window.read_length as usize);
        for position in finder.find_iter(&data) {
            if position as u64 >= window.length {
                break;
            }
            let observed = window.start + position as u64;
            let offset = observed.wrapping_sub(expected) as i64;
            if offset.rem_euclid(alignment) == 0 {
                info!(
                    symbol = %anchor.symbol,
                    observed = format_args!("{observed:#x}"),
                    offset = format_args!("{offset:#x}"),
                    "Resolved kernel offset"
                );
                return Ok(offset);
            }
            debug!(observed, "Signature hit is not aligned, continuing");
        }
    }
    Err(not_found())
}

/// A module for `catalog_name` over `layer_name` with the kernel offset applied.
pub fn resolve_module(
    context: &Context,
    layer_name: &str,
    catalog_name: &str,
    anchor: &SignatureAnchor,
) -> Result<Module> {
    let layer = context.layer(layer_name)?;
    let catalog = context.catalog(catalog_name)?;
    let offset = compute_kernel_offset(catalog, layer.as_ref(), anchor, &context.config().aslr)?;
    Ok(Module::new(Arc::clone(catalog), Arc::clone(layer)).with_kernel_offset(offset))
}
