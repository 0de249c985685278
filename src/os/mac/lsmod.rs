//! Loaded kernel extensions, from the `kmod` list.

use crate::context::Module;
use crate::error::Result;
use crate::objects::utility::array_to_string;
use crate::objects::Object;
use crate::ranges::{ModuleRange, ModuleRanges};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// More entries than this means the list is corrupt.
const MAX_MODULES: usize = 1024;

/// Walk the `kmod_info` chain starting at the `kmod` symbol.
///
/// The walk stops at a null or unreadable link, on a revisited entry, or after
/// `MAX_MODULES` entries.
pub fn list_modules(kernel: &Module) -> Result<impl Iterator<Item = Object>> {
    let head = kernel.object_from_symbol("kmod")?;
    let first = kernel.object("kmod_info", head.pointer_target()?)?;
    let layer = Arc::clone(kernel.layer());
    let mut seen = HashSet::new();
    let mut current = Some(first);

    Ok(std::iter::from_fn(move || {
        let module = current.take()?;
        if module.offset() == 0 || seen.len() >= MAX_MODULES || !seen.insert(module.offset()) {
            return None;
        }
        let size = module.size().unwrap_or(0);
        if !layer.is_valid(module.offset(), size) {
            debug!(offset = module.offset(), "kmod_info entry is unreadable, stopping");
            return None;
        }
        current = module.member("next").and_then(|next| next.dereference()).ok();
        Some(module)
    }))
}

/// Name, start and size of every loaded kernel extension.
pub fn module_ranges(kernel: &Module, max_name: usize) -> Result<ModuleRanges> {
    let mask = kernel.layer().address_mask();
    let mut ranges = ModuleRanges::new();
    for module in list_modules(kernel)? {
        let entry = (|| -> Result<ModuleRange> {
            let name = array_to_string(&module.member("name")?, max_name)?;
            let start = module.read_u64("address")? & mask;
            let size = module.read_u64("size")?;
            Ok(ModuleRange::new(name, start, size))
        })();
        match entry {
            Ok(range) if range.size() > 0 => ranges.insert(range),
            Ok(_) => {}
            Err(e) => debug!(offset = module.offset(), error = %e, "Skipping kmod_info entry"),
        }
    }
    Ok(ranges)
}
