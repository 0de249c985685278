//! TrustedBSD MAC policy hook attribution.
//!
//! Every registered MAC policy supplies a table of operation handlers. A
//! handler living outside the kernel and every loaded kext is a classic rootkit
//! hook, so each non-null handler is reported with the module that owns it.

use crate::aslr::{resolve_module, SignatureAnchor};
use crate::context::{Context, Module};
use crate::error::{Result, StrataError};
use crate::objects::utility::{or_not_applicable, pointer_to_string};
use crate::objects::Object;
use crate::os::mac::lsmod::module_ranges;
use crate::plugins::Plugin;
use crate::ranges::ModuleRanges;
use crate::renderers::{CellValue, Column, ColumnKind, TreeGrid, TreeRow};
use tracing::{debug, trace};

/// Length of `kmod_info.name`.
const KMOD_NAME_LENGTH: usize = 64;

/// Attribution for handlers outside every known module.
pub const UNKNOWN_MODULE: &str = "UNKNOWN";

#[derive(Debug, Clone)]
pub struct CheckTrustedBsd {
    pub layer: String,
    pub catalog: String,
}

impl CheckTrustedBsd {
    pub fn new(layer: impl Into<String>, catalog: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            catalog: catalog.into(),
        }
    }
}

/// Every slot of the kernel's MAC policy list, registered or not.
pub fn policy_entries(kernel: &Module) -> Result<Vec<Object>> {
    let policy_list = kernel.object_from_symbol_as("_mac_policy_list", "mac_policy_list")?;
    let entries = policy_list.member("entries")?.pointer_target()?;
    let count = policy_list.read_u64("staticmax")? + 1;
    let array = kernel.array("mac_policy_list_element", entries, count)?;
    let elements: Vec<Object> = array.elements()?.collect();
    Ok(elements)
}

/// Follow a pointer member, treating null, unreadable or paged targets as absent.
fn follow(object: &Object, member: &str) -> Result<Option<Object>> {
    let pointer = object.member(member)?;
    if pointer.is_null().unwrap_or(true) {
        return Ok(None);
    }
    match pointer.dereference() {
        Ok(target) => Ok(Some(target)),
        Err(e) if e.is_address_error() => {
            trace!(offset = object.offset(), member, error = %e, "Skipping unreadable policy pointer");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// One row per non-null handler of the policy in `entry`.
fn policy_rows(entry: &Object, ranges: &ModuleRanges, max_name: usize) -> Result<Vec<TreeRow>> {
    let Some(mpc) = follow(entry, "mpc")? else {
        return Ok(Vec::new());
    };
    let Some(ops) = follow(&mpc, "mpc_ops")? else {
        return Ok(Vec::new());
    };
    let policy_name = or_not_applicable(pointer_to_string(&mpc.member("mpc_name")?, max_name))?;

    let mut rows = Vec::new();
    for member in ops.members()? {
        let handler = match ops.member(&member)?.pointer_target() {
            Ok(0) => continue,
            Ok(address) => address,
            Err(e) if e.is_address_error() => {
                trace!(member = %member, error = %e, "Unreadable handler");
                continue;
            }
            Err(StrataError::InvalidType { .. }) => continue,
            Err(e) => return Err(e),
        };
        let owner = ranges
            .owner_of_inclusive(handler)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| UNKNOWN_MODULE.to_string());
        rows.push(TreeRow::new(vec![
            CellValue::Str(member),
            policy_name.clone(),
            CellValue::Str(owner),
            CellValue::Hex(handler),
        ]));
    }
    Ok(rows)
}

impl Plugin for CheckTrustedBsd {
    const NAME: &'static str = "mac.trustedbsd";

    fn columns() -> Vec<Column> {
        vec![
            Column::new("Member", ColumnKind::Str),
            Column::new("Policy Name", ColumnKind::Str),
            Column::new("Handler Module", ColumnKind::Str),
            Column::new("Handler Address", ColumnKind::Hex),
        ]
    }

    fn run<'a>(&'a self, context: &'a Context) -> Result<TreeGrid<'a>> {
        let kernel = resolve_module(context, &self.layer, &self.catalog, &SignatureAnchor::mac())?;
        let ranges = module_ranges(&kernel, KMOD_NAME_LENGTH)?;
        debug!(modules = ranges.len(), "Collected kext ranges");
        let max_name = context.config().strings.max_length;
        let entries = policy_entries(&kernel)?;

        let rows = entries.into_iter().flat_map(move |entry| match policy_rows(&entry, &ranges, max_name) {
            Ok(rows) => rows.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(e) => vec![Err(e)],
        });
        Ok(TreeGrid::new(Self::columns(), rows))
    }
}
