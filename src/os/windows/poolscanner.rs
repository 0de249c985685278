//! Pool tag scanning for Windows executive objects.
//!
//! Kernel objects live in pool allocations laid out as
//! `_POOL_HEADER | optional headers | _OBJECT_HEADER | body`. The scan
//! matches the pool tag inside `_POOL_HEADER`, then finds the object header
//! behind it by checking which candidate's `InfoMask` accounts for exactly the
//! bytes between the pool header and itself.

use crate::context::Context;
use crate::error::Result;
use crate::objects::{Classed, Object};
use crate::os::windows::classes::{is_plausible_header, max_optional_headers_size, optional_headers_size, PoolHeader};
use crate::scanner::{scan, scan_parallel, PoolConstraint, ScanHit};
use crate::symbols::Catalog;
use std::sync::Arc;
use tracing::{debug, trace};

/// Known pool tags: tag bytes, object type label, body type.
const BUILTIN_TAGS: &[(&[u8], &str, &str)] = &[
    (b"Mut\xe1", "Mutant", "_KMUTANT"),
    (b"Muta", "Mutant", "_KMUTANT"),
    (b"Pro\xe3", "Process", "_EPROCESS"),
    (b"Proc", "Process", "_EPROCESS"),
    (b"Fil\xe5", "File", "_FILE_OBJECT"),
    (b"File", "File", "_FILE_OBJECT"),
    (b"Dri\xf6", "Driver", "_DRIVER_OBJECT"),
    (b"Driv", "Driver", "_DRIVER_OBJECT"),
    (b"Sym\xe2", "SymbolicLink", "_OBJECT_SYMBOLIC_LINK"),
    (b"Symb", "SymbolicLink", "_OBJECT_SYMBOLIC_LINK"),
];

/// A pool object found by scanning.
#[derive(Debug, Clone)]
pub struct PoolObject {
    pub constraint: Arc<PoolConstraint>,
    /// The object body
    pub object: Object,
    /// The `_POOL_HEADER` holding the tag
    pub header: Object,
}

/// Pool allocation granularity: two pointers.
pub fn pool_alignment(catalog: &Catalog) -> u64 {
    catalog.pointer_size() * 2
}

/// Find the body of type `body_type` inside the allocation of `pool_header`.
pub fn locate_body(pool_header: &Object, body_type: &str) -> Result<Option<Object>> {
    let catalog = pool_header.catalog();
    let alignment = pool_alignment(catalog);
    let block_end = pool_header.offset() + pool_header.read_u64("BlockSize")? * alignment;
    let header_end = pool_header.offset() + catalog.size_of_type("_POOL_HEADER")?;
    let body_offset = catalog.member_offset("_OBJECT_HEADER", "Body")?;
    let body_size = catalog.size_of_type(body_type)?;
    let max_optional = max_optional_headers_size(catalog);

    let mut candidate = header_end;
    while candidate - header_end <= max_optional && candidate + body_offset + body_size <= block_end {
        let object_header = pool_header.at_offset(candidate).cast_to("_OBJECT_HEADER")?;
        if is_plausible_header(&object_header)?
            && optional_headers_size(&object_header)? == candidate - header_end
        {
            return Ok(Some(object_header.member("Body")?.cast_to(body_type)?));
        }
        candidate += alignment;
    }
    Ok(None)
}

impl Classed<'_, PoolHeader> {
    pub fn body(&self, body_type: &str) -> Result<Option<Object>> {
        locate_body(self.object(), body_type)
    }
}

pub struct PoolScanner;

impl PoolScanner {
    /// Constraints for the builtin object types carrying any of `tags`.
    ///
    /// Tags that are not builtin, and tags whose body type the catalog lacks,
    /// produce no constraint.
    pub fn builtin_constraints(catalog: &Catalog, tags: &[&[u8]]) -> Result<Vec<PoolConstraint>> {
        let mut constraints = Vec::new();
        for &(tag, label, body_type) in BUILTIN_TAGS {
            if !tags.contains(&tag) {
                continue;
            }
            if !catalog.has_type(body_type) {
                debug!(label, body_type, "Catalog lacks pool body type, skipping tag");
                continue;
            }
            constraints.push(Self::object_constraint(catalog, tag, label, body_type)?);
        }
        Ok(constraints)
    }

    /// A constraint matching `tag` in `_POOL_HEADER.PoolTag` with a block large
    /// enough to hold the headers and a `body_type`.
    pub fn object_constraint(catalog: &Catalog, tag: &[u8], label: &str, body_type: &str) -> Result<PoolConstraint> {
        let alignment = pool_alignment(catalog);
        let tag_offset = catalog.member_offset("_POOL_HEADER", "PoolTag")?;
        let minimum = catalog.size_of_type("_POOL_HEADER")?
            + catalog.member_offset("_OBJECT_HEADER", "Body")?
            + catalog.size_of_type(body_type)?;
        Ok(PoolConstraint::new(tag, "_POOL_HEADER")
            .with_tag_offset(tag_offset)
            .with_label(label)
            .with_body_type(body_type)
            .member_range("BlockSize", minimum.div_ceil(alignment), u64::MAX))
    }

    /// Scan `layer_name` and yield the object bodies behind every validated
    /// pool header. Allocations whose body cannot be located are skipped.
    pub fn generate_pool_scan(
        context: &Context,
        layer_name: &str,
        catalog_name: &str,
        constraints: Vec<PoolConstraint>,
    ) -> Result<impl Iterator<Item = PoolObject>> {
        let layer = Arc::clone(context.layer(layer_name)?);
        let catalog = Arc::clone(context.catalog(catalog_name)?);
        let config = &context.config().scan;
        let hits: Box<dyn Iterator<Item = ScanHit>> = if config.parallel {
            Box::new(scan_parallel(layer, catalog, constraints, config)?.into_iter())
        } else {
            Box::new(scan(layer, catalog, constraints, config)?)
        };
        Ok(hits.filter_map(|hit| {
            let object = match hit.constraint.body_type.as_deref() {
                None => Ok(Some(hit.object.clone())),
                Some(body_type) => match hit.object.as_class::<PoolHeader>() {
                    Some(header) => header.body(body_type),
                    None => locate_body(&hit.object, body_type),
                },
            };
            match object {
                Ok(Some(object)) => Some(PoolObject {
                    constraint: hit.constraint,
                    object,
                    header: hit.object,
                }),
                Ok(None) => {
                    trace!(offset = hit.offset, label = %hit.constraint.label, "No object header in allocation");
                    None
                }
                Err(e) => {
                    trace!(offset = hit.offset, label = %hit.constraint.label, error = %e, "Skipping allocation");
                    None
                }
            }
        }))
    }
}
