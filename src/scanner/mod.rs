//! Signature scanning.
//!
//! One pass over the layer's mapped ranges in bounded windows, searching all
//! constraint tags at once with a single Aho-Corasick automaton. Each tag hit
//! is turned into a candidate structure start, cast, and validated; anything
//! that fails to read or validate is skipped. Consecutive windows overlap by
//! `max_tag_len - 1` bytes, and only hits starting before the overlap are
//! accepted, so a tag straddling a seam is reported exactly once.

pub mod constraint;

pub use constraint::{PoolConstraint, StructureCheck};

use crate::config::ScanConfig;
use crate::error::{Result, StrataError};
use crate::layers::{Layer, MappedRange};
use crate::objects::Object;
use crate::symbols::Catalog;
use aho_corasick::{AhoCorasick, MatchKind};
use rayon::prelude::*;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

/// A validated structure found by tag.
#[derive(Debug, Clone)]
pub struct ScanHit {
    pub constraint: Arc<PoolConstraint>,
    /// The structure cast at `offset - constraint.tag_offset`
    pub object: Object,
    /// Address where the tag matched
    pub offset: u64,
}

/// A slice of a mapped range searched in one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub start: u64,
    /// Bytes owned by this window; hits must start inside them
    pub length: u64,
    /// Bytes read, including the seam overlap
    pub read_length: u64,
}

/// Split `ranges` into windows of `chunk_size` with `overlap` extra bytes read.
pub(crate) fn windows(ranges: &[MappedRange], chunk_size: u64, overlap: u64) -> Vec<Window> {
    let chunk_size = chunk_size.max(1);
    let mut out = Vec::new();
    for range in ranges {
        let end = range.end();
        let mut start = range.start;
        while start < end {
            let length = chunk_size.min(end - start);
            let read_length = (length + overlap).min(end - start);
            out.push(Window {
                start,
                length,
                read_length,
            });
            start += length;
        }
    }
    out
}

/// Shared state of a scan: the layer, the constraints and their automaton.
#[derive(Debug)]
pub(crate) struct Scanner {
    layer: Arc<dyn Layer>,
    catalog: Arc<Catalog>,
    constraints: Vec<Arc<PoolConstraint>>,
    automaton: AhoCorasick,
    overlap: u64,
    config: ScanConfig,
}

impl Scanner {
    pub fn new(
        layer: Arc<dyn Layer>,
        catalog: Arc<Catalog>,
        constraints: impl IntoIterator<Item = PoolConstraint>,
        config: &ScanConfig,
    ) -> Result<Self> {
        let constraints: Vec<Arc<PoolConstraint>> = constraints.into_iter().map(Arc::new).collect();
        if let Some(empty) = constraints.iter().find(|c| c.tag.is_empty()) {
            return Err(StrataError::InvalidConfig(format!(
                "constraint {} has an empty tag",
                empty.label
            )));
        }
        for constraint in &constraints {
            constraint.check_catalog(&catalog)?;
        }
        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::Standard)
            .build(constraints.iter().map(|c| c.tag.as_slice()))
            .map_err(|e| StrataError::InvalidConfig(format!("tag automaton: {e}")))?;
        let max_tag = constraints.iter().map(|c| c.tag.len()).max().unwrap_or(1) as u64;
        Ok(Self {
            layer,
            catalog,
            constraints,
            automaton,
            overlap: max_tag.saturating_sub(1),
            config: config.clone(),
        })
    }

    pub(crate) fn windows(&self) -> Vec<Window> {
        if self.constraints.is_empty() {
            return Vec::new();
        }
        windows(&self.layer.mapped_ranges(), self.config.chunk_size, self.overlap)
    }

    /// Every validated hit inside one window, in ascending tag offset.
    pub(crate) fn scan_window(&self, window: Window) -> Vec<ScanHit> {
        let data = self.layer.read_padded(window.start, window.read_length as usize);
        let mut hits = Vec::new();
        for m in self.automaton.find_overlapping_iter(&data) {
            if m.start() as u64 >= window.length {
                continue;
            }
            let constraint = &self.constraints[m.pattern().as_usize()];
            let offset = window.start + m.start() as u64;
            if let Some(object) = self.candidate(constraint, offset) {
                hits.push(ScanHit {
                    constraint: Arc::clone(constraint),
                    object,
                    offset,
                });
            }
        }
        hits.sort_by_key(|h| h.offset);
        if self.config.max_hits_per_chunk > 0 && hits.len() > self.config.max_hits_per_chunk {
            debug!(
                window = window.start,
                found = hits.len(),
                kept = self.config.max_hits_per_chunk,
                "Truncating scan hits for window"
            );
            hits.truncate(self.config.max_hits_per_chunk);
        }
        hits
    }

    fn candidate(&self, constraint: &PoolConstraint, offset: u64) -> Option<Object> {
        let Some(start) = offset.checked_sub(constraint.tag_offset) else {
            trace!(offset, label = %constraint.label, "Tag too close to start of layer");
            return None;
        };
        let object = match Object::cast(
            Arc::clone(&self.layer),
            start,
            &constraint.type_name,
            Arc::clone(&self.catalog),
        ) {
            Ok(object) => object,
            Err(e) => {
                trace!(offset, label = %constraint.label, error = %e, "Skipping hit");
                return None;
            }
        };
        if !object.is_readable() {
            trace!(offset, label = %constraint.label, "Skipping truncated hit");
            return None;
        }
        match constraint.validate(&object) {
            Ok(true) => Some(object),
            Ok(false) => {
                trace!(offset, label = %constraint.label, "Hit failed structural checks");
                None
            }
            Err(e) => {
                trace!(offset, label = %constraint.label, error = %e, "Skipping unreadable hit");
                None
            }
        }
    }
}

/// Lazy scan results; stopping early costs nothing.
#[derive(Debug)]
pub struct ScanIter {
    scanner: Scanner,
    windows: std::vec::IntoIter<Window>,
    pending: VecDeque<ScanHit>,
}

impl Iterator for ScanIter {
    type Item = ScanHit;

    fn next(&mut self) -> Option<ScanHit> {
        loop {
            if let Some(hit) = self.pending.pop_front() {
                return Some(hit);
            }
            let window = self.windows.next()?;
            self.pending.extend(self.scanner.scan_window(window));
        }
    }
}

/// Scan `layer` for every constraint's tag, yielding validated hits in
/// ascending offset order.
pub fn scan(
    layer: Arc<dyn Layer>,
    catalog: Arc<Catalog>,
    constraints: impl IntoIterator<Item = PoolConstraint>,
    config: &ScanConfig,
) -> Result<ScanIter> {
    let _span = crate::span_trace!("scan", layer = layer.name()).entered();
    let scanner = Scanner::new(layer, catalog, constraints, config)?;
    let windows = scanner.windows();
    debug!(
        layer = scanner.layer.name(),
        constraints = scanner.constraints.len(),
        windows = windows.len(),
        "Starting scan"
    );
    Ok(ScanIter {
        scanner,
        windows: windows.into_iter(),
        pending: VecDeque::new(),
    })
}

/// Same hits as `scan`, in the same order, with windows searched in parallel.
pub fn scan_parallel(
    layer: Arc<dyn Layer>,
    catalog: Arc<Catalog>,
    constraints: impl IntoIterator<Item = PoolConstraint>,
    config: &ScanConfig,
) -> Result<Vec<ScanHit>> {
    let scanner = Scanner::new(layer, catalog, constraints, config)?;
    let _span = crate::span_trace!(
        "scan_parallel",
        layer = scanner.layer.name(),
        constraints = scanner.constraints.len()
    )
    .entered();
    let per_window: Vec<Vec<ScanHit>> = scanner
        .windows()
        .into_par_iter()
        .map(|w| scanner.scan_window(w))
        .collect();
    Ok(per_window.into_iter().flatten().collect())
}
