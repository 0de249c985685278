//! Address-to-owner lookup over named ranges.
//!
//! OS support builds these from enumerated module objects (kernel modules,
//! kexts) and uses them to attribute code pointers to the image holding them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open address range `[start, end)` owned by a named image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleRange {
    pub name: String,
    /// First address of the range (inclusive)
    pub start: u64,
    /// One past the last address (exclusive)
    pub end: u64,
}

impl ModuleRange {
    /// Build a range from a base and size; the end saturates at `u64::MAX`.
    pub fn new(name: impl Into<String>, start: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            start,
            end: start.saturating_add(size),
        }
    }

    pub fn contains(&self, address: u64) -> bool {
        self.start <= address && address < self.end
    }

    /// Like `contains`, but also accepts the address one past the end.
    pub fn contains_or_ends_at(&self, address: u64) -> bool {
        self.start <= address && address <= self.end
    }

    pub fn size(&self) -> u64 {
        self.end - self.start
    }
}

impl fmt::Display for ModuleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:#x}, {:#x})", self.name, self.start, self.end)
    }
}

/// A set of ranges sorted by start address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleRanges {
    ranges: Vec<ModuleRange>,
}

impl ModuleRanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, range: ModuleRange) {
        let at = self.ranges.partition_point(|r| r.start <= range.start);
        self.ranges.insert(at, range);
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleRange> {
        self.ranges.iter()
    }

    /// The range containing `address`. With overlapping ranges the one with
    /// the highest start address wins.
    pub fn owner_of(&self, address: u64) -> Option<&ModuleRange> {
        let candidates = self.ranges.partition_point(|r| r.start <= address);
        self.ranges[..candidates]
            .iter()
            .rev()
            .find(|r| r.contains(address))
    }

    /// Owner lookup that treats each range as closed, `[start, end]`, so an
    /// address at exactly `start + size` still matches.
    pub fn owner_of_inclusive(&self, address: u64) -> Option<&ModuleRange> {
        let candidates = self.ranges.partition_point(|r| r.start <= address);
        self.ranges[..candidates]
            .iter()
            .rev()
            .find(|r| r.contains_or_ends_at(address))
    }
}

impl FromIterator<ModuleRange> for ModuleRanges {
    fn from_iter<I: IntoIterator<Item = ModuleRange>>(iter: I) -> Self {
        let mut ranges: Vec<_> = iter.into_iter().filter(|r| r.end > r.start).collect();
        ranges.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)));
        Self { ranges }
    }
}
