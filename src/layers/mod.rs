//! Addressable byte sources.
//!
//! A layer is either raw (backed directly by the capture, identity
//! addressing bounded by its size) or translating (it remaps every address
//! through page tables read from the layer beneath it). Layers are shared
//! read-only for the whole session and are safe to read concurrently.

pub mod intel;
pub mod physical;

pub use intel::{IntelLayer, PagingMode};
pub use physical::{BufferLayer, FileLayer};

use crate::error::Result;
use std::fmt;
use std::sync::Arc;

/// Granularity used when splitting reads and padding unreadable regions.
pub const PAGE_SIZE: u64 = 0x1000;

/// Mask keeping the low `bits` bits of an address.
pub const fn address_mask_for_bits(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Strip tag/sign-extension bits above the canonical address width.
///
/// Pure and idempotent: `mask_address(mask_address(a, n), n) == mask_address(a, n)`.
pub const fn mask_address(address: u64, bits: u32) -> u64 {
    address & address_mask_for_bits(bits)
}

/// Result of translating one address through a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    /// Offset inside `layer`
    pub offset: u64,
    /// Name of the layer the offset refers to
    pub layer: String,
}

/// A contiguous run of addresses that translate linearly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRange {
    pub start: u64,
    pub length: u64,
}

impl MappedRange {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }
}

/// A named, addressable byte source.
pub trait Layer: Send + Sync + fmt::Debug {
    /// Unique name of the layer within a session.
    fn name(&self) -> &str;

    /// Lowest valid address.
    fn minimum_address(&self) -> u64 {
        0
    }

    /// Highest valid address (inclusive).
    fn maximum_address(&self) -> u64;

    /// Mask applied to every address before translation.
    fn address_mask(&self) -> u64 {
        u64::MAX
    }

    /// Read exactly `length` bytes at `offset`, failing on the first byte that
    /// cannot be produced.
    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>>;

    /// Translate one address to an offset in the layer beneath.
    fn translate(&self, address: u64) -> Result<Translation>;

    /// The layer this one translates into, if any.
    fn base(&self) -> Option<&Arc<dyn Layer>> {
        None
    }

    /// Whether every byte of `[offset, offset + length)` is readable.
    fn is_valid(&self, offset: u64, length: u64) -> bool {
        if length == 0 {
            return self.translate(offset).is_ok();
        }
        let Some(last) = offset.checked_add(length - 1) else {
            return false;
        };
        let mut page = offset & !(PAGE_SIZE - 1);
        while page <= last {
            let probe = page.max(offset);
            if self.translate(probe).is_err() {
                return false;
            }
            match page.checked_add(PAGE_SIZE) {
                Some(next) => page = next,
                None => break,
            }
        }
        true
    }

    /// Read `length` bytes, substituting zeros for anything unreadable.
    ///
    /// Only scanning should use this: object reads must surface failures.
    fn read_padded(&self, offset: u64, length: usize) -> Vec<u8> {
        let mut out = vec![0u8; length];
        let mut cursor = 0usize;
        while cursor < length {
            let address = offset.wrapping_add(cursor as u64);
            let page_left = (PAGE_SIZE - (address & (PAGE_SIZE - 1))) as usize;
            let chunk = page_left.min(length - cursor);
            if let Ok(bytes) = self.read(address, chunk) {
                out[cursor..cursor + chunk].copy_from_slice(&bytes);
            }
            cursor += chunk;
        }
        out
    }

    /// Address ranges that contain data worth scanning.
    fn mapped_ranges(&self) -> Vec<MappedRange> {
        let start = self.minimum_address();
        let end = self.maximum_address();
        if end < start {
            return Vec::new();
        }
        vec![MappedRange {
            start,
            length: (end - start).saturating_add(1),
        }]
    }
}
