//! Intel page-table translation.
//!
//! `IntelLayer` turns virtual addresses into offsets of its base layer by
//! walking the page tables rooted at a directory table base (DTB). The walk
//! depth, index widths, entry size and large-page support come from a
//! `PagingMode`, so the same walker covers 32-bit, PAE and 4-level 64-bit
//! paging.

use crate::error::{Result, StrataError};
use crate::layers::{address_mask_for_bits, Layer, MappedRange, Translation, PAGE_SIZE};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

bitflags! {
    /// Flag bits shared by every Intel paging-structure entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        const LARGE_PAGE = 1 << 7;
        const GLOBAL = 1 << 8;
        const NO_EXECUTE = 1 << 63;
    }
}

/// Supported Intel paging modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PagingKind {
    /// Classic 32-bit paging, two levels of 4-byte entries
    Intel32,
    /// Physical address extension, three levels of 8-byte entries
    Pae,
    /// IA-32e 4-level paging, 48-bit virtual addresses
    Intel32e,
}

/// One level of the page-table hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingLevel {
    pub name: &'static str,
    /// Number of virtual-address bits indexing this table
    pub index_bits: u32,
    /// Whether an entry at this level may map a page directly (PS bit)
    pub large_pages: bool,
}

/// Shape of a page-table walk.
///
/// Only the `intel32`, `pae` and `intel32e` constructors produce one, so the
/// walker can rely on a non-empty level list and 4- or 8-byte entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingMode {
    kind: PagingKind,
    /// Levels from the root table down to the page table
    levels: Vec<PagingLevel>,
    /// Size of one table entry in bytes (4 or 8)
    entry_size: u8,
    /// Canonical virtual address width
    address_bits: u32,
    /// Physical address width used to mask frame numbers out of entries
    physical_bits: u32,
    /// Alignment mask applied to the DTB
    dtb_mask: u64,
}

impl PagingMode {
    pub fn intel32() -> Self {
        Self {
            kind: PagingKind::Intel32,
            levels: vec![
                PagingLevel { name: "page directory", index_bits: 10, large_pages: true },
                PagingLevel { name: "page table", index_bits: 10, large_pages: false },
            ],
            entry_size: 4,
            address_bits: 32,
            physical_bits: 32,
            dtb_mask: !0xfff,
        }
    }

    pub fn pae() -> Self {
        Self {
            kind: PagingKind::Pae,
            levels: vec![
                PagingLevel { name: "page directory pointer table", index_bits: 2, large_pages: false },
                PagingLevel { name: "page directory", index_bits: 9, large_pages: true },
                PagingLevel { name: "page table", index_bits: 9, large_pages: false },
            ],
            entry_size: 8,
            address_bits: 32,
            physical_bits: 52,
            dtb_mask: !0x1f,
        }
    }

    pub fn intel32e() -> Self {
        Self {
            kind: PagingKind::Intel32e,
            levels: vec![
                PagingLevel { name: "page map level 4", index_bits: 9, large_pages: false },
                PagingLevel { name: "page directory pointer table", index_bits: 9, large_pages: true },
                PagingLevel { name: "page directory", index_bits: 9, large_pages: true },
                PagingLevel { name: "page table", index_bits: 9, large_pages: false },
            ],
            entry_size: 8,
            address_bits: 48,
            physical_bits: 52,
            dtb_mask: !0xfff,
        }
    }

    pub fn from_kind(kind: PagingKind) -> Self {
        match kind {
            PagingKind::Intel32 => Self::intel32(),
            PagingKind::Pae => Self::pae(),
            PagingKind::Intel32e => Self::intel32e(),
        }
    }

    pub fn kind(&self) -> PagingKind {
        self.kind
    }

    pub fn levels(&self) -> &[PagingLevel] {
        &self.levels
    }

    pub fn entry_size(&self) -> u8 {
        self.entry_size
    }

    pub fn address_bits(&self) -> u32 {
        self.address_bits
    }

    /// Bits of an entry holding the next table or page frame.
    pub fn frame_mask(&self) -> u64 {
        address_mask_for_bits(self.physical_bits) & !(PAGE_SIZE - 1)
    }

    /// Number of virtual-address bits covered by the page offset.
    pub fn page_shift(&self) -> u32 {
        self.address_bits - self.levels.iter().map(|l| l.index_bits).sum::<u32>()
    }
}

/// Outcome of a successful walk.
#[derive(Debug, Clone, Copy)]
struct PageMapping {
    physical: u64,
    /// Bytes from the translated address to the end of its page
    remaining: u64,
    entry: u64,
}

/// A virtual layer translated through Intel page tables.
#[derive(Debug)]
pub struct IntelLayer {
    name: String,
    base: Arc<dyn Layer>,
    dtb: u64,
    mode: PagingMode,
}

impl IntelLayer {
    pub fn new(name: impl Into<String>, base: Arc<dyn Layer>, dtb: u64, mode: PagingMode) -> Self {
        let name = name.into();
        debug!(layer = %name, base = base.name(), dtb = format_args!("{dtb:#x}"), mode = ?mode.kind(), "Creating translation layer");
        Self {
            name,
            base,
            dtb,
            mode,
        }
    }

    pub fn dtb(&self) -> u64 {
        self.dtb
    }

    pub fn mode(&self) -> &PagingMode {
        &self.mode
    }

    fn decode_entry(&self, raw: &[u8]) -> u64 {
        match self.mode.entry_size {
            4 => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64,
            _ => u64::from_le_bytes([
                raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
            ]),
        }
    }

    fn read_entry(&self, address: u64, entry_offset: u64) -> Result<u64> {
        let raw = self
            .base
            .read(entry_offset, self.mode.entry_size as usize)
            .map_err(|_| StrataError::invalid_address(&self.name, address))?;
        Ok(self.decode_entry(&raw))
    }

    fn walk(&self, address: u64) -> Result<PageMapping> {
        let vaddr = address & self.address_mask();
        let frame_mask = self.mode.frame_mask();
        let entry_size = self.mode.entry_size as u64;
        let last = self.mode.levels.len() - 1;

        let mut table = self.dtb & self.mode.dtb_mask;
        let mut shift = self.mode.address_bits;

        for (depth, level) in self.mode.levels.iter().enumerate() {
            shift -= level.index_bits;
            let index = (vaddr >> shift) & address_mask_for_bits(level.index_bits);
            let entry = self.read_entry(address, table + index * entry_size)?;
            trace!(layer = %self.name, level = level.name, index, entry = format_args!("{entry:#x}"), "Page walk");

            if entry == 0 {
                return Err(StrataError::invalid_address(&self.name, address));
            }
            let flags = EntryFlags::from_bits_truncate(entry);
            if !flags.contains(EntryFlags::PRESENT) {
                return Err(StrataError::paged(&self.name, address, entry));
            }

            if depth == last || (level.large_pages && flags.contains(EntryFlags::LARGE_PAGE)) {
                let page_mask = address_mask_for_bits(shift);
                let physical = (entry & frame_mask & !page_mask) | (vaddr & page_mask);
                if self.base.translate(physical).is_err() {
                    return Err(StrataError::paged(&self.name, address, entry));
                }
                return Ok(PageMapping {
                    physical,
                    remaining: (page_mask - (vaddr & page_mask)) + 1,
                    entry,
                });
            }
            table = entry & frame_mask;
        }
        Err(StrataError::invalid_address(&self.name, address))
    }

    fn collect_ranges(&self, table: u64, depth: usize, prefix: u64, shift: u32, out: &mut Vec<MappedRange>) {
        let level = self.mode.levels[depth];
        let count = 1usize << level.index_bits;
        let entry_size = self.mode.entry_size as usize;
        let Ok(raw) = self.base.read(table, count * entry_size) else {
            return;
        };
        let shift = shift - level.index_bits;
        let frame_mask = self.mode.frame_mask();
        let last = self.mode.levels.len() - 1;

        for (index, chunk) in raw.chunks_exact(entry_size).enumerate() {
            let entry = self.decode_entry(chunk);
            if !EntryFlags::from_bits_truncate(entry).contains(EntryFlags::PRESENT) {
                continue;
            }
            let vaddr = prefix | ((index as u64) << shift);
            let large = level.large_pages && EntryFlags::from_bits_truncate(entry).contains(EntryFlags::LARGE_PAGE);
            if depth == last || large {
                let page_mask = address_mask_for_bits(shift);
                let physical = entry & frame_mask & !page_mask;
                if self.base.translate(physical).is_err() {
                    continue;
                }
                match out.last_mut() {
                    Some(prev) if prev.end() == vaddr => prev.length += page_mask + 1,
                    _ => out.push(MappedRange {
                        start: vaddr,
                        length: page_mask + 1,
                    }),
                }
            } else {
                self.collect_ranges(entry & frame_mask, depth + 1, vaddr, shift, out);
            }
        }
    }
}

impl Layer for IntelLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn maximum_address(&self) -> u64 {
        self.address_mask()
    }

    fn address_mask(&self) -> u64 {
        address_mask_for_bits(self.mode.address_bits)
    }

    fn base(&self) -> Option<&Arc<dyn Layer>> {
        Some(&self.base)
    }

    fn translate(&self, address: u64) -> Result<Translation> {
        let mapping = self.walk(address)?;
        Ok(Translation {
            offset: mapping.physical,
            layer: self.base.name().to_string(),
        })
    }

    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        if length == 0 {
            // Empty reads still require a mapped start address
            self.walk(offset)?;
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(length);
        let mut cursor = offset;
        while out.len() < length {
            let mapping = self.walk(cursor)?;
            let chunk = (mapping.remaining as usize).min(length - out.len());
            let bytes = self
                .base
                .read(mapping.physical, chunk)
                .map_err(|_| StrataError::paged(&self.name, cursor, mapping.entry))?;
            out.extend_from_slice(&bytes);
            cursor = cursor.wrapping_add(chunk as u64);
        }
        Ok(out)
    }

    fn mapped_ranges(&self) -> Vec<MappedRange> {
        let mut out = Vec::new();
        self.collect_ranges(
            self.dtb & self.mode.dtb_mask,
            0,
            0,
            self.mode.address_bits,
            &mut out,
        );
        out
    }
}
