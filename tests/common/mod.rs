//! Common test utilities and helpers.
//!
//! Tests build small synthetic captures in memory: an `Image` to lay out raw
//! bytes, a `PageTables` builder for 4-level translation, and ISF catalogs
//! written with `serde_json::json!`.

#![allow(dead_code)]

pub mod catalogs;

use memstrata::layers::intel::EntryFlags;
use memstrata::{BufferLayer, Layer};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// A little-endian byte image under construction.
#[derive(Debug, Clone)]
pub struct Image {
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
        }
    }

    pub fn bytes(&mut self, at: u64, bytes: &[u8]) -> &mut Self {
        let at = at as usize;
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn u8(&mut self, at: u64, v: u8) -> &mut Self {
        self.bytes(at, &[v])
    }

    pub fn u16(&mut self, at: u64, v: u16) -> &mut Self {
        self.bytes(at, &v.to_le_bytes())
    }

    pub fn u32(&mut self, at: u64, v: u32) -> &mut Self {
        self.bytes(at, &v.to_le_bytes())
    }

    pub fn u64(&mut self, at: u64, v: u64) -> &mut Self {
        self.bytes(at, &v.to_le_bytes())
    }

    /// NUL-terminated string.
    pub fn cstr(&mut self, at: u64, s: &str) -> &mut Self {
        self.bytes(at, s.as_bytes());
        self.u8(at + s.len() as u64, 0)
    }

    /// UTF-16LE string without terminator; returns its byte length.
    pub fn utf16(&mut self, at: u64, s: &str) -> usize {
        let encoded: Vec<u8> = s.encode_utf16().flat_map(u16::to_le_bytes).collect();
        self.bytes(at, &encoded);
        encoded.len()
    }

    pub fn layer(&self, name: &str) -> Arc<dyn Layer> {
        Arc::new(BufferLayer::new(name, self.data.clone()))
    }
}

pub const PRESENT: u64 = EntryFlags::PRESENT.bits() | EntryFlags::WRITABLE.bits();

/// Builds IA-32e (4-level) page tables inside an `Image`.
///
/// Tables are allocated page by page from `next_table` upward, so callers keep
/// data frames below that address.
#[derive(Debug)]
pub struct PageTables {
    pub image: Image,
    pub dtb: u64,
    next_table: u64,
}

impl PageTables {
    pub fn new(size: usize, dtb: u64) -> Self {
        Self {
            image: Image::new(size),
            dtb,
            next_table: dtb + 0x1000,
        }
    }

    fn read_entry(&self, at: u64) -> u64 {
        let at = at as usize;
        u64::from_le_bytes(self.image.data[at..at + 8].try_into().unwrap())
    }

    /// Walk to the page-table entry slot for `va`, creating tables on the way.
    fn leaf_slot(&mut self, va: u64) -> u64 {
        let mut table = self.dtb;
        for shift in [39u32, 30, 21] {
            let slot = table + ((va >> shift) & 0x1ff) * 8;
            let entry = self.read_entry(slot);
            table = if entry & 1 == 0 {
                let next = self.next_table;
                self.next_table += 0x1000;
                self.image.u64(slot, next | PRESENT);
                next
            } else {
                entry & 0x000f_ffff_ffff_f000
            };
        }
        table + ((va >> 12) & 0x1ff) * 8
    }

    /// Map the 4 KiB page at `va` to the frame at `pa`.
    pub fn map(&mut self, va: u64, pa: u64) -> &mut Self {
        let slot = self.leaf_slot(va);
        self.image.u64(slot, pa | PRESENT);
        self
    }

    /// Install a non-present leaf entry (e.g. a swapped-out page).
    pub fn swap_out(&mut self, va: u64, raw_entry: u64) -> &mut Self {
        let slot = self.leaf_slot(va);
        self.image.u64(slot, raw_entry & !1);
        self
    }

    pub fn physical(&self, name: &str) -> Arc<dyn Layer> {
        self.image.layer(name)
    }
}

/// Creates a temporary file with the given content.
pub fn create_temp_file(content: &[u8]) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content).unwrap();
    temp_file.flush().unwrap();
    temp_file
}
