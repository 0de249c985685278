//! Raw layers backed directly by capture bytes.
//!
//! Addressing is the identity; the only semantics are bounds checks. A
//! `FileLayer` memory-maps the capture read-only, a `BufferLayer` holds the
//! bytes in memory (synthetic images, tests, decompressed captures).

use crate::error::{Result, StrataError};
use crate::layers::{Layer, MappedRange, Translation};
use bytes::Bytes;
use memmap2::Mmap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

fn bounded_slice<'a>(name: &str, data: &'a [u8], offset: u64, length: usize) -> Result<&'a [u8]> {
    let size = data.len() as u64;
    let end = offset.checked_add(length as u64);
    match end {
        Some(end) if end <= size && (offset < size || length == 0) => {
            Ok(&data[offset as usize..end as usize])
        }
        _ => {
            // Report the first byte that falls outside the capture.
            let fault = if offset >= size { offset } else { size };
            Err(StrataError::invalid_address(name, fault))
        }
    }
}

fn padded_copy(data: &[u8], offset: u64, length: usize) -> Vec<u8> {
    let mut out = vec![0u8; length];
    let size = data.len() as u64;
    if offset < size {
        let available = ((size - offset) as usize).min(length);
        out[..available].copy_from_slice(&data[offset as usize..offset as usize + available]);
    }
    out
}

fn whole_range(size: u64) -> Vec<MappedRange> {
    if size == 0 {
        Vec::new()
    } else {
        vec![MappedRange {
            start: 0,
            length: size,
        }]
    }
}

/// A capture file mapped read-only into memory.
pub struct FileLayer {
    name: String,
    path: PathBuf,
    // None when the file size is zero; memmap cannot map empty files.
    mmap: Option<Mmap>,
}

impl FileLayer {
    /// Open and map a capture file.
    pub fn open<P: AsRef<Path>>(name: impl Into<String>, path: P) -> Result<Self> {
        let name = name.into();
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        debug!(layer = %name, path = %path.display(), size = file_size, "Opening capture file");

        let mmap = if file_size == 0 {
            None
        } else {
            // Safety: the capture is opened read-only and never written by this process.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self {
            name,
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the capture in bytes.
    pub fn size(&self) -> u64 {
        self.data().len() as u64
    }

    fn data(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

impl fmt::Debug for FileLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLayer")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("size", &self.size())
            .finish()
    }
}

impl Layer for FileLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn maximum_address(&self) -> u64 {
        self.size().saturating_sub(1)
    }

    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let slice = bounded_slice(&self.name, self.data(), offset, length)?;
        trace!(layer = %self.name, offset, len = length, "Performed read");
        Ok(slice.to_vec())
    }

    fn translate(&self, address: u64) -> Result<Translation> {
        if address >= self.size() {
            return Err(StrataError::invalid_address(&self.name, address));
        }
        Ok(Translation {
            offset: address,
            layer: self.name.clone(),
        })
    }

    fn is_valid(&self, offset: u64, length: u64) -> bool {
        offset
            .checked_add(length)
            .is_some_and(|end| end <= self.size() && offset < self.size())
    }

    fn read_padded(&self, offset: u64, length: usize) -> Vec<u8> {
        padded_copy(self.data(), offset, length)
    }

    fn mapped_ranges(&self) -> Vec<MappedRange> {
        whole_range(self.size())
    }
}

/// A capture held in memory.
#[derive(Clone)]
pub struct BufferLayer {
    name: String,
    data: Bytes,
}

impl BufferLayer {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Cheap reference-counted view of the whole buffer.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }
}

impl fmt::Debug for BufferLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferLayer")
            .field("name", &self.name)
            .field("size", &self.data.len())
            .finish()
    }
}

impl Layer for BufferLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn maximum_address(&self) -> u64 {
        self.size().saturating_sub(1)
    }

    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        Ok(bounded_slice(&self.name, &self.data, offset, length)?.to_vec())
    }

    fn translate(&self, address: u64) -> Result<Translation> {
        if address >= self.size() {
            return Err(StrataError::invalid_address(&self.name, address));
        }
        Ok(Translation {
            offset: address,
            layer: self.name.clone(),
        })
    }

    fn is_valid(&self, offset: u64, length: u64) -> bool {
        offset
            .checked_add(length)
            .is_some_and(|end| end <= self.size() && offset < self.size())
    }

    fn read_padded(&self, offset: u64, length: usize) -> Vec<u8> {
        padded_copy(&self.data, offset, length)
    }

    fn mapped_ranges(&self) -> Vec<MappedRange> {
        whole_range(self.size())
    }
}
