//! Session configuration.
//!
//! Describes the layer stack, the catalogs to load and the tunables used by
//! scanning, string extraction and kernel offset resolution. Every section has
//! sensible defaults; a configuration is an explicit value handed to the
//! `Context`, never global state.

use crate::error::{Result, StrataError};
use crate::layers::intel::PagingKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Master configuration for an analysis session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Layers in construction order; a translating layer must follow its base.
    pub layers: Vec<LayerSpec>,
    /// Symbol catalogs to load.
    pub catalogs: Vec<CatalogSpec>,
    /// Pool/signature scanning configuration.
    pub scan: ScanConfig,
    /// String extraction limits.
    pub strings: StringConfig,
    /// Kernel offset resolution configuration.
    pub aslr: AslrConfig,
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.scan.chunk_size == 0 {
            return Err(StrataError::InvalidConfig("scan.chunk_size must be positive".into()));
        }
        if self.aslr.alignment == 0 {
            return Err(StrataError::InvalidConfig("aslr.alignment must be positive".into()));
        }
        let mut names: Vec<&str> = self.layers.iter().map(LayerSpec::name).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(StrataError::DuplicateLayer(pair[0].to_string()));
        }
        Ok(())
    }
}

/// One layer of the stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LayerSpec {
    /// A raw capture file
    File { name: String, path: PathBuf },
    /// Intel page-table translation over another layer
    Intel {
        name: String,
        base_layer: String,
        /// Directory table base (physical address of the root table)
        dtb: u64,
        paging_mode: PagingKind,
    },
}

impl LayerSpec {
    pub fn name(&self) -> &str {
        match self {
            LayerSpec::File { name, .. } | LayerSpec::Intel { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSpec {
    pub name: String,
    /// Filesystem path or `file://` URL of an ISF document
    pub locator: String,
}

/// Pool/signature scanning configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Bytes searched per window, excluding the seam overlap (default: 16 MiB).
    pub chunk_size: u64,
    /// Cap on hits kept per window; 0 means unbounded (default: 0).
    pub max_hits_per_chunk: usize,
    /// Scan windows on the rayon pool when collecting (default: false).
    pub parallel: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024 * 1024, // 16MiB
            max_hits_per_chunk: 0,
            parallel: false,
        }
    }
}

/// String extraction limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StringConfig {
    /// Maximum bytes read for a C string (default: 255).
    pub max_length: usize,
    /// Maximum bytes read for a counted UTF-16 string (default: 4096).
    pub unicode_max_length: usize,
}

impl Default for StringConfig {
    fn default() -> Self {
        Self {
            max_length: 255,
            unicode_max_length: 0x1000,
        }
    }
}

/// Kernel offset resolution configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AslrConfig {
    /// Required alignment of the load offset (default: 4096).
    pub alignment: u64,
}

impl Default for AslrConfig {
    fn default() -> Self {
        Self { alignment: 0x1000 }
    }
}
