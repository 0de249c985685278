//! Error types for memstrata.
//!
//! A single taxonomy covers address translation, catalog lookups and session
//! setup. Address errors are per-item and expected to be handled at the
//! narrowest scope; catalog and setup errors abort an analysis run.

use thiserror::Error;

/// Main error type for memstrata operations.
#[derive(Debug, Error)]
pub enum StrataError {
    /// The address has no mapping at all in the named layer.
    #[error("Invalid address {address:#x} in layer {layer}")]
    InvalidAddress { layer: String, address: u64 },

    /// The address is mapped by the page tables but its page is not resident
    /// in the capture.
    #[error("Paged invalid address {address:#x} in layer {layer} (entry {entry:#x})")]
    PagedInvalidAddress {
        layer: String,
        address: u64,
        entry: u64,
    },

    /// Symbol lookup failed
    #[error("Symbol not found: {0}")]
    UnknownSymbol(String),

    /// Type lookup failed
    #[error("Type not found: {0}")]
    UnknownType(String),

    /// Member lookup on a type layout failed
    #[error("Type {type_name} has no member {member}")]
    UnknownMember { type_name: String, member: String },

    #[error("Layer not found: {0}")]
    UnknownLayer(String),

    #[error("Catalog not found: {0}")]
    UnknownCatalog(String),

    #[error("Layer already registered: {0}")]
    DuplicateLayer(String),

    /// The catalog document is structurally invalid
    #[error("Malformed catalog: {0}")]
    MalformedCatalog(String),

    /// The kernel load offset could not be derived from the capture
    #[error("Kernel offset not found: no signature for {symbol}")]
    OffsetNotFound { symbol: String },

    #[error("Unsupported catalog locator: {0}")]
    UnsupportedLocator(String),

    /// The operation does not apply to the object's type
    #[error("Invalid operation on {type_name}: {message}")]
    InvalidType { type_name: String, message: String },

    /// Invalid session configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StrataError {
    pub(crate) fn invalid_address(layer: impl Into<String>, address: u64) -> Self {
        StrataError::InvalidAddress {
            layer: layer.into(),
            address,
        }
    }

    pub(crate) fn paged(layer: impl Into<String>, address: u64, entry: u64) -> Self {
        StrataError::PagedInvalidAddress {
            layer: layer.into(),
            address,
            entry,
        }
    }

    pub(crate) fn invalid_type(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        StrataError::InvalidType {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// True for either flavour of address failure. These are the errors a
    /// consumer converts into a skip or a sentinel value.
    pub fn is_address_error(&self) -> bool {
        matches!(
            self,
            StrataError::InvalidAddress { .. } | StrataError::PagedInvalidAddress { .. }
        )
    }

    /// True only for mapped-but-not-resident memory.
    pub fn is_paged(&self) -> bool {
        matches!(self, StrataError::PagedInvalidAddress { .. })
    }

    /// The faulting address, for address errors.
    pub fn address(&self) -> Option<u64> {
        match self {
            StrataError::InvalidAddress { address, .. }
            | StrataError::PagedInvalidAddress { address, .. } => Some(*address),
            _ => None,
        }
    }
}

/// Result type alias for memstrata operations
pub type Result<T> = std::result::Result<T, StrataError>;
