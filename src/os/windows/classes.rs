//! Behaviour classes for Windows kernel types.
//!
//! Layouts always come from the catalog; these classes only add navigation
//! that Windows encodes implicitly, such as optional object headers whose
//! presence is recorded in a bit mask.

use crate::error::{Result, StrataError};
use crate::objects::utility::unicode_string;
use crate::objects::{Classed, ListWalk, Object};
use crate::symbols::Catalog;
use crate::type_class;
use bitflags::bitflags;

#[derive(Debug, Default)]
pub struct KMutant;
type_class!(KMutant);

#[derive(Debug, Default)]
pub struct ObjectHeader;
type_class!(ObjectHeader);

#[derive(Debug, Default)]
pub struct UnicodeString;
type_class!(UnicodeString);

#[derive(Debug, Default)]
pub struct ListEntry;
type_class!(ListEntry);

#[derive(Debug, Default)]
pub struct PoolHeader;
type_class!(PoolHeader);

bitflags! {
    /// `_OBJECT_HEADER.InfoMask`: which optional headers precede the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InfoMask: u8 {
        const CREATOR_INFO = 0x01;
        const NAME_INFO = 0x02;
        const HANDLE_INFO = 0x04;
        const QUOTA_INFO = 0x08;
        const PROCESS_INFO = 0x10;
        const AUDIT_INFO = 0x20;
        const EXTENDED_INFO = 0x40;
        const PADDING_INFO = 0x80;
    }
}

/// Optional header types, indexed by their `InfoMask` bit.
const OPTIONAL_HEADERS: [&str; 8] = [
    "_OBJECT_HEADER_CREATOR_INFO",
    "_OBJECT_HEADER_NAME_INFO",
    "_OBJECT_HEADER_HANDLE_INFO",
    "_OBJECT_HEADER_QUOTA_INFO",
    "_OBJECT_HEADER_PROCESS_INFO",
    "_OBJECT_HEADER_AUDIT_INFO",
    "_OBJECT_HEADER_EXTENDED_INFO",
    "_OBJECT_HEADER_PADDING_INFO",
];

/// Legacy (pre-InfoMask) headers set this flag when creator info is present.
const OB_FLAG_CREATOR_INFO: u64 = 0x04;

/// Reference counts above this are treated as garbage.
const MAX_REFERENCE_COUNT: i64 = 0x100_0000;

fn optional_header_size(catalog: &Catalog, type_name: &str) -> u64 {
    if catalog.has_type(type_name) {
        catalog.size_of_type(type_name).unwrap_or(0)
    } else {
        0
    }
}

/// Size of every optional header the catalog knows about.
pub fn max_optional_headers_size(catalog: &Catalog) -> u64 {
    OPTIONAL_HEADERS
        .iter()
        .map(|t| optional_header_size(catalog, t))
        .sum()
}

/// Total size of the optional headers preceding `header`.
pub fn optional_headers_size(header: &Object) -> Result<u64> {
    let catalog = header.catalog();
    if header.has_member("InfoMask") {
        let mask = InfoMask::from_bits_retain(header.read_u64("InfoMask")? as u8);
        return Ok(OPTIONAL_HEADERS
            .iter()
            .enumerate()
            .filter(|(bit, _)| mask.bits() & (1 << bit) != 0)
            .map(|(_, t)| optional_header_size(catalog, t))
            .sum());
    }

    let mut size = 0;
    for member in ["NameInfoOffset", "HandleInfoOffset", "QuotaInfoOffset"] {
        if header.has_member(member) {
            size = size.max(header.read_u64(member)?);
        }
    }
    if header.has_member("Flags") && header.read_u64("Flags")? & OB_FLAG_CREATOR_INFO != 0 {
        size = size.max(optional_header_size(catalog, OPTIONAL_HEADERS[0]));
    }
    Ok(size)
}

/// Sanity check on the reference counts of a candidate header.
pub fn is_plausible_header(header: &Object) -> Result<bool> {
    let pointers = header.read("PointerCount")?.as_i64().unwrap_or(-1);
    let handles = header.read("HandleCount")?.as_i64().unwrap_or(-1);
    Ok((1..MAX_REFERENCE_COUNT).contains(&pointers) && (0..MAX_REFERENCE_COUNT).contains(&handles))
}

/// The `_OBJECT_HEADER_NAME_INFO` of `header`, if it has one.
pub fn name_info(header: &Object) -> Result<Option<Object>> {
    let catalog = header.catalog();
    let distance = if header.has_member("InfoMask") {
        let mask = InfoMask::from_bits_retain(header.read_u64("InfoMask")? as u8);
        if !mask.contains(InfoMask::NAME_INFO) {
            return Ok(None);
        }
        let mut distance = optional_header_size(catalog, "_OBJECT_HEADER_NAME_INFO");
        if mask.contains(InfoMask::CREATOR_INFO) {
            distance += optional_header_size(catalog, "_OBJECT_HEADER_CREATOR_INFO");
        }
        distance
    } else if header.has_member("NameInfoOffset") {
        match header.read_u64("NameInfoOffset")? {
            0 => return Ok(None),
            offset => offset,
        }
    } else {
        return Ok(None);
    };
    let offset = header
        .offset()
        .checked_sub(distance)
        .ok_or_else(|| StrataError::invalid_address(header.layer_name(), header.offset()))?;
    Ok(Some(header.at_offset(offset).cast_to("_OBJECT_HEADER_NAME_INFO")?))
}

/// Name recorded in the object's name info, `None` for unnamed objects.
pub fn object_name(header: &Object, max_length: usize) -> Result<Option<String>> {
    let Some(info) = name_info(header)? else {
        return Ok(None);
    };
    let name = info.member("Name")?;
    let text = match name.as_class::<UnicodeString>() {
        Some(s) => s.string(max_length)?,
        None => unicode_string(&name, max_length)?,
    };
    Ok(Some(text))
}

impl Classed<'_, UnicodeString> {
    pub fn string(&self, max_length: usize) -> Result<String> {
        unicode_string(self.object(), max_length)
    }
}

impl Classed<'_, ListEntry> {
    /// Containers of type `container_type` linked through member `link_member`.
    pub fn to_list(&self, container_type: &str, link_member: &str) -> ListWalk {
        ListWalk::new(self.object(), "Flink", container_type, link_member)
    }
}

impl Classed<'_, ObjectHeader> {
    pub fn name_info(&self) -> Result<Option<Object>> {
        name_info(self.object())
    }

    pub fn name(&self, max_length: usize) -> Result<Option<String>> {
        object_name(self.object(), max_length)
    }

    /// The object body cast to `type_name`.
    pub fn body_as(&self, type_name: &str) -> Result<Object> {
        self.member("Body")?.cast_to(type_name)
    }
}

impl Classed<'_, KMutant> {
    pub fn object_header(&self) -> Result<Object> {
        self.container_of("Body", "_OBJECT_HEADER")
    }

    pub fn name(&self, max_length: usize) -> Result<Option<String>> {
        object_name(&self.object_header()?, max_length)
    }
}
