//! String extraction and sentinel helpers shared by OS support code.

use crate::error::{Result, StrataError};
use crate::layers::{Layer, PAGE_SIZE};
use crate::objects::Object;
use crate::renderers::CellValue;
use crate::symbols::TypeRef;
use tracing::trace;

fn trim_at_nul(bytes: &[u8]) -> &[u8] {
    match memchr::memchr(0, bytes) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

/// Read a NUL-terminated string of at most `max_length` bytes starting at
/// `address`, one page at a time.
///
/// Reading stops at the terminator, so a string ending just before an
/// unreadable page is still returned. A failure before the terminator is
/// reported rather than truncating the string.
pub fn read_cstring(layer: &dyn Layer, address: u64, max_length: usize) -> Result<String> {
    let mut out = Vec::new();
    let mut cursor = address;
    while out.len() < max_length {
        let page_left = PAGE_SIZE - (cursor & (PAGE_SIZE - 1));
        let chunk = page_left.min((max_length - out.len()) as u64) as usize;
        let bytes = layer.read(cursor, chunk)?;
        if let Some(end) = memchr::memchr(0, &bytes) {
            out.extend_from_slice(&bytes[..end]);
            return Ok(String::from_utf8_lossy(&out).into_owned());
        }
        out.extend_from_slice(&bytes);
        cursor = cursor.wrapping_add(chunk as u64);
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Decode a fixed-size character array up to the first NUL or `max_length`.
pub fn array_to_string(array: &Object, max_length: usize) -> Result<String> {
    let TypeRef::Array { count, subtype } = array.type_ref() else {
        return Err(StrataError::invalid_type(array.type_name(), "not an array"));
    };
    let element = array.catalog().size_of(subtype)?;
    let length = count.saturating_mul(element).min(max_length as u64) as usize;
    let bytes = array.layer().read(array.offset(), length)?;
    Ok(String::from_utf8_lossy(trim_at_nul(&bytes)).into_owned())
}

/// Follow a character pointer and decode the string it points at.
pub fn pointer_to_string(pointer: &Object, max_length: usize) -> Result<String> {
    if max_length == 0 {
        return Err(StrataError::invalid_type(pointer.type_name(), "maximum length must be positive"));
    }
    let target = pointer.pointer_target()?;
    read_cstring(pointer.layer().as_ref(), target, max_length)
}

/// Decode UTF-16LE bytes, stopping at a NUL code unit.
pub fn utf16le_to_string(bytes: &[u8]) -> String {
    let units = bytes.len() / 2 * 2;
    let mut end = units;
    for i in (0..units).step_by(2) {
        if bytes[i] == 0 && bytes[i + 1] == 0 {
            end = i;
            break;
        }
    }
    let (text, _) = encoding_rs::UTF_16LE.decode_without_bom_handling(&bytes[..end]);
    text.into_owned()
}

/// Decode a counted UTF-16 string (`Length` bytes at `Buffer`), as used by
/// Windows `_UNICODE_STRING`.
pub fn unicode_string(object: &Object, max_length: usize) -> Result<String> {
    let length = (object.read_u64("Length")? as usize).min(max_length);
    if length == 0 {
        return Ok(String::new());
    }
    let buffer = object.member("Buffer")?.pointer_target()?;
    let bytes = object.layer().read(buffer, length)?;
    Ok(utf16le_to_string(&bytes))
}

/// Turn address failures into the `N/A` sentinel; other errors propagate.
pub fn or_not_applicable<T: Into<CellValue>>(result: Result<T>) -> Result<CellValue> {
    match result {
        Ok(value) => Ok(value.into()),
        Err(e) if e.is_address_error() => {
            trace!(error = %e, "Substituting N/A for unreadable value");
            Ok(CellValue::NotApplicable)
        }
        Err(e) => Err(e),
    }
}
