//! Decoded primitive values.

use crate::symbols::{BaseKind, BaseType, Endian};
use serde::Serialize;
use std::fmt;

/// A primitive read from a layer and decoded per its catalog type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Char(u8),
    /// Raw pointer value as stored, before address masking
    Pointer(u64),
    Enum { value: i64, label: Option<String> },
    /// Base types wider than eight bytes
    Bytes(Vec<u8>),
}

impl Value {
    /// Integral view of the value.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Int(v) => Some(v as u64),
            Value::UInt(v) | Value::Pointer(v) => Some(v),
            Value::Bool(v) => Some(v as u64),
            Value::Char(v) => Some(v as u64),
            Value::Enum { value, .. } => Some(value as u64),
            Value::Float(_) | Value::Bytes(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            Value::Enum { value, .. } => Some(value),
            _ => self.as_u64().map(|v| v as i64),
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Value::Enum { label, .. } => label.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Char(c) => write!(f, "{}", *c as char),
            Value::Pointer(p) => write!(f, "{p:#x}"),
            Value::Enum { label: Some(l), .. } => write!(f, "{l}"),
            Value::Enum { value, label: None } => write!(f, "{value}"),
            Value::Bytes(b) => write!(f, "{}", hex::encode(b)),
        }
    }
}

/// Little/big endian integer of up to eight bytes, zero-extended.
pub(crate) fn decode_unsigned(bytes: &[u8], endian: Endian) -> u64 {
    let n = bytes.len().min(8);
    let mut buf = [0u8; 8];
    match endian {
        Endian::Little => {
            buf[..n].copy_from_slice(&bytes[..n]);
            u64::from_le_bytes(buf)
        }
        Endian::Big => {
            buf[8 - n..].copy_from_slice(&bytes[..n]);
            u64::from_be_bytes(buf)
        }
    }
}

/// Sign-extend the low `bits` bits of `value`.
pub(crate) fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// Extract `length` bits starting at `position`.
pub(crate) fn extract_bits(raw: u64, position: u32, length: u32) -> u64 {
    let shifted = if position >= 64 { 0 } else { raw >> position };
    if length >= 64 {
        shifted
    } else {
        shifted & ((1u64 << length) - 1)
    }
}

pub(crate) fn decode_base(base: &BaseType, bytes: &[u8]) -> Value {
    if bytes.is_empty() || bytes.len() > 8 {
        return Value::Bytes(bytes.to_vec());
    }
    let raw = decode_unsigned(bytes, base.endian);
    match base.kind {
        BaseKind::Float => match bytes.len() {
            4 => Value::Float(f32::from_bits(raw as u32) as f64),
            8 => Value::Float(f64::from_bits(raw)),
            _ => Value::Bytes(bytes.to_vec()),
        },
        BaseKind::Bool => Value::Bool(raw != 0),
        BaseKind::Char if bytes.len() == 1 => Value::Char(bytes[0]),
        _ if base.signed => Value::Int(sign_extend(raw, bytes.len() as u32 * 8)),
        _ => Value::UInt(raw),
    }
}
