//! Type model for catalog-described structures.
//!
//! Base types carry size, signedness and endianness. Aggregates (struct,
//! union, class) are ordered member lists with explicit byte offsets.
//! Member types are described by `TypeRef`, which names aggregates and
//! enums instead of embedding them so recursive structures stay finite.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Primitive categories a base type may decode as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseKind {
    Int,
    Float,
    Char,
    Bool,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// A primitive type such as `unsigned long` or `char`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseType {
    pub name: String,
    pub kind: BaseKind,
    /// Size in bytes
    pub size: u64,
    pub signed: bool,
    pub endian: Endian,
}

/// The flavour of an aggregate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    Struct,
    Union,
    Class,
}

/// Reference to a type as used by a member, symbol, or cast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    /// A named base type
    Base(String),
    /// Pointer to another type
    Pointer(Box<TypeRef>),
    /// Fixed-count array of elements of a subtype
    Array { count: u64, subtype: Box<TypeRef> },
    /// Bit range inside a base type
    Bitfield {
        position: u32,
        length: u32,
        base: Box<TypeRef>,
    },
    /// A named struct, union, or class
    Aggregate(String),
    /// A named enumeration
    Enum(String),
    /// Function code; has no readable value
    Function,
}

impl TypeRef {
    pub fn pointer_to(target: TypeRef) -> Self {
        TypeRef::Pointer(Box::new(target))
    }

    pub fn array_of(subtype: TypeRef, count: u64) -> Self {
        TypeRef::Array {
            count,
            subtype: Box::new(subtype),
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, TypeRef::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeRef::Array { .. })
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, TypeRef::Aggregate(_))
    }

    /// Name of the aggregate this reference points at, if any.
    pub fn aggregate_name(&self) -> Option<&str> {
        match self {
            TypeRef::Aggregate(name) => Some(name),
            _ => None,
        }
    }

    /// The element or pointee type for arrays and pointers.
    pub fn subtype(&self) -> Option<&TypeRef> {
        match self {
            TypeRef::Pointer(t) => Some(t),
            TypeRef::Array { subtype, .. } => Some(subtype),
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Base(name) | TypeRef::Aggregate(name) => write!(f, "{name}"),
            TypeRef::Enum(name) => write!(f, "enum {name}"),
            TypeRef::Pointer(target) => write!(f, "{target} *"),
            TypeRef::Array { count, subtype } => write!(f, "{subtype}[{count}]"),
            TypeRef::Bitfield { length, base, .. } => write!(f, "{base}:{length}"),
            TypeRef::Function => write!(f, "function"),
        }
    }
}

/// A named member of an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    /// Offset from the start of the aggregate in bytes
    pub offset: u64,
    pub type_ref: TypeRef,
    /// Members of anonymous nested aggregates are reachable through the parent
    pub anonymous: bool,
}

impl Member {
    /// `(bit_position, bit_length)` for bitfield members.
    pub fn bit_range(&self) -> Option<(u32, u32)> {
        match self.type_ref {
            TypeRef::Bitfield {
                position, length, ..
            } => Some((position, length)),
            _ => None,
        }
    }
}

/// Structural layout of an aggregate type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeLayout {
    pub name: String,
    pub kind: AggregateKind,
    /// Size in bytes
    pub size: u64,
    members: Vec<Member>,
    index: HashMap<String, usize>,
}

impl TypeLayout {
    /// Build a layout; members are ordered by offset, then bit position, then name.
    pub fn new(name: impl Into<String>, kind: AggregateKind, size: u64, mut members: Vec<Member>) -> Self {
        members.sort_by(|a, b| {
            let bit = |m: &Member| m.bit_range().map(|(p, _)| p).unwrap_or(0);
            (a.offset, bit(a), &a.name).cmp(&(b.offset, bit(b), &b.name))
        });
        let index = members
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.clone(), i))
            .collect();
        Self {
            name: name.into(),
            kind,
            size,
            members,
            index,
        }
    }

    /// Members in layout order.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Direct member lookup (anonymous nesting is resolved by the catalog).
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.index.get(name).map(|&i| &self.members[i])
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name.as_str())
    }

    pub fn is_union(&self) -> bool {
        self.kind == AggregateKind::Union
    }
}

/// A named enumeration over an integral base type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    /// Name of the underlying base type
    pub base: String,
    pub size: u64,
    pub constants: BTreeMap<String, i64>,
}

impl EnumType {
    /// Label for a value. When several labels share a value the
    /// lexicographically first one wins.
    pub fn label(&self, value: i64) -> Option<&str> {
        self.constants
            .iter()
            .find(|(_, &v)| v == value)
            .map(|(k, _)| k.as_str())
    }

    pub fn value(&self, label: &str) -> Option<i64> {
        self.constants.get(label).copied()
    }
}

/// A global symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDef {
    pub name: String,
    /// Static (link-time) address
    pub address: u64,
    pub type_ref: Option<TypeRef>,
    /// Bytes the symbol is known to hold, when the catalog records them
    pub constant_data: Option<Vec<u8>>,
}

impl SymbolDef {
    pub fn type_name(&self) -> Option<String> {
        self.type_ref.as_ref().map(|t| t.to_string())
    }
}
