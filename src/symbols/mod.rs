//! Symbol catalogs.
//!
//! A `Catalog` is the immutable description of one binary's types and
//! symbols, loaded from an ISF JSON document. It answers symbol, type,
//! member and size queries, and carries the registry binding OS behaviour
//! classes to type names.

pub mod class;
pub(crate) mod isf;
pub mod types;

pub use class::TypeClass;
pub use types::{AggregateKind, BaseKind, BaseType, Endian, EnumType, Member, SymbolDef, TypeLayout, TypeRef};

use crate::error::{Result, StrataError};
use base64::Engine;
use isf::{IsfDocument, IsfTypeDescriptor};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Nesting depth at which anonymous-member searches give up.
const MAX_ANONYMOUS_DEPTH: usize = 16;

/// Pointer width assumed when a catalog does not declare a `pointer` base type.
const DEFAULT_POINTER_SIZE: u64 = 8;

/// Types and symbols of one binary.
#[derive(Debug, Clone)]
pub struct Catalog {
    source: Option<String>,
    metadata: serde_json::Value,
    base_types: HashMap<String, BaseType>,
    user_types: HashMap<String, TypeLayout>,
    enums: HashMap<String, EnumType>,
    symbols: HashMap<String, SymbolDef>,
    pointer_size: u64,
    classes: HashMap<String, Arc<dyn TypeClass>>,
}

impl Catalog {
    /// Load a catalog from a filesystem path or a `file://` URL.
    pub fn load(locator: &str) -> Result<Self> {
        let path = if let Some(rest) = locator.strip_prefix("file://") {
            PathBuf::from(rest)
        } else if locator.contains("://") {
            return Err(StrataError::UnsupportedLocator(locator.to_string()));
        } else {
            PathBuf::from(locator)
        };
        debug!(locator, "Loading symbol catalog");
        let data = std::fs::read(&path)?;
        let mut catalog = Self::from_slice(&data)?;
        catalog.source = Some(locator.to_string());
        Ok(catalog)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_slice(json.as_bytes())
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let document: IsfDocument = serde_json::from_slice(data)
            .map_err(|e| StrataError::MalformedCatalog(e.to_string()))?;
        Self::from_document(document)
    }

    fn from_document(doc: IsfDocument) -> Result<Self> {
        let mut base_types = HashMap::with_capacity(doc.base_types.len());
        for (name, raw) in &doc.base_types {
            let kind = match raw.kind.as_str() {
                "int" => BaseKind::Int,
                "float" => BaseKind::Float,
                "char" => BaseKind::Char,
                "bool" => BaseKind::Bool,
                "void" => BaseKind::Void,
                other => {
                    return Err(StrataError::MalformedCatalog(format!(
                        "base type {name} has unknown kind {other}"
                    )))
                }
            };
            let endian = match raw.endian.as_str() {
                "little" => Endian::Little,
                "big" => Endian::Big,
                other => {
                    return Err(StrataError::MalformedCatalog(format!(
                        "base type {name} has unknown endianness {other}"
                    )))
                }
            };
            base_types.insert(
                name.clone(),
                BaseType {
                    name: name.clone(),
                    kind,
                    size: raw.size,
                    signed: raw.signed,
                    endian,
                },
            );
        }

        let resolver = DescriptorResolver { doc: &doc };

        let mut user_types = HashMap::with_capacity(doc.user_types.len());
        for (name, raw) in &doc.user_types {
            let kind = match raw.kind.as_str() {
                "struct" => AggregateKind::Struct,
                "union" => AggregateKind::Union,
                "class" => AggregateKind::Class,
                other => {
                    return Err(StrataError::MalformedCatalog(format!(
                        "user type {name} has unknown kind {other}"
                    )))
                }
            };
            let mut members = Vec::with_capacity(raw.fields.len());
            for (field_name, field) in &raw.fields {
                let type_ref = resolver
                    .resolve(&field.type_desc)
                    .map_err(|e| StrataError::MalformedCatalog(format!("{name}.{field_name}: {e}")))?;
                members.push(Member {
                    name: field_name.clone(),
                    offset: field.offset,
                    type_ref,
                    anonymous: field.anonymous,
                });
            }
            user_types.insert(name.clone(), TypeLayout::new(name.clone(), kind, raw.size, members));
        }

        let mut enums = HashMap::with_capacity(doc.enums.len());
        for (name, raw) in &doc.enums {
            if !doc.base_types.contains_key(&raw.base) {
                return Err(StrataError::MalformedCatalog(format!(
                    "enum {name} has unknown base type {}",
                    raw.base
                )));
            }
            enums.insert(
                name.clone(),
                EnumType {
                    name: name.clone(),
                    base: raw.base.clone(),
                    size: raw.size,
                    constants: raw.constants.clone(),
                },
            );
        }

        let mut symbols = HashMap::with_capacity(doc.symbols.len());
        for (name, raw) in &doc.symbols {
            let type_ref = raw
                .type_desc
                .as_ref()
                .map(|d| resolver.resolve(d))
                .transpose()
                .map_err(|e| StrataError::MalformedCatalog(format!("symbol {name}: {e}")))?;
            let constant_data = raw
                .constant_data
                .as_ref()
                .map(|encoded| base64::engine::general_purpose::STANDARD.decode(encoded))
                .transpose()
                .map_err(|e| StrataError::MalformedCatalog(format!("symbol {name}: {e}")))?;
            symbols.insert(
                name.clone(),
                SymbolDef {
                    name: name.clone(),
                    address: raw.address,
                    type_ref,
                    constant_data,
                },
            );
        }

        let pointer_size = match base_types.get("pointer") {
            Some(pointer) => pointer.size,
            None => {
                warn!("Catalog declares no pointer base type, assuming {DEFAULT_POINTER_SIZE} bytes");
                DEFAULT_POINTER_SIZE
            }
        };

        debug!(
            base_types = base_types.len(),
            user_types = user_types.len(),
            enums = enums.len(),
            symbols = symbols.len(),
            pointer_size,
            "Parsed symbol catalog"
        );

        Ok(Self {
            source: None,
            metadata: doc.metadata,
            base_types,
            user_types,
            enums,
            symbols,
            pointer_size,
            classes: HashMap::new(),
        })
    }

    /// Where the catalog was loaded from, if it came from a locator.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// The free-form metadata block of the document.
    pub fn metadata(&self) -> &serde_json::Value {
        &self.metadata
    }

    pub fn pointer_size(&self) -> u64 {
        self.pointer_size
    }

    pub fn symbol(&self, name: &str) -> Result<&SymbolDef> {
        self.symbols
            .get(name)
            .ok_or_else(|| StrataError::UnknownSymbol(name.to_string()))
    }

    /// Static address and type name of a symbol.
    pub fn resolve_symbol(&self, name: &str) -> Result<(u64, Option<String>)> {
        let symbol = self.symbol(name)?;
        Ok((symbol.address, symbol.type_name()))
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Symbols whose names match `pattern`, sorted by name.
    pub fn symbols_matching(&self, pattern: &Regex) -> Vec<&SymbolDef> {
        let mut found: Vec<_> = self
            .symbols
            .values()
            .filter(|s| pattern.is_match(&s.name))
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    pub fn symbol_names(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }

    pub fn type_layout(&self, name: &str) -> Result<&TypeLayout> {
        self.user_types
            .get(name)
            .ok_or_else(|| StrataError::UnknownType(name.to_string()))
    }

    pub fn base_type(&self, name: &str) -> Result<&BaseType> {
        self.base_types
            .get(name)
            .ok_or_else(|| StrataError::UnknownType(name.to_string()))
    }

    pub fn enumeration(&self, name: &str) -> Result<&EnumType> {
        self.enums
            .get(name)
            .ok_or_else(|| StrataError::UnknownType(name.to_string()))
    }

    /// Whether any kind of type with this name exists.
    pub fn has_type(&self, name: &str) -> bool {
        self.user_types.contains_key(name)
            || self.enums.contains_key(name)
            || self.base_types.contains_key(name)
    }

    /// Reference to a named type. Aggregates shadow enums, which shadow base types.
    pub fn type_ref(&self, name: &str) -> Result<TypeRef> {
        if self.user_types.contains_key(name) {
            Ok(TypeRef::Aggregate(name.to_string()))
        } else if self.enums.contains_key(name) {
            Ok(TypeRef::Enum(name.to_string()))
        } else if self.base_types.contains_key(name) {
            Ok(TypeRef::Base(name.to_string()))
        } else {
            Err(StrataError::UnknownType(name.to_string()))
        }
    }

    /// Size in bytes of a value of type `type_ref`.
    pub fn size_of(&self, type_ref: &TypeRef) -> Result<u64> {
        match type_ref {
            TypeRef::Base(name) => Ok(self.base_type(name)?.size),
            TypeRef::Pointer(_) => Ok(self.pointer_size),
            TypeRef::Array { count, subtype } => {
                let element = self.size_of(subtype)?;
                element
                    .checked_mul(*count)
                    .ok_or_else(|| StrataError::invalid_type(type_ref.to_string(), "array size overflows"))
            }
            TypeRef::Bitfield { base, .. } => self.size_of(base),
            TypeRef::Aggregate(name) => Ok(self.type_layout(name)?.size),
            TypeRef::Enum(name) => Ok(self.enumeration(name)?.size),
            TypeRef::Function => Ok(0),
        }
    }

    /// Size of a named type.
    pub fn size_of_type(&self, name: &str) -> Result<u64> {
        self.size_of(&self.type_ref(name)?)
    }

    /// Find a member of an aggregate, descending into anonymous members.
    ///
    /// Returns the member's offset from the start of `type_name` together with
    /// its definition.
    pub fn find_member(&self, type_name: &str, member: &str) -> Result<(u64, &Member)> {
        let layout = self.type_layout(type_name)?;
        if let Some(found) = layout.member(member) {
            return Ok((found.offset, found));
        }

        let mut pending: VecDeque<(u64, &TypeLayout, usize)> = VecDeque::new();
        self.queue_anonymous(layout, 0, 1, &mut pending);
        while let Some((base, nested, depth)) = pending.pop_front() {
            if let Some(found) = nested.member(member) {
                return Ok((base + found.offset, found));
            }
            if depth < MAX_ANONYMOUS_DEPTH {
                self.queue_anonymous(nested, base, depth + 1, &mut pending);
            }
        }

        Err(StrataError::UnknownMember {
            type_name: type_name.to_string(),
            member: member.to_string(),
        })
    }

    fn queue_anonymous<'a>(
        &'a self,
        layout: &'a TypeLayout,
        base: u64,
        depth: usize,
        pending: &mut VecDeque<(u64, &'a TypeLayout, usize)>,
    ) {
        for m in layout.members().iter().filter(|m| m.anonymous) {
            if let Some(nested) = m.type_ref.aggregate_name().and_then(|n| self.user_types.get(n)) {
                pending.push_back((base + m.offset, nested, depth));
            }
        }
    }

    /// Offset of a member within `type_name`.
    pub fn member_offset(&self, type_name: &str, member: &str) -> Result<u64> {
        Ok(self.find_member(type_name, member)?.0)
    }

    /// Resolve a dotted member path such as `Header.PoolTag`.
    ///
    /// Every component but the last must name an aggregate member.
    pub fn member_path(&self, type_name: &str, path: &str) -> Result<(u64, TypeRef)> {
        let mut offset = 0u64;
        let mut current = TypeRef::Aggregate(type_name.to_string());
        for part in path.split('.') {
            let Some(name) = current.aggregate_name() else {
                return Err(StrataError::invalid_type(
                    current.to_string(),
                    format!("cannot take member {part} of a non-aggregate"),
                ));
            };
            let (member_offset, member) = self.find_member(name, part)?;
            offset += member_offset;
            current = member.type_ref.clone();
        }
        Ok((offset, current))
    }

    /// Attach a behaviour class to a type.
    pub fn set_type_class(&mut self, type_name: &str, class: Arc<dyn TypeClass>) -> Result<()> {
        if !self.has_type(type_name) {
            return Err(StrataError::UnknownType(type_name.to_string()));
        }
        debug!(type_name, class = class.class_name(), "Registered type class");
        self.classes.insert(type_name.to_string(), class);
        Ok(())
    }

    pub fn type_class(&self, type_name: &str) -> Option<&Arc<dyn TypeClass>> {
        self.classes.get(type_name)
    }

    /// Type names with a registered class, sorted.
    pub fn classed_types(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.classes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Converts document type descriptors into `TypeRef`s, rejecting dangling references.
struct DescriptorResolver<'a> {
    doc: &'a IsfDocument,
}

impl DescriptorResolver<'_> {
    fn resolve(&self, desc: &IsfTypeDescriptor) -> std::result::Result<TypeRef, String> {
        fn require<V>(map: &BTreeMap<String, V>, name: &str, what: &str) -> std::result::Result<(), String> {
            if map.contains_key(name) {
                Ok(())
            } else {
                Err(format!("reference to unknown {what} {name}"))
            }
        }

        Ok(match desc {
            IsfTypeDescriptor::Base { name } => {
                require(&self.doc.base_types, name, "base type")?;
                TypeRef::Base(name.clone())
            }
            IsfTypeDescriptor::Pointer { subtype } => TypeRef::Pointer(Box::new(self.resolve(subtype)?)),
            IsfTypeDescriptor::Array { count, subtype } => TypeRef::Array {
                count: *count,
                subtype: Box::new(self.resolve(subtype)?),
            },
            IsfTypeDescriptor::Bitfield {
                bit_position,
                bit_length,
                base,
            } => {
                if *bit_length == 0 || bit_position.checked_add(*bit_length).map_or(true, |end| end > 64) {
                    return Err(format!("bitfield {bit_position}:{bit_length} out of range"));
                }
                TypeRef::Bitfield {
                    position: *bit_position,
                    length: *bit_length,
                    base: Box::new(self.resolve(base)?),
                }
            }
            IsfTypeDescriptor::Struct { name }
            | IsfTypeDescriptor::Union { name }
            | IsfTypeDescriptor::Class { name } => {
                require(&self.doc.user_types, name, "user type")?;
                TypeRef::Aggregate(name.clone())
            }
            IsfTypeDescriptor::Enum { name } => {
                require(&self.doc.enums, name, "enum")?;
                TypeRef::Enum(name.clone())
            }
            IsfTypeDescriptor::Function {} => TypeRef::Function,
        })
    }
}
