//! Typed views over layer bytes.
//!
//! An `Object` pairs a layer, an offset and a catalog type. It never copies
//! or caches bytes: every member access, dereference and value read goes back
//! to the layer, so two reads of the same offset always agree with the
//! capture. Objects are cheap to clone and never mutated; navigating produces
//! new objects.

pub mod list;
pub mod utility;
pub mod value;

pub use list::ListWalk;
pub use value::Value;

use crate::error::{Result, StrataError};
use crate::layers::Layer;
use crate::symbols::{Catalog, Endian, TypeClass, TypeRef};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use value::{decode_base, decode_unsigned, extract_bits, sign_extend};

/// Result of a member access: a decoded primitive or a nested object.
#[derive(Debug, Clone)]
pub enum Field {
    Value(Value),
    Object(Object),
}

impl Field {
    pub fn into_object(self) -> Option<Object> {
        match self {
            Field::Object(o) => Some(o),
            Field::Value(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Field::Value(v) => Some(v),
            Field::Object(_) => None,
        }
    }
}

/// A typed object at an offset inside a layer.
#[derive(Clone)]
pub struct Object {
    layer: Arc<dyn Layer>,
    catalog: Arc<Catalog>,
    offset: u64,
    type_ref: TypeRef,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type", &self.type_ref.to_string())
            .field("layer", &self.layer.name())
            .field("offset", &format_args!("{:#x}", self.offset))
            .finish()
    }
}

impl Object {
    pub fn new(layer: Arc<dyn Layer>, offset: u64, type_ref: TypeRef, catalog: Arc<Catalog>) -> Self {
        Self {
            layer,
            catalog,
            offset,
            type_ref,
        }
    }

    /// Interpret `offset` in `layer` as the catalog type `type_name`.
    pub fn cast(layer: Arc<dyn Layer>, offset: u64, type_name: &str, catalog: Arc<Catalog>) -> Result<Self> {
        let type_ref = catalog.type_ref(type_name)?;
        Ok(Self::new(layer, offset, type_ref, catalog))
    }

    /// An array of `count` elements of `subtype` starting at `offset`.
    pub fn array(
        layer: Arc<dyn Layer>,
        offset: u64,
        subtype: TypeRef,
        count: u64,
        catalog: Arc<Catalog>,
    ) -> Self {
        Self::new(layer, offset, TypeRef::array_of(subtype, count), catalog)
    }

    fn derive(&self, offset: u64, type_ref: TypeRef) -> Self {
        Self {
            layer: Arc::clone(&self.layer),
            catalog: Arc::clone(&self.catalog),
            offset,
            type_ref,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn type_ref(&self) -> &TypeRef {
        &self.type_ref
    }

    pub fn type_name(&self) -> String {
        self.type_ref.to_string()
    }

    pub fn layer(&self) -> &Arc<dyn Layer> {
        &self.layer
    }

    pub fn layer_name(&self) -> &str {
        self.layer.name()
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Size of the object's type in bytes.
    pub fn size(&self) -> Result<u64> {
        self.catalog.size_of(&self.type_ref)
    }

    /// Raw bytes covering the whole object.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        let size = self.size()?;
        self.layer.read(self.offset, size as usize)
    }

    /// Whether every byte of the object can be read.
    pub fn is_readable(&self) -> bool {
        self.size()
            .map(|size| self.layer.is_valid(self.offset, size))
            .unwrap_or(false)
    }

    fn aggregate_name(&self) -> Result<&str> {
        self.type_ref
            .aggregate_name()
            .ok_or_else(|| StrataError::invalid_type(self.type_name(), "type has no members"))
    }

    /// The member `name` as a nested object.
    pub fn member(&self, name: &str) -> Result<Object> {
        let (offset, member) = self.catalog.find_member(self.aggregate_name()?, name)?;
        Ok(self.derive(self.offset.wrapping_add(offset), member.type_ref.clone()))
    }

    /// Follow a dotted path of members, e.g. `Header.PoolTag`.
    pub fn member_path(&self, path: &str) -> Result<Object> {
        let mut current = self.clone();
        for part in path.split('.') {
            current = current.member(part)?;
        }
        Ok(current)
    }

    /// Capability query: does this type carry member `name`?
    pub fn has_member(&self, name: &str) -> bool {
        self.type_ref
            .aggregate_name()
            .is_some_and(|agg| self.catalog.find_member(agg, name).is_ok())
    }

    /// Member names in layout order.
    pub fn members(&self) -> Result<Vec<String>> {
        let layout = self.catalog.type_layout(self.aggregate_name()?)?;
        Ok(layout.member_names().map(str::to_string).collect())
    }

    /// Member access returning a decoded value for scalars and an object for
    /// aggregates, arrays and pointers.
    pub fn field(&self, name: &str) -> Result<Field> {
        let member = self.member(name)?;
        match member.type_ref {
            TypeRef::Base(_) | TypeRef::Enum(_) | TypeRef::Bitfield { .. } => {
                Ok(Field::Value(member.value()?))
            }
            _ => Ok(Field::Object(member)),
        }
    }

    /// Read and decode member `name`.
    pub fn read(&self, name: &str) -> Result<Value> {
        self.member(name)?.value()
    }

    /// Read member `name` as an unsigned integer.
    pub fn read_u64(&self, name: &str) -> Result<u64> {
        let member = self.member(name)?;
        let value = member.value()?;
        value
            .as_u64()
            .ok_or_else(|| StrataError::invalid_type(member.type_name(), "value is not integral"))
    }

    /// Decode this object as a primitive.
    pub fn value(&self) -> Result<Value> {
        match &self.type_ref {
            TypeRef::Base(name) => {
                let base = self.catalog.base_type(name)?;
                if base.size == 0 {
                    return Err(StrataError::invalid_type(name, "type has no storage"));
                }
                let bytes = self.layer.read(self.offset, base.size as usize)?;
                Ok(decode_base(base, &bytes))
            }
            TypeRef::Pointer(_) => Ok(Value::Pointer(self.raw_pointer()?)),
            TypeRef::Enum(name) => {
                let (raw, signed, bits) = self.read_integral(name)?;
                let value = if signed { sign_extend(raw, bits) } else { raw as i64 };
                Ok(self.enum_value(name, value)?)
            }
            TypeRef::Bitfield {
                position,
                length,
                base,
            } => {
                let (raw, signed) = match base.as_ref() {
                    TypeRef::Base(name) | TypeRef::Enum(name) => {
                        let (raw, signed, _) = self.read_integral(name)?;
                        (raw, signed)
                    }
                    other => {
                        return Err(StrataError::invalid_type(
                            other.to_string(),
                            "bitfield base is not integral",
                        ))
                    }
                };
                let bits = extract_bits(raw, *position, *length);
                match base.as_ref() {
                    TypeRef::Enum(name) => {
                        let value = if signed { sign_extend(bits, *length) } else { bits as i64 };
                        self.enum_value(name, value)
                    }
                    _ if signed => Ok(Value::Int(sign_extend(bits, *length))),
                    _ => Ok(Value::UInt(bits)),
                }
            }
            TypeRef::Aggregate(_) | TypeRef::Array { .. } | TypeRef::Function => Err(
                StrataError::invalid_type(self.type_name(), "not a primitive type"),
            ),
        }
    }

    /// Raw bits, signedness and width of a base or enum type at this offset.
    fn read_integral(&self, name: &str) -> Result<(u64, bool, u32)> {
        let (base_name, size) = match self.catalog.enumeration(name) {
            Ok(e) => (e.base.as_str(), e.size),
            Err(_) => (name, self.catalog.base_type(name)?.size),
        };
        let base = self.catalog.base_type(base_name)?;
        if size == 0 || size > 8 {
            return Err(StrataError::invalid_type(name, "not an integral type"));
        }
        let bytes = self.layer.read(self.offset, size as usize)?;
        Ok((decode_unsigned(&bytes, base.endian), base.signed, size as u32 * 8))
    }

    fn enum_value(&self, name: &str, value: i64) -> Result<Value> {
        let enumeration = self.catalog.enumeration(name)?;
        Ok(Value::Enum {
            value,
            label: enumeration.label(value).map(str::to_string),
        })
    }

    fn raw_pointer(&self) -> Result<u64> {
        let size = self.catalog.pointer_size();
        let endian = self
            .catalog
            .base_type("pointer")
            .map(|p| p.endian)
            .unwrap_or(Endian::Little);
        let bytes = self.layer.read(self.offset, size as usize)?;
        Ok(decode_unsigned(&bytes, endian))
    }

    /// Address a pointer refers to, after the layer's address mask.
    pub fn pointer_target(&self) -> Result<u64> {
        if !self.type_ref.is_pointer() {
            return Err(StrataError::invalid_type(self.type_name(), "not a pointer"));
        }
        Ok(self.raw_pointer()? & self.layer.address_mask())
    }

    pub fn is_null(&self) -> Result<bool> {
        Ok(self.pointer_target()? == 0)
    }

    /// Follow a pointer and cast the pointee in the same layer.
    ///
    /// The target address must translate, so unmapped and paged-out pointees
    /// fail here with the corresponding address error.
    pub fn dereference(&self) -> Result<Object> {
        let TypeRef::Pointer(target) = &self.type_ref else {
            return Err(StrataError::invalid_type(self.type_name(), "not a pointer"));
        };
        let address = self.raw_pointer()? & self.layer.address_mask();
        self.layer.translate(address)?;
        Ok(self.derive(address, (**target).clone()))
    }

    /// Element `index` of an array. No bounds check beyond layer translation.
    pub fn at(&self, index: u64) -> Result<Object> {
        let TypeRef::Array { subtype, .. } = &self.type_ref else {
            return Err(StrataError::invalid_type(self.type_name(), "not an array"));
        };
        let element_size = self.catalog.size_of(subtype)?;
        let offset = self
            .offset
            .wrapping_add(index.wrapping_mul(element_size));
        Ok(self.derive(offset, (**subtype).clone()))
    }

    /// Declared element count for arrays.
    pub fn count(&self) -> Option<u64> {
        match self.type_ref {
            TypeRef::Array { count, .. } => Some(count),
            _ => None,
        }
    }

    /// Every declared element of an array, lazily.
    pub fn elements(&self) -> Result<impl Iterator<Item = Object> + '_> {
        let TypeRef::Array { count, subtype } = &self.type_ref else {
            return Err(StrataError::invalid_type(self.type_name(), "not an array"));
        };
        let element_size = self.catalog.size_of(subtype)?;
        Ok((0..*count).map(move |i| {
            self.derive(
                self.offset.wrapping_add(i.wrapping_mul(element_size)),
                (**subtype).clone(),
            )
        }))
    }

    /// Reinterpret the same bytes as another catalog type.
    pub fn cast_to(&self, type_name: &str) -> Result<Object> {
        Ok(self.derive(self.offset, self.catalog.type_ref(type_name)?))
    }

    /// Reinterpret the same bytes as `type_ref`.
    pub fn reinterpret(&self, type_ref: TypeRef) -> Object {
        self.derive(self.offset, type_ref)
    }

    /// The same type at another offset.
    pub fn at_offset(&self, offset: u64) -> Object {
        self.derive(offset, self.type_ref.clone())
    }

    /// The enclosing `type_name` whose `member` sits at this object's offset.
    ///
    /// Used to step from an embedded list entry back to its owner.
    pub fn container_of(&self, member: &str, type_name: &str) -> Result<Object> {
        let (member_offset, _) = self.catalog.find_member(type_name, member)?;
        let start = self
            .offset
            .checked_sub(member_offset)
            .ok_or_else(|| StrataError::invalid_address(self.layer.name(), self.offset))?;
        Ok(self.derive(start, self.catalog.type_ref(type_name)?))
    }

    /// View the object through its registered behaviour class.
    ///
    /// Returns `None` when no class is bound to the type or the bound class is
    /// not `T`; callers then fall back to generic member access.
    pub fn as_class<T: TypeClass>(&self) -> Option<Classed<'_, T>> {
        let name = self.type_ref.aggregate_name()?;
        let class = self.catalog.type_class(name)?;
        let class = class.as_any().downcast_ref::<T>()?;
        Some(Classed {
            object: self,
            class,
        })
    }
}

/// An object seen through a behaviour class. Derefs to the object so generic
/// access stays available; OS modules add methods with `impl Classed<'_, T>`.
#[derive(Debug)]
pub struct Classed<'a, T> {
    object: &'a Object,
    class: &'a T,
}

impl<'a, T> Classed<'a, T> {
    pub fn object(&self) -> &'a Object {
        self.object
    }

    pub fn class(&self) -> &'a T {
        self.class
    }
}

impl<T> Deref for Classed<'_, T> {
    type Target = Object;

    fn deref(&self) -> &Object {
        self.object
    }
}
