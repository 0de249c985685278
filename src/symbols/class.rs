//! Behaviour classes attached to catalog types.
//!
//! OS support registers a class for a type name (`_KMUTANT`, `task_struct`,
//! ...). Objects of that type can then be viewed through the class to reach
//! OS-specific methods; see `Object::as_class`.

use std::any::Any;
use std::fmt;

/// Marker for a behaviour class bound to a catalog type.
pub trait TypeClass: Any + Send + Sync + fmt::Debug {
    /// Human-readable class name used in diagnostics.
    fn class_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

/// Implement `TypeClass` for a unit struct.
#[macro_export]
macro_rules! type_class {
    ($ty:ident) => {
        impl $crate::symbols::TypeClass for $ty {
            fn class_name(&self) -> &'static str {
                stringify!($ty)
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    };
}
