//! Operating-system specific type classes and plugins.

#[cfg(feature = "os-linux")]
pub mod linux;
#[cfg(feature = "os-mac")]
pub mod mac;
#[cfg(feature = "os-windows")]
pub mod windows;
