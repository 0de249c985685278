//! macOS (XNU) kernel support.

pub mod lsmod;
pub mod trustedbsd;

pub use lsmod::{list_modules, module_ranges};
pub use trustedbsd::CheckTrustedBsd;
