//! Linux kernel support.

pub mod lsof;
pub mod tasks;

pub use lsof::Lsof;
pub use tasks::{files_descriptors_for_process, list_tasks, pid_filter, OpenFile};
