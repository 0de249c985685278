//! Task enumeration and per-task open files.

use crate::context::Module;
use crate::error::Result;
use crate::objects::utility::read_cstring;
use crate::objects::{ListWalk, Object};
use crate::symbols::TypeRef;
use std::iter;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on `fdtable.max_fds` before the table is considered corrupt.
const MAX_FDS: u64 = 1 << 20;

/// Deepest dentry chain followed while building a path.
const MAX_PATH_DEPTH: usize = 256;

/// An open file descriptor of a task.
#[derive(Debug, Clone)]
pub struct OpenFile {
    pub fd: u64,
    /// The `struct file`
    pub file: Object,
    /// Path of the file's dentry, `None` when it cannot be read
    pub path: Option<String>,
}

/// Keep every task when `pids` is empty, otherwise only the listed pids.
pub fn pid_filter(pids: Vec<i64>) -> impl Fn(&Object) -> bool {
    move |task| {
        pids.is_empty()
            || task
                .read("pid")
                .ok()
                .and_then(|pid| pid.as_i64())
                .is_some_and(|pid| pids.contains(&pid))
    }
}

/// `init_task` followed by every task on its `tasks` list, filtered.
pub fn list_tasks<F>(kernel: &Module, filter: F) -> Result<impl Iterator<Item = Object>>
where
    F: Fn(&Object) -> bool,
{
    let init_task = kernel.object_from_symbol("init_task")?;
    let walk = ListWalk::new(&init_task.member("tasks")?, "next", "task_struct", "tasks");
    let others = walk.map_while(|task| match task {
        Ok(task) => Some(task),
        Err(e) => {
            debug!(error = %e, "Task list walk ended early");
            None
        }
    });
    Ok(iter::once(init_task).chain(others).filter(move |task| filter(task)))
}

/// Path of `dentry` up to the root of its filesystem.
///
/// Mount points are not crossed, so files on non-root mounts are reported
/// relative to their mount.
pub fn dentry_path(dentry: &Object, max_name: usize) -> Result<String> {
    let mut components = Vec::new();
    let mut current = dentry.clone();
    for _ in 0..MAX_PATH_DEPTH {
        let parent = current.member("d_parent")?.pointer_target()?;
        if parent == current.offset() || parent == 0 {
            break;
        }
        let name = current.member("d_name")?;
        let length = (name.read_u64("len")? as usize).min(max_name);
        if length > 0 {
            let text = read_cstring(current.layer().as_ref(), name.member("name")?.pointer_target()?, length)?;
            components.push(text);
        }
        current = current.at_offset(parent);
    }
    if components.is_empty() {
        return Ok("/".to_string());
    }
    components.reverse();
    Ok(format!("/{}", components.join("/")))
}

/// Every non-null descriptor in the task's file table.
pub fn files_descriptors_for_process(task: &Object, max_name: usize) -> Result<Vec<OpenFile>> {
    let files = task.member("files")?;
    if files.is_null()? {
        return Ok(Vec::new());
    }
    let files = files.dereference()?;
    let fdt = files.member("fdt")?.dereference()?;
    let mut max_fds = fdt.read_u64("max_fds")?;
    if max_fds > MAX_FDS {
        warn!(task = task.offset(), max_fds, "Implausible fd table size, truncating");
        max_fds = MAX_FDS;
    }
    let table = fdt.member("fd")?.pointer_target()?;
    let file_pointer = TypeRef::pointer_to(task.catalog().type_ref("file")?);
    let fds = Object::array(
        Arc::clone(task.layer()),
        table,
        file_pointer,
        max_fds,
        Arc::clone(task.catalog()),
    );

    let mut open = Vec::new();
    for (fd, slot) in fds.elements()?.enumerate() {
        let address = match slot.pointer_target() {
            Ok(0) => continue,
            Ok(address) => address,
            Err(e) if e.is_address_error() => {
                debug!(task = task.offset(), fd, error = %e, "fd table unreadable, stopping");
                break;
            }
            Err(e) => return Err(e),
        };
        let file = slot.at_offset(address).cast_to("file")?;
        let path = file
            .member("f_path")
            .and_then(|p| p.member("dentry"))
            .and_then(|d| d.dereference())
            .and_then(|d| dentry_path(&d, max_name));
        let path = match path {
            Ok(path) => Some(path),
            Err(e) if e.is_address_error() => None,
            Err(e) => return Err(e),
        };
        open.push(OpenFile {
            fd: fd as u64,
            file,
            path,
        });
    }
    Ok(open)
}
