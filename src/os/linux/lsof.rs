//! Open files per process.

use crate::aslr::{resolve_module, SignatureAnchor};
use crate::context::Context;
use crate::error::Result;
use crate::objects::utility::{array_to_string, or_not_applicable};
use crate::objects::Object;
use crate::os::linux::tasks::{files_descriptors_for_process, list_tasks, pid_filter};
use crate::plugins::Plugin;
use crate::renderers::{CellValue, Column, ColumnKind, TreeGrid, TreeRow};
use tracing::debug;

/// Length of `task_struct.comm`.
const TASK_COMM_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct Lsof {
    pub layer: String,
    pub catalog: String,
    /// Only report these pids; empty reports every task
    pub pids: Vec<i64>,
}

impl Lsof {
    pub fn new(layer: impl Into<String>, catalog: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            catalog: catalog.into(),
            pids: Vec::new(),
        }
    }

    pub fn with_pids(mut self, pids: impl IntoIterator<Item = i64>) -> Self {
        self.pids = pids.into_iter().collect();
        self
    }
}

fn task_rows(task: &Object, max_name: usize) -> Result<Vec<TreeRow>> {
    let pid = match task.read("pid").map(|v| v.as_i64()) {
        Ok(Some(pid)) => pid,
        Ok(None) => return Ok(Vec::new()),
        Err(e) if e.is_address_error() => {
            debug!(task = task.offset(), error = %e, "Unreadable pid, skipping task");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };
    let name = or_not_applicable(task.member("comm").and_then(|comm| array_to_string(&comm, TASK_COMM_LEN)))?;
    let files = match files_descriptors_for_process(task, max_name) {
        Ok(files) => files,
        Err(e) if e.is_address_error() => {
            debug!(pid, error = %e, "No readable file table");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };
    Ok(files
        .into_iter()
        .map(|open| {
            TreeRow::new(vec![
                CellValue::Int(pid),
                name.clone(),
                CellValue::UInt(open.fd),
                open.path.into(),
            ])
        })
        .collect())
}

impl Plugin for Lsof {
    const NAME: &'static str = "linux.lsof";

    fn columns() -> Vec<Column> {
        vec![
            Column::new("PID", ColumnKind::Int),
            Column::new("Process", ColumnKind::Str),
            Column::new("FD", ColumnKind::Int),
            Column::new("Path", ColumnKind::Str),
        ]
    }

    fn run<'a>(&'a self, context: &'a Context) -> Result<TreeGrid<'a>> {
        let kernel = resolve_module(context, &self.layer, &self.catalog, &SignatureAnchor::linux())?;
        let max_name = context.config().strings.max_length;
        let tasks = list_tasks(&kernel, pid_filter(self.pids.clone()))?;
        let rows = tasks.flat_map(move |task| match task_rows(&task, max_name) {
            Ok(rows) => rows.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(e) => vec![Err(e)],
        });
        Ok(TreeGrid::new(Self::columns(), rows))
    }
}
