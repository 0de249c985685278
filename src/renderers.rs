//! Tabular results handed to rendering collaborators.
//!
//! A plugin produces a `TreeGrid`: ordered column definitions and a lazy
//! stream of rows. Formatting the grid is left to the consumer.

use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared kind of a column's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Int,
    Hex,
    Str,
    Bool,
    Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// One cell of a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellValue {
    Int(i64),
    UInt(u64),
    /// Integer rendered in hexadecimal, typically an address
    Hex(u64),
    Str(String),
    Bool(bool),
    Bytes(Vec<u8>),
    /// The data exists but could not be read from the capture
    NotApplicable,
}

impl CellValue {
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, CellValue::NotApplicable)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Int(v) => write!(f, "{v}"),
            CellValue::UInt(v) => write!(f, "{v}"),
            CellValue::Hex(v) => write!(f, "{v:#x}"),
            CellValue::Str(s) => write!(f, "{s}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Bytes(b) => write!(f, "{}", hex::encode(b)),
            CellValue::NotApplicable => write!(f, "N/A"),
        }
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Str(s)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Str(s.to_string())
    }
}

impl From<u64> for CellValue {
    fn from(v: u64) -> Self {
        CellValue::UInt(v)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::NotApplicable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRow {
    /// Nesting depth; flat plugins always emit level 0
    pub level: usize,
    pub values: Vec<CellValue>,
}

impl TreeRow {
    pub fn new(values: Vec<CellValue>) -> Self {
        Self { level: 0, values }
    }
}

/// Columns plus a lazy, single-pass stream of rows.
pub struct TreeGrid<'a> {
    columns: Vec<Column>,
    rows: Box<dyn Iterator<Item = Result<TreeRow>> + 'a>,
}

impl<'a> TreeGrid<'a> {
    pub fn new<I>(columns: Vec<Column>, rows: I) -> Self
    where
        I: Iterator<Item = Result<TreeRow>> + 'a,
    {
        Self {
            columns,
            rows: Box::new(rows),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Drain every row, checking each against the column count.
    pub fn collect_rows(self) -> Result<Vec<TreeRow>> {
        let width = self.columns.len();
        self.rows
            .map(|row| {
                let row = row?;
                if row.values.len() != width {
                    return Err(StrataError::InvalidConfig(format!(
                        "row has {} values for {width} columns",
                        row.values.len()
                    )));
                }
                Ok(row)
            })
            .collect()
    }
}

impl Iterator for TreeGrid<'_> {
    type Item = Result<TreeRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

impl fmt::Debug for TreeGrid<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeGrid")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}
