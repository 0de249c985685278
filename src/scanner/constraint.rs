//! Tag constraints and the structural checks that validate a hit.

use crate::error::Result;
use crate::objects::Object;
use crate::symbols::Catalog;
use std::fmt;
use std::sync::Arc;

type CheckFn = dyn Fn(&Object) -> Result<bool> + Send + Sync;

/// A structural check applied to a candidate object.
#[derive(Clone)]
pub enum StructureCheck {
    /// The (dotted) member's integral value must fall in `[min, max]`
    MemberRange { member: String, min: u64, max: u64 },
    /// The (dotted) member's integral value must equal `value`
    MemberEquals { member: String, value: u64 },
    /// Arbitrary validation over the candidate
    Predicate { name: String, check: Arc<CheckFn> },
}

impl StructureCheck {
    /// Evaluate against `object`. Read failures surface as errors; the
    /// scanner treats those as a failed check.
    pub fn evaluate(&self, object: &Object) -> Result<bool> {
        match self {
            StructureCheck::MemberRange { member, min, max } => {
                let value = integral(object, member)?;
                Ok(*min <= value && value <= *max)
            }
            StructureCheck::MemberEquals { member, value } => Ok(integral(object, member)? == *value),
            StructureCheck::Predicate { check, .. } => check(object),
        }
    }
}

fn integral(object: &Object, path: &str) -> Result<u64> {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (object.member_path(parent)?, leaf),
        None => (object.clone(), path),
    };
    parent.read_u64(leaf)
}

impl fmt::Debug for StructureCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureCheck::MemberRange { member, min, max } => f
                .debug_struct("MemberRange")
                .field("member", member)
                .field("min", min)
                .field("max", max)
                .finish(),
            StructureCheck::MemberEquals { member, value } => f
                .debug_struct("MemberEquals")
                .field("member", member)
                .field("value", value)
                .finish(),
            StructureCheck::Predicate { name, .. } => {
                f.debug_struct("Predicate").field("name", name).finish_non_exhaustive()
            }
        }
    }
}

/// A tag to search for and the structure expected around it.
#[derive(Debug, Clone)]
pub struct PoolConstraint {
    /// Bytes searched for in the layer
    pub tag: Vec<u8>,
    /// Catalog type cast at each candidate
    pub type_name: String,
    /// Offset of the tag from the start of the structure
    pub tag_offset: u64,
    pub checks: Vec<StructureCheck>,
    /// Name used in logs and results
    pub label: String,
    /// Type of the object carried behind the matched structure, when the
    /// structure is an allocator header
    pub body_type: Option<String>,
}

impl PoolConstraint {
    pub fn new(tag: impl Into<Vec<u8>>, type_name: impl Into<String>) -> Self {
        let tag = tag.into();
        let label = String::from_utf8_lossy(&tag).into_owned();
        Self {
            tag,
            type_name: type_name.into(),
            tag_offset: 0,
            checks: Vec::new(),
            label,
            body_type: None,
        }
    }

    pub fn with_tag_offset(mut self, offset: u64) -> Self {
        self.tag_offset = offset;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_body_type(mut self, body_type: impl Into<String>) -> Self {
        self.body_type = Some(body_type.into());
        self
    }

    pub fn with_check(mut self, check: StructureCheck) -> Self {
        self.checks.push(check);
        self
    }

    pub fn member_range(self, member: impl Into<String>, min: u64, max: u64) -> Self {
        self.with_check(StructureCheck::MemberRange {
            member: member.into(),
            min,
            max,
        })
    }

    pub fn member_equals(self, member: impl Into<String>, value: u64) -> Self {
        self.with_check(StructureCheck::MemberEquals {
            member: member.into(),
            value,
        })
    }

    pub fn predicate<F>(self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Object) -> Result<bool> + Send + Sync + 'static,
    {
        self.with_check(StructureCheck::Predicate {
            name: name.into(),
            check: Arc::new(check),
        })
    }

    /// Fail when the cast type or a member named by a check is absent from
    /// `catalog`. Predicates are opaque and not checked.
    pub fn check_catalog(&self, catalog: &Catalog) -> Result<()> {
        catalog.type_ref(&self.type_name)?;
        for check in &self.checks {
            match check {
                StructureCheck::MemberRange { member, .. } | StructureCheck::MemberEquals { member, .. } => {
                    catalog.member_path(&self.type_name, member)?;
                }
                StructureCheck::Predicate { .. } => {}
            }
        }
        if let Some(body) = &self.body_type {
            catalog.type_ref(body)?;
        }
        Ok(())
    }

    /// Run every check in order, stopping at the first failure.
    pub fn validate(&self, object: &Object) -> Result<bool> {
        for check in &self.checks {
            if !check.evaluate(object)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
