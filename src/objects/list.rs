//! Walking intrusive doubly linked lists (`_LIST_ENTRY`, `list_head`).

use crate::error::Result;
use crate::objects::Object;
use std::collections::HashSet;
use tracing::debug;

/// Iterator over the containers of an intrusive list.
///
/// Starting from a head entry, follows the forward pointer and yields the
/// structure embedding each entry. The head itself is not yielded. The walk
/// ends when it returns to the head, revisits an entry, or hits an unreadable
/// link; the failing read is yielded once before the walk stops.
#[derive(Debug)]
pub struct ListWalk {
    head: u64,
    current: Option<Object>,
    forward: String,
    container_type: String,
    link_member: String,
    seen: HashSet<u64>,
}

impl ListWalk {
    /// `head` is a list entry object; `forward` names its next-pointer member
    /// (`Flink`, `next`), and each entry is embedded in `container_type` as
    /// member `link_member`.
    pub fn new(head: &Object, forward: &str, container_type: &str, link_member: &str) -> Self {
        let mut seen = HashSet::new();
        seen.insert(head.offset());
        Self {
            head: head.offset(),
            current: Some(head.clone()),
            forward: forward.to_string(),
            container_type: container_type.to_string(),
            link_member: link_member.to_string(),
            seen,
        }
    }

    fn step(&self, entry: &Object) -> Result<Object> {
        entry.member(&self.forward)?.dereference()
    }
}

impl Iterator for ListWalk {
    type Item = Result<Object>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.current.take()?;
        let next = match self.step(&entry) {
            Ok(next) => next,
            Err(e) => return Some(Err(e)),
        };
        if next.offset() == self.head {
            return None;
        }
        if !self.seen.insert(next.offset()) {
            debug!(entry = next.offset(), "List walk revisited an entry, stopping");
            return None;
        }
        let container = next.container_of(&self.link_member, &self.container_type);
        self.current = Some(next);
        Some(container)
    }
}
