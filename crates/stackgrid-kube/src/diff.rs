//! Manifest diffing.
//!
//! Objects are matched by kind and name only. Content is never compared: every
//! key present on both sides lands in the changed bucket and gets re-applied,
//! which keeps the diff cheap and makes server-side defaults irrelevant.

use std::collections::HashSet;

use crate::error::{ClusterError, ClusterResult};
use crate::object::{ClusterObject, ObjectKey};

/// Result of comparing the previously applied objects with the desired ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectDiff {
    /// Present only in the new set.
    pub create: Vec<ClusterObject>,
    /// Old side of every key present in both sets.
    pub update_old: Vec<ClusterObject>,
    /// New side of every key present in both sets, index-aligned with `update_old`.
    pub update_new: Vec<ClusterObject>,
    /// Present only in the old set.
    pub delete: Vec<ClusterObject>,
}

impl ObjectDiff {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update_new.is_empty() && self.delete.is_empty()
    }
}

/// Classify `old` vs `new`. Both sets must sit in a single common namespace.
///
/// Output order follows input order: `create` and `update_*` in the order of
/// `new`, `delete` in the order of `old`.
pub fn diff(old: &[ClusterObject], new: &[ClusterObject]) -> ClusterResult<ObjectDiff> {
    check_namespace(old.iter().chain(new.iter()))?;

    let old_keys: HashSet<ObjectKey> = old.iter().map(ClusterObject::key).collect();
    let new_keys: HashSet<ObjectKey> = new.iter().map(ClusterObject::key).collect();

    let mut out = ObjectDiff::default();
    for obj in new {
        if old_keys.contains(&obj.key()) {
            out.update_new.push(obj.clone());
        } else {
            out.create.push(obj.clone());
        }
    }
    for obj in old {
        if !new_keys.contains(&obj.key()) {
            out.delete.push(obj.clone());
        }
    }
    // Align update_old with update_new.
    for updated in &out.update_new {
        let key = updated.key();
        if let Some(previous) = old.iter().rev().find(|o| o.key() == key) {
            out.update_old.push(previous.clone());
        }
    }
    Ok(out)
}

fn check_namespace<'a>(objects: impl Iterator<Item = &'a ClusterObject>) -> ClusterResult<()> {
    let mut expected: Option<&str> = None;
    for obj in objects {
        match expected {
            None => expected = Some(obj.namespace()),
            Some(ns) if ns != obj.namespace() => {
                return Err(ClusterError::NamespaceMismatch {
                    target: obj.object_ref(),
                    expected: ns.to_string(),
                    found: obj.namespace().to_string(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}
