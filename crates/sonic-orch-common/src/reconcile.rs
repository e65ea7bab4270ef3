//! Two-stage diff of installed against desired table entries.
//!
//! Backing tables reject (or resolve arbitrarily) two live entries with the
//! same match key. [`reconcile`] never installs an entry while the entry it
//! replaces is still live: all stale entries are retracted in a first stage
//! and only then are the missing entries added.

use log::debug;
use std::collections::HashSet;
use std::hash::Hash;

use crate::staged_ops::StagedOps;

/// Computes the staged operations turning `existing` into `desired`.
///
/// Entries are compared through `key`, which must capture exactly the
/// structural identity of an entry (anything the store does not consider
/// part of the entry, such as counters or ownership, stays out of it).
///
/// - `stale = existing - desired` and `missing = desired - existing`.
/// - No stale entries: one stage holding every missing entry as an add.
/// - Otherwise: stage one removes every stale entry, stage two adds every
///   missing entry.
///
/// Entries present on both sides produce no operation. Output order follows
/// input order, and duplicates (by key) on either side are emitted once.
pub fn reconcile<T, K, F>(
    existing: impl IntoIterator<Item = T>,
    desired: impl IntoIterator<Item = T>,
    key: F,
) -> StagedOps<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let existing: Vec<T> = existing.into_iter().collect();
    let desired: Vec<T> = desired.into_iter().collect();

    let existing_keys: HashSet<K> = existing.iter().map(&key).collect();
    let desired_keys: HashSet<K> = desired.iter().map(&key).collect();

    let mut seen = HashSet::new();
    let stale: Vec<T> = existing
        .into_iter()
        .filter(|e| {
            let k = key(e);
            !desired_keys.contains(&k) && seen.insert(k)
        })
        .collect();

    let mut seen = HashSet::new();
    let missing: Vec<T> = desired
        .into_iter()
        .filter(|e| {
            let k = key(e);
            !existing_keys.contains(&k) && seen.insert(k)
        })
        .collect();

    debug!(
        "reconcile: {} stale, {} missing, {} unchanged",
        stale.len(),
        missing.len(),
        desired_keys.len() - missing.len()
    );

    let mut ops = StagedOps::new();
    if !stale.is_empty() {
        for entry in stale {
            ops.remove(entry);
        }
        ops.new_stage();
    }
    for entry in missing {
        ops.add(entry);
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staged_ops::OpKind;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry {
        key: &'static str,
        action: &'static str,
        hits: u64,
    }

    fn entry(key: &'static str, action: &'static str) -> Entry {
        Entry {
            key,
            action,
            hits: 0,
        }
    }

    fn structural(e: &Entry) -> (&'static str, &'static str) {
        (e.key, e.action)
    }

    #[test]
    fn test_identical_sets_yield_single_empty_stage() {
        let set = vec![entry("a", "fwd"), entry("b", "drop")];
        let ops = reconcile(set.clone(), set, structural);

        assert_eq!(ops.stages().len(), 1);
        assert!(ops.is_empty());
    }

    #[test]
    fn test_empty_existing_yields_pure_adds() {
        let ops = reconcile(Vec::new(), vec![entry("a", "fwd"), entry("b", "fwd")], structural);

        assert_eq!(ops.stages().len(), 1);
        assert_eq!(ops.add_count(), 2);
        assert_eq!(ops.remove_count(), 0);
    }

    #[test]
    fn test_replaced_entry_is_removed_before_add() {
        let ops = reconcile(vec![entry("a", "fwd")], vec![entry("a", "drop")], structural);

        assert_eq!(ops.stages().len(), 2);
        let first = &ops.stages()[0];
        let second = &ops.stages()[1];
        assert_eq!(first.len(), 1);
        assert_eq!(first.ops()[0].kind, OpKind::Remove);
        assert_eq!(first.ops()[0].entry.action, "fwd");
        assert_eq!(second.len(), 1);
        assert_eq!(second.ops()[0].kind, OpKind::Add);
        assert_eq!(second.ops()[0].entry.action, "drop");
    }

    #[test]
    fn test_only_stale_entries_yields_empty_second_stage() {
        let ops = reconcile(vec![entry("a", "fwd"), entry("b", "fwd")], vec![entry("a", "fwd")], structural);

        assert_eq!(ops.stages().len(), 2);
        assert_eq!(ops.stages()[0].removes().map(|e| e.key).collect::<Vec<_>>(), vec!["b"]);
        assert!(ops.stages()[1].is_empty());
    }

    #[test]
    fn test_key_ignores_non_structural_fields() {
        let mut installed = entry("a", "fwd");
        installed.hits = 1234;
        let ops = reconcile(vec![installed], vec![entry("a", "fwd")], structural);

        assert!(ops.is_empty());
    }

    #[test]
    fn test_duplicates_are_emitted_once() {
        let ops = reconcile(
            vec![entry("x", "fwd"), entry("x", "fwd")],
            vec![entry("a", "fwd"), entry("a", "fwd")],
            structural,
        );

        assert_eq!(ops.remove_count(), 1);
        assert_eq!(ops.add_count(), 1);
    }

    #[test]
    fn test_order_follows_input() {
        let ops = reconcile(
            Vec::new(),
            vec![entry("c", "fwd"), entry("a", "fwd"), entry("b", "fwd")],
            structural,
        );

        let keys: Vec<_> = ops.stages()[0].adds().map(|e| e.key).collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }
}
