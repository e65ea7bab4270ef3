//! Staged batches of table operations.
//!
//! A [`StagedOps`] is an ordered list of stages. Stages must be applied
//! strictly in order; operations inside one stage carry no ordering and may
//! be applied concurrently by the backing store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a single table operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Remove,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "ADD"),
            Self::Remove => write!(f, "REMOVE"),
        }
    }
}

/// One add or remove of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOp<T> {
    pub kind: OpKind,
    pub entry: T,
}

impl<T> RuleOp<T> {
    pub fn add(entry: T) -> Self {
        Self {
            kind: OpKind::Add,
            entry,
        }
    }

    pub fn remove(entry: T) -> Self {
        Self {
            kind: OpKind::Remove,
            entry,
        }
    }
}

/// A set of operations that may be applied in any order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage<T> {
    ops: Vec<RuleOp<T>>,
}

impl<T> Stage<T> {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    pub fn push(&mut self, op: RuleOp<T>) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[RuleOp<T>] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Entries added by this stage.
    pub fn adds(&self) -> impl Iterator<Item = &T> {
        self.ops
            .iter()
            .filter(|op| op.kind == OpKind::Add)
            .map(|op| &op.entry)
    }

    /// Entries removed by this stage.
    pub fn removes(&self) -> impl Iterator<Item = &T> {
        self.ops
            .iter()
            .filter(|op| op.kind == OpKind::Remove)
            .map(|op| &op.entry)
    }
}

impl<T> Default for Stage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<RuleOp<T>> for Stage<T> {
    fn from_iter<I: IntoIterator<Item = RuleOp<T>>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

/// Ordered stages of operations, consumed once by whoever applies it.
///
/// A freshly built batch always has one (possibly empty) stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedOps<T> {
    stages: Vec<Stage<T>>,
}

impl<T> StagedOps<T> {
    /// Creates a batch with a single empty stage.
    pub fn new() -> Self {
        Self {
            stages: vec![Stage::new()],
        }
    }

    /// Appends an operation to the current (last) stage.
    pub fn push(&mut self, op: RuleOp<T>) -> &mut Self {
        if let Some(stage) = self.stages.last_mut() {
            stage.push(op);
        }
        self
    }

    pub fn add(&mut self, entry: T) -> &mut Self {
        self.push(RuleOp::add(entry))
    }

    pub fn remove(&mut self, entry: T) -> &mut Self {
        self.push(RuleOp::remove(entry))
    }

    /// Closes the current stage; later operations go into a new one.
    pub fn new_stage(&mut self) -> &mut Self {
        self.stages.push(Stage::new());
        self
    }

    pub fn stages(&self) -> &[Stage<T>] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<Stage<T>> {
        self.stages
    }

    /// Total number of operations across all stages.
    pub fn op_count(&self) -> usize {
        self.stages.iter().map(Stage::len).sum()
    }

    /// Returns true if no stage holds an operation.
    pub fn is_empty(&self) -> bool {
        self.stages.iter().all(Stage::is_empty)
    }

    pub fn add_count(&self) -> usize {
        self.stages.iter().map(|s| s.adds().count()).sum()
    }

    pub fn remove_count(&self) -> usize {
        self.stages.iter().map(|s| s.removes().count()).sum()
    }
}

impl<T> Default for StagedOps<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_has_single_empty_stage() {
        let ops: StagedOps<u32> = StagedOps::new();
        assert_eq!(ops.stages().len(), 1);
        assert!(ops.is_empty());
        assert_eq!(ops.op_count(), 0);
    }

    #[test]
    fn test_new_stage_splits_operations() {
        let mut ops = StagedOps::new();
        ops.remove(1u32).remove(2).new_stage().add(3).add(4).add(5);

        assert_eq!(ops.stages().len(), 2);
        assert_eq!(ops.stages()[0].removes().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(ops.stages()[1].adds().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(ops.add_count(), 3);
        assert_eq!(ops.remove_count(), 2);
    }

    #[test]
    fn test_op_kind_display() {
        assert_eq!(OpKind::Add.to_string(), "ADD");
        assert_eq!(OpKind::Remove.to_string(), "REMOVE");
    }
}
