//! Common orchestration abstractions for SONiC.
//!
//! Helpers shared by orchestration agents that program match-action tables:
//!
//! - [`StagedOps`]: ordered stages of add/remove operations, applied by a
//!   table store one stage at a time
//! - [`reconcile`]: two-stage diff of installed against desired entries
//!
//! # Example
//!
//! ```
//! use sonic_orch_common::{reconcile, OpKind};
//!
//! let installed = vec![("10.0.0.0/24", "fwd"), ("10.1.0.0/24", "fwd")];
//! let desired = vec![("10.0.0.0/24", "drop"), ("10.1.0.0/24", "fwd")];
//!
//! let ops = reconcile(installed, desired, |entry| *entry);
//! assert_eq!(ops.stages().len(), 2);
//! assert_eq!(ops.stages()[0].ops()[0].kind, OpKind::Remove);
//! assert_eq!(ops.stages()[1].ops()[0].entry, ("10.0.0.0/24", "drop"));
//! ```

mod reconcile;
mod staged_ops;

pub use reconcile::reconcile;
pub use staged_ops::{OpKind, RuleOp, Stage, StagedOps};
