//! SONiC IntOrch - In-band Network Telemetry orchestration.
//!
//! Programs the INT tables of a switch pipeline from a declarative report
//! configuration:
//!
//! ```text
//! [report config] ─┐
//!                  ├──> [RuleBuilder] ──> desired rules ──┐
//! [device config] ─┘                                      ├──> [reconcile] ──> staged plan ──> [RuleStore]
//!                          installed rules <── [RuleStore] ┘
//! ```
//!
//! # Key Components
//!
//! - [`int::IntOrch`]: per-device controller (set up and cleanup)
//! - [`int::RuleBuilder`]: desired entries of each INT table
//! - [`int::compile_trigger`] / [`int::compile_reset`]: 32-bit latency
//!   comparisons as 16-bit range pairs
//! - [`int::select_qmask`]: hop latency quantization mask
//! - [`sonic_orch_common::reconcile`]: the staged remove-then-add diff

pub mod int;
