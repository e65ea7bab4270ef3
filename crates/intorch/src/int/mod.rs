//! IntOrch - In-band Network Telemetry table programming.
//!
//! Turns an INT report configuration into the entries of four pipeline
//! tables and keeps a device's tables in line with it:
//!
//! - watchlist: which IPv4 flows are telemetry candidates
//! - report: encapsulation of the reports sent to the collector
//! - config: hop latency and timestamp quantization
//! - queue latency thresholds: per-queue trigger/reset hysteresis
//!
//! Queue thresholds are 32-bit comparisons that the hardware only matches as
//! two 16-bit ranges; [`compile_trigger`] and [`compile_reset`] perform that
//! split. Every pass rebuilds the full desired rule set and submits only the
//! difference, removing stale entries before their replacements are added.

mod builder;
mod config;
mod orch;
mod qmask;
mod range;
mod rule;
mod store;
mod types;

pub use builder::{FieldMetadata, PipelineFieldWidths, RuleBuilder};
pub use config::{load_rules, DeviceConfigMap, IntReportConfig, QueueThresholdConfig};
pub use orch::{
    CleanupReport, ConfigSource, HostResolver, IntOrch, IntOrchConfig, IntOrchError, IntOrchStats,
    Result,
};
pub use qmask::{qmask_for, select_qmask, MAX_QMASK_SHIFT};
pub use range::{
    checked_threshold, compile_reset, compile_trigger, reset_ranges, trigger_ranges, MatchRangeSet,
    RangeInterval, RangePair, HALF_MAX,
};
pub use rule::{
    ActionId, ActionParam, EntryStats, FieldMatch, MatchField, MatchKey, RuleDescriptor,
    RuleDescriptorBuilder, RuleKey, TableAction, TableFamily, TableId,
};
pub use store::{InMemoryRuleStore, RuleStore, StoreError, StoreResult};
pub use types::{
    bmd_type, mirror_type, report_type, AppId, DesiredIntConfig, DeviceId, IntDeviceConfig,
    Ipv4Prefix, QueueThresholds, SubnetDirection, WatchedSubnet, COLLECTOR_EXCLUSION_PRIORITY,
    DEFAULT_MIN_FLOW_HOP_LATENCY_CHANGE_NS, DEFAULT_PRIORITY, DEFAULT_TIMESTAMP_MASK, IP_PROTO_UDP,
    MAX_QUEUES, NEVER_RESET, NEVER_TRIGGER,
};
