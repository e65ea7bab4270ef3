//! Match-action rule descriptors for the INT tables.
//!
//! Two descriptors are equal when they target the same table with the same
//! match, action and priority. Owner, device and installation metadata are
//! carried along but never take part in equality or hashing, so a rule read
//! back from the device compares equal to the one that was built for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;

use super::range::RangeInterval;
use super::types::{AppId, DeviceId, Ipv4Prefix};

/// Pipeline tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TableId {
    /// Ingress table choosing which flows are telemetry candidates.
    Watchlist,
    /// Egress table building the report encapsulation.
    Report,
    /// Egress quantization config (single default entry).
    Config,
    /// Egress per-queue latency hysteresis.
    QueueLatencyThresholds,
    /// Any table outside the INT pipeline.
    Other(u32),
}

impl TableId {
    pub const INT_TABLES: [TableId; 4] = [
        TableId::Watchlist,
        TableId::Report,
        TableId::Config,
        TableId::QueueLatencyThresholds,
    ];

    pub fn is_int_table(&self) -> bool {
        !matches!(self, TableId::Other(_))
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watchlist => write!(f, "ingress.int_watchlist.watchlist"),
            Self::Report => write!(f, "egress.int_egress.report"),
            Self::Config => write!(f, "egress.int_egress.config"),
            Self::QueueLatencyThresholds => write!(f, "egress.int_egress.queue_latency_thresholds"),
            Self::Other(id) => write!(f, "table:{}", id),
        }
    }
}

/// Tables reconciled together in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableFamily {
    Watchlist,
    QueueThresholds,
    /// Report encapsulation and the quantization config entry.
    Report,
}

impl TableFamily {
    pub const ALL: [TableFamily; 3] = [
        TableFamily::Watchlist,
        TableFamily::QueueThresholds,
        TableFamily::Report,
    ];

    pub fn tables(&self) -> &'static [TableId] {
        match self {
            Self::Watchlist => &[TableId::Watchlist],
            Self::QueueThresholds => &[TableId::QueueLatencyThresholds],
            Self::Report => &[TableId::Report, TableId::Config],
        }
    }

    pub fn contains(&self, table: TableId) -> bool {
        self.tables().contains(&table)
    }
}

impl fmt::Display for TableFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watchlist => write!(f, "watchlist"),
            Self::QueueThresholds => write!(f, "queue-thresholds"),
            Self::Report => write!(f, "report"),
        }
    }
}

/// Match fields used by the INT tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchField {
    Ipv4Valid,
    Ipv4Src,
    Ipv4Dst,
    IpProto,
    L4Dport,
    BmdType,
    MirrorType,
    IntReportType,
    EgressQid,
    HopLatencyUpper,
    HopLatencyLower,
}

/// Value matched on one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldMatch {
    Exact(u64),
    Lpm { value: u32, prefix_len: u8 },
    Range { lo: u64, hi: u64 },
}

impl FieldMatch {
    pub fn lpm(prefix: Ipv4Prefix) -> Self {
        FieldMatch::Lpm {
            value: u32::from(prefix.network()),
            prefix_len: prefix.prefix_len(),
        }
    }

    pub fn range(interval: RangeInterval) -> Self {
        FieldMatch::Range {
            lo: u64::from(interval.lo()),
            hi: u64::from(interval.hi()),
        }
    }
}

/// Actions of the INT tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionId {
    MarkToReport,
    NoReportCollector,
    DoLocalReportEncap,
    DoDropReportEncap,
    DoLocalReportEncapMpls,
    DoDropReportEncapMpls,
    SetConfig,
    CheckQuota,
    ResetQuota,
    Other(u32),
}

/// Action parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionParam {
    SrcIp,
    MonIp,
    MonPort,
    SwitchId,
    MonLabel,
    HopLatencyMask,
    TimestampMask,
}

/// Action with its parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableAction {
    pub id: ActionId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<ActionParam, u64>,
}

impl TableAction {
    pub fn new(id: ActionId) -> Self {
        Self {
            id,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, param: ActionParam, value: u64) -> Self {
        self.params.insert(param, value);
        self
    }

    pub fn with_ip_param(self, param: ActionParam, ip: Ipv4Addr) -> Self {
        self.with_param(param, u64::from(u32::from(ip)))
    }

    pub fn param(&self, param: ActionParam) -> Option<u64> {
        self.params.get(&param).copied()
    }
}

/// Installation metadata reported by the device. Never part of equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStats {
    pub installed_at: DateTime<Utc>,
    pub packets: u64,
    pub bytes: u64,
}

impl EntryStats {
    pub fn installed_now() -> Self {
        Self {
            installed_at: Utc::now(),
            packets: 0,
            bytes: 0,
        }
    }
}

/// One match-action table entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDescriptor {
    pub device_id: DeviceId,
    pub app_id: AppId,
    pub table: TableId,
    #[serde(default)]
    pub matches: BTreeMap<MatchField, FieldMatch>,
    pub action: TableAction,
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<EntryStats>,
}

/// Structural identity of a rule: table, match, action and priority.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub table: TableId,
    pub matches: BTreeMap<MatchField, FieldMatch>,
    pub action: TableAction,
    pub priority: u32,
}

/// Table plus match: two live rules must never share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchKey {
    pub table: TableId,
    pub matches: BTreeMap<MatchField, FieldMatch>,
}

impl RuleDescriptor {
    /// Starts building a rule for `table`.
    pub fn builder(device_id: &DeviceId, app_id: &AppId, table: TableId) -> RuleDescriptorBuilder {
        RuleDescriptorBuilder {
            device_id: device_id.clone(),
            app_id: app_id.clone(),
            table,
            matches: BTreeMap::new(),
            action: None,
            priority: super::types::DEFAULT_PRIORITY,
        }
    }

    pub fn structural_key(&self) -> RuleKey {
        RuleKey {
            table: self.table,
            matches: self.matches.clone(),
            action: self.action.clone(),
            priority: self.priority,
        }
    }

    pub fn match_key(&self) -> MatchKey {
        MatchKey {
            table: self.table,
            matches: self.matches.clone(),
        }
    }

    pub fn field(&self, field: MatchField) -> Option<&FieldMatch> {
        self.matches.get(&field)
    }
}

impl PartialEq for RuleDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table
            && self.priority == other.priority
            && self.matches == other.matches
            && self.action == other.action
    }
}

impl Eq for RuleDescriptor {}

impl Hash for RuleDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table.hash(state);
        self.matches.hash(state);
        self.action.hash(state);
        self.priority.hash(state);
    }
}

impl fmt::Display for RuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[prio={}] {:?} -> {:?}", self.table, self.priority, self.matches, self.action.id)
    }
}

/// Builder for [`RuleDescriptor`].
#[derive(Debug, Clone)]
pub struct RuleDescriptorBuilder {
    device_id: DeviceId,
    app_id: AppId,
    table: TableId,
    matches: BTreeMap<MatchField, FieldMatch>,
    action: Option<TableAction>,
    priority: u32,
}

impl RuleDescriptorBuilder {
    pub fn match_exact(mut self, field: MatchField, value: u64) -> Self {
        self.matches.insert(field, FieldMatch::Exact(value));
        self
    }

    pub fn match_lpm(mut self, field: MatchField, prefix: Ipv4Prefix) -> Self {
        self.matches.insert(field, FieldMatch::lpm(prefix));
        self
    }

    pub fn match_range(mut self, field: MatchField, lo: u64, hi: u64) -> Self {
        self.matches.insert(field, FieldMatch::Range { lo, hi });
        self
    }

    pub fn action(mut self, action: TableAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Builds the rule. A rule without an explicit action gets `Other(0)`
    /// (the table's no-op action).
    pub fn build(self) -> RuleDescriptor {
        RuleDescriptor {
            device_id: self.device_id,
            app_id: self.app_id,
            table: self.table,
            matches: self.matches,
            action: self.action.unwrap_or_else(|| TableAction::new(ActionId::Other(0))),
            priority: self.priority,
            stats: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn device() -> DeviceId {
        DeviceId::new("device:1")
    }

    fn rule(app: &str, qid: u64, action: ActionId) -> RuleDescriptor {
        RuleDescriptor::builder(&device(), &AppId::new(app), TableId::QueueLatencyThresholds)
            .match_exact(MatchField::EgressQid, qid)
            .action(TableAction::new(action))
            .build()
    }

    #[test]
    fn test_equality_ignores_owner_and_stats() {
        let built = rule("app-a", 1, ActionId::CheckQuota);
        let mut installed = rule("app-b", 1, ActionId::CheckQuota);
        installed.device_id = DeviceId::new("device:2");
        installed.stats = Some(EntryStats {
            installed_at: Utc::now(),
            packets: 10,
            bytes: 1500,
        });

        assert_eq!(built, installed);
        let set: HashSet<_> = [built, installed].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_equality_includes_action_and_priority() {
        let a = rule("app", 1, ActionId::CheckQuota);
        let b = rule("app", 1, ActionId::ResetQuota);
        assert_ne!(a, b);
        assert_eq!(a.match_key(), b.match_key());

        let mut c = a.clone();
        c.priority += 1;
        assert_ne!(a, c);
        assert_ne!(a.structural_key(), c.structural_key());
    }

    #[test]
    fn test_builder_defaults() {
        let r = RuleDescriptor::builder(&device(), &AppId::new("app"), TableId::Config).build();
        assert_eq!(r.priority, crate::int::types::DEFAULT_PRIORITY);
        assert_eq!(r.action.id, ActionId::Other(0));
        assert!(r.matches.is_empty());
    }

    #[test]
    fn test_table_classification() {
        for table in TableId::INT_TABLES {
            assert!(table.is_int_table());
        }
        assert!(!TableId::Other(0).is_int_table());

        let covered: Vec<TableId> = TableFamily::ALL
            .iter()
            .flat_map(|family| family.tables().iter().copied())
            .collect();
        assert_eq!(covered.len(), TableId::INT_TABLES.len());
        for table in TableId::INT_TABLES {
            assert!(covered.contains(&table));
        }
        assert!(TableFamily::Report.contains(TableId::Config));
    }

    #[test]
    fn test_rule_json_roundtrip_keeps_identity() {
        let r = RuleDescriptor::builder(&device(), &AppId::new("app"), TableId::Watchlist)
            .match_exact(MatchField::Ipv4Valid, 1)
            .match_lpm(MatchField::Ipv4Src, "10.0.0.0/24".parse().unwrap())
            .action(TableAction::new(ActionId::MarkToReport))
            .build();
        let json = serde_json::to_string(&r).unwrap();
        let back: RuleDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
        assert_eq!(back.device_id, device());
    }
}
