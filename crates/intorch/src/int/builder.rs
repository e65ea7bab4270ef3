//! Translation of a desired INT configuration into table entries.

use log::debug;

use super::range::{reset_ranges, trigger_ranges, MatchRangeSet, RangeInterval};
use super::rule::{
    ActionId, ActionParam, MatchField, RuleDescriptor, RuleDescriptorBuilder, TableAction,
    TableFamily, TableId,
};
use super::types::{
    bmd_type, mirror_type, report_type, AppId, DesiredIntConfig, DeviceId, Ipv4Prefix,
    SubnetDirection, COLLECTOR_EXCLUSION_PRIORITY, DEFAULT_PRIORITY, IP_PROTO_UDP, MAX_QUEUES,
};

/// Bit widths of pipeline match fields.
pub trait FieldMetadata: Send + Sync {
    /// Width of `field` in `table`, or `None` when the table has no such field.
    fn width_of(&self, table: TableId, field: MatchField) -> Option<u8>;
}

/// Field widths of the compiled INT pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineFieldWidths;

impl FieldMetadata for PipelineFieldWidths {
    fn width_of(&self, table: TableId, field: MatchField) -> Option<u8> {
        match (table, field) {
            (TableId::QueueLatencyThresholds, MatchField::HopLatencyUpper) => Some(16),
            (TableId::QueueLatencyThresholds, MatchField::HopLatencyLower) => Some(16),
            (TableId::QueueLatencyThresholds, MatchField::EgressQid) => Some(5),
            (TableId::Watchlist, MatchField::Ipv4Valid) => Some(1),
            (TableId::Watchlist, MatchField::Ipv4Src) => Some(32),
            (TableId::Watchlist, MatchField::Ipv4Dst) => Some(32),
            (TableId::Watchlist, MatchField::IpProto) => Some(8),
            (TableId::Watchlist, MatchField::L4Dport) => Some(16),
            (TableId::Report, MatchField::BmdType) => Some(8),
            (TableId::Report, MatchField::MirrorType) => Some(3),
            (TableId::Report, MatchField::IntReportType) => Some(3),
            _ => None,
        }
    }
}

/// (bridged metadata type, mirror type, report type) of each report entry.
const REPORT_KINDS: [(u64, u64, u64); 6] = [
    (bmd_type::INT_INGRESS_DROP, mirror_type::INVALID, report_type::DROP),
    (bmd_type::EGRESS_MIRROR, mirror_type::INT_REPORT, report_type::DROP),
    (bmd_type::EGRESS_MIRROR, mirror_type::INT_REPORT, report_type::FLOW),
    (bmd_type::DEFLECTED, mirror_type::INVALID, report_type::DROP),
    (bmd_type::EGRESS_MIRROR, mirror_type::INT_REPORT, report_type::QUEUE),
    (
        bmd_type::EGRESS_MIRROR,
        mirror_type::INT_REPORT,
        report_type::QUEUE | report_type::FLOW,
    ),
];

/// Builds the canonical rule set of each INT table for one device.
///
/// Stateless apart from the borrowed identity and field metadata; every call
/// recomputes its output from the configuration it is given.
pub struct RuleBuilder<'a> {
    device_id: &'a DeviceId,
    app_id: &'a AppId,
    fields: &'a dyn FieldMetadata,
}

impl<'a> RuleBuilder<'a> {
    pub fn new(device_id: &'a DeviceId, app_id: &'a AppId, fields: &'a dyn FieldMetadata) -> Self {
        Self {
            device_id,
            app_id,
            fields,
        }
    }

    fn rule(&self, table: TableId) -> RuleDescriptorBuilder {
        RuleDescriptor::builder(self.device_id, self.app_id, table).priority(DEFAULT_PRIORITY)
    }

    /// Adds a range match unless it spans the whole field, which the
    /// table treats as a wildcard anyway.
    fn care_range(
        &self,
        rule: RuleDescriptorBuilder,
        table: TableId,
        field: MatchField,
        lo: u64,
        hi: u64,
    ) -> RuleDescriptorBuilder {
        match self.fields.width_of(table, field) {
            Some(width) if width < 64 && lo == 0 && hi == (1u64 << width) - 1 => rule,
            _ => rule.match_range(field, lo, hi),
        }
    }

    /// Desired rules of one table family.
    pub fn rules_for(&self, family: TableFamily, config: &DesiredIntConfig) -> Vec<RuleDescriptor> {
        let rules = match family {
            TableFamily::Watchlist => self.watchlist_rules(config),
            TableFamily::QueueThresholds => self.queue_threshold_rules(config),
            TableFamily::Report => {
                let mut rules = self.report_rules(config);
                rules.push(self.config_rule(config));
                rules
            }
        };
        debug!("{}: built {} {} rules", self.device_id, rules.len(), family);
        rules
    }

    /// Collector exclusion, then the catch-all and per-subnet rules.
    ///
    /// The catch-all is present only with at least one watched subnet. A
    /// `/0` subnet needs no address match and yields the catch-all itself.
    pub fn watchlist_rules(&self, config: &DesiredIntConfig) -> Vec<RuleDescriptor> {
        let mut rules = vec![self.collector_watchlist_rule(config)];
        if config.watched_subnets.is_empty() {
            return rules;
        }

        let mut push = |rule: RuleDescriptor| {
            if !rules.contains(&rule) {
                rules.push(rule);
            }
        };
        push(self.subnet_rule(None, SubnetDirection::Source));
        for subnet in &config.watched_subnets {
            push(self.subnet_rule(Some(subnet.prefix), subnet.direction));
        }
        rules
    }

    /// Keeps the collector's own report traffic out of the watchlist.
    pub fn collector_watchlist_rule(&self, config: &DesiredIntConfig) -> RuleDescriptor {
        let table = TableId::Watchlist;
        let port = u64::from(config.collector_port);
        let rule = self
            .rule(table)
            .match_exact(MatchField::Ipv4Valid, 1)
            .match_lpm(MatchField::Ipv4Dst, Ipv4Prefix::host(config.collector_ip))
            .match_exact(MatchField::IpProto, IP_PROTO_UDP);
        self.care_range(rule, table, MatchField::L4Dport, port, port)
            .action(TableAction::new(ActionId::NoReportCollector))
            .priority(COLLECTOR_EXCLUSION_PRIORITY)
            .build()
    }

    fn subnet_rule(&self, prefix: Option<Ipv4Prefix>, direction: SubnetDirection) -> RuleDescriptor {
        let mut rule = self.rule(TableId::Watchlist).match_exact(MatchField::Ipv4Valid, 1);
        if let Some(prefix) = prefix.filter(|p| !p.is_default()) {
            let field = match direction {
                SubnetDirection::Source => MatchField::Ipv4Src,
                SubnetDirection::Destination => MatchField::Ipv4Dst,
            };
            rule = rule.match_lpm(field, prefix);
        }
        rule.action(TableAction::new(ActionId::MarkToReport)).build()
    }

    /// One report entry per report kind, all using the same encapsulation.
    pub fn report_rules(&self, config: &DesiredIntConfig) -> Vec<RuleDescriptor> {
        REPORT_KINDS
            .iter()
            .map(|&(bmd, mirror, kind)| self.report_rule(config, bmd, mirror, kind))
            .collect()
    }

    fn report_rule(&self, config: &DesiredIntConfig, bmd: u64, mirror: u64, kind: u64) -> RuleDescriptor {
        let local = kind & (report_type::FLOW | report_type::QUEUE) != 0;
        let action_id = match (local, config.collector_label.is_some()) {
            (true, false) => ActionId::DoLocalReportEncap,
            (false, false) => ActionId::DoDropReportEncap,
            (true, true) => ActionId::DoLocalReportEncapMpls,
            (false, true) => ActionId::DoDropReportEncapMpls,
        };
        let mut action = TableAction::new(action_id)
            .with_ip_param(ActionParam::SrcIp, config.source_ip)
            .with_ip_param(ActionParam::MonIp, config.collector_ip)
            .with_param(ActionParam::MonPort, u64::from(config.collector_port))
            .with_param(ActionParam::SwitchId, u64::from(config.switch_id));
        if let Some(label) = config.collector_label {
            action = action.with_param(ActionParam::MonLabel, u64::from(label));
        }

        self.rule(TableId::Report)
            .match_exact(MatchField::BmdType, bmd)
            .match_exact(MatchField::MirrorType, mirror)
            .match_exact(MatchField::IntReportType, kind)
            .action(action)
            .build()
    }

    /// Single quantization entry.
    pub fn config_rule(&self, config: &DesiredIntConfig) -> RuleDescriptor {
        let action = TableAction::new(ActionId::SetConfig)
            .with_param(ActionParam::HopLatencyMask, u64::from(config.hop_latency_mask))
            .with_param(ActionParam::TimestampMask, config.timestamp_mask);
        self.rule(TableId::Config).action(action).build()
    }

    /// Trigger and reset entries of every queue in `[0, MAX_QUEUES)`.
    pub fn queue_threshold_rules(&self, config: &DesiredIntConfig) -> Vec<RuleDescriptor> {
        (0..MAX_QUEUES)
            .flat_map(|queue| {
                let thresholds = config.thresholds_for(queue);
                let trigger = self.queue_rules(queue, &trigger_ranges(thresholds.trigger), ActionId::CheckQuota);
                let reset = self.queue_rules(queue, &reset_ranges(thresholds.reset), ActionId::ResetQuota);
                trigger.into_iter().chain(reset)
            })
            .collect()
    }

    fn queue_rules(&self, queue: u8, ranges: &MatchRangeSet, action: ActionId) -> Vec<RuleDescriptor> {
        let table = TableId::QueueLatencyThresholds;
        ranges
            .iter()
            .map(|pair| {
                let rule = self.rule(table).match_exact(MatchField::EgressQid, u64::from(queue));
                let rule = self.half_range(rule, MatchField::HopLatencyUpper, pair.upper);
                self.half_range(rule, MatchField::HopLatencyLower, pair.lower)
                    .action(TableAction::new(action))
                    .build()
            })
            .collect()
    }

    fn half_range(&self, rule: RuleDescriptorBuilder, field: MatchField, interval: RangeInterval) -> RuleDescriptorBuilder {
        self.care_range(
            rule,
            TableId::QueueLatencyThresholds,
            field,
            u64::from(interval.lo()),
            u64::from(interval.hi()),
        )
    }
}
