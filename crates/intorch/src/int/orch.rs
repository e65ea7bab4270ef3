//! IntOrch implementation.
//!
//! Drives one device's INT tables towards a report configuration: each
//! table family is fetched, rebuilt from scratch, diffed and submitted as a
//! staged plan.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use sonic_orch_common::reconcile;
use std::net::Ipv4Addr;
use std::sync::Arc;

use super::builder::{FieldMetadata, RuleBuilder};
use super::config::IntReportConfig;
use super::rule::{RuleDescriptor, TableFamily};
use super::store::{RuleStore, StoreError};
use super::types::{AppId, DesiredIntConfig, DeviceId, IntDeviceConfig};

/// Error type for IntOrch operations.
#[derive(Debug, thiserror::Error)]
pub enum IntOrchError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No INT device config for {0}")]
    ConfigUnavailable(DeviceId),

    #[error("Rule store failure ({family}): {message}")]
    StoreFailure { family: String, message: String },

    #[error("Invalid INT config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IntOrchError {
    fn store(family: impl ToString, err: StoreError) -> Self {
        Self::StoreFailure {
            family: family.to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type for IntOrch operations.
pub type Result<T> = std::result::Result<T, IntOrchError>;

/// Network configuration lookup.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Per-device INT settings, or `None` when INT is not configured there.
    async fn device_config(&self, device_id: &DeviceId) -> Option<IntDeviceConfig>;
}

/// Host discovery.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Device the host with address `ip` is attached to.
    async fn attachment_point_of(&self, ip: Ipv4Addr) -> Option<DeviceId>;
}

/// IntOrch configuration.
#[derive(Debug, Clone)]
pub struct IntOrchConfig {
    /// Device whose tables are programmed.
    pub device_id: DeviceId,
    /// Owner stamped on every rule.
    pub app_id: AppId,
}

impl IntOrchConfig {
    pub fn new(device_id: DeviceId, app_id: AppId) -> Self {
        Self { device_id, app_id }
    }
}

/// IntOrch statistics.
#[derive(Debug, Clone, Default)]
pub struct IntOrchStats {
    /// Completed `set_up_int_config` calls with a device config.
    pub passes: u64,
    pub rules_added: u64,
    pub rules_removed: u64,
    /// Failed fetches, submissions and removals.
    pub store_failures: u64,
    pub cleanup_removals: u64,
}

/// Outcome of a cleanup.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Number of rules removed.
    pub removed: usize,
    /// Rules whose removal failed, with the store's error.
    pub failures: Vec<(RuleDescriptor, StoreError)>,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PassOutcome {
    added: usize,
    removed: usize,
}

/// INT pipeline orchestrator for one device.
pub struct IntOrch {
    config: IntOrchConfig,
    store: Arc<dyn RuleStore>,
    config_source: Arc<dyn ConfigSource>,
    fields: Arc<dyn FieldMetadata>,
    host_resolver: Option<Arc<dyn HostResolver>>,
    stats: IntOrchStats,
}

impl std::fmt::Debug for IntOrch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntOrch")
            .field("config", &self.config)
            .field("host_resolver", &self.host_resolver.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

impl IntOrch {
    pub fn new(
        config: IntOrchConfig,
        store: Arc<dyn RuleStore>,
        config_source: Arc<dyn ConfigSource>,
        fields: Arc<dyn FieldMetadata>,
    ) -> Self {
        Self {
            config,
            store,
            config_source,
            fields,
            host_resolver: None,
            stats: IntOrchStats::default(),
        }
    }

    /// Enables tunnelled reports to collectors attached to other devices.
    pub fn set_host_resolver(&mut self, resolver: Arc<dyn HostResolver>) {
        self.host_resolver = Some(resolver);
    }

    pub fn config(&self) -> &IntOrchConfig {
        &self.config
    }

    pub fn stats(&self) -> &IntOrchStats {
        &self.stats
    }

    /// Label of the collector's device when reports must be tunnelled to it.
    async fn collector_label(&self, collector_ip: Ipv4Addr) -> Option<u32> {
        let resolver = self.host_resolver.as_ref()?;
        let Some(attached_to) = resolver.attachment_point_of(collector_ip).await else {
            warn!(
                "{}: location of collector {} unknown, reporting without tunnel label",
                self.config.device_id, collector_ip
            );
            return None;
        };
        if attached_to == self.config.device_id {
            return None;
        }
        match self.config_source.device_config(&attached_to).await {
            Some(remote) => Some(remote.sid),
            None => {
                warn!(
                    "{}: collector {} attached to {} which has no INT device config",
                    self.config.device_id, collector_ip, attached_to
                );
                None
            }
        }
    }

    /// Assembles the desired state for this device.
    ///
    /// Fails with `ConfigUnavailable` when the device has no INT config.
    pub async fn desired_config(&self, report: &IntReportConfig) -> Result<DesiredIntConfig> {
        let device = self
            .config_source
            .device_config(&self.config.device_id)
            .await
            .ok_or_else(|| IntOrchError::ConfigUnavailable(self.config.device_id.clone()))?;
        let label = self.collector_label(report.collector_ip).await;
        report.desired_config(&device, label)
    }

    /// Reconciles every INT table of the device with `report`.
    ///
    /// The three table families run concurrently and independently. A device
    /// without INT config is left untouched and counts as success. Otherwise
    /// the first family failure is returned once all families are done.
    pub async fn set_up_int_config(&mut self, report: &IntReportConfig) -> Result<()> {
        let desired = match self.desired_config(report).await {
            Ok(desired) => desired,
            Err(IntOrchError::ConfigUnavailable(device)) => {
                info!("{}: INT not configured, nothing to set up", device);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let (watchlist, queues, report_tables) = tokio::join!(
            self.sync_family(TableFamily::Watchlist, &desired),
            self.sync_family(TableFamily::QueueThresholds, &desired),
            self.sync_family(TableFamily::Report, &desired),
        );

        self.stats.passes += 1;
        let mut first_error = None;
        for outcome in [watchlist, queues, report_tables] {
            match outcome {
                Ok(pass) => {
                    self.stats.rules_added += pass.added as u64;
                    self.stats.rules_removed += pass.removed as u64;
                }
                Err(e) => {
                    if matches!(e, IntOrchError::StoreFailure { .. }) {
                        self.stats.store_failures += 1;
                    }
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Fetch, rebuild, diff and submit one table family.
    async fn sync_family(&self, family: TableFamily, desired: &DesiredIntConfig) -> Result<PassOutcome> {
        let device_id = &self.config.device_id;
        let app_id = &self.config.app_id;

        let existing = self
            .store
            .fetch_owned(app_id, device_id, family)
            .await
            .map_err(|e| {
                error!("{}: failed to fetch {} rules: {}", device_id, family, e);
                IntOrchError::store(family, e)
            })?;

        let builder = RuleBuilder::new(device_id, app_id, self.fields.as_ref());
        let plan = reconcile(existing, builder.rules_for(family, desired), RuleDescriptor::structural_key);
        let outcome = PassOutcome {
            added: plan.add_count(),
            removed: plan.remove_count(),
        };

        for (index, stage) in plan.stages().iter().enumerate() {
            for op in stage.ops() {
                debug!("{}: {} stage {}: {} {}", device_id, family, index, op.kind, op.entry);
            }
        }
        info!(
            "{}: {} plan has {} stage(s), {} add(s), {} removal(s)",
            device_id,
            family,
            plan.stages().len(),
            outcome.added,
            outcome.removed
        );

        self.store.submit(device_id, plan).await.map_err(|e| {
            error!("{}: failed to submit {} plan: {}", device_id, family, e);
            IntOrchError::store(family, e)
        })?;
        Ok(outcome)
    }

    /// Removes every INT table entry installed on the device.
    ///
    /// Rules are removed one at a time; a failed removal is recorded and the
    /// remaining rules are still removed.
    pub async fn cleanup(&mut self) -> Result<CleanupReport> {
        let device_id = self.config.device_id.clone();
        let rules = self.store.fetch_all(&device_id).await.map_err(|e| {
            error!("{}: failed to fetch rules for cleanup: {}", device_id, e);
            self.stats.store_failures += 1;
            IntOrchError::store("cleanup", e)
        })?;

        let mut report = CleanupReport::default();
        for rule in rules.into_iter().filter(|r| r.table.is_int_table()) {
            match self.store.remove_one(&rule).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    warn!("{}: failed to remove {}: {}", device_id, rule, e);
                    self.stats.store_failures += 1;
                    report.failures.push((rule, e));
                }
            }
        }

        self.stats.cleanup_removals += report.removed as u64;
        info!(
            "{}: cleanup removed {} rule(s), {} failure(s)",
            device_id,
            report.removed,
            report.failures.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::int::builder::PipelineFieldWidths;
    use crate::int::config::DeviceConfigMap;
    use crate::int::store::InMemoryRuleStore;
    use std::collections::HashMap;

    const DEVICE: &str = "device:leaf1";

    fn device_configs() -> DeviceConfigMap {
        let mut map = DeviceConfigMap::default();
        map.insert(
            DeviceId::new(DEVICE),
            IntDeviceConfig {
                sid: 1,
                ip: Ipv4Addr::new(10, 0, 0, 1),
            },
        );
        map.insert(
            DeviceId::new("device:spine1"),
            IntDeviceConfig {
                sid: 201,
                ip: Ipv4Addr::new(10, 0, 0, 2),
            },
        );
        map
    }

    fn report() -> IntReportConfig {
        serde_json::from_str(r#"{"collectorIp": "10.128.0.1", "collectorPort": 32766}"#).unwrap()
    }

    fn orch(store: Arc<InMemoryRuleStore>) -> IntOrch {
        IntOrch::new(
            IntOrchConfig::new(DeviceId::new(DEVICE), AppId::new("sonic.intorch")),
            store,
            Arc::new(device_configs()),
            Arc::new(PipelineFieldWidths),
        )
    }

    struct StaticResolver(HashMap<Ipv4Addr, DeviceId>);

    #[async_trait]
    impl HostResolver for StaticResolver {
        async fn attachment_point_of(&self, ip: Ipv4Addr) -> Option<DeviceId> {
            self.0.get(&ip).cloned()
        }
    }

    #[tokio::test]
    async fn test_desired_config_without_resolver_has_no_label() {
        let orch = orch(Arc::new(InMemoryRuleStore::new()));
        let desired = orch.desired_config(&report()).await.unwrap();

        assert_eq!(desired.switch_id, 1);
        assert_eq!(desired.source_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(desired.collector_label, None);
    }

    #[tokio::test]
    async fn test_collector_on_other_device_uses_its_sid() {
        let mut orch = orch(Arc::new(InMemoryRuleStore::new()));
        let mut hosts = HashMap::new();
        hosts.insert(Ipv4Addr::new(10, 128, 0, 1), DeviceId::new("device:spine1"));
        orch.set_host_resolver(Arc::new(StaticResolver(hosts)));

        let desired = orch.desired_config(&report()).await.unwrap();
        assert_eq!(desired.collector_label, Some(201));
    }

    #[tokio::test]
    async fn test_collector_on_same_device_or_unknown_has_no_label() {
        let mut orch = orch(Arc::new(InMemoryRuleStore::new()));
        let mut hosts = HashMap::new();
        hosts.insert(Ipv4Addr::new(10, 128, 0, 1), DeviceId::new(DEVICE));
        orch.set_host_resolver(Arc::new(StaticResolver(hosts)));
        assert_eq!(orch.desired_config(&report()).await.unwrap().collector_label, None);

        orch.set_host_resolver(Arc::new(StaticResolver(HashMap::new())));
        assert_eq!(orch.desired_config(&report()).await.unwrap().collector_label, None);
    }

    #[tokio::test]
    async fn test_set_up_updates_stats() {
        let store = Arc::new(InMemoryRuleStore::new());
        let mut orch = orch(store.clone());

        orch.set_up_int_config(&report()).await.unwrap();
        assert_eq!(orch.stats().passes, 1);
        // collector exclusion + 6 report rules + config
        assert_eq!(orch.stats().rules_added, 8);
        assert_eq!(orch.stats().rules_removed, 0);
        assert_eq!(store.submissions().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_negative_latency_budget_is_surfaced() {
        let store = Arc::new(InMemoryRuleStore::new());
        let mut orch = orch(store.clone());
        let mut bad = report();
        bad.min_flow_hop_latency_change_ns = -1;

        let err = orch.set_up_int_config(&bad).await.unwrap_err();
        assert!(matches!(err, IntOrchError::InvalidArgument(_)));
        assert!(store.submissions().unwrap().is_empty());
        assert_eq!(orch.stats().passes, 0);
    }

    #[tokio::test]
    async fn test_cleanup_failure_to_fetch() {
        let store = Arc::new(InMemoryRuleStore::new());
        store.fail_fetch_all(true).unwrap();
        let mut orch = orch(store);

        let err = orch.cleanup().await.unwrap_err();
        assert!(matches!(err, IntOrchError::StoreFailure { .. }));
        assert_eq!(orch.stats().store_failures, 1);
    }
}
