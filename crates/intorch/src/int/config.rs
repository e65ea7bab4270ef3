//! INT configuration documents.
//!
//! The report configuration is application-wide; device configurations are
//! keyed by device id. Both are JSON, using the field names of the network
//! configuration service.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;

use super::orch::{ConfigSource, IntOrchError, Result};
use super::qmask::select_qmask;
use super::range::checked_threshold;
use super::rule::RuleDescriptor;
use super::types::{
    DesiredIntConfig, DeviceId, IntDeviceConfig, Ipv4Prefix, QueueThresholds, SubnetDirection,
    WatchedSubnet, DEFAULT_MIN_FLOW_HOP_LATENCY_CHANGE_NS, DEFAULT_TIMESTAMP_MASK, MAX_QUEUES,
    NEVER_RESET, NEVER_TRIGGER,
};

fn default_min_flow_hop_latency_change_ns() -> i64 {
    DEFAULT_MIN_FLOW_HOP_LATENCY_CHANGE_NS
}

fn default_trigger_ns() -> i64 {
    i64::from(NEVER_TRIGGER)
}

fn default_reset_ns() -> i64 {
    i64::from(NEVER_RESET)
}

fn default_timestamp_mask() -> u64 {
    DEFAULT_TIMESTAMP_MASK
}

/// Latency thresholds of one queue, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueThresholdConfig {
    pub trigger_ns: i64,
    /// Half of `trigger_ns` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_ns: Option<i64>,
}

impl QueueThresholdConfig {
    pub fn effective_reset_ns(&self) -> i64 {
        self.reset_ns.unwrap_or(self.trigger_ns / 2)
    }
}

/// Application-wide INT report configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntReportConfig {
    pub collector_ip: Ipv4Addr,
    pub collector_port: u16,
    /// Latency change tolerated before a flow is reported again.
    #[serde(default = "default_min_flow_hop_latency_change_ns")]
    pub min_flow_hop_latency_change_ns: i64,
    /// Subnets watched in both directions.
    #[serde(default)]
    pub watch_subnets: Vec<Ipv4Prefix>,
    /// Per-queue overrides of the default thresholds.
    #[serde(default)]
    pub queue_report_latency_thresholds: BTreeMap<u8, QueueThresholdConfig>,
    #[serde(default = "default_trigger_ns")]
    pub default_queue_report_trigger_ns: i64,
    #[serde(default = "default_reset_ns")]
    pub default_queue_report_reset_ns: i64,
    #[serde(default = "default_timestamp_mask")]
    pub timestamp_mask: u64,
}

impl IntReportConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    fn thresholds(queue: Option<u8>, trigger_ns: i64, reset_ns: i64) -> Result<QueueThresholds> {
        let thresholds = QueueThresholds::new(checked_threshold(trigger_ns)?, checked_threshold(reset_ns)?);
        if thresholds.reset > thresholds.trigger {
            let which = match queue {
                Some(q) => format!("queue {}", q),
                None => "default".to_string(),
            };
            return Err(IntOrchError::InvalidConfig(format!(
                "{} reset threshold {} exceeds trigger threshold {}",
                which, thresholds.reset, thresholds.trigger
            )));
        }
        Ok(thresholds)
    }

    /// Combines this configuration with a device's settings.
    ///
    /// Thresholds must fit the unsigned 32-bit domain (`InvalidArgument`),
    /// queue ids must be below [`MAX_QUEUES`] and no reset threshold may
    /// exceed its trigger threshold (`InvalidConfig`).
    pub fn desired_config(
        &self,
        device: &IntDeviceConfig,
        collector_label: Option<u32>,
    ) -> Result<DesiredIntConfig> {
        let hop_latency_mask = select_qmask(self.min_flow_hop_latency_change_ns)?;
        let default_thresholds = Self::thresholds(
            None,
            self.default_queue_report_trigger_ns,
            self.default_queue_report_reset_ns,
        )?;

        let mut queue_thresholds = BTreeMap::new();
        for (&queue, cfg) in &self.queue_report_latency_thresholds {
            if queue >= MAX_QUEUES {
                return Err(IntOrchError::InvalidConfig(format!(
                    "queue {} out of range, device has {} queues",
                    queue, MAX_QUEUES
                )));
            }
            let thresholds = Self::thresholds(Some(queue), cfg.trigger_ns, cfg.effective_reset_ns())?;
            queue_thresholds.insert(queue, thresholds);
        }

        let watched_subnets = self
            .watch_subnets
            .iter()
            .flat_map(|&prefix| SubnetDirection::ALL.map(|direction| WatchedSubnet::new(prefix, direction)))
            .collect();

        Ok(DesiredIntConfig {
            collector_ip: self.collector_ip,
            collector_port: self.collector_port,
            switch_id: device.sid,
            source_ip: device.ip,
            collector_label,
            watched_subnets,
            queue_thresholds,
            default_thresholds,
            hop_latency_mask,
            timestamp_mask: self.timestamp_mask,
        })
    }
}

/// Device configurations keyed by device id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceConfigMap(BTreeMap<DeviceId, IntDeviceConfig>);

impl DeviceConfigMap {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    pub fn insert(&mut self, device_id: DeviceId, config: IntDeviceConfig) -> Option<IntDeviceConfig> {
        self.0.insert(device_id, config)
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<&IntDeviceConfig> {
        self.0.get(device_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[async_trait]
impl ConfigSource for DeviceConfigMap {
    async fn device_config(&self, device_id: &DeviceId) -> Option<IntDeviceConfig> {
        self.get(device_id).cloned()
    }
}

/// Reads a JSON list of installed rules.
pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<RuleDescriptor>> {
    read_json(path.as_ref())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
