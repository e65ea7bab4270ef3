//! INT pipeline types.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use super::orch::IntOrchError;

/// Number of egress queues per port with a latency threshold entry.
pub const MAX_QUEUES: u8 = 32;

/// Priority of every INT rule except the collector exclusion.
pub const DEFAULT_PRIORITY: u32 = 10_000;

/// The collector exclusion must win over any watched subnet.
pub const COLLECTOR_EXCLUSION_PRIORITY: u32 = DEFAULT_PRIORITY + 10;

/// Trigger threshold meaning "never trigger".
pub const NEVER_TRIGGER: u32 = u32::MAX;

/// Reset threshold meaning "never reset".
pub const NEVER_RESET: u32 = 0;

/// Default tolerated hop latency change, in nanoseconds.
pub const DEFAULT_MIN_FLOW_HOP_LATENCY_CHANGE_NS: i64 = 256;

/// Default timestamp quantization (48-bit timestamp, 2^30 ns steps).
pub const DEFAULT_TIMESTAMP_MASK: u64 = 0xFFFF_C000_0000;

pub const IP_PROTO_UDP: u64 = 17;

/// Bridged metadata type of a packet reaching the report table.
pub mod bmd_type {
    pub const EGRESS_MIRROR: u64 = 2;
    pub const INT_INGRESS_DROP: u64 = 4;
    pub const DEFLECTED: u64 = 5;
}

pub mod mirror_type {
    pub const INVALID: u64 = 0;
    pub const INT_REPORT: u64 = 1;
}

/// INT report type bits.
pub mod report_type {
    pub const FLOW: u64 = 1;
    pub const QUEUE: u64 = 2;
    pub const DROP: u64 = 4;
}

/// Device identifier, e.g. `device:leaf1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the application owning a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// IPv4 network prefix, normalized so host bits are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Prefix {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Prefix {
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, IntOrchError> {
        if prefix_len > 32 {
            return Err(IntOrchError::InvalidConfig(format!(
                "prefix length {} exceeds 32",
                prefix_len
            )));
        }
        let mask = Self::mask_for(prefix_len);
        Ok(Self {
            network: Ipv4Addr::from(u32::from(address) & mask),
            prefix_len,
        })
    }

    /// A /32 prefix for a single host.
    pub fn host(address: Ipv4Addr) -> Self {
        Self {
            network: address,
            prefix_len: 32,
        }
    }

    fn mask_for(prefix_len: u8) -> u32 {
        match prefix_len {
            0 => 0,
            len => u32::MAX << (32 - u32::from(len)),
        }
    }

    pub const fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// 0.0.0.0/0 matches everything and needs no match field.
    pub fn is_default(&self) -> bool {
        self.prefix_len == 0
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        let mask = Self::mask_for(self.prefix_len);
        u32::from(address) & mask == u32::from(self.network)
    }
}

impl fmt::Display for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Ipv4Prefix {
    type Err = IntOrchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IntOrchError::InvalidConfig(format!("invalid IPv4 prefix: {}", s));
        let (addr, len) = s.split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.trim().parse().map_err(|_| invalid())?;
        let len: u8 = len.trim().parse().map_err(|_| invalid())?;
        Self::new(addr, len)
    }
}

impl Serialize for Ipv4Prefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ipv4Prefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which address of a packet a watched subnet is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetDirection {
    Source,
    Destination,
}

impl SubnetDirection {
    pub const ALL: [SubnetDirection; 2] = [SubnetDirection::Source, SubnetDirection::Destination];
}

impl fmt::Display for SubnetDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "src"),
            Self::Destination => write!(f, "dst"),
        }
    }
}

/// A subnet whose traffic is a telemetry candidate, in one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchedSubnet {
    pub prefix: Ipv4Prefix,
    pub direction: SubnetDirection,
}

impl WatchedSubnet {
    pub const fn new(prefix: Ipv4Prefix, direction: SubnetDirection) -> Self {
        Self { prefix, direction }
    }
}

impl fmt::Display for WatchedSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.direction, self.prefix)
    }
}

/// Trigger/reset hysteresis of one queue, in quantized latency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueThresholds {
    pub trigger: u32,
    pub reset: u32,
}

impl QueueThresholds {
    pub const fn new(trigger: u32, reset: u32) -> Self {
        Self { trigger, reset }
    }

    /// Never triggers and never resets.
    pub const fn disabled() -> Self {
        Self::new(NEVER_TRIGGER, NEVER_RESET)
    }
}

impl Default for QueueThresholds {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Per-device INT settings held by the network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntDeviceConfig {
    /// Switch identifier stamped into reports.
    pub sid: u32,
    /// Source address of reports sent by this device.
    pub ip: Ipv4Addr,
}

/// Everything needed to compute the INT rules of one device.
///
/// Built once per configuration push and never mutated during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredIntConfig {
    pub collector_ip: Ipv4Addr,
    pub collector_port: u16,
    pub switch_id: u32,
    pub source_ip: Ipv4Addr,
    /// Tunnel label to reach a collector attached to another device.
    pub collector_label: Option<u32>,
    pub watched_subnets: Vec<WatchedSubnet>,
    pub queue_thresholds: BTreeMap<u8, QueueThresholds>,
    pub default_thresholds: QueueThresholds,
    pub hop_latency_mask: u32,
    pub timestamp_mask: u64,
}

impl DesiredIntConfig {
    /// Thresholds of a queue, falling back to the configured default.
    pub fn thresholds_for(&self, queue: u8) -> QueueThresholds {
        self.queue_thresholds
            .get(&queue)
            .copied()
            .unwrap_or(self.default_thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_prefix_parse_normalizes_host_bits() {
        let prefix: Ipv4Prefix = "10.0.0.77/24".parse().unwrap();
        assert_eq!(prefix.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(prefix.to_string(), "10.0.0.0/24");
        assert!(prefix.contains(Ipv4Addr::new(10, 0, 0, 200)));
        assert!(!prefix.contains(Ipv4Addr::new(10, 0, 1, 1)));
    }

    #[test]
    fn test_prefix_default_route() {
        let prefix: Ipv4Prefix = "0.0.0.0/0".parse().unwrap();
        assert!(prefix.is_default());
        assert!(prefix.contains(Ipv4Addr::new(192, 168, 1, 1)));
    }

    #[test]
    fn test_prefix_invalid() {
        assert!("10.0.0.0".parse::<Ipv4Prefix>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Prefix>().is_err());
        assert!("2001:db8::/32".parse::<Ipv4Prefix>().is_err());
    }

    #[test]
    fn test_prefix_serde() {
        let prefix: Ipv4Prefix = serde_json::from_str("\"192.168.0.0/16\"").unwrap();
        assert_eq!(prefix.prefix_len(), 16);
        assert_eq!(serde_json::to_string(&prefix).unwrap(), "\"192.168.0.0/16\"");
    }

    #[test]
    fn test_thresholds_fallback_to_default() {
        let mut queue_thresholds = BTreeMap::new();
        queue_thresholds.insert(3, QueueThresholds::new(500, 250));
        let cfg = DesiredIntConfig {
            collector_ip: Ipv4Addr::new(10, 128, 0, 1),
            collector_port: 32766,
            switch_id: 1,
            source_ip: Ipv4Addr::new(10, 0, 0, 1),
            collector_label: None,
            watched_subnets: Vec::new(),
            queue_thresholds,
            default_thresholds: QueueThresholds::disabled(),
            hop_latency_mask: u32::MAX,
            timestamp_mask: DEFAULT_TIMESTAMP_MASK,
        };

        assert_eq!(cfg.thresholds_for(3), QueueThresholds::new(500, 250));
        assert_eq!(cfg.thresholds_for(4), QueueThresholds::disabled());
    }
}
