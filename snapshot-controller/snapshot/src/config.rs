//! The recognized configuration surface of the snapshot pipeline.
//!
//! Defaults match the documented behavior; an embedding runner typically
//! lowers its own argument parsing into this struct.

use ahash::AHashMap;
use mesh_snapshot_controller_core::ServiceName;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    /// Minimum spacing between service-state-triggered rebuilds. Service
    /// states arriving faster than this are conflated; only the latest is
    /// processed.
    pub state_sample_interval: Duration,

    /// Retain clusters whose services disappeared from discovery. When
    /// false, such services drop out of the snapshot entirely and their
    /// dependents observe "no healthy upstream".
    pub never_remove_clusters: bool,

    /// Build secured (mTLS validation context) cluster variants and ingress
    /// authorization routes.
    pub incoming_permissions_enabled: bool,

    pub http2: Http2Config,
    pub service_tags: ServiceTagConfig,
    pub load_balancing: LoadBalancingConfig,
    pub traffic_splitting: TrafficSplittingConfig,
    pub outgoing_permissions: OutgoingPermissionsConfig,

    /// Generate per-group listeners; when disabled the proxy bootstrap
    /// provides them statically and no listener resources are emitted.
    pub dynamic_listeners_enabled: bool,

    /// Bound on concurrent per-group derivations within one cycle.
    pub group_snapshot_parallelism: usize,

    pub enabled_modes: EnabledCommunicationModes,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            state_sample_interval: Duration::from_secs(1),
            never_remove_clusters: false,
            incoming_permissions_enabled: false,
            http2: Http2Config::default(),
            service_tags: ServiceTagConfig::default(),
            load_balancing: LoadBalancingConfig::default(),
            traffic_splitting: TrafficSplittingConfig::default(),
            outgoing_permissions: OutgoingPermissionsConfig::default(),
            dynamic_listeners_enabled: false,
            group_snapshot_parallelism: 1,
            enabled_modes: EnabledCommunicationModes::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Http2Config {
    pub enabled: bool,
    /// The instance tag advertising HTTP/2 capability. A service's cluster
    /// enables HTTP/2 only when every instance carries it.
    pub tag_name: String,
}

impl Default for Http2Config {
    fn default() -> Self {
        Self {
            enabled: true,
            tag_name: "http2".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServiceTagConfig {
    pub enabled: bool,
    /// Metadata key under which routing tags are published on endpoints.
    pub metadata_key: String,
    pub auto_service_tag_enabled: bool,
    /// Reject requests whose explicit tag duplicates the auto-resolved one.
    pub reject_request_tag_duplicate: bool,
    /// Tags matching any of these patterns are never used for routing.
    pub routing_excluded_tags: Vec<String>,
}

impl Default for ServiceTagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metadata_key: "tag".to_string(),
            auto_service_tag_enabled: false,
            reject_request_tag_duplicate: true,
            routing_excluded_tags: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoadBalancingConfig {
    pub canary: CanaryConfig,
    /// Emit per-instance load-balancing weights.
    pub weights_enabled: bool,
}

#[derive(Clone, Debug)]
pub struct CanaryConfig {
    pub enabled: bool,
    pub metadata_key: String,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            metadata_key: "canary".to_string(),
        }
    }
}

/// Per-zone traffic splitting. A weighted route is built for a dependency
/// only when the calling service has weights configured here *and* the
/// target cluster has at least one live endpoint in `zone_name`.
#[derive(Clone, Debug, Default)]
pub struct TrafficSplittingConfig {
    pub zone_name: String,
    /// Keyed by the calling service's name; values map zone → weight.
    pub weights_by_service: AHashMap<ServiceName, BTreeMap<String, u32>>,
}

impl TrafficSplittingConfig {
    pub fn weights_for(&self, service_name: &str) -> Option<&BTreeMap<String, u32>> {
        if self.zone_name.is_empty() {
            return None;
        }
        self.weights_by_service.get(service_name)
    }
}

#[derive(Clone, Debug, Default)]
pub struct OutgoingPermissionsConfig {
    /// Services whose names start with any of these prefixes are excluded
    /// from the all-service-names index used by depend-on-everything groups.
    pub services_excluded_by_prefix: Vec<String>,
}

#[derive(Copy, Clone, Debug)]
pub struct EnabledCommunicationModes {
    pub ads: bool,
    pub xds: bool,
}

impl Default for EnabledCommunicationModes {
    fn default() -> Self {
        Self {
            ads: true,
            xds: true,
        }
    }
}
