//! The logical discovery resources handed to the protocol server.
//!
//! These are fully-formed in-memory values; the wire server is responsible
//! for serializing them into its protocol's resource schema. Every type here
//! is value-comparable because the version ledger detects no-op rebuilds by
//! equality.

use crate::group::{RetryPolicy, TimeoutPolicy};
use crate::ServiceName;
use std::collections::{BTreeMap, BTreeSet};

/// An opaque per-resource-family version token. Protocol clients treat token
/// equality as "no update needed".
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Version(pub String);

impl Version {
    /// The version used for resource families that have never held content.
    pub fn empty() -> Self {
        Self("empty".to_string())
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One version token per resource family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionSet {
    pub clusters: Version,
    pub endpoints: Version,
    pub listeners: Version,
    pub routes: Version,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClusterKind {
    /// Endpoints are discovered via the endpoint-assignment resource family.
    /// `ads` marks whether the assignment arrives on the aggregated stream.
    Eds { ads: bool },
    /// A statically-resolved upstream, used for domain dependencies.
    Static { address: String, port: u16, tls: bool },
    /// The shared forward-proxy cluster serving wildcard-domain traffic.
    DynamicForward,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    pub name: String,
    pub kind: ClusterKind,
    pub http2: bool,
    /// Secured clusters carry the mutual-TLS validation context; built for
    /// services that are potential incoming-permission targets.
    pub secured: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointMetadata {
    pub canary: bool,
    /// Routing tags, already filtered for routability.
    pub tags: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LbEndpoint {
    pub address: String,
    pub port: u16,
    pub metadata: EndpointMetadata,
    /// Load-balancing weight; 1 unless weighted LB is enabled.
    pub weight: u32,
}

/// The endpoints of one cluster within one zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalityLbEndpoints {
    pub zone: String,
    /// 0 for the local datacenter, 1 for remote ones.
    pub priority: u32,
    pub endpoints: Vec<LbEndpoint>,
    /// Per-zone traffic-splitting weight, set only on weighted routes'
    /// target clusters.
    pub zone_weight: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterLoadAssignment {
    pub cluster_name: String,
    pub endpoints: Vec<LocalityLbEndpoints>,
}

impl ClusterLoadAssignment {
    pub fn has_endpoints_in_zone(&self, zone: &str) -> bool {
        self.endpoints
            .iter()
            .any(|e| e.zone == zone && !e.endpoints.is_empty())
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.iter().map(|e| e.endpoints.len()).sum()
    }
}

/// The service-tag constraint resolved for one route, enforced at the data
/// plane.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagRoutePolicy {
    /// The effective tag derived from the caller's own tags, when auto-tag
    /// resolution applies.
    pub auto_tag: Option<String>,
    /// Reject requests whose explicit tag duplicates the auto-resolved one.
    pub reject_duplicate: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteAction {
    Cluster(String),
    /// Traffic-split routing: the cluster's zones receive the mapped weight
    /// shares.
    WeightedZones {
        cluster: String,
        weights: BTreeMap<String, u32>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub action: RouteAction,
    pub tag_policy: Option<TagRoutePolicy>,
    pub timeout_policy: Option<TimeoutPolicy>,
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<Route>,
}

/// Incoming-authorization constraints attached to an ingress virtual host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressAuthorization {
    pub path: String,
    pub prefix_match: bool,
    pub methods: BTreeSet<String>,
    pub allowed_clients: BTreeSet<ServiceName>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteConfiguration {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHost>,
    pub authorizations: Vec<IngressAuthorization>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrafficDirection {
    Ingress,
    Egress,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listener {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub direction: TrafficDirection,
}

/// Everything one group's proxy receives in one push.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupSnapshot {
    pub clusters: Vec<Cluster>,
    pub endpoints: Vec<ClusterLoadAssignment>,
    pub routes: Vec<RouteConfiguration>,
    pub listeners: Vec<Listener>,
    pub versions: VersionSet,
}

/// Per-service cluster-level configuration derived from discovery state.
///
/// HTTP/2 is enabled only when every known instance of the service carries
/// the capability tag; with zero instances the previous cycle's value is
/// retained so a full outage does not flap the protocol choice. This
/// retention is deliberate even though a permanently removed service whose
/// name is later reused may inherit a stale flag (only reachable with
/// never-remove-clusters enabled).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfiguration {
    pub service_name: ServiceName,
    pub http2_enabled: bool,
}

/// The per-service configuration map threaded from cycle to cycle.
pub type ClusterConfigurations = BTreeMap<ServiceName, ClusterConfiguration>;
