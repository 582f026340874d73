//! The proxy-tenant model.
//!
//! A [`Group`] describes one connected proxy (or class of proxies sharing
//! identity and policy): what it is allowed to call, who is allowed to call
//! it, and which discovery-protocol dialect it speaks. Groups are immutable;
//! a policy change observed by the fleet watcher produces a new `Group`
//! value. `Group` is `Hash + Eq` because it keys both the version ledger and
//! the snapshot cache.

use crate::ServiceName;
use std::collections::BTreeSet;
use std::time::Duration;

/// The discovery-protocol dialect a proxy speaks.
///
/// Aggregated delivery pushes all resource families on one stream; split
/// delivery uses one stream per resource family. The global snapshot is
/// built once per enabled mode because the two dialects render clusters
/// differently.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommunicationMode {
    Ads,
    Xds,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Group {
    pub communication_mode: CommunicationMode,
    pub service_name: ServiceName,
    pub dependencies: DependencyScope,
    pub domain_dependencies: Vec<DomainDependency>,
    pub domain_pattern_dependencies: Vec<DomainPatternDependency>,
    pub incoming: IncomingPermissions,
    pub listeners_config: Option<ListenersConfig>,
}

impl Group {
    /// A group with no declared policy, used as the base for building global
    /// snapshots and in tests.
    pub fn new(mode: CommunicationMode, service_name: impl Into<ServiceName>) -> Self {
        Self {
            communication_mode: mode,
            service_name: service_name.into(),
            dependencies: DependencyScope::Services(Vec::new()),
            domain_dependencies: Vec::new(),
            domain_pattern_dependencies: Vec::new(),
            incoming: IncomingPermissions::default(),
            listeners_config: None,
        }
    }

    pub fn depends_on_all(&self) -> bool {
        matches!(self.dependencies, DependencyScope::All { .. })
    }

    /// The explicitly-declared service dependencies, regardless of scope.
    pub fn service_dependencies(&self) -> &[ServiceDependency] {
        match &self.dependencies {
            DependencyScope::Services(deps) => deps,
            DependencyScope::All { extra } => extra,
        }
    }
}

/// Which services a group's proxy may reach.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DependencyScope {
    /// Exactly the listed services.
    Services(Vec<ServiceDependency>),
    /// Every discovered service (minus configured deny-prefixes), plus any
    /// explicitly-listed dependencies carrying their own settings.
    All { extra: Vec<ServiceDependency> },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceDependency {
    pub service: ServiceName,
    pub settings: DependencySettings,
}

impl ServiceDependency {
    pub fn new(service: impl Into<ServiceName>) -> Self {
        Self {
            service: service.into(),
            settings: DependencySettings::default(),
        }
    }
}

/// A dependency on an external domain, resolved statically rather than via
/// the discovery registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DomainDependency {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub settings: DependencySettings,
}

impl DomainDependency {
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
            settings: DependencySettings::default(),
        }
    }

    /// The synthetic cluster name for this domain, e.g. `example_com_443`.
    pub fn cluster_name(&self) -> String {
        format!("{}_{}", self.host.replace('.', "_"), self.port)
    }

    /// The route-domain form, `host` for default ports and `host:port`
    /// otherwise.
    pub fn route_domain(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// A wildcard-domain dependency, e.g. `*.example.com`. Traffic matching the
/// pattern is routed to the shared forward-proxy cluster; no per-pattern
/// cluster is created.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DomainPatternDependency {
    pub pattern: String,
    pub settings: DependencySettings,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DependencySettings {
    pub timeout_policy: Option<TimeoutPolicy>,
    pub retry_policy: Option<RetryPolicy>,
    pub routing_policy: RoutingPolicy,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimeoutPolicy {
    pub request_timeout: Duration,
    pub idle_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RetryPolicy {
    pub retry_on: Vec<String>,
    pub num_retries: u32,
    pub per_try_timeout: Option<Duration>,
    pub retryable_status_codes: Vec<u16>,
    pub methods: BTreeSet<String>,
}

/// Per-dependency endpoint-selection policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RoutingPolicy {
    /// Derive the effective service tag from the calling service's own tags.
    pub auto_service_tag: bool,
    /// Tag preference list, most preferred first. With `auto_service_tag`
    /// the caller's own tags are intersected with this list in order.
    pub service_tag_preference: Vec<String>,
    /// Route to untagged instances when no instance carries the effective
    /// tag.
    pub fallback_to_any_instance: bool,
    /// Opt this dependency's traffic into canary instances.
    pub canary: bool,
}

/// Declared incoming-authorization rules.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct IncomingPermissions {
    pub endpoints: Vec<IncomingEndpoint>,
}

impl IncomingPermissions {
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IncomingEndpoint {
    pub path: String,
    pub path_matching: PathMatch,
    /// Empty means all methods.
    pub methods: BTreeSet<String>,
    /// Service names of allowed callers.
    pub clients: BTreeSet<ServiceName>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathMatch {
    Exact,
    Prefix,
}

/// Listener configuration declared by the proxy at connect time. Only
/// consulted when dynamic listeners are enabled mesh-wide; otherwise the
/// proxy's bootstrap provides listeners statically.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenersConfig {
    pub ingress_host: String,
    pub ingress_port: u16,
    pub egress_host: String,
    pub egress_port: u16,
    pub add_upstream_external_address_header: bool,
}
