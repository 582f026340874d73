use mesh_snapshot_controller_core::{
    group::DomainDependency,
    resource::{Cluster, ClusterConfiguration, ClusterKind},
    CommunicationMode,
};

/// The shared cluster serving wildcard-domain (forward-proxy) traffic.
pub const FORWARD_PROXY_CLUSTER: &str = "forward-proxy";

/// An endpoint-discovered cluster for one service.
pub fn eds_cluster(
    config: &ClusterConfiguration,
    mode: CommunicationMode,
    secured: bool,
) -> Cluster {
    Cluster {
        name: config.service_name.clone(),
        kind: ClusterKind::Eds {
            ads: mode == CommunicationMode::Ads,
        },
        http2: config.http2_enabled,
        secured,
    }
}

/// A statically-resolved cluster for a domain dependency.
pub fn domain_cluster(dependency: &DomainDependency) -> Cluster {
    Cluster {
        name: dependency.cluster_name(),
        kind: ClusterKind::Static {
            address: dependency.host.clone(),
            port: dependency.port,
            tls: dependency.tls,
        },
        http2: false,
        secured: false,
    }
}

pub fn forward_proxy_cluster() -> Cluster {
    Cluster {
        name: FORWARD_PROXY_CLUSTER.to_string(),
        kind: ClusterKind::DynamicForward,
        http2: false,
        secured: false,
    }
}
