use crate::{config::SnapshotConfig, routing::ServiceTagRouter};
use mesh_snapshot_controller_core::{
    resource::{ClusterLoadAssignment, EndpointMetadata, LbEndpoint, LocalityLbEndpoints},
    service::Locality,
    MultiClusterState, ServiceInstance,
};
use std::collections::BTreeMap;

/// Local instances are served at priority 0; remote datacenters only receive
/// traffic when the local priority level has no capacity.
fn priority(locality: Locality) -> u32 {
    match locality {
        Locality::Local => 0,
        Locality::Remote => 1,
    }
}

/// Builds the mesh-wide endpoint assignment for one service. A datacenter
/// that knows the service but currently has no instances still contributes
/// an (empty) locality group, so the zone's existence stays observable.
pub fn load_assignment(
    service_name: &str,
    states: &MultiClusterState,
    router: &ServiceTagRouter,
    config: &SnapshotConfig,
) -> ClusterLoadAssignment {
    let endpoints = states
        .iter()
        .filter_map(|cluster_state| {
            let instances = cluster_state.services.get(service_name)?;
            Some(LocalityLbEndpoints {
                zone: cluster_state.zone.clone(),
                priority: priority(cluster_state.locality),
                zone_weight: None,
                endpoints: instances
                    .iter()
                    .filter(|i| i.healthy)
                    .map(|i| lb_endpoint(i, router, config))
                    .collect(),
            })
        })
        .collect();

    ClusterLoadAssignment {
        cluster_name: service_name.to_string(),
        endpoints,
    }
}

fn lb_endpoint(
    instance: &ServiceInstance,
    router: &ServiceTagRouter,
    config: &SnapshotConfig,
) -> LbEndpoint {
    LbEndpoint {
        address: instance.address.clone(),
        port: instance.port,
        metadata: EndpointMetadata {
            canary: config.load_balancing.canary.enabled && instance.canary,
            tags: router.routing_tags(&instance.tags),
        },
        weight: if config.load_balancing.weights_enabled {
            instance.weight
        } else {
            1
        },
    }
}

/// Attaches per-zone traffic-splitting weights to an assignment. Zones
/// without a configured weight keep `None` and fall back to even sharing at
/// the data plane.
pub fn apply_zone_weights(
    assignment: &ClusterLoadAssignment,
    weights: &BTreeMap<String, u32>,
) -> ClusterLoadAssignment {
    ClusterLoadAssignment {
        cluster_name: assignment.cluster_name.clone(),
        endpoints: assignment
            .endpoints
            .iter()
            .map(|locality| LocalityLbEndpoints {
                zone: locality.zone.clone(),
                priority: locality.priority,
                zone_weight: weights.get(&locality.zone).copied(),
                endpoints: locality.endpoints.clone(),
            })
            .collect(),
    }
}
