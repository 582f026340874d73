use crate::group_snapshot::RouteSpecification;
use mesh_snapshot_controller_core::{
    group::IncomingPermissions,
    resource::{
        IngressAuthorization, Route, RouteAction, RouteConfiguration, VirtualHost,
    },
};

pub const EGRESS_ROUTES: &str = "default_routes";
pub const INGRESS_ROUTES: &str = "ingress_routes";

/// Renders the egress route configuration: one virtual host per route
/// specification, in specification order.
pub fn egress_route_config(specifications: &[RouteSpecification]) -> RouteConfiguration {
    let virtual_hosts = specifications
        .iter()
        .map(|spec| {
            let settings = spec.settings();
            let action = match spec {
                RouteSpecification::Standard { cluster, .. } => {
                    RouteAction::Cluster(cluster.clone())
                }
                RouteSpecification::Weighted {
                    cluster, weights, ..
                } => RouteAction::WeightedZones {
                    cluster: cluster.clone(),
                    weights: weights.clone(),
                },
            };
            VirtualHost {
                name: spec.cluster_name().to_string(),
                domains: spec.domains().to_vec(),
                routes: vec![Route {
                    action,
                    tag_policy: spec.tag_policy().cloned(),
                    timeout_policy: settings.timeout_policy,
                    retry_policy: settings.retry_policy.clone(),
                }],
            }
        })
        .collect();

    RouteConfiguration {
        name: EGRESS_ROUTES.to_string(),
        virtual_hosts,
        authorizations: Vec::new(),
    }
}

/// Renders the secured ingress route configuration from the group's declared
/// incoming permissions.
pub fn ingress_route_config(incoming: &IncomingPermissions) -> RouteConfiguration {
    let authorizations = incoming
        .endpoints
        .iter()
        .map(|endpoint| IngressAuthorization {
            path: endpoint.path.clone(),
            prefix_match: matches!(
                endpoint.path_matching,
                mesh_snapshot_controller_core::group::PathMatch::Prefix
            ),
            methods: endpoint.methods.clone(),
            allowed_clients: endpoint.clients.clone(),
        })
        .collect();

    RouteConfiguration {
        name: INGRESS_ROUTES.to_string(),
        virtual_hosts: Vec::new(),
        authorizations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_snapshot_controller_core::group::{IncomingEndpoint, PathMatch};
    use std::collections::BTreeSet;

    #[test]
    fn ingress_routes_carry_declared_authorizations() {
        let incoming = IncomingPermissions {
            endpoints: vec![IncomingEndpoint {
                path: "/status".to_string(),
                path_matching: PathMatch::Prefix,
                methods: ["GET".to_string()].into_iter().collect::<BTreeSet<_>>(),
                clients: ["frontend".to_string()].into_iter().collect(),
            }],
        };

        let config = ingress_route_config(&incoming);
        assert_eq!(config.name, INGRESS_ROUTES);
        assert_eq!(config.authorizations.len(), 1);
        let authz = &config.authorizations[0];
        assert_eq!(authz.path, "/status");
        assert!(authz.prefix_match);
        assert!(authz.allowed_clients.contains("frontend"));
    }
}
