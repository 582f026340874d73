//! The mesh-wide snapshot: everything derivable from discovery state alone,
//! before any per-group filtering.

use crate::{
    config::SnapshotConfig,
    resource::{clusters, endpoints},
    routing::ServiceTagRouter,
};
use mesh_snapshot_controller_core::{
    resource::{Cluster, ClusterConfiguration, ClusterConfigurations, ClusterLoadAssignment},
    CommunicationMode, MultiClusterState, ServiceInstance, ServiceName,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Immutable, rebuilt as a whole on every cycle. Consumers always see one
/// internally-consistent instance; map ordering is deterministic so equal
/// inputs produce equal resource lists (and therefore stable version
/// tokens).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GlobalSnapshot {
    pub clusters: BTreeMap<ServiceName, Cluster>,
    /// Variants carrying the mTLS validation context, present when incoming
    /// permissions are enabled mesh-wide.
    pub secured_clusters: BTreeMap<ServiceName, Cluster>,
    pub endpoints: BTreeMap<ServiceName, ClusterLoadAssignment>,
    /// Service names visible to depend-on-everything groups (deny-prefixes
    /// already removed).
    pub all_service_names: BTreeSet<ServiceName>,
    /// Routable tags per service, for auto-tag resolution against a caller's
    /// own tags.
    pub tags_by_service: BTreeMap<ServiceName, BTreeSet<String>>,
}

pub struct SnapshotFactory {
    config: Arc<SnapshotConfig>,
    router: ServiceTagRouter,
}

impl SnapshotFactory {
    pub fn new(config: Arc<SnapshotConfig>) -> anyhow::Result<Self> {
        let router = ServiceTagRouter::new(&config.service_tags)?;
        Ok(Self { config, router })
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub(crate) fn router(&self) -> &ServiceTagRouter {
        &self.router
    }

    /// Derives the per-service cluster configurations for this cycle.
    ///
    /// `previous` is the prior cycle's output: it supplies the HTTP/2 value
    /// for services that currently have zero instances, and the retained
    /// entries when never-remove-clusters is on.
    pub fn cluster_configurations(
        &self,
        states: &MultiClusterState,
        previous: &ClusterConfigurations,
    ) -> ClusterConfigurations {
        let mut by_service: BTreeMap<&str, Vec<&ServiceInstance>> = BTreeMap::new();
        for cluster_state in states.iter() {
            for instances in cluster_state.services.all_instances() {
                by_service
                    .entry(instances.service_name.as_str())
                    .or_default()
                    .extend(instances.iter());
            }
        }

        let mut current: ClusterConfigurations = by_service
            .into_iter()
            .map(|(name, instances)| {
                let config = self.to_cluster_configuration(name, &instances, previous.get(name));
                (name.to_string(), config)
            })
            .collect();

        if self.config.never_remove_clusters {
            for (name, config) in previous {
                current
                    .entry(name.clone())
                    .or_insert_with(|| config.clone());
            }
        }
        current
    }

    /// HTTP/2 is a cluster-level choice: it is enabled only when every known
    /// instance advertises the capability tag, because a mixed deployment
    /// cannot guarantee the protocol. An instance-less service keeps its
    /// previous value.
    fn to_cluster_configuration(
        &self,
        service_name: &str,
        instances: &[&ServiceInstance],
        previous: Option<&ClusterConfiguration>,
    ) -> ClusterConfiguration {
        let http2_enabled = if !self.config.http2.enabled {
            false
        } else if instances.is_empty() {
            previous.map(|p| p.http2_enabled).unwrap_or(false)
        } else {
            instances
                .iter()
                .all(|i| i.tags.contains(&self.config.http2.tag_name))
        };

        ClusterConfiguration {
            service_name: service_name.to_string(),
            http2_enabled,
        }
    }

    /// Builds the global snapshot for one discovery-protocol dialect.
    pub fn global_snapshot(
        &self,
        states: &MultiClusterState,
        configurations: &ClusterConfigurations,
        mode: CommunicationMode,
    ) -> GlobalSnapshot {
        let mut snapshot = GlobalSnapshot::default();

        for (name, configuration) in configurations {
            snapshot
                .clusters
                .insert(name.clone(), clusters::eds_cluster(configuration, mode, false));
            if self.config.incoming_permissions_enabled {
                snapshot
                    .secured_clusters
                    .insert(name.clone(), clusters::eds_cluster(configuration, mode, true));
            }
            snapshot.endpoints.insert(
                name.clone(),
                endpoints::load_assignment(name, states, &self.router, &self.config),
            );
            if !self.denied_by_prefix(name) {
                snapshot.all_service_names.insert(name.clone());
            }
        }

        for cluster_state in states.iter() {
            for instances in cluster_state.services.all_instances() {
                let tags = snapshot
                    .tags_by_service
                    .entry(instances.service_name.clone())
                    .or_default();
                for instance in instances.iter() {
                    tags.extend(self.router.routing_tags(&instance.tags));
                }
            }
        }

        snapshot
    }

    fn denied_by_prefix(&self, service_name: &str) -> bool {
        self.config
            .outgoing_permissions
            .services_excluded_by_prefix
            .iter()
            .any(|prefix| service_name.starts_with(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_snapshot_controller_core::{
        service::{ClusterState, Locality, ServiceInstances, ServicesState},
        ServiceInstance,
    };

    fn factory(config: SnapshotConfig) -> SnapshotFactory {
        SnapshotFactory::new(Arc::new(config)).unwrap()
    }

    fn state_of(services: Vec<ServiceInstances>) -> MultiClusterState {
        MultiClusterState::from(ClusterState::new(
            services.into_iter().collect::<ServicesState>(),
            Locality::Local,
            "dc1",
        ))
    }

    fn instance(id: &str, tags: &[&str]) -> ServiceInstance {
        ServiceInstance::new(id, "127.0.0.1", 4140).with_tags(tags.iter().copied())
    }

    #[test]
    fn http2_requires_consensus_across_all_instances() {
        let factory = factory(SnapshotConfig::default());
        let all_tagged = state_of(vec![ServiceInstances::new(
            "echo",
            vec![
                instance("1", &["http2"]),
                instance("2", &["http2"]),
                instance("3", &["http2"]),
            ],
        )]);
        let configs = factory.cluster_configurations(&all_tagged, &ClusterConfigurations::new());
        assert!(configs["echo"].http2_enabled);

        let one_untagged = state_of(vec![ServiceInstances::new(
            "echo",
            vec![
                instance("1", &["http2"]),
                instance("2", &["http2"]),
                instance("3", &[]),
            ],
        )]);
        let configs = factory.cluster_configurations(&one_untagged, &configs);
        assert!(!configs["echo"].http2_enabled);
    }

    #[test]
    fn http2_consensus_spans_datacenters() {
        let factory = factory(SnapshotConfig::default());
        let states: MultiClusterState = vec![
            ClusterState::new(
                vec![ServiceInstances::new("echo", vec![instance("1", &["http2"])])]
                    .into_iter()
                    .collect(),
                Locality::Local,
                "dc1",
            ),
            ClusterState::new(
                vec![ServiceInstances::new("echo", vec![instance("2", &[])])]
                    .into_iter()
                    .collect(),
                Locality::Remote,
                "dc2",
            ),
        ]
        .into_iter()
        .collect();

        let configs = factory.cluster_configurations(&states, &ClusterConfigurations::new());
        assert!(!configs["echo"].http2_enabled);
    }

    #[test]
    fn http2_value_is_retained_while_service_has_no_instances() {
        let factory = factory(SnapshotConfig::default());
        let tagged = state_of(vec![ServiceInstances::new(
            "echo",
            vec![instance("1", &["http2"])],
        )]);
        let configs = factory.cluster_configurations(&tagged, &ClusterConfigurations::new());
        assert!(configs["echo"].http2_enabled);

        let emptied = state_of(vec![ServiceInstances::new("echo", vec![])]);
        let configs = factory.cluster_configurations(&emptied, &configs);
        assert!(configs["echo"].http2_enabled);
    }

    #[test]
    fn removed_services_drop_out_unless_retention_is_enabled() {
        let previous_state = state_of(vec![ServiceInstances::new(
            "echo",
            vec![instance("1", &["http2"])],
        )]);
        let empty_state = state_of(vec![]);

        let dropping = factory(SnapshotConfig::default());
        let previous =
            dropping.cluster_configurations(&previous_state, &ClusterConfigurations::new());
        assert!(dropping
            .cluster_configurations(&empty_state, &previous)
            .is_empty());

        let retaining = factory(SnapshotConfig {
            never_remove_clusters: true,
            ..SnapshotConfig::default()
        });
        let previous =
            retaining.cluster_configurations(&previous_state, &ClusterConfigurations::new());
        let retained = retaining.cluster_configurations(&empty_state, &previous);
        assert!(retained["echo"].http2_enabled);
    }

    #[test]
    fn deny_prefixes_hide_services_from_the_wildcard_index() {
        let factory = factory(SnapshotConfig {
            outgoing_permissions: crate::config::OutgoingPermissionsConfig {
                services_excluded_by_prefix: vec!["internal-".to_string()],
            },
            ..SnapshotConfig::default()
        });
        let states = state_of(vec![
            ServiceInstances::new("echo", vec![instance("1", &[])]),
            ServiceInstances::new("internal-audit", vec![instance("2", &[])]),
        ]);
        let configs = factory.cluster_configurations(&states, &ClusterConfigurations::new());
        let snapshot = factory.global_snapshot(&states, &configs, CommunicationMode::Ads);

        assert!(snapshot.clusters.contains_key("internal-audit"));
        assert_eq!(
            snapshot.all_service_names.iter().collect::<Vec<_>>(),
            vec!["echo"],
        );
    }

    #[test]
    fn snapshot_ordering_is_deterministic() {
        let factory = factory(SnapshotConfig::default());
        let states = state_of(vec![
            ServiceInstances::new("zeta", vec![instance("1", &[])]),
            ServiceInstances::new("alpha", vec![instance("2", &[])]),
            ServiceInstances::new("mid", vec![instance("3", &[])]),
        ]);
        let configs = factory.cluster_configurations(&states, &ClusterConfigurations::new());
        let snapshot = factory.global_snapshot(&states, &configs, CommunicationMode::Xds);

        assert_eq!(
            snapshot.clusters.keys().collect::<Vec<_>>(),
            vec!["alpha", "mid", "zeta"],
        );
    }
}
