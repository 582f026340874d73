//! The per-group version ledger.
//!
//! Protocol clients treat version-token equality as "no update needed", so a
//! token must change if and only if its resource family meaningfully changed,
//! with two cross-family exceptions required for protocol correctness:
//! a cluster-set change always refreshes the endpoints token (a deleted
//! cluster orphans its endpoint assignment), and a cluster or listener
//! change always refreshes the routes token (routes reference cluster names,
//! and a listener change forces route re-resolution in this dialect).
//!
//! Tokens are random rather than content hashes: a hash collision would
//! silently suppress a push, and proxies connect with an empty version so no
//! cross-instance consistency is needed.
//!
//! `retain_groups` racing a concurrent `version` call for a just-removed
//! group can leave the entry behind; the next cycle's retain removes it. No
//! strong consistency is needed here.

use dashmap::DashMap;
use mesh_snapshot_controller_core::{
    resource::{Cluster, ClusterLoadAssignment, Listener, Version},
    Group, VersionSet,
};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct SnapshotVersions {
    entries: DashMap<Group, LedgerEntry>,
}

/// The tokens last handed out for a group, plus the payloads they were
/// computed from. Payloads are retained only to detect no-op rebuilds.
#[derive(Debug)]
struct LedgerEntry {
    versions: VersionSet,
    clusters: Vec<Cluster>,
    endpoints: Vec<ClusterLoadAssignment>,
    listeners: Vec<Listener>,
}

impl SnapshotVersions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the version set for a group's freshly computed payloads.
    ///
    /// All transition logic runs inside the map entry: concurrent calls for
    /// distinct groups never contend, and calls for the same group are
    /// serialized by the shard lock (atomic compute-and-replace, no lost
    /// updates).
    pub fn version(
        &self,
        group: &Group,
        clusters: &[Cluster],
        endpoints: &[ClusterLoadAssignment],
        listeners: &[Listener],
    ) -> VersionSet {
        let mut entry = self
            .entries
            .entry(group.clone())
            .or_insert_with(|| LedgerEntry {
                versions: VersionSet {
                    clusters: new_version(),
                    endpoints: new_version(),
                    listeners: new_version(),
                    routes: new_version(),
                },
                clusters: clusters.to_vec(),
                endpoints: endpoints.to_vec(),
                listeners: listeners.to_vec(),
            });
        let previous = &mut *entry;

        let clusters_changed = previous.clusters != clusters;
        let endpoints_changed = previous.endpoints != endpoints;
        let listeners_changed = previous.listeners != listeners;

        if clusters_changed {
            previous.versions.clusters = new_version();
            previous.versions.endpoints = new_version();
        } else if endpoints_changed {
            previous.versions.endpoints = new_version();
        }
        if listeners_changed {
            previous.versions.listeners = new_version();
        }
        if clusters_changed || listeners_changed {
            previous.versions.routes = new_version();
        }

        previous.clusters = clusters.to_vec();
        previous.endpoints = endpoints.to_vec();
        previous.listeners = listeners.to_vec();
        previous.versions.clone()
    }

    /// Drops ledger entries for groups no longer known to the fleet. Called
    /// once per orchestration cycle so stale groups cannot accumulate
    /// retained payloads.
    pub fn retain_groups(&self, known: &[Group]) {
        self.entries.retain(|group, _| known.contains(group));
    }

    #[cfg(test)]
    pub(crate) fn tracked_groups(&self) -> usize {
        self.entries.len()
    }
}

fn new_version() -> Version {
    Version(Uuid::new_v4().simple().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_snapshot_controller_core::{
        resource::{ClusterKind, LocalityLbEndpoints},
        CommunicationMode,
    };

    fn group(name: &str) -> Group {
        Group::new(CommunicationMode::Ads, name)
    }

    fn cluster(name: &str) -> Cluster {
        Cluster {
            name: name.to_string(),
            kind: ClusterKind::Eds { ads: true },
            http2: false,
            secured: false,
        }
    }

    fn assignment(name: &str, zones: &[&str]) -> ClusterLoadAssignment {
        ClusterLoadAssignment {
            cluster_name: name.to_string(),
            endpoints: zones
                .iter()
                .map(|zone| LocalityLbEndpoints {
                    zone: zone.to_string(),
                    priority: 0,
                    zone_weight: None,
                    endpoints: Vec::new(),
                })
                .collect(),
        }
    }

    fn listener(name: &str) -> Listener {
        Listener {
            name: name.to_string(),
            address: "0.0.0.0".to_string(),
            port: 4300,
            direction: mesh_snapshot_controller_core::resource::TrafficDirection::Egress,
        }
    }

    #[test]
    fn unchanged_payloads_keep_every_token() {
        let versions = SnapshotVersions::new();
        let g = group("echo-caller");
        let clusters = vec![cluster("echo")];
        let endpoints = vec![assignment("echo", &["dc1"])];

        let first = versions.version(&g, &clusters, &endpoints, &[]);
        let second = versions.version(&g, &clusters, &endpoints, &[]);
        assert_eq!(first, second);
    }

    #[test]
    fn cluster_change_also_refreshes_endpoints_and_routes() {
        let versions = SnapshotVersions::new();
        let g = group("echo-caller");
        let endpoints = vec![assignment("echo", &["dc1"])];

        let first = versions.version(&g, &[cluster("echo")], &endpoints, &[]);
        let second = versions.version(
            &g,
            &[cluster("echo"), cluster("other")],
            &endpoints,
            &[],
        );

        assert_ne!(first.clusters, second.clusters);
        assert_ne!(first.endpoints, second.endpoints);
        assert_ne!(first.routes, second.routes);
        assert_eq!(first.listeners, second.listeners);
    }

    #[test]
    fn endpoint_only_change_keeps_cluster_and_route_tokens() {
        let versions = SnapshotVersions::new();
        let g = group("echo-caller");
        let clusters = vec![cluster("echo")];

        let first = versions.version(&g, &clusters, &[assignment("echo", &["dc1"])], &[]);
        let second = versions.version(
            &g,
            &clusters,
            &[assignment("echo", &["dc1", "dc2"])],
            &[],
        );

        assert_eq!(first.clusters, second.clusters);
        assert_ne!(first.endpoints, second.endpoints);
        assert_eq!(first.routes, second.routes);
    }

    #[test]
    fn listener_change_also_refreshes_routes() {
        let versions = SnapshotVersions::new();
        let g = group("echo-caller");
        let clusters = vec![cluster("echo")];
        let endpoints = vec![assignment("echo", &["dc1"])];

        let first = versions.version(&g, &clusters, &endpoints, &[]);
        let second = versions.version(&g, &clusters, &endpoints, &[listener("egress")]);

        assert_eq!(first.clusters, second.clusters);
        assert_eq!(first.endpoints, second.endpoints);
        assert_ne!(first.listeners, second.listeners);
        assert_ne!(first.routes, second.routes);
    }

    #[test]
    fn groups_version_independently() {
        let versions = SnapshotVersions::new();
        let a = group("a");
        let b = group("b");

        let a1 = versions.version(&a, &[cluster("echo")], &[], &[]);
        let b1 = versions.version(&b, &[cluster("echo")], &[], &[]);
        // Changing b must not move a's tokens.
        let b2 = versions.version(&b, &[cluster("other")], &[], &[]);
        let a2 = versions.version(&a, &[cluster("echo")], &[], &[]);

        assert_eq!(a1, a2);
        assert_ne!(b1.clusters, b2.clusters);
    }

    #[test]
    fn retain_drops_stale_groups() {
        let versions = SnapshotVersions::new();
        let a = group("a");
        let b = group("b");
        versions.version(&a, &[], &[], &[]);
        versions.version(&b, &[], &[], &[]);
        assert_eq!(versions.tracked_groups(), 2);

        versions.retain_groups(std::slice::from_ref(&a));
        assert_eq!(versions.tracked_groups(), 1);

        // A dropped group is fresh on re-appearance.
        let before = versions.version(&a, &[], &[], &[]);
        versions.retain_groups(&[]);
        let after = versions.version(&a, &[], &[], &[]);
        assert_ne!(before.clusters, after.clusters);
    }
}
