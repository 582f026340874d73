use super::*;
use crate::{
    cache::SnapshotMap,
    config::EnabledCommunicationModes,
    metrics::SnapshotMetrics,
    updater::{Event, SnapshotUpdater, UpdateResult},
};
use mesh_snapshot_controller_core::{
    resource::RouteAction, GroupSnapshot, SnapshotCache, VersionSet,
};
use std::sync::Arc;

fn updater<C: SnapshotCache + 'static>(cache: Arc<C>, config: SnapshotConfig) -> SnapshotUpdater<C> {
    SnapshotUpdater::new(cache, config, Arc::new(SnapshotMetrics::unregistered())).unwrap()
}

/// Seeds the updater the way `run` does and returns the seed result.
fn seed<C: SnapshotCache + 'static>(updater: &mut SnapshotUpdater<C>) -> UpdateResult {
    updater.on_service_state(MultiClusterState::default())
}

fn versions_of(cache: &SnapshotMap, group: &Group) -> VersionSet {
    cache
        .snapshot(group)
        .expect("group has a snapshot")
        .versions
}

#[tokio::test]
async fn service_state_cycle_configures_a_dependent_group() {
    let cache = Arc::new(SnapshotMap::new());
    let group = group_depending_on("caller", &["echo"]);
    cache.register(group.clone());

    let mut updater = updater(cache.clone(), test_config());
    let last = seed(&mut updater);
    let last = updater
        .process(Event::State(state_with_services(&["echo"])), &last)
        .await;

    let snapshot = cache.snapshot(&group).expect("snapshot pushed");
    assert_eq!(snapshot.clusters.len(), 1);
    assert_eq!(snapshot.clusters[0].name, "echo");
    assert_eq!(snapshot.endpoints.len(), 1);
    assert_eq!(snapshot.endpoints[0].endpoint_count(), 1);
    let route = &snapshot.routes[0].virtual_hosts[0].routes[0];
    assert!(matches!(&route.action, RouteAction::Cluster(c) if c == "echo"));

    // The dependency's last instance disappears: the cluster and its route
    // are gone on the next cycle.
    let _ = updater
        .process(Event::State(state_with_services(&[])), &last)
        .await;
    let snapshot = cache.snapshot(&group).unwrap();
    assert!(snapshot.clusters.is_empty());
    assert!(snapshot.endpoints.is_empty());
    assert!(snapshot.routes[0].virtual_hosts.is_empty());
}

#[tokio::test]
async fn identical_rebuilds_keep_all_version_tokens() {
    let cache = Arc::new(SnapshotMap::new());
    let group = group_depending_on("caller", &["echo"]);
    cache.register(group.clone());

    let mut updater = updater(cache.clone(), test_config());
    let last = seed(&mut updater);
    let last = updater
        .process(Event::State(state_with_services(&["echo"])), &last)
        .await;
    let first = versions_of(&cache, &group);

    let _ = updater
        .process(Event::State(state_with_services(&["echo"])), &last)
        .await;
    assert_eq!(versions_of(&cache, &group), first);
}

#[tokio::test]
async fn cluster_removal_moves_cluster_endpoint_and_route_tokens() {
    let cache = Arc::new(SnapshotMap::new());
    let group = group_depending_on("caller", &["echo", "other"]);
    cache.register(group.clone());

    let mut updater = updater(cache.clone(), test_config());
    let last = seed(&mut updater);
    let last = updater
        .process(Event::State(state_with_services(&["echo", "other"])), &last)
        .await;
    let first = versions_of(&cache, &group);

    let _ = updater
        .process(Event::State(state_with_services(&["echo"])), &last)
        .await;
    let second = versions_of(&cache, &group);

    assert_ne!(first.clusters, second.clusters);
    assert_ne!(first.endpoints, second.endpoints);
    assert_ne!(first.routes, second.routes);
    assert_eq!(first.listeners, second.listeners);
}

#[tokio::test]
async fn membership_events_do_not_disturb_other_groups() {
    let cache = Arc::new(SnapshotMap::new());
    let group_a = group_depending_on("alpha", &["echo"]);
    let group_b = group_depending_on("beta", &["echo"]);
    cache.register(group_a.clone());
    cache.register(group_b.clone());

    let mut updater = updater(cache.clone(), test_config());
    let last = seed(&mut updater);
    let last = updater
        .process(Event::State(state_with_services(&["echo"])), &last)
        .await;
    let a_before = versions_of(&cache, &group_a);
    let b_before = versions_of(&cache, &group_b);

    // A membership event targeting only alpha.
    let _ = updater
        .process(Event::Groups(vec![group_a.clone()]), &last)
        .await;

    assert_eq!(versions_of(&cache, &group_b), b_before);
    // Alpha was recomputed from unchanged inputs, so its tokens held too.
    assert_eq!(versions_of(&cache, &group_a), a_before);
}

#[tokio::test]
async fn membership_events_reuse_the_last_global_snapshot() {
    let cache = Arc::new(SnapshotMap::new());
    let mut updater = updater(cache.clone(), test_config());
    let last = seed(&mut updater);
    let last = updater
        .process(Event::State(state_with_services(&["echo"])), &last)
        .await;

    // A proxy connects after the last service-state event; it must still be
    // configured from the snapshot computed back then.
    let group = group_depending_on("late-joiner", &["echo"]);
    cache.register(group.clone());
    let _ = updater
        .process(Event::Groups(vec![group.clone()]), &last)
        .await;

    let snapshot = cache.snapshot(&group).expect("configured from last snapshot");
    assert_eq!(snapshot.clusters[0].name, "echo");
}

#[tokio::test]
async fn groups_speaking_a_disabled_dialect_are_skipped() {
    let cache = Arc::new(SnapshotMap::new());
    let ads_group = group_depending_on("speaks-ads", &["echo"]);
    let xds_group = Group {
        communication_mode: CommunicationMode::Xds,
        ..group_depending_on("speaks-xds", &["echo"])
    };
    cache.register(ads_group.clone());
    cache.register(xds_group.clone());

    let config = SnapshotConfig {
        enabled_modes: EnabledCommunicationModes {
            ads: true,
            xds: false,
        },
        ..test_config()
    };
    let mut updater = updater(cache.clone(), config);
    let last = seed(&mut updater);
    let _ = updater
        .process(Event::State(state_with_services(&["echo"])), &last)
        .await;

    assert!(cache.snapshot(&ads_group).is_some());
    assert!(cache.snapshot(&xds_group).is_none());
}

struct FailingCache {
    inner: SnapshotMap,
    fail_for: String,
}

impl SnapshotCache for FailingCache {
    fn set_snapshot(&self, group: &Group, snapshot: GroupSnapshot) -> anyhow::Result<()> {
        if group.service_name == self.fail_for {
            anyhow::bail!("injected cache failure");
        }
        self.inner.set_snapshot(group, snapshot)
    }

    fn groups(&self) -> Vec<Group> {
        self.inner.groups()
    }
}

#[tokio::test]
async fn a_failing_group_does_not_affect_the_others() {
    let cache = Arc::new(FailingCache {
        inner: SnapshotMap::new(),
        fail_for: "doomed".to_string(),
    });
    let doomed = group_depending_on("doomed", &["echo"]);
    let healthy = group_depending_on("healthy", &["echo"]);
    cache.inner.register(doomed.clone());
    cache.inner.register(healthy.clone());

    let mut updater = updater(cache.clone(), test_config());
    let last = seed(&mut updater);
    let last = updater
        .process(Event::State(state_with_services(&["echo"])), &last)
        .await;

    assert!(cache.inner.snapshot(&doomed).is_none());
    assert!(cache.inner.snapshot(&healthy).is_some());

    // The loop keeps processing subsequent events.
    let _ = updater
        .process(Event::State(state_with_services(&["echo", "other"])), &last)
        .await;
    assert!(cache.inner.snapshot(&healthy).is_some());
}

#[tokio::test]
async fn the_loop_survives_an_unprocessable_event() {
    let cache = Arc::new(SnapshotMap::new());
    let group = group_depending_on("caller", &["echo"]);
    cache.register(group.clone());

    // No dialect enabled: service-state events cannot be processed.
    let config = SnapshotConfig {
        enabled_modes: EnabledCommunicationModes {
            ads: false,
            xds: false,
        },
        ..test_config()
    };
    let mut updater = updater(cache.clone(), config);
    let last = seed(&mut updater);
    let last = updater
        .process(Event::State(state_with_services(&["echo"])), &last)
        .await;
    assert_eq!(last.action, crate::updater::Action::ErrorProcessingChanges);
    assert!(cache.snapshot(&group).is_none());

    // Subsequent events are still accepted.
    let result = updater
        .process(Event::Groups(vec![group.clone()]), &last)
        .await;
    assert_eq!(result.action, crate::updater::Action::GroupsUpdated);
}

#[tokio::test]
async fn stale_ledger_entries_are_dropped_once_the_group_disconnects() {
    let cache = Arc::new(SnapshotMap::new());
    let group = group_depending_on("caller", &["echo"]);
    cache.register(group.clone());

    let mut updater = updater(cache.clone(), test_config());
    let last = seed(&mut updater);
    let last = updater
        .process(Event::State(state_with_services(&["echo"])), &last)
        .await;
    assert_eq!(updater.ledger().tracked_groups(), 1);

    cache.remove(&group);
    let _ = updater
        .process(Event::State(state_with_services(&["echo"])), &last)
        .await;
    assert_eq!(updater.ledger().tracked_groups(), 0);
}

#[tokio::test]
async fn parallel_fan_out_configures_every_group() {
    let cache = Arc::new(SnapshotMap::new());
    let groups: Vec<Group> = (0..8)
        .map(|i| group_depending_on(&format!("caller-{i}"), &["echo"]))
        .collect();
    for group in &groups {
        cache.register(group.clone());
    }

    let config = SnapshotConfig {
        group_snapshot_parallelism: 4,
        ..test_config()
    };
    let mut updater = updater(cache.clone(), config);
    let last = seed(&mut updater);
    let _ = updater
        .process(Event::State(state_with_services(&["echo"])), &last)
        .await;

    for group in &groups {
        assert_eq!(cache.snapshot(group).unwrap().clusters[0].name, "echo");
    }
}

#[tokio::test]
async fn run_drains_both_streams_and_configures_the_fleet() {
    let cache = Arc::new(SnapshotMap::new());
    let group = all_services_group("caller");
    cache.register(group.clone());

    let updater = updater(cache.clone(), test_config());
    updater
        .run(
            tokio_stream::iter(vec![state_with_services(&["echo", "other"])]),
            tokio_stream::iter(vec![vec![group.clone()]]),
        )
        .await;

    let snapshot = cache.snapshot(&group).expect("configured before shutdown");
    let names: Vec<_> = snapshot.clusters.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "other"]);
}
