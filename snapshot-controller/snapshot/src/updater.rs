//! The update orchestrator.
//!
//! Two independently-paced input streams feed one coordinator task: the
//! registry watcher's service-state stream and the fleet watcher's
//! group-membership stream. The coordinator serializes them into a single
//! event sequence so global-snapshot state and the version ledger are never
//! read and mutated concurrently. Service states are conflated through a
//! single-slot overwrite buffer and sampled on a fixed cadence: only the
//! most recent discovery state is meaningful, so intermediate states are
//! dropped, never queued. Group-membership events are processed one by one;
//! missing one can mean a tenant never receives its first configuration.
//!
//! Within a cycle the global snapshot is always completed before any group
//! derivation starts. Group derivation and push are fanned out across a
//! bounded worker pool and awaited before the cycle completes; each group
//! touches only its own ledger entry, so the fan-out is race-free.

use crate::{
    config::SnapshotConfig,
    global::{GlobalSnapshot, SnapshotFactory},
    metrics::{Phase, SnapshotMetrics},
    versions::SnapshotVersions,
};
use futures::{Stream, StreamExt};
use mesh_snapshot_controller_core::{
    resource::ClusterConfigurations, CommunicationMode, Group, GroupSnapshot, MultiClusterState,
    SnapshotCache,
};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// A service-state event: global snapshots were rebuilt and every known
    /// group is recomputed.
    ServiceStateUpdated,
    /// A fleet-membership event: only the listed groups are recomputed,
    /// against the most recent global snapshots.
    GroupsUpdated,
    /// The event could not be processed; the orchestration loop continues
    /// with the next event.
    ErrorProcessingChanges,
}

/// The outcome of one orchestration cycle. A cycle that did not rebuild a
/// dialect's global snapshot inherits it from the previous cycle.
#[derive(Clone, Debug)]
pub struct UpdateResult {
    pub action: Action,
    pub groups: Vec<Group>,
    pub ads_snapshot: Option<Arc<GlobalSnapshot>>,
    pub xds_snapshot: Option<Arc<GlobalSnapshot>>,
}

impl UpdateResult {
    pub fn snapshot_for(&self, mode: CommunicationMode) -> Option<&Arc<GlobalSnapshot>> {
        match mode {
            CommunicationMode::Ads => self.ads_snapshot.as_ref(),
            CommunicationMode::Xds => self.xds_snapshot.as_ref(),
        }
    }

    fn inherit_missing_snapshots(mut self, previous: &UpdateResult) -> Self {
        if self.ads_snapshot.is_none() {
            self.ads_snapshot = previous.ads_snapshot.clone();
        }
        if self.xds_snapshot.is_none() {
            self.xds_snapshot = previous.xds_snapshot.clone();
        }
        self
    }
}

pub(crate) enum Event {
    State(MultiClusterState),
    Groups(Vec<Group>),
}

pub struct SnapshotUpdater<C> {
    cache: Arc<C>,
    factory: Arc<SnapshotFactory>,
    versions: Arc<SnapshotVersions>,
    metrics: Arc<SnapshotMetrics>,
    /// Previous cycle's per-service configurations; owned by the coordinator
    /// task, consulted for HTTP/2 retention and never-remove-clusters.
    cluster_configurations: ClusterConfigurations,
}

impl<C: SnapshotCache + 'static> SnapshotUpdater<C> {
    pub fn new(
        cache: Arc<C>,
        config: SnapshotConfig,
        metrics: Arc<SnapshotMetrics>,
    ) -> anyhow::Result<Self> {
        let factory = Arc::new(SnapshotFactory::new(Arc::new(config))?);
        Ok(Self {
            cache,
            factory,
            versions: Arc::new(SnapshotVersions::new()),
            metrics,
            cluster_configurations: ClusterConfigurations::new(),
        })
    }

    /// Runs the orchestration loop until both input streams end.
    pub async fn run(
        mut self,
        states: impl Stream<Item = MultiClusterState> + Send + 'static,
        groups: impl Stream<Item = Vec<Group>> + Send,
    ) {
        // Keep-latest backpressure: the producer overwrites the slot at its
        // own pace, the coordinator reads it at the sampling cadence.
        let (slot_tx, mut slot_rx) = watch::channel(None::<MultiClusterState>);
        let producer = tokio::spawn(async move {
            futures::pin_mut!(states);
            while let Some(state) = states.next().await {
                if slot_tx.send(Some(state)).is_err() {
                    break;
                }
            }
        });

        futures::pin_mut!(groups);
        let sample_interval = self.factory.config().state_sample_interval;
        let mut next_state_poll = tokio::time::Instant::now();
        let mut groups_open = true;
        let mut states_open = true;

        // Seed with an empty state so groups connecting before the first
        // discovery poll still receive a (empty) configuration.
        let mut last = self.on_service_state(MultiClusterState::default());

        while groups_open || states_open {
            let event = tokio::select! {
                biased;
                maybe_groups = groups.next(), if groups_open => match maybe_groups {
                    Some(list) => Event::Groups(list),
                    None => {
                        groups_open = false;
                        continue;
                    }
                },
                changed = async {
                    tokio::time::sleep_until(next_state_poll).await;
                    slot_rx.changed().await
                }, if states_open => match changed {
                    Ok(()) => {
                        let state = slot_rx.borrow_and_update().clone();
                        next_state_poll = tokio::time::Instant::now() + sample_interval;
                        match state {
                            Some(state) => Event::State(state),
                            None => continue,
                        }
                    }
                    Err(_) => {
                        states_open = false;
                        continue;
                    }
                },
            };
            last = self.process(event, &last).await;
        }
        let _ = producer.await;
    }

    #[cfg(test)]
    pub(crate) fn ledger(&self) -> &SnapshotVersions {
        &self.versions
    }

    /// Handles one event and returns the cycle's result.
    pub(crate) async fn process(&mut self, event: Event, previous: &UpdateResult) -> UpdateResult {
        let result = match event {
            Event::State(state) => self.on_service_state(state),
            Event::Groups(groups) => UpdateResult {
                action: Action::GroupsUpdated,
                groups,
                ads_snapshot: None,
                xds_snapshot: None,
            },
        };
        let result = result.inherit_missing_snapshots(previous);

        self.versions.retain_groups(&self.cache.groups());

        let targets = match result.action {
            Action::ServiceStateUpdated => self.cache.groups(),
            Action::GroupsUpdated => result.groups.clone(),
            Action::ErrorProcessingChanges => Vec::new(),
        };
        self.update_groups(targets, &result).await;
        result
    }

    pub(crate) fn on_service_state(&mut self, state: MultiClusterState) -> UpdateResult {
        let started = std::time::Instant::now();
        self.cluster_configurations = self
            .factory
            .cluster_configurations(&state, &self.cluster_configurations);

        let modes = self.factory.config().enabled_modes;
        let ads_snapshot = modes.ads.then(|| {
            Arc::new(self.factory.global_snapshot(
                &state,
                &self.cluster_configurations,
                CommunicationMode::Ads,
            ))
        });
        let xds_snapshot = modes.xds.then(|| {
            Arc::new(self.factory.global_snapshot(
                &state,
                &self.cluster_configurations,
                CommunicationMode::Xds,
            ))
        });
        self.metrics.observe_rebuild(started.elapsed());

        if ads_snapshot.is_none() && xds_snapshot.is_none() {
            self.metrics.incr_error(Phase::ServiceState, "");
            tracing::error!("no discovery dialect is enabled; dropping service-state update");
            return UpdateResult {
                action: Action::ErrorProcessingChanges,
                groups: Vec::new(),
                ads_snapshot: None,
                xds_snapshot: None,
            };
        }

        UpdateResult {
            action: Action::ServiceStateUpdated,
            groups: Vec::new(),
            ads_snapshot,
            xds_snapshot,
        }
    }

    /// Fans the per-group work out across a bounded worker pool. Each task
    /// derives, versions and pushes one group; failures are isolated to
    /// their group.
    async fn update_groups(&self, groups: Vec<Group>, result: &UpdateResult) {
        let parallelism = self.factory.config().group_snapshot_parallelism.max(1);
        futures::stream::iter(groups)
            .map(|group| {
                let factory = self.factory.clone();
                let versions = self.versions.clone();
                let cache = self.cache.clone();
                let metrics = self.metrics.clone();
                let result = result.clone();
                tokio::task::spawn_blocking(move || {
                    update_group(&factory, &versions, &*cache, &metrics, &group, &result);
                })
            })
            .buffer_unordered(parallelism)
            .for_each(|joined| async {
                // A panicking derivation only loses its own group's update.
                if let Err(error) = joined {
                    self.metrics.incr_error(Phase::Groups, "");
                    tracing::error!(%error, "group snapshot task panicked");
                }
            })
            .await;
    }
}

fn update_group<C: SnapshotCache>(
    factory: &SnapshotFactory,
    versions: &SnapshotVersions,
    cache: &C,
    metrics: &SnapshotMetrics,
    group: &Group,
    result: &UpdateResult,
) {
    let started = std::time::Instant::now();

    let Some(global) = result.snapshot_for(group.communication_mode) else {
        metrics.incr_error(Phase::CommunicationMode, &group.service_name);
        tracing::warn!(
            group = %group.service_name,
            mode = ?group.communication_mode,
            "no global snapshot computed for the group's discovery dialect",
        );
        return;
    };

    match factory.snapshot_for_group(group, global) {
        Ok(resources) => {
            let versions = versions.version(
                group,
                &resources.clusters,
                &resources.endpoints,
                &resources.listeners,
            );
            let snapshot = GroupSnapshot {
                clusters: resources.clusters,
                endpoints: resources.endpoints,
                routes: resources.routes,
                listeners: resources.listeners,
                versions,
            };
            if let Err(error) = cache.set_snapshot(group, snapshot) {
                metrics.incr_error(Phase::Groups, &group.service_name);
                tracing::error!(%error, group = %group.service_name, "failed to push group snapshot");
            }
        }
        Err(error) => {
            metrics.incr_error(Phase::Groups, &group.service_name);
            tracing::error!(%error, group = %group.service_name, "failed to derive group snapshot");
        }
    }

    metrics.observe_group_update(started.elapsed());
}
