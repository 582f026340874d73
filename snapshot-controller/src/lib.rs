//! Control-plane assembly.
//!
//! This crate wires the snapshot pipeline together for embedding in a runner
//! binary: the runner supplies the two input streams (service state from its
//! registry watcher, fleet membership from its discovery-protocol server)
//! and the snapshot cache the server reads from, and gets back a future that
//! drives the orchestration loop, plus `/ready` + `/metrics` admin serving.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use mesh_snapshot_controller_core as core;
pub use mesh_snapshot_controller_snapshot as snapshot;

pub mod admin;
mod args;

pub use self::args::Args;

use anyhow::Result;
use futures::Stream;
use mesh_snapshot_controller_snapshot::{SnapshotConfig, SnapshotMetrics, SnapshotUpdater};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::sync::watch;

use crate::core::{Group, MultiClusterState, SnapshotCache};

pub struct Builder {
    config: SnapshotConfig,
}

impl Builder {
    pub fn new(config: SnapshotConfig) -> Self {
        Self { config }
    }

    /// Assembles the control plane against the runner's snapshot cache,
    /// registering pipeline metrics.
    pub fn build<C: SnapshotCache + 'static>(
        self,
        cache: Arc<C>,
        registry: &mut Registry,
    ) -> Result<ControlPlane<C>> {
        let metrics = Arc::new(SnapshotMetrics::register(
            registry.sub_registry_with_prefix("snapshot"),
        ));
        let updater = SnapshotUpdater::new(cache, self.config, metrics)?;
        let (ready_tx, ready_rx) = watch::channel(false);
        Ok(ControlPlane {
            updater,
            ready_tx,
            ready_rx,
        })
    }
}

pub struct ControlPlane<C> {
    updater: SnapshotUpdater<C>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl<C: SnapshotCache + 'static> ControlPlane<C> {
    /// The readiness signal for the admin server: true once the
    /// orchestration loop is running.
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.ready_rx.clone()
    }

    /// Drives the orchestration loop until both input streams end.
    pub async fn run(
        self,
        states: impl Stream<Item = MultiClusterState> + Send + 'static,
        groups: impl Stream<Item = Vec<Group>> + Send,
    ) {
        let Self {
            updater, ready_tx, ..
        } = self;
        let _ = ready_tx.send(true);
        updater.run(states, groups).await;
        let _ = ready_tx.send(false);
    }
}
