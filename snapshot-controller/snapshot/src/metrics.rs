use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::Registry,
};
use std::time::Duration;

/// Where in the pipeline a failure was observed.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Phase {
    /// Processing a service-state event (global snapshot rebuild).
    ServiceState,
    /// Deriving or pushing one group's snapshot.
    Groups,
    /// A group's discovery dialect has no computed global snapshot.
    CommunicationMode,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ErrorLabels {
    phase: Phase,
    group: String,
}

pub struct SnapshotMetrics {
    errors: Family<ErrorLabels, Counter>,
    rebuild_duration: Histogram,
    group_update_duration: Histogram,
}

impl SnapshotMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let errors = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "snapshot_errors",
            "Count of snapshot pipeline failures by phase and group",
            errors.clone(),
        );

        let rebuild_duration = Histogram::new(duration_buckets());
        registry.register(
            "global_snapshot_rebuild_duration_seconds",
            "Time to rebuild the global snapshots for one service-state event",
            rebuild_duration.clone(),
        );

        let group_update_duration = Histogram::new(duration_buckets());
        registry.register(
            "group_snapshot_update_duration_seconds",
            "Time to derive, version and push one group's snapshot",
            group_update_duration.clone(),
        );

        Self {
            errors,
            rebuild_duration,
            group_update_duration,
        }
    }

    /// A registry-less instance for tests and embedded use.
    pub fn unregistered() -> Self {
        Self {
            errors: Family::default(),
            rebuild_duration: Histogram::new(duration_buckets()),
            group_update_duration: Histogram::new(duration_buckets()),
        }
    }

    pub fn incr_error(&self, phase: Phase, group: &str) {
        self.errors
            .get_or_create(&ErrorLabels {
                phase,
                group: group.to_string(),
            })
            .inc();
    }

    pub fn observe_rebuild(&self, elapsed: Duration) {
        self.rebuild_duration.observe(elapsed.as_secs_f64());
    }

    pub fn observe_group_update(&self, elapsed: Duration) {
        self.group_update_duration.observe(elapsed.as_secs_f64());
    }
}

fn duration_buckets() -> impl Iterator<Item = f64> {
    prometheus_client::metrics::histogram::exponential_buckets(0.001, 2.0, 12)
}
