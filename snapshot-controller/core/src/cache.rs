use crate::{Group, GroupSnapshot};

/// The per-group sink backing the protocol server's push mechanism.
///
/// Implementations must allow concurrent `set_snapshot` calls for distinct
/// groups; the orchestrator fans group updates out across a worker pool.
pub trait SnapshotCache: Send + Sync {
    fn set_snapshot(&self, group: &Group, snapshot: GroupSnapshot) -> anyhow::Result<()>;

    /// The groups currently known to the fleet-membership watcher.
    fn groups(&self) -> Vec<Group>;
}
