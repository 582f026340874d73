use ahash::AHashMap;
use mesh_snapshot_controller_core::{Group, GroupSnapshot, SnapshotCache};
use parking_lot::RwLock;

/// In-memory snapshot cache keyed by group.
///
/// The fleet watcher registers a group when its proxy connects (before any
/// snapshot exists for it) and removes it on disconnect; the orchestrator
/// fills in snapshots as cycles complete.
#[derive(Debug, Default)]
pub struct SnapshotMap {
    entries: RwLock<AHashMap<Group, Option<GroupSnapshot>>>,
}

impl SnapshotMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fleet member with no snapshot yet. A no-op if the group
    /// is already known.
    pub fn register(&self, group: Group) {
        self.entries.write().entry(group).or_insert(None);
    }

    pub fn remove(&self, group: &Group) {
        self.entries.write().remove(group);
    }

    pub fn snapshot(&self, group: &Group) -> Option<GroupSnapshot> {
        self.entries.read().get(group).cloned().flatten()
    }
}

impl SnapshotCache for SnapshotMap {
    fn set_snapshot(&self, group: &Group, snapshot: GroupSnapshot) -> anyhow::Result<()> {
        self.entries
            .write()
            .insert(group.clone(), Some(snapshot));
        Ok(())
    }

    fn groups(&self) -> Vec<Group> {
        self.entries.read().keys().cloned().collect()
    }
}
