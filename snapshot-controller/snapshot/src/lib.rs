//! The snapshot construction and versioning pipeline.
//!
//! The pipeline reacts to two independently-paced inputs, service-discovery
//! state and proxy-fleet membership, and continuously computes the
//! configuration each proxy group must receive:
//!
//! ```text
//! [ MultiClusterState ] -> [ GlobalSnapshot (per dialect) ]
//!                                    |
//! [ Vec<Group> ] ----------> [ per-group derivation ] -> [ versions ] -> [ cache ]
//! ```
//!
//! A service-state event rebuilds the global snapshots and recomputes every
//! known group; a membership event recomputes only the listed groups against
//! the last computed global snapshots. Version tokens change if and only if
//! the corresponding resource family changed, with the cross-family
//! invalidation rules the discovery protocol requires.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
pub mod config;
pub mod global;
pub mod group_snapshot;
pub mod metrics;
pub mod resource;
pub mod routing;
mod updater;
mod versions;


pub use self::{
    cache::SnapshotMap,
    config::SnapshotConfig,
    global::{GlobalSnapshot, SnapshotFactory},
    group_snapshot::{GroupResources, RouteSpecification},
    metrics::SnapshotMetrics,
    updater::{Action, SnapshotUpdater, UpdateResult},
    versions::SnapshotVersions,
};
