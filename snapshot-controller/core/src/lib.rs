#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
pub mod group;
pub mod resource;
pub mod service;

pub use self::{
    cache::SnapshotCache,
    group::{CommunicationMode, Group},
    resource::{GroupSnapshot, VersionSet},
    service::{ClusterState, Locality, MultiClusterState, ServiceInstance, ServicesState},
};

/// A discovered service's name, as reported by the registry.
pub type ServiceName = String;
