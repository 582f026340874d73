//! The service-discovery state model.
//!
//! Values in this module are produced wholesale by the registry watcher on
//! every poll and are never mutated by the snapshot pipeline. A
//! [`MultiClusterState`] is an ordered collection of per-datacenter states;
//! each per-datacenter state is a single point-in-time view, but different
//! datacenters may have been polled at different times.

use crate::ServiceName;
use std::collections::{BTreeMap, BTreeSet};

/// One discovered instance of a service.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceInstance {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub tags: BTreeSet<String>,
    /// Marked canary instances only receive traffic from canary-opted-in
    /// dependencies.
    pub canary: bool,
    /// Relative load-balancing weight; only emitted when weighted LB is
    /// enabled mesh-wide.
    pub weight: u32,
    pub healthy: bool,
}

impl ServiceInstance {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            tags: BTreeSet::new(),
            canary: false,
            weight: 1,
            healthy: true,
        }
    }

    pub fn with_tags<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_canary(mut self, canary: bool) -> Self {
        self.canary = canary;
        self
    }
}

/// All discovered instances of one service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceInstances {
    pub service_name: ServiceName,
    /// Keyed by instance id; a duplicate id within one registry poll is
    /// last-write-wins, per the registry contract.
    pub instances: BTreeMap<String, ServiceInstance>,
}

impl ServiceInstances {
    pub fn new<I: IntoIterator<Item = ServiceInstance>>(
        service_name: impl Into<ServiceName>,
        instances: I,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            instances: instances
                .into_iter()
                .map(|i| (i.id.clone(), i))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceInstance> {
        self.instances.values()
    }
}

/// The full set of services known in one datacenter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServicesState {
    services: BTreeMap<ServiceName, ServiceInstances>,
}

impl ServicesState {
    pub fn get(&self, service_name: &str) -> Option<&ServiceInstances> {
        self.services.get(service_name)
    }

    pub fn has_service(&self, service_name: &str) -> bool {
        self.services.contains_key(service_name)
    }

    pub fn service_names(&self) -> impl Iterator<Item = &ServiceName> {
        self.services.keys()
    }

    pub fn all_instances(&self) -> impl Iterator<Item = &ServiceInstances> {
        self.services.values()
    }

    /// Registers a service with no instances. Returns false if the service
    /// was already known.
    pub fn add(&mut self, service_name: impl Into<ServiceName>) -> bool {
        let service_name = service_name.into();
        if self.services.contains_key(&service_name) {
            return false;
        }
        self.services.insert(
            service_name.clone(),
            ServiceInstances::new(service_name, None),
        );
        true
    }

    /// Replaces a service's instance set. Returns false if the state is
    /// unchanged.
    pub fn change(&mut self, instances: ServiceInstances) -> bool {
        if self.services.get(&instances.service_name) == Some(&instances) {
            return false;
        }
        self.services
            .insert(instances.service_name.clone(), instances);
        true
    }

    pub fn remove(&mut self, service_name: &str) -> bool {
        self.services.remove(service_name).is_some()
    }

    pub fn remove_services_without_instances(&mut self) {
        self.services.retain(|_, v| !v.is_empty());
    }
}

impl FromIterator<ServiceInstances> for ServicesState {
    fn from_iter<I: IntoIterator<Item = ServiceInstances>>(iter: I) -> Self {
        Self {
            services: iter
                .into_iter()
                .map(|s| (s.service_name.clone(), s))
                .collect(),
        }
    }
}

/// Whether a datacenter is the one this control plane runs in.
///
/// Local instances are preferred at the data plane: remote endpoint groups
/// are emitted at a lower priority.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Locality {
    Local,
    Remote,
}

/// A point-in-time view of one datacenter's services.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterState {
    pub services: ServicesState,
    pub locality: Locality,
    pub zone: String,
}

impl ClusterState {
    pub fn new(services: ServicesState, locality: Locality, zone: impl Into<String>) -> Self {
        Self {
            services,
            locality,
            zone: zone.into(),
        }
    }
}

/// The mesh-wide discovery state: one [`ClusterState`] per datacenter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MultiClusterState(pub Vec<ClusterState>);

impl MultiClusterState {
    pub fn iter(&self) -> impl Iterator<Item = &ClusterState> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<ClusterState> for MultiClusterState {
    fn from(state: ClusterState) -> Self {
        Self(vec![state])
    }
}

impl FromIterator<ClusterState> for MultiClusterState {
    fn from_iter<I: IntoIterator<Item = ClusterState>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
