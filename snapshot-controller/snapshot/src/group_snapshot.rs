//! Per-group projection of the global snapshot.
//!
//! Derivation never mutates shared state: it reads one [`GlobalSnapshot`]
//! and the group's declared policy and produces the exact resource set that
//! group's proxy should receive. A failure here is isolated by the
//! orchestrator; it must not affect any other group in the same cycle.

use crate::{
    global::{GlobalSnapshot, SnapshotFactory},
    resource::{clusters, endpoints, listeners, routes},
    routing::{self, TagError},
};
use anyhow::{bail, Result};
use mesh_snapshot_controller_core::{
    group::{DependencyScope, DependencySettings},
    resource::{Cluster, ClusterLoadAssignment, Listener, RouteConfiguration, TagRoutePolicy},
    Group, ServiceName,
};
use std::collections::{BTreeMap, BTreeSet};

/// How one dependency's traffic is routed.
///
/// Weighted is chosen only when the calling service has traffic-splitting
/// weights configured *and* the target cluster currently has at least one
/// live endpoint in the split zone; otherwise the specification degrades to
/// Standard so no weight bucket points at an empty zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteSpecification {
    Standard {
        cluster: String,
        domains: Vec<String>,
        settings: DependencySettings,
        tag_policy: Option<TagRoutePolicy>,
    },
    Weighted {
        cluster: String,
        domains: Vec<String>,
        settings: DependencySettings,
        tag_policy: Option<TagRoutePolicy>,
        weights: BTreeMap<String, u32>,
    },
}

impl RouteSpecification {
    pub fn cluster_name(&self) -> &str {
        match self {
            Self::Standard { cluster, .. } | Self::Weighted { cluster, .. } => cluster,
        }
    }

    pub fn domains(&self) -> &[String] {
        match self {
            Self::Standard { domains, .. } | Self::Weighted { domains, .. } => domains,
        }
    }

    pub fn settings(&self) -> &DependencySettings {
        match self {
            Self::Standard { settings, .. } | Self::Weighted { settings, .. } => settings,
        }
    }

    pub fn tag_policy(&self) -> Option<&TagRoutePolicy> {
        match self {
            Self::Standard { tag_policy, .. } | Self::Weighted { tag_policy, .. } => {
                tag_policy.as_ref()
            }
        }
    }
}

/// A derived group snapshot before version assignment.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupResources {
    pub clusters: Vec<Cluster>,
    pub endpoints: Vec<ClusterLoadAssignment>,
    pub routes: Vec<RouteConfiguration>,
    pub listeners: Vec<Listener>,
}

/// The endpoint-selection decision for one service dependency.
#[derive(Clone, Debug, PartialEq, Eq)]
enum EffectiveTag {
    /// No tag constraint; all non-canary instances are candidates.
    Unconstrained,
    /// Only instances carrying the tag are candidates.
    Tag(String),
    /// Auto-tag resolution failed and fallback is disabled: the dependency
    /// gets an empty endpoint set rather than unfiltered instances.
    NoMatch,
}

struct ServiceRouteSpec {
    specification: RouteSpecification,
    effective_tag: EffectiveTag,
    canary: bool,
    fallback_to_any: bool,
}

impl SnapshotFactory {
    /// Computes the full resource set for one group against one global
    /// snapshot.
    pub fn snapshot_for_group(
        &self,
        group: &Group,
        global: &GlobalSnapshot,
    ) -> Result<GroupResources> {
        let service_specs = self.service_route_specifications(group, global)?;
        let domain_specs = self.domain_route_specifications(group)?;

        let cluster_source = if self.config().incoming_permissions_enabled {
            &global.secured_clusters
        } else {
            &global.clusters
        };

        let mut cluster_list = Vec::new();
        let mut endpoint_list = Vec::new();
        for spec in &service_specs {
            let name = spec.specification.cluster_name();
            let Some(cluster) = cluster_source.get(name) else {
                // Retained only in the all-service-names index; nothing to
                // push for it.
                continue;
            };
            cluster_list.push(cluster.clone());

            if let Some(assignment) = global.endpoints.get(name) {
                let tag = match &spec.effective_tag {
                    EffectiveTag::Unconstrained => None,
                    EffectiveTag::Tag(tag) => Some(tag.as_str()),
                    EffectiveTag::NoMatch => {
                        endpoint_list.push(ClusterLoadAssignment {
                            cluster_name: name.to_string(),
                            endpoints: Vec::new(),
                        });
                        continue;
                    }
                };
                let filtered = self.router().filter_assignment(
                    assignment,
                    tag,
                    spec.canary,
                    spec.fallback_to_any,
                );
                let assignment = match &spec.specification {
                    RouteSpecification::Weighted { weights, .. } => {
                        endpoints::apply_zone_weights(&filtered, weights)
                    }
                    RouteSpecification::Standard { .. } => filtered,
                };
                endpoint_list.push(assignment);
            }
        }

        for dependency in &group.domain_dependencies {
            cluster_list.push(clusters::domain_cluster(dependency));
        }
        if !group.domain_pattern_dependencies.is_empty() {
            cluster_list.push(clusters::forward_proxy_cluster());
        }

        let mut route_specs: Vec<RouteSpecification> = service_specs
            .into_iter()
            .map(|s| s.specification)
            .collect();
        route_specs.extend(domain_specs);

        let mut route_list = vec![routes::egress_route_config(&route_specs)];
        if self.config().incoming_permissions_enabled {
            route_list.push(routes::ingress_route_config(&group.incoming));
        }

        let listener_list = if self.config().dynamic_listeners_enabled {
            listeners::listeners(group)
        } else {
            Vec::new()
        };

        Ok(GroupResources {
            clusters: cluster_list,
            endpoints: endpoint_list,
            routes: route_list,
            listeners: listener_list,
        })
    }

    /// Resolves the group's service dependencies into route specifications.
    ///
    /// Dependencies on services the registry has not (yet) discovered are
    /// silently dropped; a declared dependency is a statement of intent, not
    /// a guarantee the target exists.
    fn service_route_specifications(
        &self,
        group: &Group,
        global: &GlobalSnapshot,
    ) -> Result<Vec<ServiceRouteSpec>> {
        let mut declared: BTreeSet<&ServiceName> = BTreeSet::new();
        for dependency in group.service_dependencies() {
            if !declared.insert(&dependency.service) {
                bail!(
                    "service {} is declared as a dependency more than once",
                    dependency.service
                );
            }
        }

        let dependencies: Vec<(ServiceName, DependencySettings)> = match &group.dependencies {
            DependencyScope::Services(deps) => deps
                .iter()
                .filter(|d| global.clusters.contains_key(&d.service))
                .map(|d| (d.service.clone(), d.settings.clone()))
                .collect(),
            DependencyScope::All { extra } => {
                let overrides: BTreeMap<&ServiceName, &DependencySettings> = extra
                    .iter()
                    .map(|d| (&d.service, &d.settings))
                    .collect();
                let mut names: BTreeSet<ServiceName> = global.all_service_names.clone();
                names.extend(
                    extra
                        .iter()
                        .filter(|d| global.clusters.contains_key(&d.service))
                        .map(|d| d.service.clone()),
                );
                names
                    .into_iter()
                    .map(|name| {
                        let settings = overrides
                            .get(&name)
                            .map(|s| (*s).clone())
                            .unwrap_or_default();
                        (name, settings)
                    })
                    .collect()
            }
        };

        dependencies
            .into_iter()
            .map(|(service, settings)| self.service_route_spec(group, global, service, settings))
            .collect()
    }

    fn service_route_spec(
        &self,
        group: &Group,
        global: &GlobalSnapshot,
        service: ServiceName,
        settings: DependencySettings,
    ) -> Result<ServiceRouteSpec> {
        let (effective_tag, tag_policy) = self.resolve_tag_policy(group, global, &settings);

        let weights = self
            .config()
            .traffic_splitting
            .weights_for(&group.service_name)
            .filter(|_| {
                global
                    .endpoints
                    .get(&service)
                    .is_some_and(|e| {
                        e.has_endpoints_in_zone(&self.config().traffic_splitting.zone_name)
                    })
            })
            .cloned();

        let domains = vec![service.clone()];
        let specification = match weights {
            Some(weights) => RouteSpecification::Weighted {
                cluster: service,
                domains,
                settings: settings.clone(),
                tag_policy,
                weights,
            },
            None => RouteSpecification::Standard {
                cluster: service,
                domains,
                settings: settings.clone(),
                tag_policy,
            },
        };

        Ok(ServiceRouteSpec {
            specification,
            effective_tag,
            canary: settings.routing_policy.canary,
            fallback_to_any: settings.routing_policy.fallback_to_any_instance,
        })
    }

    fn resolve_tag_policy(
        &self,
        group: &Group,
        global: &GlobalSnapshot,
        settings: &DependencySettings,
    ) -> (EffectiveTag, Option<TagRoutePolicy>) {
        let tags_config = &self.config().service_tags;
        let policy = &settings.routing_policy;
        if !tags_config.enabled
            || !tags_config.auto_service_tag_enabled
            || !policy.auto_service_tag
            || policy.service_tag_preference.is_empty()
        {
            return (EffectiveTag::Unconstrained, None);
        }

        static EMPTY: BTreeSet<String> = BTreeSet::new();
        let own_tags = global
            .tags_by_service
            .get(&group.service_name)
            .unwrap_or(&EMPTY);
        match routing::resolve_auto_tag(own_tags, &policy.service_tag_preference) {
            Ok(tag) => {
                let route_policy = TagRoutePolicy {
                    auto_tag: Some(tag.clone()),
                    reject_duplicate: tags_config.reject_request_tag_duplicate,
                };
                (EffectiveTag::Tag(tag), Some(route_policy))
            }
            Err(TagError::NoMatchingTag) if policy.fallback_to_any_instance => {
                (EffectiveTag::Unconstrained, None)
            }
            Err(_) => (EffectiveTag::NoMatch, None),
        }
    }

    fn domain_route_specifications(&self, group: &Group) -> Result<Vec<RouteSpecification>> {
        let mut specs = Vec::new();
        for dependency in &group.domain_dependencies {
            if dependency.host.is_empty() {
                bail!("domain dependency with an empty host");
            }
            specs.push(RouteSpecification::Standard {
                cluster: dependency.cluster_name(),
                domains: vec![dependency.route_domain()],
                settings: dependency.settings.clone(),
                tag_policy: None,
            });
        }
        for dependency in &group.domain_pattern_dependencies {
            specs.push(RouteSpecification::Standard {
                cluster: clusters::FORWARD_PROXY_CLUSTER.to_string(),
                domains: vec![dependency.pattern.clone()],
                settings: dependency.settings.clone(),
                tag_policy: None,
            });
        }
        Ok(specs)
    }
}
