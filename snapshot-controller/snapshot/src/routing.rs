//! Service-tag routing policy resolution.
//!
//! Tag resolution is pure so the rejection rules can be exercised directly:
//! the wire server applies [`resolve_request_tag`] per request, the snapshot
//! pipeline applies [`ServiceTagRouter`] while deriving endpoint sets.

use crate::config::ServiceTagConfig;
use mesh_snapshot_controller_core::resource::{
    ClusterLoadAssignment, LocalityLbEndpoints, TagRoutePolicy,
};
use regex::RegexSet;
use std::collections::BTreeSet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TagError {
    /// Auto-tag resolution found no caller tag in the preference list. The
    /// request is rejected rather than silently served unfiltered.
    #[error("none of the caller's tags match the tag preference list")]
    NoMatchingTag,

    /// A request supplied an explicit tag equal to its own auto-resolved
    /// tag.
    #[error("request tag {0:?} duplicates the auto-resolved service tag")]
    DuplicateAutoTag(String),
}

/// Intersects the caller's own tags with the preference list, in preference
/// order. The first match is the effective tag for every call on the
/// dependency.
pub fn resolve_auto_tag(
    own_tags: &BTreeSet<String>,
    preference: &[String],
) -> Result<String, TagError> {
    preference
        .iter()
        .find(|tag| own_tags.contains(*tag))
        .cloned()
        .ok_or(TagError::NoMatchingTag)
}

/// Resolves the tag constraint for a single request carrying an optional
/// explicit tag header.
pub fn resolve_request_tag(
    policy: &TagRoutePolicy,
    request_tag: Option<&str>,
) -> Result<Option<String>, TagError> {
    match (request_tag, &policy.auto_tag) {
        (Some(requested), Some(auto)) if requested == auto && policy.reject_duplicate => {
            Err(TagError::DuplicateAutoTag(requested.to_string()))
        }
        (Some(requested), _) => Ok(Some(requested.to_string())),
        (None, auto) => Ok(auto.clone()),
    }
}

/// Applies the configured tag hygiene to instance tags and filters endpoint
/// sets by the effective tag.
#[derive(Debug)]
pub struct ServiceTagRouter {
    enabled: bool,
    excluded: RegexSet,
}

impl ServiceTagRouter {
    pub fn new(config: &ServiceTagConfig) -> anyhow::Result<Self> {
        let excluded = RegexSet::new(&config.routing_excluded_tags)?;
        Ok(Self {
            enabled: config.enabled,
            excluded,
        })
    }

    /// The subset of an instance's tags that may be used for routing.
    pub fn routing_tags(&self, tags: &BTreeSet<String>) -> BTreeSet<String> {
        if !self.enabled {
            return BTreeSet::new();
        }
        tags.iter()
            .filter(|tag| !self.excluded.is_match(tag))
            .cloned()
            .collect()
    }

    /// Filters an endpoint assignment down to the instances a dependency may
    /// reach: canary instances are dropped unless the dependency opted in,
    /// and when an effective tag applies only instances carrying it remain
    /// (unless fallback-to-any is set and no instance carries the tag).
    pub fn filter_assignment(
        &self,
        assignment: &ClusterLoadAssignment,
        effective_tag: Option<&str>,
        canary: bool,
        fallback_to_any: bool,
    ) -> ClusterLoadAssignment {
        let filter = |tag: Option<&str>| ClusterLoadAssignment {
            cluster_name: assignment.cluster_name.clone(),
            endpoints: assignment
                .endpoints
                .iter()
                .map(|locality| LocalityLbEndpoints {
                    zone: locality.zone.clone(),
                    priority: locality.priority,
                    zone_weight: locality.zone_weight,
                    endpoints: locality
                        .endpoints
                        .iter()
                        .filter(|e| canary || !e.metadata.canary)
                        .filter(|e| tag.map_or(true, |t| e.metadata.tags.contains(t)))
                        .cloned()
                        .collect(),
                })
                .collect(),
        };

        let filtered = filter(effective_tag);
        if effective_tag.is_some() && fallback_to_any && filtered.endpoint_count() == 0 {
            return filter(None);
        }
        filtered
    }
}
