use mesh_snapshot_controller_core::{
    resource::{Listener, TrafficDirection},
    Group,
};

pub const INGRESS_LISTENER: &str = "ingress_listener";
pub const EGRESS_LISTENER: &str = "egress_listener";

/// Builds a group's listener pair from its declared listener configuration.
/// Returns nothing when the group declared none; such proxies bootstrap
/// their listeners statically.
pub fn listeners(group: &Group) -> Vec<Listener> {
    let Some(config) = &group.listeners_config else {
        return Vec::new();
    };
    vec![
        Listener {
            name: INGRESS_LISTENER.to_string(),
            address: config.ingress_host.clone(),
            port: config.ingress_port,
            direction: TrafficDirection::Ingress,
        },
        Listener {
            name: EGRESS_LISTENER.to_string(),
            address: config.egress_host.clone(),
            port: config.egress_port,
            direction: TrafficDirection::Egress,
        },
    ]
}
