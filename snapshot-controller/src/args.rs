use anyhow::Result;
use clap::Parser;
use mesh_snapshot_controller_snapshot::config::{
    CanaryConfig, EnabledCommunicationModes, Http2Config, LoadBalancingConfig,
    OutgoingPermissionsConfig, ServiceTagConfig, SnapshotConfig, TrafficSplittingConfig,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration surface for embedding in a runner binary: flatten this into
/// the runner's own argument struct and lower it with
/// [`Args::snapshot_config`].
#[derive(Debug, Parser)]
#[clap(name = "snapshot-controller", about = "Mesh snapshot controller")]
pub struct Args {
    #[clap(long, default_value = "info", env = "SNAPSHOT_CONTROLLER_LOG")]
    pub log_level: String,

    #[clap(long, value_enum, default_value = "plain")]
    pub log_format: LogFormat,

    #[clap(long, default_value = "0.0.0.0:9990")]
    pub admin_addr: SocketAddr,

    /// Minimum spacing, in milliseconds, between service-state-triggered
    /// rebuilds.
    #[clap(long, default_value = "1000")]
    pub state_sample_interval_ms: u64,

    /// Retain clusters whose services disappeared from discovery.
    #[clap(long)]
    pub never_remove_clusters: bool,

    #[clap(long)]
    pub http2_disabled: bool,

    /// The instance tag advertising HTTP/2 capability.
    #[clap(long, default_value = "http2")]
    pub http2_tag_name: String,

    #[clap(long)]
    pub incoming_permissions_enabled: bool,

    #[clap(long)]
    pub service_tags_disabled: bool,

    #[clap(long, default_value = "tag")]
    pub service_tag_metadata_key: String,

    #[clap(long)]
    pub auto_service_tag_enabled: bool,

    /// Accept requests repeating their own auto-resolved service tag instead
    /// of rejecting them.
    #[clap(long)]
    pub allow_request_tag_duplicate: bool,

    /// Tag pattern excluded from routing; may be repeated.
    #[clap(long)]
    pub routing_excluded_tags: Vec<String>,

    #[clap(long)]
    pub canary_enabled: bool,

    #[clap(long)]
    pub lb_weights_enabled: bool,

    /// The traffic-splitting target zone; empty disables splitting.
    #[clap(long, default_value = "")]
    pub traffic_splitting_zone: String,

    /// Per-service zone weights, e.g. `frontend=dc1:60,dc2:40`; may be
    /// repeated.
    #[clap(long, value_parser = parse_service_weights)]
    pub traffic_splitting_weights: Vec<ServiceWeights>,

    #[clap(long)]
    pub dynamic_listeners_enabled: bool,

    /// Bound on concurrent per-group snapshot updates.
    #[clap(long, default_value = "1")]
    pub group_snapshot_parallelism: usize,

    /// Service-name prefix hidden from depend-on-everything groups; may be
    /// repeated.
    #[clap(long)]
    pub wildcard_excluded_prefixes: Vec<String>,

    #[clap(long)]
    pub ads_disabled: bool,

    #[clap(long)]
    pub xds_disabled: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Plain,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceWeights {
    pub service: String,
    pub weights: BTreeMap<String, u32>,
}

fn parse_service_weights(value: &str) -> Result<ServiceWeights, String> {
    let (service, weights) = value
        .split_once('=')
        .ok_or_else(|| format!("expected `service=zone:weight[,zone:weight]`, got {value}"))?;
    let weights = weights
        .split(',')
        .map(|entry| {
            let (zone, weight) = entry
                .split_once(':')
                .ok_or_else(|| format!("expected `zone:weight`, got {entry}"))?;
            let weight = weight
                .parse::<u32>()
                .map_err(|_| format!("invalid weight {weight}"))?;
            Ok((zone.to_string(), weight))
        })
        .collect::<Result<BTreeMap<_, _>, String>>()?;
    Ok(ServiceWeights {
        service: service.to_string(),
        weights,
    })
}

impl Args {
    pub fn init_tracing(&self) -> Result<()> {
        let filter = tracing_subscriber::EnvFilter::try_new(&self.log_level)?;
        match self.log_format {
            LogFormat::Plain => tracing_subscriber::fmt().with_env_filter(filter).init(),
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init(),
        }
        Ok(())
    }

    pub fn snapshot_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            state_sample_interval: Duration::from_millis(self.state_sample_interval_ms),
            never_remove_clusters: self.never_remove_clusters,
            incoming_permissions_enabled: self.incoming_permissions_enabled,
            http2: Http2Config {
                enabled: !self.http2_disabled,
                tag_name: self.http2_tag_name.clone(),
            },
            service_tags: ServiceTagConfig {
                enabled: !self.service_tags_disabled,
                metadata_key: self.service_tag_metadata_key.clone(),
                auto_service_tag_enabled: self.auto_service_tag_enabled,
                reject_request_tag_duplicate: !self.allow_request_tag_duplicate,
                routing_excluded_tags: self.routing_excluded_tags.clone(),
            },
            load_balancing: LoadBalancingConfig {
                canary: CanaryConfig {
                    enabled: self.canary_enabled,
                    ..CanaryConfig::default()
                },
                weights_enabled: self.lb_weights_enabled,
            },
            traffic_splitting: TrafficSplittingConfig {
                zone_name: self.traffic_splitting_zone.clone(),
                weights_by_service: self
                    .traffic_splitting_weights
                    .iter()
                    .map(|w| (w.service.clone(), w.weights.clone()))
                    .collect(),
            },
            outgoing_permissions: OutgoingPermissionsConfig {
                services_excluded_by_prefix: self.wildcard_excluded_prefixes.clone(),
            },
            dynamic_listeners_enabled: self.dynamic_listeners_enabled,
            group_snapshot_parallelism: self.group_snapshot_parallelism,
            enabled_modes: EnabledCommunicationModes {
                ads: !self.ads_disabled,
                xds: !self.xds_disabled,
            },
        }
    }
}
