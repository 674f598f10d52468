use crate::config::{AddressBlock, ChannelConfig, EngineConfig, ExperimentConfig, RunConfig};
use serde::Deserialize;
use std::path::PathBuf;

/// An experiment description as stored on disk.
///
/// Every field is optional; whatever is present overrides the defaults.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ExperimentFile {
    pub name: Option<String>,
    pub description: Option<String>,
    pub run: RunConfigOverride,
    pub channel: ChannelOverride,
    pub addressing: Option<AddressBlock>,
    pub engine: EngineOverride,
    pub report: ReportOverride,
}

impl ExperimentFile {
    pub fn apply_to(&self, config: &mut ExperimentConfig) {
        self.run.apply_to(&mut config.run);
        self.channel.apply_to(&mut config.channel);
        if let Some(block) = self.addressing {
            config.addressing = block;
        }
        self.engine.apply_to(&mut config.engine);
        if let Some(path) = &self.report.path {
            config.report.path = path.clone();
        }
        if let Some(title) = &self.report.title {
            config.report.title = title.clone();
        } else if let Some(name) = &self.name {
            config.report.title = name.clone();
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RunConfigOverride {
    pub node_count: Option<u32>,
    pub simulation_duration_sec: Option<f64>,
    pub packet_size_bytes: Option<u32>,
    pub send_interval_sec: Option<f64>,
    pub mobility_trace: Option<PathBuf>,
    pub num_connections: Option<u32>,
    pub base_port: Option<u16>,
}

impl RunConfigOverride {
    pub fn apply_to(&self, config: &mut RunConfig) {
        if let Some(v) = self.node_count {
            config.node_count = v;
        }
        if let Some(v) = self.simulation_duration_sec {
            config.simulation_duration_sec = v;
        }
        if let Some(v) = self.packet_size_bytes {
            config.packet_size_bytes = v;
        }
        if let Some(v) = self.send_interval_sec {
            config.send_interval_sec = v;
        }
        if let Some(v) = &self.mobility_trace {
            config.mobility_trace = v.clone();
        }
        if let Some(v) = self.num_connections {
            config.num_connections = v;
        }
        if let Some(v) = self.base_port {
            config.base_port = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ChannelOverride {
    pub standard: Option<crate::config::WifiStandard>,
    pub tx_power_dbm: Option<f64>,
    pub range_m: Option<f64>,
}

impl ChannelOverride {
    pub fn apply_to(&self, config: &mut ChannelConfig) {
        if let Some(v) = self.standard {
            config.standard = v;
        }
        if let Some(v) = self.tx_power_dbm {
            config.tx_power_dbm = v;
        }
        if let Some(v) = self.range_m {
            config.range_m = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct EngineOverride {
    pub loss_rate: Option<f64>,
    pub min_hop_latency_us: Option<u64>,
    pub max_hop_latency_us: Option<u64>,
    pub seed: Option<u64>,
    pub echo_replies: Option<bool>,
}

impl EngineOverride {
    pub fn apply_to(&self, config: &mut EngineConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.min_hop_latency_us {
            config.min_hop_latency_us = v;
        }
        if let Some(v) = self.max_hop_latency_us {
            config.max_hop_latency_us = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.echo_replies {
            config.echo_replies = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ReportOverride {
    pub path: Option<PathBuf>,
    pub title: Option<String>,
}
