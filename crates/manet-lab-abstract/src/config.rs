use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ScenarioConfigurationError;
use crate::time::SimTime;

/// Parameters of one experiment run. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub node_count: u32,
    pub simulation_duration_sec: f64,
    pub packet_size_bytes: u32,
    pub send_interval_sec: f64,
    /// Path of the ns-2 mobility trace.
    pub mobility_trace: PathBuf,
    pub num_connections: u32,
    pub base_port: u16,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            node_count: 100,
            simulation_duration_sec: 600.0,
            packet_size_bytes: 512,
            send_interval_sec: 2.0,
            mobility_trace: PathBuf::from("manet_density_100.tcl"),
            num_connections: 5,
            base_port: 9000,
        }
    }
}

impl RunConfig {
    /// Number of client/server pairs this configuration actually produces.
    ///
    /// Shrinks silently to `node_count / 2` when there are not enough nodes.
    pub fn realized_connections(&self) -> u32 {
        self.num_connections.min(self.node_count / 2)
    }

    /// Packets each generator is allowed to send over the whole run.
    ///
    /// Saturates at `u32::MAX`; `validate` rejects configurations that get there.
    pub fn max_packets(&self) -> u32 {
        if self.send_interval_sec <= 0.0 {
            return 0;
        }
        (self.simulation_duration_sec / self.send_interval_sec).floor() as u32
    }

    /// Generator interval with nanosecond resolution.
    pub fn send_interval(&self) -> Result<Duration, ScenarioConfigurationError> {
        ensure_positive("send_interval_sec", self.send_interval_sec)?;
        match Duration::try_from_secs_f64(self.send_interval_sec) {
            Ok(interval) if !interval.is_zero() => Ok(interval),
            _ => Err(ScenarioConfigurationError::IntervalOutOfRange {
                value: self.send_interval_sec,
            }),
        }
    }

    pub fn stop_time(&self) -> SimTime {
        SimTime::from_secs_f64(self.simulation_duration_sec)
    }

    pub fn validate(&self) -> Result<(), ScenarioConfigurationError> {
        ensure_positive("simulation_duration_sec", self.simulation_duration_sec)?;
        self.send_interval()?;
        if (self.simulation_duration_sec / self.send_interval_sec).floor() > f64::from(u32::MAX) {
            return Err(ScenarioConfigurationError::TooManyPackets {
                duration_sec: self.simulation_duration_sec,
                interval_sec: self.send_interval_sec,
            });
        }

        let pairs = self.realized_connections();
        if pairs > 0 && u32::from(self.base_port) + (pairs - 1) > u32::from(u16::MAX) {
            return Err(ScenarioConfigurationError::PortRangeExhausted {
                base_port: self.base_port,
                pairs,
            });
        }
        Ok(())
    }
}

fn ensure_positive(field: &'static str, value: f64) -> Result<(), ScenarioConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ScenarioConfigurationError::NonPositive { field, value })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WifiStandard {
    #[serde(rename = "80211a")]
    Ieee80211a,
    #[serde(rename = "80211b")]
    Ieee80211b,
    #[serde(rename = "80211g")]
    Ieee80211g,
    #[serde(rename = "80211n")]
    Ieee80211n,
}

/// Parameters handed to the engine when installing the shared wireless medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub standard: WifiStandard,
    pub tx_power_dbm: f64,
    /// Radio range used by engines with a unit-disk propagation model.
    pub range_m: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            standard: WifiStandard::Ieee80211b,
            tx_power_dbm: 20.0,
            range_m: 250.0,
        }
    }
}

/// A contiguous IPv4 block. Hosts are numbered from `.1` upwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressBlock {
    pub network: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl Default for AddressBlock {
    fn default() -> Self {
        Self {
            network: Ipv4Addr::new(10, 1, 1, 0),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        }
    }
}

impl AddressBlock {
    pub fn prefix_len(&self) -> Result<u32, ScenarioConfigurationError> {
        let mask = u32::from(self.netmask);
        let len = mask.leading_ones();
        if mask.checked_shl(len).unwrap_or(0) != 0 {
            return Err(ScenarioConfigurationError::InvalidNetmask(self.netmask));
        }
        Ok(len)
    }

    /// Usable host addresses, excluding network and broadcast.
    pub fn host_capacity(&self) -> Result<u32, ScenarioConfigurationError> {
        let host_bits = 32 - self.prefix_len()?;
        Ok(match host_bits {
            0 | 1 => 0,
            32 => u32::MAX - 1,
            bits => (1u32 << bits) - 2,
        })
    }

    /// Address of the `index`-th host (0-based), if the block holds it.
    pub fn host(&self, index: u32) -> Option<Ipv4Addr> {
        let capacity = self.host_capacity().ok()?;
        if index >= capacity {
            return None;
        }
        let base = u32::from(self.network) & u32::from(self.netmask);
        Some(Ipv4Addr::from(base + index + 1))
    }

    pub fn check_capacity(&self, node_count: u32) -> Result<(), ScenarioConfigurationError> {
        let capacity = self.host_capacity()?;
        if node_count > capacity {
            return Err(ScenarioConfigurationError::AddressBlockExhausted {
                network: self.network,
                netmask: self.netmask,
                capacity,
                node_count,
            });
        }
        Ok(())
    }
}

/// Knobs of the in-process reference engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Independent drop probability on every hop.
    pub loss_rate: f64,
    pub min_hop_latency_us: u64,
    pub max_hop_latency_us: u64,
    pub seed: u64,
    /// Sinks answer every datagram back to its sender.
    pub echo_replies: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            min_hop_latency_us: 1_000,
            max_hop_latency_us: 5_000,
            seed: 0,
            echo_replies: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub path: PathBuf,
    pub title: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("manet_results.txt"),
            title: "Urban Mobility".to_string(),
        }
    }
}

/// Everything needed to assemble and run one experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub run: RunConfig,
    pub channel: ChannelConfig,
    pub addressing: AddressBlock,
    pub engine: EngineConfig,
    pub report: ReportConfig,
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<(), ScenarioConfigurationError> {
        self.run.validate()?;
        ensure_positive("channel.range_m", self.channel.range_m)?;
        self.addressing.check_capacity(self.run.node_count)
    }
}
