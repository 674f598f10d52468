use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::{AddressBlock, ChannelConfig};
use crate::error::EngineError;
use crate::flow::{FiveTuple, FlowKey, FlowRecord};
use crate::mobility::MobilitySchedule;
use crate::node::NodeIndex;
use crate::time::SimTime;

/// Engine handle for an installed wireless device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DeviceHandle(pub u32);

/// Engine handle for an installed application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AppHandle(pub u32);

impl fmt::Display for AppHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app#{}", self.0)
    }
}

/// Address bound to one node's device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterfaceBinding {
    pub node: NodeIndex,
    pub device: DeviceHandle,
    pub address: Ipv4Addr,
}

/// Traffic generator parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeneratorParams {
    pub destination: Ipv4Addr,
    pub port: u16,
    pub packet_size: u32,
    pub interval: Duration,
    pub max_packets: u32,
}

/// How an engine run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub stopped_at: SimTime,
    /// True when the run was halted externally before reaching its stop time.
    pub halted: bool,
}

/// Binds time-varying positions to nodes.
pub trait MobilityModel {
    fn install_mobility(
        &mut self,
        nodes: &[NodeIndex],
        schedule: &MobilitySchedule,
    ) -> Result<(), EngineError>;
}

/// A shared broadcast medium in ad-hoc mode.
pub trait WirelessMedium {
    /// Install one device per node, returned in the order of `nodes`.
    fn install_wireless_medium(
        &mut self,
        nodes: &[NodeIndex],
        channel: &ChannelConfig,
    ) -> Result<Vec<DeviceHandle>, EngineError>;
}

/// Opaque multi-hop routing. Route discovery and maintenance belong to the engine.
pub trait RoutingCapability {
    fn install_routing(&mut self, nodes: &[NodeIndex]) -> Result<(), EngineError>;
}

pub trait Addressing {
    /// Assign one address per device from `block`, in device order.
    fn assign_addresses(
        &mut self,
        devices: &[DeviceHandle],
        block: &AddressBlock,
    ) -> Result<Vec<InterfaceBinding>, EngineError>;
}

/// Application installation and lifecycle.
pub trait ApplicationHost {
    fn install_sink_application(
        &mut self,
        node: NodeIndex,
        port: u16,
    ) -> Result<AppHandle, EngineError>;

    fn install_generator_application(
        &mut self,
        node: NodeIndex,
        params: GeneratorParams,
    ) -> Result<AppHandle, EngineError>;

    fn start_application(&mut self, app: AppHandle, at: SimTime) -> Result<(), EngineError>;

    fn stop_application(&mut self, app: AppHandle, at: SimTime) -> Result<(), EngineError>;
}

/// Per-flow counters kept by the engine. Read-only from the caller's side.
pub trait FlowMonitor {
    fn flow_records(&self) -> BTreeMap<FlowKey, FlowRecord>;

    fn resolve_flow_addresses(&self, key: FlowKey) -> Option<FiveTuple>;
}

/// The discrete-event engine an experiment is handed to.
///
/// The engine owns the virtual clock; callers pass the handle explicitly.
pub trait SimulationEngine:
    MobilityModel + WirelessMedium + RoutingCapability + Addressing + ApplicationHost + FlowMonitor
{
    fn create_nodes(&mut self, count: u32) -> Result<Vec<NodeIndex>, EngineError>;

    /// Advance virtual time until `stop_at` or an external halt.
    fn run(&mut self, stop_at: SimTime) -> Result<RunOutcome, EngineError>;
}
