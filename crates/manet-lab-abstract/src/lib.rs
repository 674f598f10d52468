pub mod config;
pub mod error;
pub mod flow;
pub mod interface;
pub mod mobility;
pub mod node;
pub mod scenario;
pub mod time;

pub use config::{
    AddressBlock, ChannelConfig, EngineConfig, ExperimentConfig, ReportConfig, RunConfig,
    WifiStandard,
};
pub use error::{EngineError, ScenarioConfigurationError};
pub use flow::{FiveTuple, FlowEndpointPair, FlowKey, FlowRecord, PROTOCOL_UDP};
pub use interface::{
    Addressing, AppHandle, ApplicationHost, DeviceHandle, FlowMonitor, GeneratorParams,
    InterfaceBinding, MobilityModel, RoutingCapability, RunOutcome, SimulationEngine,
    WirelessMedium,
};
pub use mobility::{MobilitySchedule, MobilitySource, Waypoint};
pub use node::{NodeIndex, Position};
pub use scenario::{
    ChannelOverride, EngineOverride, ExperimentFile, ReportOverride, RunConfigOverride,
};
pub use time::SimTime;
