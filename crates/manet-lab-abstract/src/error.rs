use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;

use crate::node::NodeIndex;

/// Malformed or out-of-range experiment configuration. Always raised before
/// any simulated time advances.
#[derive(Debug, Error)]
pub enum ScenarioConfigurationError {
    #[error(
        "mobility trace line {line} references node {node} but only {node_count} nodes are configured"
    )]
    UnknownNode {
        node: u32,
        node_count: u32,
        line: usize,
    },

    #[error("mobility schedule references node {node} but only {node_count} nodes are configured")]
    ScheduleNodeOutOfRange { node: u32, node_count: u32 },

    #[error("malformed mobility trace at line {line}: {reason}")]
    MalformedTrace { line: usize, reason: String },

    #[error("failed to read mobility trace {}", path.display())]
    TraceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{field} must be a positive finite number, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("address block {network}/{netmask} holds {capacity} hosts, cannot address {node_count} nodes")]
    AddressBlockExhausted {
        network: Ipv4Addr,
        netmask: Ipv4Addr,
        capacity: u32,
        node_count: u32,
    },

    #[error("netmask {0} is not a contiguous prefix")]
    InvalidNetmask(Ipv4Addr),

    #[error("base port {base_port} leaves no room for {pairs} connections")]
    PortRangeExhausted { base_port: u16, pairs: u32 },

    #[error("send_interval_sec {value} is not representable as a nanosecond interval")]
    IntervalOutOfRange { value: f64 },

    #[error(
        "{duration_sec} s at one packet every {interval_sec} s exceeds {} packets per generator",
        u32::MAX
    )]
    TooManyPackets { duration_sec: f64, interval_sec: f64 },
}

/// Failures reported by a simulation engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine has no node {0}")]
    UnknownNode(NodeIndex),

    #[error("engine has no device {0}")]
    UnknownDevice(u32),

    #[error("engine has no application {0}")]
    UnknownApplication(u32),

    #[error("node {0} has no wireless device installed")]
    NoDevice(NodeIndex),

    #[error("{0}")]
    Fault(String),
}
