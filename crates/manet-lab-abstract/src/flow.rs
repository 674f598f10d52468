use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::node::NodeIndex;

/// IANA protocol number for UDP.
pub const PROTOCOL_UDP: u8 = 17;

/// Engine-assigned identity of a flow. Ordering is the iteration order of every reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowKey(pub u32);

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addresses and ports that classify packets into a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FiveTuple {
    pub source_address: Ipv4Addr,
    pub destination_address: Ipv4Addr,
    pub protocol: u8,
    pub source_port: u16,
    pub destination_port: u16,
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source_address, self.destination_address)
    }
}

/// Cumulative counters for one flow, maintained by the engine.
///
/// `jitter_sum` accumulates |delay(n) - delay(n-1)| and is only meaningful once
/// more than one packet was received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub lost_packets: u64,
    pub delay_sum: Duration,
    pub jitter_sum: Duration,
}

impl FlowRecord {
    pub fn has_traffic(&self) -> bool {
        self.rx_packets > 0
    }
}

/// Ordered (client, server, port) traffic relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowEndpointPair {
    pub client: NodeIndex,
    pub server: NodeIndex,
    pub port: u16,
}

impl fmt::Display for FlowEndpointPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Node {} -> Node {} (port {})",
            self.client, self.server, self.port
        )
    }
}
