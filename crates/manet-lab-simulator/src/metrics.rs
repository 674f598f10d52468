//! Per-flow rates and run-level aggregates.
//!
//! The reduction is a pure fold over observations in ascending flow-key
//! order. Flows that never received a packet are filtered out before the fold
//! and only show up in the transmitted/received totals.

use manet_lab_abstract::{FiveTuple, FlowKey};
use serde::Serialize;

use crate::collector::FlowObservation;

/// Derived figures for one flow that received at least one packet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowMetric {
    pub key: FlowKey,
    pub tuple: Option<FiveTuple>,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub throughput_kbps: f64,
    pub avg_delay_ms: f64,
    pub jitter_ms: f64,
    pub loss_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    /// No flow received anything. Means are reported as zero.
    NoActiveFlows,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateMetrics {
    pub simulation_time_sec: f64,
    pub active_flows: u32,
    pub avg_latency_ms: f64,
    pub avg_jitter_ms: f64,
    pub total_throughput_kbps: f64,
    pub packet_loss_percent: f64,
    pub total_tx_packets: u64,
    pub total_rx_packets: u64,
    pub status: RunStatus,
}

impl AggregateMetrics {
    pub fn is_degenerate(&self) -> bool {
        self.status == RunStatus::NoActiveFlows
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reduction {
    pub per_flow: Vec<FlowMetric>,
    pub aggregate: AggregateMetrics,
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

pub fn flow_metric(observation: &FlowObservation, simulation_duration_sec: f64) -> FlowMetric {
    let record = &observation.record;
    let tx = record.tx_packets as f64;
    let rx = record.rx_packets as f64;
    let jitter_ms = if record.rx_packets > 1 {
        record.jitter_sum.as_secs_f64() / (rx - 1.0) * 1000.0
    } else {
        0.0
    };

    FlowMetric {
        key: observation.key,
        tuple: observation.tuple,
        tx_packets: record.tx_packets,
        rx_packets: record.rx_packets,
        throughput_kbps: ratio(record.rx_bytes as f64 * 8.0, simulation_duration_sec) / 1000.0,
        avg_delay_ms: ratio(record.delay_sum.as_secs_f64(), rx) * 1000.0,
        jitter_ms,
        loss_percent: ratio(tx - rx, tx) * 100.0,
    }
}

#[derive(Default)]
struct Totals {
    tx: u64,
    rx: u64,
    throughput_kbps: f64,
    delay_ms: f64,
    jitter_ms: f64,
}

pub fn reduce(observations: &[FlowObservation], simulation_duration_sec: f64) -> Reduction {
    let mut ordered: Vec<&FlowObservation> = observations.iter().collect();
    ordered.sort_by_key(|o| o.key);

    let (tx, rx) = ordered.iter().fold((0u64, 0u64), |(tx, rx), o| {
        (
            tx.saturating_add(o.record.tx_packets),
            rx.saturating_add(o.record.rx_packets),
        )
    });

    let per_flow: Vec<FlowMetric> = ordered
        .iter()
        .filter(|o| o.record.has_traffic())
        .map(|o| flow_metric(o, simulation_duration_sec))
        .collect();

    let totals = per_flow.iter().fold(
        Totals {
            tx,
            rx,
            ..Default::default()
        },
        |acc, m| Totals {
            throughput_kbps: acc.throughput_kbps + m.throughput_kbps,
            delay_ms: acc.delay_ms + m.avg_delay_ms,
            jitter_ms: acc.jitter_ms + m.jitter_ms,
            ..acc
        },
    );

    let active_flows = per_flow.len() as u32;
    let active = f64::from(active_flows);
    let aggregate = AggregateMetrics {
        simulation_time_sec: simulation_duration_sec,
        active_flows,
        avg_latency_ms: ratio(totals.delay_ms, active),
        avg_jitter_ms: ratio(totals.jitter_ms, active),
        total_throughput_kbps: totals.throughput_kbps,
        packet_loss_percent: ratio(totals.tx as f64 - totals.rx as f64, totals.tx as f64) * 100.0,
        total_tx_packets: totals.tx,
        total_rx_packets: totals.rx,
        status: if active_flows == 0 {
            RunStatus::NoActiveFlows
        } else {
            RunStatus::Active
        },
    };

    Reduction {
        per_flow,
        aggregate,
    }
}
