use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

use crate::metrics::{FlowMetric, Reduction, RunStatus};

pub const STATUS_OK: &str = "ok";
pub const STATUS_NO_ACTIVE_FLOWS: &str = "no_active_flows";
const UNDEFINED: &str = "n/a";

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Active => STATUS_OK,
        RunStatus::NoActiveFlows => STATUS_NO_ACTIVE_FLOWS,
    }
}

fn describe_tuple(metric: &FlowMetric) -> String {
    match &metric.tuple {
        Some(tuple) => tuple.to_string(),
        None => "unresolved".to_string(),
    }
}

/// One console/report line per active flow.
pub fn flow_line(metric: &FlowMetric) -> String {
    format!(
        "Flow {}: {} throughput={:.3} Kbps delay={:.3} ms jitter={:.3} ms loss={:.3}%",
        metric.key,
        describe_tuple(metric),
        metric.throughput_kbps,
        metric.avg_delay_ms,
        metric.jitter_ms,
        metric.loss_percent
    )
}

/// Renders the report: a title line, one `key: value` per aggregate field,
/// then per-flow lines as `#` comments.
///
/// Means over flows are written as `n/a` when no flow was active.
pub fn render_report(title: &str, reduction: &Reduction) -> String {
    let aggregate = &reduction.aggregate;
    let mean = |value: f64| {
        if aggregate.is_degenerate() {
            UNDEFINED.to_string()
        } else {
            format!("{value:.3}")
        }
    };

    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "# MANET Results - {title}");
    let _ = writeln!(out, "Simulation_time_sec: {}", aggregate.simulation_time_sec);
    let _ = writeln!(out, "Active_flows: {}", aggregate.active_flows);
    let _ = writeln!(out, "Average_latency_ms: {}", mean(aggregate.avg_latency_ms));
    let _ = writeln!(out, "Average_jitter_ms: {}", mean(aggregate.avg_jitter_ms));
    let _ = writeln!(
        out,
        "Total_throughput_Kbps: {:.3}",
        aggregate.total_throughput_kbps
    );
    let _ = writeln!(
        out,
        "Packet_loss_percent: {:.3}",
        aggregate.packet_loss_percent
    );
    let _ = writeln!(out, "Total_TX_packets: {}", aggregate.total_tx_packets);
    let _ = writeln!(out, "Total_RX_packets: {}", aggregate.total_rx_packets);
    let _ = writeln!(out, "Status: {}", status_label(aggregate.status));
    for metric in &reduction.per_flow {
        let _ = writeln!(out, "# {}", flow_line(metric));
    }
    out
}

pub fn write_report(path: &Path, title: &str, reduction: &Reduction) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_report(title, reduction))?;
    info!("Results written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::FlowObservation;
    use crate::metrics::reduce;
    use manet_lab_abstract::{FiveTuple, FlowKey, FlowRecord, PROTOCOL_UDP};
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn fields(report: &str) -> HashMap<String, String> {
        report
            .lines()
            .filter(|l| !l.starts_with('#'))
            .filter_map(|l| l.split_once(": "))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn active_reduction() -> Reduction {
        let observation = FlowObservation {
            key: FlowKey(1),
            record: FlowRecord {
                tx_packets: 100,
                rx_packets: 80,
                tx_bytes: 54_000,
                rx_bytes: 43_200,
                lost_packets: 20,
                delay_sum: Duration::from_millis(800),
                jitter_sum: Duration::from_millis(79),
            },
            tuple: Some(FiveTuple {
                source_address: Ipv4Addr::new(10, 1, 1, 51),
                destination_address: Ipv4Addr::new(10, 1, 1, 1),
                protocol: PROTOCOL_UDP,
                source_port: 49153,
                destination_port: 9000,
            }),
        };
        reduce(&[observation], 100.0)
    }

    #[test]
    fn report_carries_every_field() {
        let report = render_report("Urban Mobility", &active_reduction());
        assert!(report.starts_with("# MANET Results - Urban Mobility\n"));

        let fields = fields(&report);
        assert_eq!(fields["Simulation_time_sec"], "100");
        assert_eq!(fields["Active_flows"], "1");
        assert_eq!(fields["Average_latency_ms"], "10.000");
        assert_eq!(fields["Average_jitter_ms"], "1.000");
        assert_eq!(fields["Total_throughput_Kbps"], "3.456");
        assert_eq!(fields["Packet_loss_percent"], "20.000");
        assert_eq!(fields["Total_TX_packets"], "100");
        assert_eq!(fields["Total_RX_packets"], "80");
        assert_eq!(fields["Status"], STATUS_OK);
        assert!(report.contains("# Flow 1: 10.1.1.51 -> 10.1.1.1 throughput=3.456 Kbps"));
    }

    #[test]
    fn no_active_flows_is_explicit() {
        let report = render_report("empty", &reduce(&[], 600.0));
        let fields = fields(&report);
        assert_eq!(fields["Active_flows"], "0");
        assert_eq!(fields["Average_latency_ms"], UNDEFINED);
        assert_eq!(fields["Average_jitter_ms"], UNDEFINED);
        assert_eq!(fields["Packet_loss_percent"], "0.000");
        assert_eq!(fields["Status"], STATUS_NO_ACTIVE_FLOWS);
        assert!(!report.contains("NaN"));
    }

    #[test]
    fn write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("manet_results.txt");
        write_report(&path, "Density 100", &active_reduction()).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("# MANET Results - Density 100"));
        assert_eq!(fields(&written)["Total_RX_packets"], "80");
    }
}
