use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use manet_lab_abstract::{
    EngineError, ExperimentConfig, ExperimentFile, MobilitySource, SimulationEngine,
};

use crate::collector::collect_flow_observations;
use crate::metrics::{AggregateMetrics, reduce};
use crate::report::flow_line;
use crate::scenario::{ScenarioError, build_scenario};
use crate::trace::ExperimentOutcome;

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("failed to read experiment file {path}")]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse experiment file {path}")]
    FileInvalid {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error("simulation engine failed: {0}")]
    Engine(#[from] EngineError),
}

pub fn load_experiment_file(path: &Path) -> Result<ExperimentFile, ExperimentError> {
    let content = fs::read_to_string(path).map_err(|source| ExperimentError::FileUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ExperimentError::FileInvalid {
        path: path.to_path_buf(),
        source,
    })
}

/// Build the scenario into `engine`, run it to the configured stop time and
/// reduce whatever the flow monitor recorded.
///
/// A halted run is reduced exactly like a complete one.
pub fn run_experiment<E>(
    config: &ExperimentConfig,
    engine: &mut E,
    mobility: &dyn MobilitySource,
) -> Result<ExperimentOutcome, ExperimentError>
where
    E: SimulationEngine + ?Sized,
{
    let scenario = build_scenario(config, engine, mobility)?;

    info!("Starting simulation until {}", scenario.stop_time());
    let outcome = engine.run(scenario.stop_time())?;
    if outcome.halted {
        warn!("Simulation halted early at {}", outcome.stopped_at);
    } else {
        info!("Simulation completed at {}", outcome.stopped_at);
    }

    let observations = collect_flow_observations(&*engine);
    let reduction = reduce(&observations, config.run.simulation_duration_sec);
    for metric in &reduction.per_flow {
        info!("{}", flow_line(metric));
    }
    log_aggregate(&reduction.aggregate);

    Ok(ExperimentOutcome {
        config: config.clone(),
        pairs: scenario.pairs().to_vec(),
        per_flow: reduction.per_flow,
        aggregate: reduction.aggregate,
        stopped_at: outcome.stopped_at,
        halted: outcome.halted,
    })
}

fn log_aggregate(aggregate: &AggregateMetrics) {
    if aggregate.is_degenerate() {
        warn!(
            "No active flows ({} packets transmitted, none received)",
            aggregate.total_tx_packets
        );
        return;
    }
    info!(
        "Active flows: {}, avg latency {:.3} ms, avg jitter {:.3} ms, throughput {:.3} Kbps, loss {:.3}%",
        aggregate.active_flows,
        aggregate.avg_latency_ms,
        aggregate.avg_jitter_ms,
        aggregate.total_throughput_kbps,
        aggregate.packet_loss_percent
    );
    info!(
        "Packets transmitted: {}, received: {}",
        aggregate.total_tx_packets, aggregate.total_rx_packets
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn experiment_file_round_trips_through_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "name = \"Density 20\"\n[run]\nnode_count = 20\n[engine]\nseed = 3"
        )
        .unwrap();

        let parsed = load_experiment_file(file.path()).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("Density 20"));
        assert_eq!(parsed.run.node_count, Some(20));
        assert_eq!(parsed.engine.seed, Some(3));
    }

    #[test]
    fn bad_experiment_files_are_reported() {
        let missing = load_experiment_file(Path::new("/nonexistent/experiment.toml"));
        assert!(matches!(missing, Err(ExperimentError::FileUnreadable { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[run]\nnode_count = \"many\"").unwrap();
        assert!(matches!(
            load_experiment_file(file.path()),
            Err(ExperimentError::FileInvalid { .. })
        ));
    }
}
