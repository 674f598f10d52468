use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use manet_lab_abstract::{EngineOverride, ExperimentConfig, RunConfigOverride};
use manet_lab_simulator::{
    ExperimentOutcome, Ns2TraceFile, Simulator, load_experiment_file, run_experiment,
    write_report,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "MANET experiment runner")]
struct Args {
    /// Load an experiment description (TOML) from disk.
    #[arg(long)]
    config: Option<PathBuf>,

    /// ns-2 mobility trace.
    #[arg(long)]
    mobility_file: Option<PathBuf>,

    #[arg(long)]
    num_nodes: Option<u32>,

    /// Simulated duration in seconds.
    #[arg(long)]
    time: Option<f64>,

    #[arg(long)]
    packet_size: Option<u32>,

    /// Seconds between generator packets.
    #[arg(long)]
    interval: Option<f64>,

    #[arg(long)]
    connections: Option<u32>,

    #[arg(long)]
    base_port: Option<u16>,

    /// Seed for the reference engine's loss and latency draws.
    #[arg(long)]
    seed: Option<u64>,

    /// Radio range in metres.
    #[arg(long)]
    range: Option<f64>,

    #[arg(long)]
    title: Option<String>,

    /// Where to write the results report.
    #[arg(long)]
    report_out: Option<PathBuf>,

    /// Write a JSON trace of the finished experiment.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("manet-sim starting…");

    let config = args.experiment_config()?;
    info!(
        "Mobility file: {}, nodes: {}, time: {} sec",
        config.run.mobility_trace.display(),
        config.run.node_count,
        config.run.simulation_duration_sec
    );

    let mobility = Ns2TraceFile::new(config.run.mobility_trace.clone());
    let mut engine = Simulator::new(config.engine.clone());
    let outcome = run_experiment(&config, &mut engine, &mobility)
        .context("Experiment failed")?;

    let reduction = outcome.reduction();
    write_report(&config.report.path, &config.report.title, &reduction).with_context(|| {
        format!(
            "Failed to write results report {}",
            config.report.path.display()
        )
    })?;

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &outcome)?;
    }

    Ok(())
}

impl Args {
    /// Defaults, then the experiment file, then command-line flags.
    fn experiment_config(&self) -> Result<ExperimentConfig> {
        let mut config = ExperimentConfig::default();
        if let Some(path) = &self.config {
            let file = load_experiment_file(path)?;
            if let Some(name) = &file.name {
                info!("Loaded experiment '{}' from {}", name, path.display());
            }
            file.apply_to(&mut config);
        }

        RunConfigOverride {
            node_count: self.num_nodes,
            simulation_duration_sec: self.time,
            packet_size_bytes: self.packet_size,
            send_interval_sec: self.interval,
            mobility_trace: self.mobility_file.clone(),
            num_connections: self.connections,
            base_port: self.base_port,
        }
        .apply_to(&mut config.run);
        EngineOverride {
            seed: self.seed,
            ..Default::default()
        }
        .apply_to(&mut config.engine);

        if let Some(range) = self.range {
            config.channel.range_m = range;
        }
        if let Some(title) = &self.title {
            config.report.title = title.clone();
        }
        if let Some(path) = &self.report_out {
            config.report.path = path.clone();
        }
        Ok(config)
    }
}

fn write_trace(path: &Path, outcome: &ExperimentOutcome) -> Result<()> {
    let data =
        serde_json::to_vec_pretty(outcome).context("Failed to serialize experiment trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}
