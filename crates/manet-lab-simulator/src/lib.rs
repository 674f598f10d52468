pub mod collector;
pub mod engine;
pub mod experiment;
pub mod metrics;
pub mod mobility;
pub mod report;
pub mod scenario;
pub mod trace;

pub use collector::{FlowObservation, collect_flow_observations};
pub use engine::{HaltHandle, Simulator};
pub use experiment::{ExperimentError, load_experiment_file, run_experiment};
pub use metrics::{AggregateMetrics, FlowMetric, Reduction, RunStatus, reduce};
pub use mobility::{Ns2TraceFile, parse_ns2_trace, write_ns2_trace};
pub use report::{render_report, write_report};
pub use scenario::{Scenario, ScenarioError, ScenarioPlan, build_scenario, plan_flow_pairs};
pub use trace::ExperimentOutcome;
