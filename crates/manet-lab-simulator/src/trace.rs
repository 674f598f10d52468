use manet_lab_abstract::{ExperimentConfig, FlowEndpointPair, SimTime};
use serde::Serialize;

use crate::metrics::{AggregateMetrics, FlowMetric, Reduction};

/// Everything a finished experiment produced, as written to `--trace-out`.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentOutcome {
    pub config: ExperimentConfig,
    pub pairs: Vec<FlowEndpointPair>,
    pub per_flow: Vec<FlowMetric>,
    pub aggregate: AggregateMetrics,
    pub stopped_at: SimTime,
    pub halted: bool,
}

impl ExperimentOutcome {
    pub fn reduction(&self) -> Reduction {
        Reduction {
            per_flow: self.per_flow.clone(),
            aggregate: self.aggregate.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::reduce;
    use manet_lab_abstract::NodeIndex;

    #[test]
    fn serializes_with_stable_field_names() {
        let outcome = ExperimentOutcome {
            config: ExperimentConfig::default(),
            pairs: vec![FlowEndpointPair {
                client: NodeIndex(50),
                server: NodeIndex(0),
                port: 9000,
            }],
            per_flow: Vec::new(),
            aggregate: reduce(&[], 600.0).aggregate,
            stopped_at: SimTime::from_secs(600),
            halted: false,
        };
        let value = serde_json::to_value(&outcome).unwrap();

        assert_eq!(value["pairs"][0]["client"], 50);
        assert_eq!(value["pairs"][0]["port"], 9000);
        assert_eq!(value["aggregate"]["status"], "no_active_flows");
        assert_eq!(value["aggregate"]["active_flows"], 0);
        assert_eq!(value["config"]["run"]["base_port"], 9000);
        assert_eq!(value["config"]["channel"]["standard"], "80211b");
        assert_eq!(value["halted"], false);
    }
}
