use std::net::Ipv4Addr;
use std::time::Duration;

use manet_lab_abstract::{
    AddressBlock, AppHandle, ChannelConfig, EngineError, ExperimentConfig, FlowEndpointPair,
    GeneratorParams, InterfaceBinding, MobilitySource, NodeIndex, RunConfig,
    ScenarioConfigurationError, SimTime, SimulationEngine,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Sinks come up one second into the run.
pub const SINK_START: SimTime = SimTime::from_secs(1);
/// Generators start after the sinks are listening.
pub const GENERATOR_START: SimTime = SimTime::from_secs(2);
/// Generators go quiet this long before the run stops so in-flight packets can land.
pub const GENERATOR_STOP_LEAD: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Configuration(#[from] ScenarioConfigurationError),
    #[error("simulation engine rejected scenario: {0}")]
    Engine(#[from] EngineError),
}

/// Client/server pairs for a population: client `i + n/2` talks to server `i` on `base_port + i`.
///
/// Produces `min(num_connections, node_count / 2)` pairs, so small populations
/// silently get fewer flows and every index stays below `node_count`.
pub fn plan_flow_pairs(node_count: u32, num_connections: u32, base_port: u16) -> Vec<FlowEndpointPair> {
    let half = node_count / 2;
    (0..num_connections.min(half))
        .map_while(|i| {
            let port = u16::try_from(i).ok().and_then(|i| base_port.checked_add(i))?;
            Some(FlowEndpointPair {
                client: NodeIndex(i + half),
                server: NodeIndex(i),
                port,
            })
        })
        .collect()
}

/// Application start/stop times for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApplicationSchedule {
    pub sink_start: SimTime,
    pub sink_stop: SimTime,
    pub generator_start: SimTime,
    pub generator_stop: SimTime,
    pub stop_time: SimTime,
}

impl ApplicationSchedule {
    pub fn for_duration(duration_sec: f64) -> Self {
        let stop_time = SimTime::from_secs_f64(duration_sec);
        let generator_stop =
            SimTime::from_nanos(stop_time.as_nanos().saturating_sub(GENERATOR_STOP_LEAD.as_nanos() as u64));
        Self {
            sink_start: SINK_START,
            sink_stop: stop_time,
            generator_start: GENERATOR_START,
            generator_stop,
            stop_time,
        }
    }
}

/// Everything that can be decided about a scenario without touching an engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioPlan {
    pub run: RunConfig,
    pub channel: ChannelConfig,
    pub addressing: AddressBlock,
    pub pairs: Vec<FlowEndpointPair>,
    pub schedule: ApplicationSchedule,
    pub send_interval: Duration,
    pub max_packets: u32,
}

impl ScenarioPlan {
    pub fn new(config: &ExperimentConfig) -> Result<Self, ScenarioConfigurationError> {
        config.validate()?;
        let run = &config.run;

        let pairs = plan_flow_pairs(run.node_count, run.num_connections, run.base_port);
        if (pairs.len() as u32) < run.num_connections {
            warn!(
                "Only {} of {} requested connections fit in {} nodes",
                pairs.len(),
                run.num_connections,
                run.node_count
            );
        }

        Ok(Self {
            run: run.clone(),
            channel: config.channel.clone(),
            addressing: config.addressing,
            pairs,
            schedule: ApplicationSchedule::for_duration(run.simulation_duration_sec),
            send_interval: run.send_interval()?,
            max_packets: run.max_packets(),
        })
    }

    fn generator_params(&self, destination: Ipv4Addr, port: u16) -> GeneratorParams {
        GeneratorParams {
            destination,
            port,
            packet_size: self.run.packet_size_bytes,
            interval: self.send_interval,
            max_packets: self.max_packets,
        }
    }

    /// Wire the plan into `engine`: nodes, mobility, medium, routing, addresses, applications.
    pub fn install<E>(
        self,
        engine: &mut E,
        mobility: &dyn MobilitySource,
    ) -> Result<Scenario, ScenarioError>
    where
        E: SimulationEngine + ?Sized,
    {
        let node_count = self.run.node_count;
        let schedule = mobility.load(node_count)?;

        let nodes = engine.create_nodes(node_count)?;
        info!("Created {} nodes", nodes.len());

        engine.install_mobility(&nodes, &schedule)?;
        info!(
            "Mobility loaded from {} ({} waypoints)",
            mobility.describe(),
            schedule.waypoint_count()
        );

        let devices = engine.install_wireless_medium(&nodes, &self.channel)?;
        info!("Wireless medium configured ({:?})", self.channel.standard);

        engine.install_routing(&nodes)?;
        info!("Routing installed");

        let interfaces = engine.assign_addresses(&devices, &self.addressing)?;
        info!("Addresses assigned from {}", self.addressing.network);

        let mut applications = Vec::with_capacity(self.pairs.len());
        for (i, pair) in self.pairs.iter().enumerate() {
            let server_address = interfaces
                .get(pair.server.as_usize())
                .map(|binding| binding.address)
                .ok_or(EngineError::NoDevice(pair.server))?;

            let sink = engine.install_sink_application(pair.server, pair.port)?;
            engine.start_application(sink, self.schedule.sink_start)?;
            engine.stop_application(sink, self.schedule.sink_stop)?;

            let generator = engine.install_generator_application(
                pair.client,
                self.generator_params(server_address, pair.port),
            )?;
            engine.start_application(generator, self.schedule.generator_start)?;
            engine.stop_application(generator, self.schedule.generator_stop)?;

            info!("Connection {}: Node {} -> Node {}", i, pair.client, pair.server);
            applications.push(FlowApplications {
                pair: *pair,
                server_address,
                sink,
                generator,
            });
        }

        Ok(Scenario {
            plan: self,
            nodes,
            interfaces,
            applications,
        })
    }
}

/// Applications installed for one endpoint pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlowApplications {
    pub pair: FlowEndpointPair,
    pub server_address: Ipv4Addr,
    pub sink: AppHandle,
    pub generator: AppHandle,
}

/// A fully wired, not yet executed topology.
#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    pub plan: ScenarioPlan,
    pub nodes: Vec<NodeIndex>,
    pub interfaces: Vec<InterfaceBinding>,
    pub applications: Vec<FlowApplications>,
}

impl Scenario {
    pub fn stop_time(&self) -> SimTime {
        self.plan.schedule.stop_time
    }

    pub fn pairs(&self) -> &[FlowEndpointPair] {
        &self.plan.pairs
    }
}

/// Validate `config`, plan the scenario and install it into `engine`.
pub fn build_scenario<E>(
    config: &ExperimentConfig,
    engine: &mut E,
    mobility: &dyn MobilitySource,
) -> Result<Scenario, ScenarioError>
where
    E: SimulationEngine + ?Sized,
{
    ScenarioPlan::new(config)?.install(engine, mobility)
}

#[cfg(test)]
mod tests {
    use super::*;
    use manet_lab_abstract::{
        Addressing, ApplicationHost, DeviceHandle, FiveTuple, FlowKey, FlowMonitor, FlowRecord,
        MobilityModel, MobilitySchedule, Position, RoutingCapability, RunOutcome, WirelessMedium,
    };
    use proptest::prelude::*;
    use std::collections::{BTreeMap, HashSet};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        CreateNodes(u32),
        Mobility(usize),
        Wireless(usize),
        Routing(usize),
        Addresses(usize),
        Sink(NodeIndex, u16),
        Generator(NodeIndex, GeneratorParams),
        Start(AppHandle, SimTime),
        Stop(AppHandle, SimTime),
    }

    #[derive(Default)]
    struct RecordingEngine {
        calls: Vec<Call>,
        next_app: u32,
    }

    impl RecordingEngine {
        fn app(&mut self) -> AppHandle {
            self.next_app += 1;
            AppHandle(self.next_app)
        }
    }

    impl MobilityModel for RecordingEngine {
        fn install_mobility(
            &mut self,
            nodes: &[NodeIndex],
            _schedule: &MobilitySchedule,
        ) -> Result<(), EngineError> {
            self.calls.push(Call::Mobility(nodes.len()));
            Ok(())
        }
    }

    impl WirelessMedium for RecordingEngine {
        fn install_wireless_medium(
            &mut self,
            nodes: &[NodeIndex],
            _channel: &ChannelConfig,
        ) -> Result<Vec<DeviceHandle>, EngineError> {
            self.calls.push(Call::Wireless(nodes.len()));
            Ok(nodes.iter().map(|n| DeviceHandle(n.0)).collect())
        }
    }

    impl RoutingCapability for RecordingEngine {
        fn install_routing(&mut self, nodes: &[NodeIndex]) -> Result<(), EngineError> {
            self.calls.push(Call::Routing(nodes.len()));
            Ok(())
        }
    }

    impl Addressing for RecordingEngine {
        fn assign_addresses(
            &mut self,
            devices: &[DeviceHandle],
            block: &AddressBlock,
        ) -> Result<Vec<InterfaceBinding>, EngineError> {
            self.calls.push(Call::Addresses(devices.len()));
            devices
                .iter()
                .map(|d| {
                    let address = block
                        .host(d.0)
                        .ok_or_else(|| EngineError::Fault("block exhausted".into()))?;
                    Ok(InterfaceBinding {
                        node: NodeIndex(d.0),
                        device: *d,
                        address,
                    })
                })
                .collect()
        }
    }

    impl ApplicationHost for RecordingEngine {
        fn install_sink_application(
            &mut self,
            node: NodeIndex,
            port: u16,
        ) -> Result<AppHandle, EngineError> {
            self.calls.push(Call::Sink(node, port));
            Ok(self.app())
        }

        fn install_generator_application(
            &mut self,
            node: NodeIndex,
            params: GeneratorParams,
        ) -> Result<AppHandle, EngineError> {
            self.calls.push(Call::Generator(node, params));
            Ok(self.app())
        }

        fn start_application(&mut self, app: AppHandle, at: SimTime) -> Result<(), EngineError> {
            self.calls.push(Call::Start(app, at));
            Ok(())
        }

        fn stop_application(&mut self, app: AppHandle, at: SimTime) -> Result<(), EngineError> {
            self.calls.push(Call::Stop(app, at));
            Ok(())
        }
    }

    impl FlowMonitor for RecordingEngine {
        fn flow_records(&self) -> BTreeMap<FlowKey, FlowRecord> {
            BTreeMap::new()
        }

        fn resolve_flow_addresses(&self, _key: FlowKey) -> Option<FiveTuple> {
            None
        }
    }

    impl SimulationEngine for RecordingEngine {
        fn create_nodes(&mut self, count: u32) -> Result<Vec<NodeIndex>, EngineError> {
            self.calls.push(Call::CreateNodes(count));
            Ok((0..count).map(NodeIndex).collect())
        }

        fn run(&mut self, stop_at: SimTime) -> Result<RunOutcome, EngineError> {
            Ok(RunOutcome {
                stopped_at: stop_at,
                halted: false,
            })
        }
    }

    fn config(node_count: u32, num_connections: u32) -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        config.run.node_count = node_count;
        config.run.num_connections = num_connections;
        config.run.simulation_duration_sec = 100.0;
        config.run.send_interval_sec = 2.0;
        config
    }

    #[test]
    fn reference_population_pairs_upper_half_with_lower_half() {
        let pairs = plan_flow_pairs(100, 5, 9000);
        assert_eq!(pairs.len(), 5);
        assert_eq!(
            pairs[0],
            FlowEndpointPair {
                client: NodeIndex(50),
                server: NodeIndex(0),
                port: 9000
            }
        );
        assert_eq!(
            pairs[4],
            FlowEndpointPair {
                client: NodeIndex(54),
                server: NodeIndex(4),
                port: 9004
            }
        );
    }

    #[test]
    fn small_populations_shrink_silently() {
        assert_eq!(plan_flow_pairs(5, 5, 9000).len(), 2);
        assert_eq!(plan_flow_pairs(1, 5, 9000).len(), 0);
        assert!(plan_flow_pairs(0, 5, 9000).is_empty());
        assert!(plan_flow_pairs(10, 0, 9000).is_empty());

        let pairs = plan_flow_pairs(7, 10, 9000);
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|p| p.client.0 < 7 && p.server.0 < 7));
    }

    #[test]
    fn application_schedule_orders_sinks_before_generators() {
        let schedule = ApplicationSchedule::for_duration(600.0);
        assert_eq!(schedule.sink_start, SimTime::from_secs(1));
        assert_eq!(schedule.generator_start, SimTime::from_secs(2));
        assert_eq!(schedule.generator_stop, SimTime::from_secs(599));
        assert_eq!(schedule.sink_stop, SimTime::from_secs(600));
        assert_eq!(schedule.stop_time, SimTime::from_secs(600));
        assert!(schedule.sink_start < schedule.generator_start);
        assert!(schedule.generator_stop < schedule.stop_time);

        let tiny = ApplicationSchedule::for_duration(0.5);
        assert_eq!(tiny.generator_stop, SimTime::ZERO);
    }

    #[test]
    fn install_wires_everything_in_order() {
        let mut engine = RecordingEngine::default();
        let mobility = MobilitySchedule::new(0);
        let scenario = build_scenario(&config(10, 2), &mut engine, &mobility).unwrap();

        assert_eq!(scenario.nodes.len(), 10);
        assert_eq!(scenario.applications.len(), 2);
        assert_eq!(scenario.stop_time(), SimTime::from_secs(100));
        assert_eq!(
            scenario.applications[1].server_address,
            Ipv4Addr::new(10, 1, 1, 2)
        );

        let head: Vec<Call> = engine.calls.iter().take(5).cloned().collect();
        assert_eq!(
            head,
            vec![
                Call::CreateNodes(10),
                Call::Mobility(10),
                Call::Wireless(10),
                Call::Routing(10),
                Call::Addresses(10),
            ]
        );

        let expected_params = GeneratorParams {
            destination: Ipv4Addr::new(10, 1, 1, 1),
            port: 9000,
            packet_size: 512,
            interval: Duration::from_secs(2),
            max_packets: 50,
        };
        assert_eq!(engine.calls[5], Call::Sink(NodeIndex(0), 9000));
        assert_eq!(engine.calls[6], Call::Start(AppHandle(1), SINK_START));
        assert_eq!(engine.calls[7], Call::Stop(AppHandle(1), SimTime::from_secs(100)));
        assert_eq!(engine.calls[8], Call::Generator(NodeIndex(5), expected_params));
        assert_eq!(engine.calls[9], Call::Start(AppHandle(2), GENERATOR_START));
        assert_eq!(engine.calls[10], Call::Stop(AppHandle(2), SimTime::from_secs(99)));
    }

    #[test]
    fn zero_nodes_is_a_valid_empty_scenario() {
        let mut engine = RecordingEngine::default();
        let scenario =
            build_scenario(&config(0, 5), &mut engine, &MobilitySchedule::new(0)).unwrap();
        assert!(scenario.nodes.is_empty());
        assert!(scenario.applications.is_empty());
    }

    #[test]
    fn mobility_referencing_unknown_node_aborts_before_engine_is_touched() {
        let mut engine = RecordingEngine::default();
        let mut schedule = MobilitySchedule::new(20);
        schedule.place(NodeIndex(15), Position::ORIGIN).unwrap();

        let err = build_scenario(&config(10, 2), &mut engine, &schedule).unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Configuration(ScenarioConfigurationError::ScheduleNodeOutOfRange {
                node: 15,
                ..
            })
        ));
        assert!(engine.calls.is_empty());
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let mut cfg = config(10, 2);
        cfg.run.send_interval_sec = -1.0;
        let mut engine = RecordingEngine::default();
        let err = build_scenario(&cfg, &mut engine, &MobilitySchedule::new(0)).unwrap_err();
        assert!(matches!(err, ScenarioError::Configuration(_)));
    }

    #[test]
    fn unrepresentable_intervals_fail_without_touching_the_engine() {
        let mut huge = config(10, 2);
        huge.run.send_interval_sec = 1e20;
        let mut engine = RecordingEngine::default();
        let err = build_scenario(&huge, &mut engine, &MobilitySchedule::new(10)).unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Configuration(ScenarioConfigurationError::IntervalOutOfRange { .. })
        ));
        assert!(engine.calls.is_empty());

        let mut flood = config(10, 2);
        flood.run.simulation_duration_sec = 10_000.0;
        flood.run.send_interval_sec = 1e-6;
        let err = build_scenario(&flood, &mut engine, &MobilitySchedule::new(10)).unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Configuration(ScenarioConfigurationError::TooManyPackets { .. })
        ));
        assert!(engine.calls.is_empty());
    }

    proptest! {
        #[test]
        fn enough_nodes_yield_every_requested_pair(
            num_connections in 0u32..64,
            extra in 0u32..64,
            base_port in 1024u16..60000,
        ) {
            let node_count = 2 * num_connections + extra;
            let pairs = plan_flow_pairs(node_count, num_connections, base_port);
            prop_assert_eq!(pairs.len() as u32, num_connections);

            let ports: HashSet<u16> = pairs.iter().map(|p| p.port).collect();
            prop_assert_eq!(ports.len(), pairs.len());
            let endpoints: HashSet<(NodeIndex, NodeIndex)> =
                pairs.iter().map(|p| (p.client, p.server)).collect();
            prop_assert_eq!(endpoints.len(), pairs.len());
            for p in &pairs {
                prop_assert_ne!(p.client, p.server);
                prop_assert!(p.client.0 < node_count && p.server.0 < node_count);
            }
        }

        #[test]
        fn too_few_nodes_yield_half_the_population(
            node_count in 0u32..64,
            surplus in 1u32..64,
        ) {
            let num_connections = node_count / 2 + surplus;
            prop_assume!(node_count < 2 * num_connections);
            let pairs = plan_flow_pairs(node_count, num_connections, 9000);
            prop_assert_eq!(pairs.len() as u32, node_count / 2);
            for p in &pairs {
                prop_assert!(p.client.0 <= node_count.saturating_sub(1));
                prop_assert!(p.server.0 <= node_count.saturating_sub(1));
                prop_assert_ne!(p.client, p.server);
            }
        }

        #[test]
        fn planning_is_deterministic(node_count in 0u32..200, num_connections in 0u32..20) {
            let first = plan_flow_pairs(node_count, num_connections, 9000);
            let second = plan_flow_pairs(node_count, num_connections, 9000);
            prop_assert_eq!(first, second);
        }
    }
}
