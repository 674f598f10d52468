use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;
use tracing::{debug, info};

use manet_lab_abstract::{
    AddressBlock, Addressing, AppHandle, ApplicationHost, ChannelConfig, DeviceHandle,
    EngineConfig, EngineError, FiveTuple, FlowKey, FlowMonitor, FlowRecord, GeneratorParams,
    InterfaceBinding, MobilityModel, MobilitySchedule, NodeIndex, PROTOCOL_UDP, Position,
    RoutingCapability, RunOutcome, SimTime, SimulationEngine, Waypoint, WirelessMedium,
};

/// Bytes of IPv4 + UDP header counted on top of every payload.
pub const IPV4_UDP_HEADER_BYTES: u64 = 28;
/// First ephemeral source port handed to generators.
const FIRST_EPHEMERAL_PORT: u16 = 49153;

#[derive(Debug, Clone)]
struct Datagram {
    flow: FlowKey,
    tuple: FiveTuple,
    payload: u32,
    sent_at: SimTime,
}

#[derive(Debug)]
enum EventType {
    GeneratorSend { app: AppHandle },
    PacketArrival { to: NodeIndex, datagram: Datagram },
}

#[derive(Debug)]
struct Event {
    time: SimTime,
    event_type: EventType,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for time: smallest time is Greater in BinaryHeap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Debug, Default)]
struct NodeState {
    start: Position,
    waypoints: Vec<(SimTime, Waypoint)>,
    device: Option<DeviceHandle>,
    address: Option<Ipv4Addr>,
    routing: bool,
}

impl NodeState {
    /// ns-2 `setdest` semantics: straight line at constant speed, stop on arrival,
    /// redirected by the next waypoint.
    fn position_at(&self, t: SimTime) -> Position {
        let mut pos = self.start;
        for (idx, (began, waypoint)) in self.waypoints.iter().enumerate() {
            if *began > t {
                break;
            }
            let until = self
                .waypoints
                .get(idx + 1)
                .map(|(next, _)| *next)
                .filter(|next| *next <= t)
                .unwrap_or(t);
            let elapsed = until.saturating_sub(*began).as_secs_f64();
            pos = advance(pos, waypoint, elapsed);
        }
        pos
    }
}

fn advance(from: Position, waypoint: &Waypoint, elapsed_sec: f64) -> Position {
    if waypoint.speed <= 0.0 {
        return from;
    }
    let distance = from.distance_to(&waypoint.destination);
    if distance == 0.0 {
        return from;
    }
    from.lerp(&waypoint.destination, waypoint.speed * elapsed_sec / distance)
}

#[derive(Debug)]
enum AppKind {
    Sink {
        port: u16,
    },
    Generator {
        params: GeneratorParams,
        source_port: u16,
        sent: u32,
    },
}

#[derive(Debug)]
struct Application {
    node: NodeIndex,
    kind: AppKind,
    start: Option<SimTime>,
    stop: Option<SimTime>,
}

impl Application {
    fn is_active(&self, now: SimTime) -> bool {
        let started = self.start.is_some_and(|s| s <= now);
        let stopped = self.stop.is_some_and(|s| s <= now);
        started && !stopped
    }
}

/// Cloneable flag that stops a running [`Simulator`] before its next event.
#[derive(Debug, Clone, Default)]
pub struct HaltHandle(Arc<AtomicBool>);

impl HaltHandle {
    pub fn halt(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// In-process discrete-event engine.
///
/// Unit-disk radio at `range_m`, idealised hop-count routing, seeded per-hop
/// loss and latency, and flow-monitor style per-flow counters.
pub struct Simulator {
    time: SimTime,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,

    config: EngineConfig,
    rng: rand::rngs::StdRng,
    halt: HaltHandle,
    halt_deadline: Option<SimTime>,

    nodes: Vec<NodeState>,
    range_m: f64,
    next_device: u32,
    address_to_node: HashMap<Ipv4Addr, NodeIndex>,

    applications: Vec<Application>,
    next_source_port: u16,

    flows: BTreeMap<FlowKey, FlowRecord>,
    classifier: HashMap<FiveTuple, FlowKey>,
    tuples: BTreeMap<FlowKey, FiveTuple>,
    last_delay: HashMap<FlowKey, Duration>,
}

impl Simulator {
    pub fn new(config: EngineConfig) -> Self {
        let rng = rand::rngs::StdRng::seed_from_u64(config.seed);

        Self {
            time: SimTime::ZERO,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            config,
            rng,
            halt: HaltHandle::default(),
            halt_deadline: None,
            nodes: Vec::new(),
            range_m: ChannelConfig::default().range_m,
            next_device: 0,
            address_to_node: HashMap::new(),
            applications: Vec::new(),
            next_source_port: FIRST_EPHEMERAL_PORT,
            flows: BTreeMap::new(),
            classifier: HashMap::new(),
            tuples: BTreeMap::new(),
            last_delay: HashMap::new(),
        }
    }

    pub fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    /// Halt the run before any event scheduled at or after `at` is processed.
    pub fn halt_at(&mut self, at: SimTime) {
        self.halt_deadline = Some(at);
    }

    pub fn peek_next_event_time(&self) -> Option<SimTime> {
        self.event_queue.peek().map(|e| e.time)
    }

    pub fn remaining_events(&self) -> usize {
        self.event_queue.len()
    }

    /// Position of `node` at the current simulated time.
    pub fn position_of(&self, node: NodeIndex) -> Option<Position> {
        self.nodes.get(node.as_usize()).map(|n| n.position_at(self.time))
    }

    fn push_event(&mut self, time: SimTime, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    fn node(&self, node: NodeIndex) -> Result<&NodeState, EngineError> {
        self.nodes
            .get(node.as_usize())
            .ok_or(EngineError::UnknownNode(node))
    }

    fn node_mut(&mut self, node: NodeIndex) -> Result<&mut NodeState, EngineError> {
        self.nodes
            .get_mut(node.as_usize())
            .ok_or(EngineError::UnknownNode(node))
    }

    fn app_mut(&mut self, app: AppHandle) -> Result<&mut Application, EngineError> {
        self.applications
            .get_mut(app.0 as usize)
            .ok_or(EngineError::UnknownApplication(app.0))
    }

    /// Process the next event. Returns true if an event was processed, false if queue is empty.
    pub fn step(&mut self) -> bool {
        let event = match self.event_queue.pop() {
            Some(e) => e,
            None => return false,
        };

        self.time = event.time;
        debug!("Processing event at {}: {:?}", self.time, event.event_type);

        match event.event_type {
            EventType::GeneratorSend { app } => self.on_generator_send(app),
            EventType::PacketArrival { to, datagram } => self.on_arrival(to, datagram),
        }
        true
    }

    fn on_generator_send(&mut self, app: AppHandle) {
        let now = self.time;
        let Some(application) = self.applications.get_mut(app.0 as usize) else {
            return;
        };
        if !application.is_active(now) {
            return;
        }
        let node = application.node;
        let AppKind::Generator {
            params,
            source_port,
            sent,
        } = &mut application.kind
        else {
            return;
        };
        if *sent >= params.max_packets {
            return;
        }
        *sent += 1;
        let more = *sent < params.max_packets;
        let params = *params;
        let source_port = *source_port;

        let Some(source_address) = self.nodes.get(node.as_usize()).and_then(|n| n.address) else {
            debug!("Generator {} on node {} has no address", app, node);
            return;
        };
        let tuple = FiveTuple {
            source_address,
            destination_address: params.destination,
            protocol: PROTOCOL_UDP,
            source_port,
            destination_port: params.port,
        };
        self.transmit(node, tuple, params.packet_size);

        if more {
            let next = now.saturating_add(params.interval);
            self.push_event(next, EventType::GeneratorSend { app });
        }
    }

    fn on_arrival(&mut self, to: NodeIndex, datagram: Datagram) {
        let now = self.time;
        let delay = now.saturating_sub(datagram.sent_at);
        let previous = self.last_delay.insert(datagram.flow, delay);

        let record = self.flows.entry(datagram.flow).or_default();
        record.rx_packets += 1;
        record.rx_bytes += u64::from(datagram.payload) + IPV4_UDP_HEADER_BYTES;
        record.delay_sum += delay;
        if let Some(previous) = previous {
            record.jitter_sum += delay.abs_diff(previous);
        }
        debug!(
            "Flow {} delivered to node {} after {:?}",
            datagram.flow, to, delay
        );

        if !self.config.echo_replies {
            return;
        }
        let port = datagram.tuple.destination_port;
        let listening = self.applications.iter().any(|app| {
            app.node == to
                && app.is_active(now)
                && matches!(app.kind, AppKind::Sink { port: p } if p == port)
        });
        if listening {
            let reply = FiveTuple {
                source_address: datagram.tuple.destination_address,
                destination_address: datagram.tuple.source_address,
                protocol: datagram.tuple.protocol,
                source_port: datagram.tuple.destination_port,
                destination_port: datagram.tuple.source_port,
            };
            self.transmit(to, reply, datagram.payload);
        }
    }

    fn classify(&mut self, tuple: FiveTuple) -> FlowKey {
        if let Some(key) = self.classifier.get(&tuple) {
            return *key;
        }
        let key = FlowKey(self.classifier.len() as u32 + 1);
        self.classifier.insert(tuple, key);
        self.tuples.insert(key, tuple);
        key
    }

    fn transmit(&mut self, from: NodeIndex, tuple: FiveTuple, payload: u32) {
        let flow = self.classify(tuple);
        let record = self.flows.entry(flow).or_default();
        record.tx_packets += 1;
        record.tx_bytes += u64::from(payload) + IPV4_UDP_HEADER_BYTES;

        let Some(&to) = self.address_to_node.get(&tuple.destination_address) else {
            debug!("Flow {}: no node owns {}", flow, tuple.destination_address);
            self.record_loss(flow);
            return;
        };
        let Some(hops) = self.hop_count(from, to) else {
            debug!("Flow {}: no route from node {} to node {}", flow, from, to);
            self.record_loss(flow);
            return;
        };

        let mut latency = Duration::ZERO;
        for _ in 0..hops {
            if self.rng.random::<f64>() < self.config.loss_rate {
                debug!("Flow {}: packet lost in channel", flow);
                self.record_loss(flow);
                return;
            }
            latency += self.hop_latency();
        }

        let datagram = Datagram {
            flow,
            tuple,
            payload,
            sent_at: self.time,
        };
        let arrival = self.time.saturating_add(latency);
        self.push_event(arrival, EventType::PacketArrival { to, datagram });
    }

    fn record_loss(&mut self, flow: FlowKey) {
        self.flows.entry(flow).or_default().lost_packets += 1;
    }

    fn hop_latency(&mut self) -> Duration {
        let lo = self.config.min_hop_latency_us.min(self.config.max_hop_latency_us);
        let hi = self.config.min_hop_latency_us.max(self.config.max_hop_latency_us);
        Duration::from_micros(self.rng.random_range(lo..=hi))
    }

    /// Hops on the shortest path at the current time. Without routing on the
    /// source only direct neighbours are reachable; intermediates must route.
    fn hop_count(&self, from: NodeIndex, to: NodeIndex) -> Option<u32> {
        let count = self.nodes.len();
        let (src, dst) = (from.as_usize(), to.as_usize());
        if src >= count || dst >= count {
            return None;
        }
        if src == dst {
            return Some(0);
        }
        let positions: Vec<Option<Position>> = self
            .nodes
            .iter()
            .map(|n| n.device.map(|_| n.position_at(self.time)))
            .collect();
        let reachable = |a: usize, b: usize| match (positions[a], positions[b]) {
            (Some(pa), Some(pb)) => pa.distance_to(&pb) <= self.range_m,
            _ => false,
        };

        if !self.nodes[src].routing {
            return reachable(src, dst).then_some(1);
        }

        let mut hops = vec![None; count];
        hops[src] = Some(0u32);
        let mut queue = VecDeque::from([src]);
        while let Some(current) = queue.pop_front() {
            let depth = hops[current].unwrap_or(0);
            for next in 0..count {
                if hops[next].is_some() || !reachable(current, next) {
                    continue;
                }
                if next == dst {
                    return Some(depth + 1);
                }
                if self.nodes[next].routing {
                    hops[next] = Some(depth + 1);
                    queue.push_back(next);
                }
            }
        }
        None
    }
}

impl MobilityModel for Simulator {
    fn install_mobility(
        &mut self,
        nodes: &[NodeIndex],
        schedule: &MobilitySchedule,
    ) -> Result<(), EngineError> {
        for &node in nodes {
            let start = schedule.initial_position(node).unwrap_or(Position::ORIGIN);
            let waypoints = schedule.waypoints_for(node);
            let state = self.node_mut(node)?;
            state.start = start;
            state.waypoints = waypoints;
        }
        Ok(())
    }
}

impl WirelessMedium for Simulator {
    fn install_wireless_medium(
        &mut self,
        nodes: &[NodeIndex],
        channel: &ChannelConfig,
    ) -> Result<Vec<DeviceHandle>, EngineError> {
        self.range_m = channel.range_m;
        let mut devices = Vec::with_capacity(nodes.len());
        for &node in nodes {
            let device = DeviceHandle(self.next_device);
            self.node_mut(node)?.device = Some(device);
            self.next_device += 1;
            devices.push(device);
        }
        Ok(devices)
    }
}

impl RoutingCapability for Simulator {
    fn install_routing(&mut self, nodes: &[NodeIndex]) -> Result<(), EngineError> {
        for &node in nodes {
            self.node_mut(node)?.routing = true;
        }
        Ok(())
    }
}

impl Addressing for Simulator {
    fn assign_addresses(
        &mut self,
        devices: &[DeviceHandle],
        block: &AddressBlock,
    ) -> Result<Vec<InterfaceBinding>, EngineError> {
        let mut bindings = Vec::with_capacity(devices.len());
        for (i, &device) in devices.iter().enumerate() {
            let node = self
                .nodes
                .iter()
                .position(|n| n.device == Some(device))
                .map(|idx| NodeIndex(idx as u32))
                .ok_or(EngineError::UnknownDevice(device.0))?;
            let address = block.host(i as u32).ok_or_else(|| {
                EngineError::Fault(format!(
                    "address block {} exhausted after {} hosts",
                    block.network, i
                ))
            })?;
            self.node_mut(node)?.address = Some(address);
            self.address_to_node.insert(address, node);
            bindings.push(InterfaceBinding {
                node,
                device,
                address,
            });
        }
        Ok(bindings)
    }
}

impl ApplicationHost for Simulator {
    fn install_sink_application(
        &mut self,
        node: NodeIndex,
        port: u16,
    ) -> Result<AppHandle, EngineError> {
        self.node(node)?;
        let handle = AppHandle(self.applications.len() as u32);
        self.applications.push(Application {
            node,
            kind: AppKind::Sink { port },
            start: None,
            stop: None,
        });
        Ok(handle)
    }

    fn install_generator_application(
        &mut self,
        node: NodeIndex,
        params: GeneratorParams,
    ) -> Result<AppHandle, EngineError> {
        self.node(node)?;
        let source_port = self.next_source_port;
        self.next_source_port = self.next_source_port.checked_add(1).unwrap_or(FIRST_EPHEMERAL_PORT);
        let handle = AppHandle(self.applications.len() as u32);
        self.applications.push(Application {
            node,
            kind: AppKind::Generator {
                params,
                source_port,
                sent: 0,
            },
            start: None,
            stop: None,
        });
        Ok(handle)
    }

    fn start_application(&mut self, app: AppHandle, at: SimTime) -> Result<(), EngineError> {
        let application = self.app_mut(app)?;
        application.start = Some(at);
        if matches!(application.kind, AppKind::Generator { .. }) {
            self.push_event(at, EventType::GeneratorSend { app });
        }
        Ok(())
    }

    fn stop_application(&mut self, app: AppHandle, at: SimTime) -> Result<(), EngineError> {
        self.app_mut(app)?.stop = Some(at);
        Ok(())
    }
}

impl FlowMonitor for Simulator {
    fn flow_records(&self) -> BTreeMap<FlowKey, FlowRecord> {
        self.flows.clone()
    }

    fn resolve_flow_addresses(&self, key: FlowKey) -> Option<FiveTuple> {
        self.tuples.get(&key).copied()
    }
}

impl SimulationEngine for Simulator {
    fn create_nodes(&mut self, count: u32) -> Result<Vec<NodeIndex>, EngineError> {
        let first = self.nodes.len() as u32;
        let created: Vec<NodeIndex> = (first..first + count).map(NodeIndex).collect();
        self.nodes
            .extend(created.iter().map(|_| NodeState::default()));
        Ok(created)
    }

    fn run(&mut self, stop_at: SimTime) -> Result<RunOutcome, EngineError> {
        info!(
            "Running {} nodes, {} applications until {}",
            self.nodes.len(),
            self.applications.len(),
            stop_at
        );
        loop {
            let next = self.peek_next_event_time().filter(|t| *t < stop_at);
            let past_deadline = matches!(
                (next, self.halt_deadline),
                (Some(t), Some(deadline)) if t >= deadline
            );
            if self.halt.is_halted() || past_deadline {
                info!("Run halted at {}", self.time);
                return Ok(RunOutcome {
                    stopped_at: self.time,
                    halted: true,
                });
            }
            if next.is_none() {
                break;
            }
            self.step();
        }
        self.time = self.time.max(stop_at);
        info!("Run reached {} with {} flows", self.time, self.flows.len());
        Ok(RunOutcome {
            stopped_at: self.time,
            halted: false,
        })
    }
}
