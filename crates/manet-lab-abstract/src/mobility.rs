use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::ScenarioConfigurationError;
use crate::node::{NodeIndex, Position};
use crate::time::SimTime;

/// Straight-line movement towards `destination` at `speed` metres per second,
/// starting at the timestamp it is scheduled for. A zero speed halts the node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Waypoint {
    pub destination: Position,
    pub speed: f64,
}

impl Waypoint {
    pub fn new(destination: Position, speed: f64) -> Self {
        Self { destination, speed }
    }
}

/// Initial placements plus per-timestamp waypoints for a fixed node population.
///
/// Timestamps absent from the schedule carry no update; filling the gaps is up
/// to the engine. Nodes without an initial placement start at the origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MobilitySchedule {
    node_count: u32,
    initial: BTreeMap<NodeIndex, Position>,
    waypoints: BTreeMap<SimTime, BTreeMap<NodeIndex, Waypoint>>,
}

impl MobilitySchedule {
    pub fn new(node_count: u32) -> Self {
        Self {
            node_count,
            initial: BTreeMap::new(),
            waypoints: BTreeMap::new(),
        }
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    fn check_node(&self, node: NodeIndex) -> Result<(), ScenarioConfigurationError> {
        if node.0 >= self.node_count {
            return Err(ScenarioConfigurationError::ScheduleNodeOutOfRange {
                node: node.0,
                node_count: self.node_count,
            });
        }
        Ok(())
    }

    pub fn place(
        &mut self,
        node: NodeIndex,
        position: Position,
    ) -> Result<(), ScenarioConfigurationError> {
        self.check_node(node)?;
        self.initial.insert(node, position);
        Ok(())
    }

    /// Schedule a waypoint. A later waypoint for the same node and timestamp replaces the earlier one.
    pub fn insert(
        &mut self,
        time: SimTime,
        node: NodeIndex,
        waypoint: Waypoint,
    ) -> Result<(), ScenarioConfigurationError> {
        self.check_node(node)?;
        self.waypoints.entry(time).or_default().insert(node, waypoint);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.initial.is_empty() && self.waypoints.is_empty()
    }

    pub fn initial_position(&self, node: NodeIndex) -> Option<Position> {
        self.initial.get(&node).copied()
    }

    pub fn initial_positions(&self) -> impl Iterator<Item = (NodeIndex, Position)> + '_ {
        self.initial.iter().map(|(node, pos)| (*node, *pos))
    }

    /// Number of distinct timestamps carrying at least one waypoint.
    pub fn timestamp_count(&self) -> usize {
        self.waypoints.len()
    }

    pub fn waypoint_count(&self) -> usize {
        self.waypoints.values().map(BTreeMap::len).sum()
    }

    /// Timestamps in ascending order, each with its node → waypoint mapping.
    pub fn iter(&self) -> impl Iterator<Item = (SimTime, &BTreeMap<NodeIndex, Waypoint>)> {
        self.waypoints.iter().map(|(time, nodes)| (*time, nodes))
    }

    pub fn at(&self, time: SimTime) -> Option<&BTreeMap<NodeIndex, Waypoint>> {
        self.waypoints.get(&time)
    }

    /// Waypoints of a single node in time order.
    pub fn waypoints_for(&self, node: NodeIndex) -> Vec<(SimTime, Waypoint)> {
        self.waypoints
            .iter()
            .filter_map(|(time, nodes)| nodes.get(&node).map(|w| (*time, *w)))
            .collect()
    }

    /// Highest node index referenced anywhere in the schedule.
    pub fn max_node(&self) -> Option<NodeIndex> {
        let placed = self.initial.keys().next_back().copied();
        let moving = self
            .waypoints
            .values()
            .filter_map(|nodes| nodes.keys().next_back().copied())
            .max();
        placed.max(moving)
    }
}

/// Something that can produce a mobility schedule for a node population.
pub trait MobilitySource {
    /// Load the schedule. References to nodes at or beyond `node_count` must fail.
    fn load(&self, node_count: u32) -> Result<MobilitySchedule, ScenarioConfigurationError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

impl MobilitySource for MobilitySchedule {
    fn load(&self, node_count: u32) -> Result<MobilitySchedule, ScenarioConfigurationError> {
        if let Some(node) = self.max_node()
            && node.0 >= node_count
        {
            return Err(ScenarioConfigurationError::ScheduleNodeOutOfRange {
                node: node.0,
                node_count,
            });
        }
        let mut schedule = self.clone();
        schedule.node_count = node_count;
        Ok(schedule)
    }

    fn describe(&self) -> String {
        format!(
            "in-memory schedule ({} placements, {} waypoints)",
            self.initial.len(),
            self.waypoint_count()
        )
    }
}
