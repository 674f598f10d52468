//! ns-2 mobility traces.
//!
//! Two statement forms are understood:
//!
//! ```text
//! $node_(3) set X_ 120.5
//! $ns_ at 12.00 "$node_(3) setdest 180.0 95.2 9.5"
//! ```
//!
//! `set` statements give initial placements; `setdest` statements become
//! waypoints at the given timestamp. Comments and unrelated statements are
//! skipped.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use manet_lab_abstract::{
    MobilitySchedule, MobilitySource, NodeIndex, Position, ScenarioConfigurationError, SimTime,
    Waypoint,
};
use tracing::debug;

const NODE_PREFIX: &str = "$node_(";

/// An ns-2 trace file on disk.
#[derive(Debug, Clone)]
pub struct Ns2TraceFile {
    path: PathBuf,
}

impl Ns2TraceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MobilitySource for Ns2TraceFile {
    fn load(&self, node_count: u32) -> Result<MobilitySchedule, ScenarioConfigurationError> {
        let text = fs::read_to_string(&self.path).map_err(|source| {
            ScenarioConfigurationError::TraceUnreadable {
                path: self.path.clone(),
                source,
            }
        })?;
        parse_ns2_trace(&text, node_count)
    }

    fn describe(&self) -> String {
        format!("ns-2 trace {}", self.path.display())
    }
}

#[derive(Default)]
struct PartialPlacement {
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
}

struct PendingMove {
    time: SimTime,
    node: NodeIndex,
    x: f64,
    y: f64,
    speed: f64,
}

/// Parse ns-2 trace text into a schedule for `node_count` nodes.
///
/// Waypoints keep the node's initial altitude, as ns-2 `setdest` only moves in the plane.
pub fn parse_ns2_trace(
    text: &str,
    node_count: u32,
) -> Result<MobilitySchedule, ScenarioConfigurationError> {
    let mut placements: BTreeMap<NodeIndex, PartialPlacement> = BTreeMap::new();
    let mut moves = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with(NODE_PREFIX) {
            let (node, axis, value) = parse_placement(line, line_no)?;
            let node = check_node(node, node_count, line_no)?;
            let entry = placements.entry(node).or_default();
            match axis {
                'X' => entry.x = Some(value),
                'Y' => entry.y = Some(value),
                _ => entry.z = Some(value),
            }
        } else if line.starts_with("$ns_") {
            if let Some(mut pending) = parse_scheduled(line, line_no)? {
                pending.node = check_node(pending.node.0, node_count, line_no)?;
                moves.push(pending);
            }
        } else {
            debug!("Skipping unrecognised mobility statement on line {}", line_no);
        }
    }

    let mut schedule = MobilitySchedule::new(node_count);
    for (node, partial) in &placements {
        let position = Position::new(
            partial.x.unwrap_or(0.0),
            partial.y.unwrap_or(0.0),
            partial.z.unwrap_or(0.0),
        );
        schedule.place(*node, position)?;
    }
    for pending in moves {
        let z = placements
            .get(&pending.node)
            .and_then(|p| p.z)
            .unwrap_or(0.0);
        let waypoint = Waypoint::new(Position::new(pending.x, pending.y, z), pending.speed);
        schedule.insert(pending.time, pending.node, waypoint)?;
    }

    debug!(
        "Parsed mobility trace: {} placements, {} waypoints over {} timestamps",
        placements.len(),
        schedule.waypoint_count(),
        schedule.timestamp_count()
    );
    Ok(schedule)
}

fn malformed(line: usize, reason: impl Into<String>) -> ScenarioConfigurationError {
    ScenarioConfigurationError::MalformedTrace {
        line,
        reason: reason.into(),
    }
}

fn check_node(
    node: u32,
    node_count: u32,
    line: usize,
) -> Result<NodeIndex, ScenarioConfigurationError> {
    if node >= node_count {
        return Err(ScenarioConfigurationError::UnknownNode {
            node,
            node_count,
            line,
        });
    }
    Ok(NodeIndex(node))
}

fn parse_node_token(token: &str, line: usize) -> Result<u32, ScenarioConfigurationError> {
    token
        .strip_prefix(NODE_PREFIX)
        .and_then(|rest| rest.strip_suffix(')'))
        .and_then(|id| id.parse::<u32>().ok())
        .ok_or_else(|| malformed(line, format!("invalid node reference `{token}`")))
}

fn parse_number(token: Option<&str>, what: &str, line: usize) -> Result<f64, ScenarioConfigurationError> {
    let token = token.ok_or_else(|| malformed(line, format!("missing {what}")))?;
    match token.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(malformed(line, format!("invalid {what} `{token}`"))),
    }
}

/// `$node_(N) set X_ v`
fn parse_placement(line: &str, line_no: usize) -> Result<(u32, char, f64), ScenarioConfigurationError> {
    let mut tokens = line.split_whitespace();
    let node = parse_node_token(tokens.next().unwrap_or_default(), line_no)?;
    if tokens.next() != Some("set") {
        return Err(malformed(line_no, "expected `set` after node reference"));
    }
    let axis = match tokens.next() {
        Some("X_") => 'X',
        Some("Y_") => 'Y',
        Some("Z_") => 'Z',
        other => {
            return Err(malformed(
                line_no,
                format!("unknown coordinate `{}`", other.unwrap_or("")),
            ));
        }
    };
    let value = parse_number(tokens.next(), "coordinate", line_no)?;
    Ok((node, axis, value))
}

/// `$ns_ at T "$node_(N) setdest X Y S"`. Other scheduled commands yield `None`.
fn parse_scheduled(line: &str, line_no: usize) -> Result<Option<PendingMove>, ScenarioConfigurationError> {
    let unquoted = line.replace('"', " ");
    let tokens: Vec<&str> = unquoted.split_whitespace().collect();
    if tokens.get(1) != Some(&"at") {
        debug!("Skipping non-scheduled ns statement on line {}", line_no);
        return Ok(None);
    }

    let time = parse_number(tokens.get(2).copied(), "timestamp", line_no)?;
    if time < 0.0 {
        return Err(malformed(line_no, format!("negative timestamp {time}")));
    }

    let is_setdest = tokens.get(4) == Some(&"setdest");
    let targets_node = tokens.get(3).is_some_and(|t| t.starts_with(NODE_PREFIX));
    if !(is_setdest && targets_node) {
        debug!("Skipping scheduled command on line {}", line_no);
        return Ok(None);
    }

    let node = parse_node_token(tokens[3], line_no)?;
    let x = parse_number(tokens.get(5).copied(), "destination x", line_no)?;
    let y = parse_number(tokens.get(6).copied(), "destination y", line_no)?;
    let speed = parse_number(tokens.get(7).copied(), "speed", line_no)?;
    if speed < 0.0 {
        return Err(malformed(line_no, format!("negative speed {speed}")));
    }

    Ok(Some(PendingMove {
        time: SimTime::from_secs_f64(time),
        node: NodeIndex(node),
        x,
        y,
        speed,
    }))
}

/// Render a schedule as an ns-2 trace: initial positions first, then movement commands.
pub fn write_ns2_trace<W: Write>(schedule: &MobilitySchedule, writer: &mut W) -> io::Result<()> {
    writeln!(writer, "# ns-2 mobility trace")?;
    writeln!(writer, "# Total nodes: {}", schedule.node_count())?;
    writeln!(writer)?;

    writeln!(writer, "# Initial positions")?;
    for (node, pos) in schedule.initial_positions() {
        writeln!(writer, "$node_({}) set X_ {}", node, pos.x)?;
        writeln!(writer, "$node_({}) set Y_ {}", node, pos.y)?;
        writeln!(writer, "$node_({}) set Z_ {}", node, pos.z)?;
    }

    writeln!(writer)?;
    writeln!(writer, "# Movement commands")?;
    for (time, nodes) in schedule.iter() {
        for (node, wp) in nodes {
            writeln!(
                writer,
                "$ns_ at {:.2} \"$node_({}) setdest {} {} {}\"",
                time.as_secs_f64(),
                node,
                wp.destination.x,
                wp.destination.y,
                wp.speed
            )?;
        }
    }
    Ok(())
}
