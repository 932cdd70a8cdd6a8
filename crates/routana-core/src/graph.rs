//! The routing-resource graph: nodes for sources, sinks, pins, and channel
//! wires, with parallel forward/backward adjacency lists.
//!
//! Topology is immutable once a graph is finalized. The only mutable per-node
//! state (demand, self-congestion bookkeeping) sits behind one mutex per node
//! so that enumeration workers can write it concurrently.

mod parse;

use std::ops::Index;
use std::sync::{Mutex, MutexGuard};

pub use parse::{load, ParseError};

use crate::selfcong::PathHistory;

identifier!(NodeId, usize);

/// The routing resource a node models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A signal source.
    Source,
    /// A signal sink.
    Sink,
    /// An input pin on a block.
    IPin,
    /// An output pin on a block.
    OPin,
    /// A wire segment in an x-directed channel.
    ChanX,
    /// A wire segment in a y-directed channel.
    ChanY,
}

/// Number of distinct node kinds; sizes the node lookup table.
pub const NUM_NODE_KINDS: usize = 6;

impl NodeKind {
    pub(crate) fn as_index(self) -> usize {
        match self {
            NodeKind::Source => 0,
            NodeKind::Sink => 1,
            NodeKind::IPin => 2,
            NodeKind::OPin => 3,
            NodeKind::ChanX => 4,
            NodeKind::ChanY => 5,
        }
    }

    /// True for channel (wire) nodes.
    pub fn is_routing(self) -> bool {
        matches!(self, NodeKind::ChanX | NodeKind::ChanY)
    }
}

/// Which way signals travel on a wire relative to the coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Toward increasing coordinates.
    Inc,
    /// Toward decreasing coordinates.
    Dec,
    /// Either way.
    #[default]
    Bidir,
}

impl Direction {
    pub(crate) fn from_code(code: i32) -> Self {
        match code {
            0 => Direction::Inc,
            1 => Direction::Dec,
            _ => Direction::Bidir,
        }
    }
}

/// A switch type used by graph edges.
#[derive(Debug, Clone, Copy, Default)]
pub struct Switch {
    pub(crate) buffered: bool,
    pub(crate) r: f32,
    pub(crate) cin: f32,
    pub(crate) cout: f32,
    pub(crate) tdel: f32,
    pub(crate) mux_trans_size: f32,
    pub(crate) buf_size: f32,
}

impl Switch {
    /// Whether the switch is buffered.
    pub fn buffered(&self) -> bool {
        self.buffered
    }

    /// Resistance to go through the switch.
    pub fn r(&self) -> f32 {
        self.r
    }

    /// Switch input capacitance.
    pub fn cin(&self) -> f32 {
        self.cin
    }

    /// Switch output capacitance.
    pub fn cout(&self) -> f32 {
        self.cout
    }

    /// Intrinsic switch delay.
    pub fn tdel(&self) -> f32 {
        self.tdel
    }

    /// Mux transistor area, in minimum-width transistor units.
    pub fn mux_trans_size(&self) -> f32 {
        self.mux_trans_size
    }

    /// Buffer area, in minimum-width transistor units.
    pub fn buf_size(&self) -> f32 {
        self.buf_size
    }
}

/// Mutable per-node state, written concurrently by enumeration workers.
#[derive(Debug, Default)]
pub(crate) struct NodeShared {
    /// Accumulated fractional usage of the node.
    pub(crate) demand: f64,
    /// `[out edge][bucket]` path counts contributed to each child; allocated
    /// only in path-dependence self-congestion mode.
    pub(crate) child_contributions: Vec<Vec<f64>>,
    /// Polar path-count history; allocated only in radius self-congestion
    /// mode, and only for pin/channel nodes.
    pub(crate) path_history: Option<PathHistory>,
}

/// A node of the routing-resource graph.
#[derive(Debug)]
pub struct RrNode {
    kind: NodeKind,
    xlow: u16,
    ylow: u16,
    span: u16,
    ptc: u16,
    fan_in: u16,
    direction: Direction,
    r: f32,
    c: f32,
    /// Routing cost; recomputable from demand.
    weight: u32,
    out_edges: Vec<NodeId>,
    out_switches: Vec<u16>,
    in_edges: Vec<NodeId>,
    virtual_source: Option<NodeId>,
    is_virtual_source: bool,
    shared: Mutex<NodeShared>,
}

impl RrNode {
    /// Creates a node from dump-style corner coordinates. Only channel nodes
    /// may span more than one tile, and only along one axis.
    pub fn new(
        id: NodeId,
        kind: NodeKind,
        x1: usize,
        y1: usize,
        x2: usize,
        y2: usize,
        ptc: usize,
    ) -> Result<Self, GraphError> {
        let xspan = x1.abs_diff(x2) + 1;
        let yspan = y1.abs_diff(y2) + 1;
        if xspan > 1 && yspan > 1 {
            return Err(GraphError::BothSpans(id));
        }
        Ok(Self {
            kind,
            xlow: x1.min(x2) as u16,
            ylow: y1.min(y2) as u16,
            span: xspan.max(yspan) as u16,
            ptc: ptc as u16,
            fan_in: 0,
            direction: Direction::Bidir,
            r: 0.0,
            c: 0.0,
            weight: 0,
            out_edges: Vec::new(),
            out_switches: Vec::new(),
            in_edges: Vec::new(),
            virtual_source: None,
            is_virtual_source: false,
            shared: Mutex::new(NodeShared::default()),
        })
    }

    /// The routing resource this node models.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Low x coordinate.
    pub fn xlow(&self) -> usize {
        self.xlow as usize
    }

    /// Low y coordinate.
    pub fn ylow(&self) -> usize {
        self.ylow as usize
    }

    /// High x coordinate; exceeds `xlow` only for x-channel wires.
    pub fn xhigh(&self) -> usize {
        match self.kind {
            NodeKind::ChanX => self.xlow as usize + self.span as usize - 1,
            _ => self.xlow as usize,
        }
    }

    /// High y coordinate; exceeds `ylow` only for y-channel wires.
    pub fn yhigh(&self) -> usize {
        match self.kind {
            NodeKind::ChanY => self.ylow as usize + self.span as usize - 1,
            _ => self.ylow as usize,
        }
    }

    /// How many tiles the node spans.
    pub fn span(&self) -> usize {
        self.span as usize
    }

    /// Pin/track/class index within the tile.
    pub fn ptc(&self) -> usize {
        self.ptc as usize
    }

    /// Signal direction on this node.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Resistance to go through the node.
    pub fn r(&self) -> f32 {
        self.r
    }

    /// Total capacitance of the node.
    pub fn c(&self) -> f32 {
        self.c
    }

    /// Fan-in recorded in the dump.
    pub fn fan_in(&self) -> usize {
        self.fan_in as usize
    }

    /// Routing cost of the node.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Outgoing neighbor list.
    pub fn out_edges(&self) -> &[NodeId] {
        &self.out_edges
    }

    /// Incoming neighbor list, derived from the outgoing lists after load.
    pub fn in_edges(&self) -> &[NodeId] {
        &self.in_edges
    }

    /// Switch used by each outgoing edge.
    pub fn out_switches(&self) -> &[u16] {
        &self.out_switches
    }

    /// The synthetic source attached to this node, if any.
    pub fn virtual_source(&self) -> Option<NodeId> {
        self.virtual_source
    }

    /// True if this node is a synthetic source created for fanout analysis.
    pub fn is_virtual_source(&self) -> bool {
        self.is_virtual_source
    }

    /// Node demand. When `fixed_routing_demand` is set, channel nodes report
    /// that value and every other node reports zero.
    pub fn demand(&self, fixed_routing_demand: Option<f64>) -> f64 {
        match fixed_routing_demand {
            Some(d) => {
                if self.kind.is_routing() {
                    d
                } else {
                    0.0
                }
            }
            None => self.shared.lock().unwrap().demand,
        }
    }

    /// Adds to the node's demand under its lock.
    pub fn increment_demand(&self, value: f64) {
        self.shared.lock().unwrap().demand += value;
    }

    pub(crate) fn shared(&self) -> MutexGuard<'_, NodeShared> {
        self.shared.lock().unwrap()
    }

    #[cfg(test)]
    pub(crate) fn set_demand(&self, value: f64) {
        self.shared.lock().unwrap().demand = value;
    }

    pub(crate) fn set_electrical(&mut self, r: f32, c: f32, fan_in: usize, dir: Direction) {
        self.r = r;
        self.c = c;
        self.fan_in = fan_in as u16;
        self.direction = dir;
    }

    pub(crate) fn push_edge(&mut self, to: NodeId, switch: usize) {
        self.out_edges.push(to);
        self.out_switches.push(switch as u16);
    }

    /// Weight of a node is its wirelength usage: channel wires cost at least
    /// one unit and grow with demand, everything else is free.
    fn computed_weight(&self) -> u32 {
        if self.kind.is_routing() {
            let demand = self.shared.lock().unwrap().demand;
            (1.0 + demand * (self.span as f64 + 1.0)).ceil() as u32
        } else {
            0
        }
    }
}

/// The routing-resource graph plus switch types and the per-tile node lookup.
#[derive(Debug, Default)]
pub struct RoutingGraph {
    nodes: Vec<RrNode>,
    switches: Vec<Switch>,
    /// `[kind][x][y][slot]`
    lookup: Vec<Vec<Vec<Vec<Option<NodeId>>>>>,
}

impl Index<NodeId> for RoutingGraph {
    type Output = RrNode;

    fn index(&self, id: NodeId) -> &RrNode {
        &self.nodes[id.inner()]
    }
}

impl RoutingGraph {
    pub(crate) fn from_parts(
        nodes: Vec<RrNode>,
        switches: Vec<Switch>,
        lookup: Vec<Vec<Vec<Vec<Option<NodeId>>>>>,
    ) -> Self {
        Self {
            nodes,
            switches,
            lookup,
        }
    }

    /// Number of nodes in the graph.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates over all node ids.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId::new)
    }

    /// Iterates over all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &RrNode> {
        self.nodes.iter()
    }

    /// The switch types of the graph.
    pub fn switches(&self) -> &[Switch] {
        &self.switches
    }

    /// Looks up the node of a given kind at `(x, y)` and slot (the ptc or
    /// class index, depending on kind). Source and sink class slots share the
    /// source table, mirroring the dump format.
    pub fn node_at(&self, kind: NodeKind, x: usize, y: usize, slot: usize) -> Option<NodeId> {
        self.lookup
            .get(kind.as_index())?
            .get(x)?
            .get(y)?
            .get(slot)
            .copied()
            .flatten()
    }

    /// Derives every node's incoming edge list from the outgoing lists.
    pub(crate) fn rebuild_in_edges(&mut self) {
        let mut incoming = vec![Vec::new(); self.nodes.len()];
        for (from, node) in self.nodes.iter().enumerate() {
            for &to in &node.out_edges {
                incoming[to.inner()].push(NodeId::new(from));
            }
        }
        for (node, edges) in self.nodes.iter_mut().zip(incoming) {
            node.in_edges = edges;
        }
    }

    /// Creates a virtual source for every sink and wires it to the channel
    /// nodes from which the sink's input pins are immediately reachable.
    /// Paths enumerated forward out of these synthetic sources model fanout
    /// while respecting input pin equivalence.
    pub(crate) fn add_virtual_sources(&mut self) -> Result<(), GraphError> {
        let num_real = self.nodes.len();
        for ind in 0..num_real {
            if self.nodes[ind].kind != NodeKind::Sink {
                continue;
            }
            if self.nodes[ind].in_edges.is_empty() {
                return Err(GraphError::SinkWithoutInputs(NodeId::new(ind)));
            }

            // unique channel nodes reachable backward through the sink's ipins
            let mut feeders = Vec::new();
            for &pin in &self.nodes[ind].in_edges {
                if self.nodes[pin.inner()].kind != NodeKind::IPin {
                    continue;
                }
                for &chan in &self.nodes[pin.inner()].in_edges {
                    if !feeders.contains(&chan) {
                        feeders.push(chan);
                    }
                }
            }
            feeders.sort_unstable();

            let sink = &self.nodes[ind];
            let id = NodeId::new(self.nodes.len());
            let mut vsource = RrNode::new(
                id,
                NodeKind::Source,
                sink.xlow(),
                sink.ylow(),
                sink.xhigh(),
                sink.yhigh(),
                sink.ptc(),
            )?;
            vsource.is_virtual_source = true;
            for chan in feeders {
                vsource.push_edge(chan, 0);
            }
            self.nodes.push(vsource);
            self.nodes[ind].virtual_source = Some(id);
        }
        self.rebuild_in_edges();
        Ok(())
    }

    /// Recomputes every node's weight from its current demand.
    pub(crate) fn init_weights(&mut self) {
        for ind in 0..self.nodes.len() {
            self.nodes[ind].weight = self.nodes[ind].computed_weight();
        }
    }

    /// Allocates per-edge, per-bucket child contribution tables
    /// (path-dependence self-congestion mode).
    pub(crate) fn alloc_child_contributions(&mut self, num_buckets: usize) {
        for node in &mut self.nodes {
            let num_edges = node.out_edges.len();
            node.shared.get_mut().unwrap().child_contributions =
                vec![vec![0.0; num_buckets]; num_edges];
        }
    }

    /// Allocates polar path-count history tables on pin and channel nodes
    /// (radius self-congestion mode).
    pub(crate) fn alloc_path_histories(&mut self, num_classes: usize) {
        for node in &mut self.nodes {
            if matches!(
                node.kind,
                NodeKind::IPin | NodeKind::OPin | NodeKind::ChanX | NodeKind::ChanY
            ) {
                node.shared.get_mut().unwrap().path_history =
                    Some(PathHistory::new(0, num_classes));
            }
        }
    }

    /// Checks that every forward edge has a matching reverse entry and that
    /// edge targets are in range.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (from, node) in self.nodes.iter().enumerate() {
            let from = NodeId::new(from);
            for &to in &node.out_edges {
                let target = self
                    .nodes
                    .get(to.inner())
                    .ok_or(GraphError::EdgeOutOfRange { node: from, to })?;
                if !target.in_edges.contains(&from) {
                    return Err(GraphError::MissingReverseEdge { from, to });
                }
            }
        }
        Ok(())
    }
}

/// Graph topology violations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A node spans multiple tiles in both axes.
    #[error("node {0} has both x and y spans greater than 1")]
    BothSpans(NodeId),

    /// An edge points at a node that does not exist.
    #[error("node {node} has an edge to nonexistent node {to}")]
    EdgeOutOfRange {
        /// Edge source.
        node: NodeId,
        /// Out-of-range target.
        to: NodeId,
    },

    /// A forward edge has no matching reverse entry.
    #[error("edge {from} -> {to} has no reverse entry")]
    MissingReverseEdge {
        /// Edge source.
        from: NodeId,
        /// Edge target.
        to: NodeId,
    },

    /// A sink with no incoming edges cannot receive a virtual source.
    #[error("sink {0} has no incoming edges")]
    SinkWithoutInputs(NodeId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn chain_edges_are_symmetric() {
        let graph = testing::chain_graph(2);
        graph.validate().unwrap();
        for id in graph.node_ids() {
            for &to in graph[id].out_edges() {
                assert!(graph[to].in_edges().contains(&id));
            }
        }
    }

    #[test]
    fn chan_nodes_weigh_one_when_uncongested() {
        let graph = testing::chain_graph(3);
        for node in graph.nodes() {
            let expected = if node.kind().is_routing() { 1 } else { 0 };
            assert_eq!(node.weight(), expected, "kind {:?}", node.kind());
        }
    }

    #[test]
    fn chan_span_determines_high_coordinates() {
        let node = RrNode::new(NodeId::new(0), NodeKind::ChanX, 2, 3, 5, 3, 0).unwrap();
        assert_eq!(node.xlow(), 2);
        assert_eq!(node.xhigh(), 5);
        assert_eq!(node.ylow(), 3);
        assert_eq!(node.yhigh(), 3);
        assert_eq!(node.span(), 4);
    }

    #[test]
    fn node_spanning_both_axes_fails() {
        let res = RrNode::new(NodeId::new(0), NodeKind::ChanX, 0, 0, 2, 2, 0);
        assert!(matches!(res, Err(GraphError::BothSpans(_))));
    }

    #[test]
    fn fixed_routing_demand_overrides_channels_only() {
        let graph = testing::chain_graph(1);
        for node in graph.nodes() {
            node.increment_demand(0.25);
        }
        for node in graph.nodes() {
            let expected = if node.kind().is_routing() { 0.7 } else { 0.0 };
            assert_eq!(node.demand(Some(0.7)), expected);
            assert_eq!(node.demand(None), 0.25);
        }
    }

    #[test]
    fn virtual_sources_reach_sink_feeders() {
        let (_, graph) = testing::tiny_fpga();
        let mut checked = 0;
        for id in graph.node_ids() {
            let node = &graph[id];
            if node.kind() != NodeKind::Sink {
                continue;
            }
            let vsrc = node.virtual_source().expect("sink without virtual source");
            let vsrc = &graph[vsrc];
            assert!(vsrc.is_virtual_source());
            assert_eq!(vsrc.kind(), NodeKind::Source);
            assert_eq!(vsrc.ptc(), node.ptc());
            // every out-edge of the virtual source feeds one of the sink's ipins
            for &chan in vsrc.out_edges() {
                assert!(graph[chan]
                    .out_edges()
                    .iter()
                    .any(|&n| graph[n].kind() == NodeKind::IPin));
            }
            checked += 1;
        }
        assert!(checked > 0);
    }
}
