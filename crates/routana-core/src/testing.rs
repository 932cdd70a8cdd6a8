//! Utilities for writing tests: small hand-built routing graphs and a
//! miniature FPGA fixture.

use crate::arch::{Arch, BlockType, GridTile, PinClass, PinKind};
use crate::graph::{NodeId, NodeKind, RoutingGraph, RrNode, Switch, NUM_NODE_KINDS};

/// Incrementally builds a [`RoutingGraph`] for tests.
pub(crate) struct GraphBuilder {
    nodes: Vec<RrNode>,
    lookup: Vec<Vec<Vec<Vec<Option<NodeId>>>>>,
}

impl GraphBuilder {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            lookup: Vec::new(),
        }
    }

    pub(crate) fn with_grid(x_size: usize, y_size: usize) -> Self {
        Self {
            nodes: Vec::new(),
            lookup: vec![vec![vec![Vec::new(); y_size]; x_size]; NUM_NODE_KINDS],
        }
    }

    /// Adds a single-tile node.
    pub(crate) fn node(&mut self, kind: NodeKind, x: usize, y: usize, ptc: usize) -> NodeId {
        self.spanning_node(kind, x, y, x, y, ptc)
    }

    /// Adds a node spanning from `(x1, y1)` to `(x2, y2)`.
    pub(crate) fn spanning_node(
        &mut self,
        kind: NodeKind,
        x1: usize,
        y1: usize,
        x2: usize,
        y2: usize,
        ptc: usize,
    ) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes
            .push(RrNode::new(id, kind, x1, y1, x2, y2, ptc).unwrap());
        id
    }

    /// Registers a node in the per-tile lookup table at the given slot.
    pub(crate) fn register(&mut self, kind: NodeKind, x: usize, y: usize, slot: usize, id: NodeId) {
        let slots = &mut self.lookup[kind.as_index()][x][y];
        if slots.len() <= slot {
            slots.resize(slot + 1, None);
        }
        slots[slot] = Some(id);
    }

    pub(crate) fn edge(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from.inner()].push_edge(to, 0);
    }

    pub(crate) fn build(self) -> RoutingGraph {
        let mut graph = RoutingGraph::from_parts(self.nodes, vec![Switch::default()], self.lookup);
        graph.rebuild_in_edges();
        graph.init_weights();
        graph
    }

    /// Builds with sink virtual sources attached (the full VPR-mode
    /// finalization).
    pub(crate) fn build_with_virtual_sources(self) -> RoutingGraph {
        let mut graph = RoutingGraph::from_parts(self.nodes, vec![Switch::default()], self.lookup);
        graph.rebuild_in_edges();
        graph.add_virtual_sources().unwrap();
        graph.init_weights();
        graph
    }
}

/// A straight chain: `source -> opin -> chan * n -> ipin -> sink`, all wires
/// weight one.
pub(crate) fn chain_graph(num_chans: usize) -> RoutingGraph {
    let mut b = GraphBuilder::new();
    let source = b.node(NodeKind::Source, 1, 1, 0);
    let opin = b.node(NodeKind::OPin, 1, 1, 0);
    b.edge(source, opin);
    let mut prev = opin;
    for i in 0..num_chans {
        let chan = b.node(NodeKind::ChanX, 2 + i, 1, i);
        b.edge(prev, chan);
        prev = chan;
    }
    let ipin = b.node(NodeKind::IPin, 2 + num_chans, 1, 1);
    let sink = b.node(NodeKind::Sink, 2 + num_chans, 1, 1);
    b.edge(prev, ipin);
    b.edge(ipin, sink);
    b.build()
}

/// A chain with per-edge child-contribution tables allocated
/// (path-dependence self-congestion mode).
pub(crate) fn chain_graph_with_contributions(
    num_chans: usize,
    max_path_weight_bound: u32,
) -> RoutingGraph {
    let mut graph = chain_graph(num_chans);
    graph.alloc_child_contributions(max_path_weight_bound as usize + 1);
    graph
}

/// Two disjoint three-wire branches from one opin, joined at a shared ipin.
/// Returns the graph and the join (ipin) node.
pub(crate) fn diamond_graph() -> (RoutingGraph, NodeId) {
    let mut b = GraphBuilder::new();
    let source = b.node(NodeKind::Source, 1, 1, 0);
    let opin = b.node(NodeKind::OPin, 1, 1, 0);
    b.edge(source, opin);
    let mut branch_ends = Vec::new();
    for (branch, y) in [(0, 1), (1, 2)] {
        let mut prev = opin;
        for i in 0..3 {
            let chan = b.node(NodeKind::ChanX, 2 + i, y, branch * 3 + i);
            b.edge(prev, chan);
            prev = chan;
        }
        branch_ends.push(prev);
    }
    let ipin = b.node(NodeKind::IPin, 5, 1, 1);
    let sink = b.node(NodeKind::Sink, 5, 1, 1);
    for end in branch_ends {
        b.edge(end, ipin);
    }
    b.edge(ipin, sink);
    (b.build(), ipin)
}

/// A two-wire chain with a third wire detouring around the first hop:
/// `c1 -> d -> c2` in parallel with `c1 -> c2`. The detour node sits one hop
/// deeper than every node on the direct path. Returns the graph and the
/// detour node.
pub(crate) fn detour_graph() -> (RoutingGraph, NodeId) {
    let mut b = GraphBuilder::new();
    let source = b.node(NodeKind::Source, 1, 1, 0);
    let opin = b.node(NodeKind::OPin, 1, 1, 0);
    let c1 = b.node(NodeKind::ChanX, 2, 1, 0);
    let c2 = b.node(NodeKind::ChanX, 3, 1, 1);
    let detour = b.node(NodeKind::ChanX, 2, 2, 2);
    let ipin = b.node(NodeKind::IPin, 4, 1, 1);
    let sink = b.node(NodeKind::Sink, 4, 1, 1);
    b.edge(source, opin);
    b.edge(opin, c1);
    b.edge(c1, c2);
    b.edge(c1, detour);
    b.edge(detour, c2);
    b.edge(c2, ipin);
    b.edge(ipin, sink);
    (b.build(), detour)
}

/// A chain whose two wires also form a cycle (`c2 -> c1`).
pub(crate) fn cycle_graph() -> RoutingGraph {
    let mut b = GraphBuilder::new();
    let source = b.node(NodeKind::Source, 1, 1, 0);
    let opin = b.node(NodeKind::OPin, 1, 1, 0);
    let c1 = b.node(NodeKind::ChanX, 2, 1, 0);
    let c2 = b.node(NodeKind::ChanX, 3, 1, 1);
    let ipin = b.node(NodeKind::IPin, 4, 1, 1);
    let sink = b.node(NodeKind::Sink, 4, 1, 1);
    b.edge(source, opin);
    b.edge(opin, c1);
    b.edge(c1, c2);
    b.edge(c2, c1);
    b.edge(c2, ipin);
    b.edge(ipin, sink);
    b.build()
}

/// The first real source and the first sink in the graph.
pub(crate) fn terminals(graph: &RoutingGraph) -> (NodeId, NodeId) {
    let source = graph
        .node_ids()
        .find(|&id| graph[id].kind() == NodeKind::Source && !graph[id].is_virtual_source())
        .expect("graph has a source");
    let sink = graph
        .node_ids()
        .find(|&id| graph[id].kind() == NodeKind::Sink)
        .expect("graph has a sink");
    (source, sink)
}

/// Sets demands on nodes of one kind, in id order.
pub(crate) fn set_demand_by_kind(graph: &RoutingGraph, kind: NodeKind, demands: &[f64]) {
    let mut demands = demands.iter();
    for id in graph.node_ids() {
        if graph[id].kind() == kind {
            if let Some(&demand) = demands.next() {
                graph[id].set_demand(demand);
            }
        }
    }
}

/// A logic block with one driver pin (class 0) and one receiver pin
/// (class 1).
pub(crate) fn fill_block_type() -> BlockType {
    BlockType {
        name: "clb".into(),
        index: 1,
        num_pins: 2,
        width: 1,
        height: 1,
        num_drivers: 1,
        num_receivers: 1,
        classes: vec![
            PinClass {
                kind: Some(PinKind::Driver),
                pins: vec![0],
            },
            PinClass {
                kind: Some(PinKind::Receiver),
                pins: vec![1],
            },
        ],
        pin_class: vec![0, 1],
        is_global_pin: vec![false, false],
    }
}

/// A 7x7 grid with an I/O perimeter and a 5x5 logic interior. Every interior
/// tile holds a source, sink, output pin, input pin, and one channel wire;
/// wires connect to the four neighboring tiles' wires. Sinks get virtual
/// sources attached, as after a VPR-mode load.
pub(crate) fn tiny_fpga() -> (Arch, RoutingGraph) {
    const SIZE: usize = 7;

    let io = BlockType {
        name: "io".into(),
        index: 0,
        ..BlockType::default()
    };
    let clb = fill_block_type();

    let mut grid = vec![vec![GridTile::default(); SIZE]; SIZE];
    for (x, column) in grid.iter_mut().enumerate() {
        for (y, tile) in column.iter_mut().enumerate() {
            let interior = x > 0 && x < SIZE - 1 && y > 0 && y < SIZE - 1;
            tile.type_index = if interior { 1 } else { 0 };
        }
    }
    let mut arch = Arch {
        block_types: vec![io, clb],
        grid,
        fill_type: None,
    };
    arch.set_fill_type();

    let mut b = GraphBuilder::with_grid(SIZE, SIZE);
    let mut chans = vec![vec![None; SIZE]; SIZE];
    for x in 1..SIZE - 1 {
        for y in 1..SIZE - 1 {
            let source = b.node(NodeKind::Source, x, y, 0);
            let sink = b.node(NodeKind::Sink, x, y, 1);
            let opin = b.node(NodeKind::OPin, x, y, 0);
            let ipin = b.node(NodeKind::IPin, x, y, 1);
            let chan = b.node(NodeKind::ChanX, x, y, 0);
            b.edge(source, opin);
            b.edge(opin, chan);
            b.edge(chan, ipin);
            b.edge(ipin, sink);
            // the dump registers source and sink classes side by side
            b.register(NodeKind::Source, x, y, 0, source);
            b.register(NodeKind::Source, x, y, 1, sink);
            b.register(NodeKind::Sink, x, y, 1, sink);
            b.register(NodeKind::OPin, x, y, 0, opin);
            b.register(NodeKind::IPin, x, y, 1, ipin);
            b.register(NodeKind::ChanX, x, y, 0, chan);
            chans[x][y] = Some(chan);
        }
    }
    // connect each wire to its interior neighbors, both directions
    for x in 1..SIZE - 1 {
        for y in 1..SIZE - 1 {
            let chan = chans[x][y].unwrap();
            for (nx, ny) in [(x + 1, y), (x, y + 1)] {
                if let Some(Some(neighbor)) = chans.get(nx).and_then(|c| c.get(ny)).copied() {
                    b.edge(chan, neighbor);
                    b.edge(neighbor, chan);
                }
            }
        }
    }
    let graph = b.build_with_virtual_sources();
    (arch, graph)
}
