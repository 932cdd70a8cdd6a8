//! Cycle-tolerant topological traversal of the legal subgraph between a
//! source and a sink.
//!
//! Nodes are released from a FIFO queue once every legal predecessor has
//! visited them. Nodes whose dependencies are unmet wait in an ordered set;
//! when the queue runs dry with waiters remaining, the graph has a cycle and
//! the first waiter is released. Ranking waiters by descending path-weight
//! proxy breaks cycles closest to the traversal start first, which keeps the
//! ripple of under-counted predecessors small.
//!
//! The driver knows nothing about what a traversal computes; enumeration and
//! every estimator parameterize it with a [`Visitor`].

use std::collections::{BTreeSet, VecDeque};

use crate::error::Error;
use crate::graph::{NodeId, RoutingGraph, RrNode};
use crate::opts::UserOptions;
use crate::scratch::{Scratch, WaitingKey};

/// Direction of a traversal over the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TraversalDir {
    /// Expand along outgoing edges, tracking state relative to the source.
    Forward,
    /// Expand along incoming edges, tracking state relative to the sink.
    Backward,
}

impl TraversalDir {
    pub(crate) fn edges(self, node: &RrNode) -> &[NodeId] {
        match self {
            TraversalDir::Forward => node.out_edges(),
            TraversalDir::Backward => node.in_edges(),
        }
    }
}

/// The fixed parameters of one traversal.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Traversal<'a> {
    pub(crate) graph: &'a RoutingGraph,
    pub(crate) from: NodeId,
    pub(crate) to: NodeId,
    pub(crate) dir: TraversalDir,
    pub(crate) max_path_weight: u32,
    pub(crate) opts: &'a UserOptions,
}

/// What to do with a child the driver just offered to the visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildAction {
    /// Track the child normally.
    Expand,
    /// Pretend this child was never reached from this parent.
    Ignore,
}

/// The three callbacks that specialize a traversal.
pub(crate) trait Visitor {
    /// Invoked when a node is released from the expansion queue.
    fn node_popped(
        &mut self,
        t: &Traversal,
        scratch: &mut Scratch,
        node: NodeId,
    ) -> Result<(), Error> {
        let _ = (t, scratch, node);
        Ok(())
    }

    /// Invoked for each legal child of a released node. `edge` is the index
    /// of the child in the parent's edge list for this direction.
    fn child_iterated(
        &mut self,
        t: &Traversal,
        scratch: &mut Scratch,
        parent: NodeId,
        edge: usize,
        child: NodeId,
    ) -> Result<ChildAction, Error> {
        let _ = (t, scratch, parent, edge, child);
        Ok(ChildAction::Expand)
    }

    /// Invoked once the traversal has drained.
    fn traversal_done(&mut self, t: &Traversal, scratch: &mut Scratch) -> Result<(), Error> {
        let _ = (t, scratch);
        Ok(())
    }
}

/// Runs a topological traversal, invoking the visitor's callbacks as nodes
/// and edges are processed.
pub(crate) fn traverse<V: Visitor>(
    t: &Traversal,
    scratch: &mut Scratch,
    visitor: &mut V,
) -> Result<(), Error> {
    let mut queue = VecDeque::new();
    let mut waiting: BTreeSet<WaitingKey> = BTreeSet::new();

    queue.push_back(t.from);
    {
        let topo = &mut scratch.topo[t.from.inner()];
        topo.was_visited = true;
        topo.visit_from(t.dir);
        topo.set_done_from(t.dir);
    }

    while let Some(node) = queue.pop_front() {
        visitor.node_popped(t, scratch, node)?;
        expand_children(t, scratch, visitor, node, &mut queue, &mut waiting)?;

        if queue.is_empty() {
            // a cycle left every remaining node with unmet dependencies;
            // release the first waiter
            if let Some(key) = waiting.pop_first() {
                scratch.topo[key.node.inner()].waiting = None;
                scratch.topo[key.node.inner()].set_done_from(t.dir);
                queue.push_back(key.node);
            }
        }
    }

    visitor.traversal_done(t, scratch)
}

fn expand_children<V: Visitor>(
    t: &Traversal,
    scratch: &mut Scratch,
    visitor: &mut V,
    parent: NodeId,
    queue: &mut VecDeque<NodeId>,
    waiting: &mut BTreeSet<WaitingKey>,
) -> Result<(), Error> {
    let num_edges = t.dir.edges(&t.graph[parent]).len();
    for edge in 0..num_edges {
        let child = t.dir.edges(&t.graph[parent])[edge];

        if scratch.topo[child.inner()].done_from(t.dir) {
            continue;
        }
        if !scratch.is_legal(t.graph, child, t.max_path_weight) {
            continue;
        }
        if visitor.child_iterated(t, scratch, parent, edge, child)? == ChildAction::Ignore {
            continue;
        }

        let visits = {
            let topo = &mut scratch.topo[child.inner()];
            topo.was_visited = true;
            topo.visit_from(t.dir)
        };
        let num_parents = scratch.num_legal_parents(t.graph, child, t.dir, t.max_path_weight);

        // counts propagate into the destination via the callback above, but
        // the destination itself is terminal
        if child == t.to {
            continue;
        }

        let remaining = num_parents as i64 - visits as i64;
        if visits == 1 && remaining > 0 {
            park_child(t, scratch, child, waiting);
        } else if visits == 1 && remaining == 0 {
            queue.push_back(child);
            scratch.topo[child.inner()].set_done_from(t.dir);
        } else if remaining > 0 {
            // still waiting on other parents
        } else if remaining == 0 {
            if let Some(key) = scratch.topo[child.inner()].waiting.take() {
                waiting.remove(&key);
            }
            queue.push_back(child);
            scratch.topo[child.inner()].set_done_from(t.dir);
        }
    }
    Ok(())
}

/// Parks a child with unmet dependencies in the waiting set. The proxy weight
/// is the minimum source→sink path weight through the child; nodes closest to
/// the start (small distance, large proxy rank) are released first when a
/// cycle must be broken.
fn park_child(t: &Traversal, scratch: &mut Scratch, child: NodeId, waiting: &mut BTreeSet<WaitingKey>) {
    let child_weight = t.graph[child].weight() as i64;
    let ss = &scratch.ss[child.inner()];
    let source_dist = ss.source_distance.unwrap_or(0) as i64;
    let sink_dist = ss.sink_distance.unwrap_or(0) as i64;
    let path_weight = source_dist + sink_dist - child_weight;
    let dist_to_start = match t.dir {
        TraversalDir::Forward => source_dist - child_weight,
        TraversalDir::Backward => sink_dist - child_weight,
    };
    let key = WaitingKey {
        path_weight,
        dist_to_start,
        node: child,
    };
    waiting.insert(key);
    scratch.topo[child.inner()].waiting = Some(key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance;
    use crate::testing;

    /// Records pop order and per-node visit counts.
    #[derive(Default)]
    struct Recorder {
        popped: Vec<NodeId>,
        child_events: Vec<(NodeId, NodeId)>,
        done: bool,
    }

    impl Visitor for Recorder {
        fn node_popped(
            &mut self,
            _t: &Traversal,
            _scratch: &mut Scratch,
            node: NodeId,
        ) -> Result<(), Error> {
            self.popped.push(node);
            Ok(())
        }

        fn child_iterated(
            &mut self,
            _t: &Traversal,
            _scratch: &mut Scratch,
            parent: NodeId,
            _edge: usize,
            child: NodeId,
        ) -> Result<ChildAction, Error> {
            self.child_events.push((parent, child));
            Ok(ChildAction::Expand)
        }

        fn traversal_done(&mut self, _t: &Traversal, _scratch: &mut Scratch) -> Result<(), Error> {
            self.done = true;
            Ok(())
        }
    }

    fn forward_traversal<'a>(
        graph: &'a RoutingGraph,
        opts: &'a UserOptions,
        source: NodeId,
        sink: NodeId,
        max_path_weight: u32,
    ) -> Traversal<'a> {
        Traversal {
            graph,
            from: source,
            to: sink,
            dir: TraversalDir::Forward,
            max_path_weight,
            opts,
        }
    }

    #[test]
    fn chain_pops_in_topological_order() -> anyhow::Result<()> {
        let graph = testing::chain_graph(2);
        let opts = UserOptions::default();
        let (source, sink) = testing::terminals(&graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 20);
        let resolved = distance::resolve_distances(&graph, source, sink, 10, &mut scratch)?;

        let t = forward_traversal(&graph, &opts, source, sink, resolved.max_path_weight);
        let mut recorder = Recorder::default();
        traverse(&t, &mut scratch, &mut recorder)?;

        // source, opin, chan, chan, ipin; the sink is never enqueued
        assert_eq!(recorder.popped.len(), 5);
        assert_eq!(recorder.popped[0], source);
        assert!(!recorder.popped.contains(&sink));
        assert!(recorder.done);
        // the ipin->sink edge is still offered to the visitor
        assert!(recorder.child_events.iter().any(|&(_, c)| c == sink));
        Ok(())
    }

    #[test]
    fn diamond_pops_join_after_both_parents() -> anyhow::Result<()> {
        let (graph, join) = testing::diamond_graph();
        let opts = UserOptions::default();
        let (source, sink) = testing::terminals(&graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 40);
        let resolved = distance::resolve_distances(&graph, source, sink, 20, &mut scratch)?;

        let t = forward_traversal(&graph, &opts, source, sink, resolved.max_path_weight);
        let mut recorder = Recorder::default();
        traverse(&t, &mut scratch, &mut recorder)?;

        let pos = |n: NodeId| recorder.popped.iter().position(|&p| p == n).unwrap();
        // the join node (shared ipin) must pop only after every branch parent
        for &parent in graph[join].in_edges() {
            assert!(pos(parent) < pos(join));
        }
        // and it must pop exactly once
        assert_eq!(recorder.popped.iter().filter(|&&p| p == join).count(), 1);
        Ok(())
    }

    #[test]
    fn cycle_is_broken_and_traversal_completes() -> anyhow::Result<()> {
        let graph = testing::cycle_graph();
        let opts = UserOptions::default();
        let (source, sink) = testing::terminals(&graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 40);
        let resolved = distance::resolve_distances(&graph, source, sink, 20, &mut scratch)?;

        let t = forward_traversal(&graph, &opts, source, sink, resolved.max_path_weight);
        let mut recorder = Recorder::default();
        traverse(&t, &mut scratch, &mut recorder)?;

        assert!(recorder.done);
        // every node pops at most once despite the cycle
        let mut seen = recorder.popped.clone();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), recorder.popped.len());
        Ok(())
    }
}
