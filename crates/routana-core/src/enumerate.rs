//! Path enumeration: propagates per-weight (or per-hop) path counts through
//! the legal subgraph and accumulates fractional demand into nodes.
//!
//! Enumeration runs as a pair of topological traversals. The backward run
//! seeds the sink with one path and fills every node's sink buckets; the
//! forward run seeds the source (with the connection's scaling factor) and
//! fills source buckets, incrementing each routing node's demand by the
//! number of paths through it as it pops.

use crate::error::{Error, PathEnumError};
use crate::graph::NodeKind;
use crate::graph::NodeId;
use crate::opts::SelfCongestionMode;
use crate::scratch::{pair_mut, BucketMode, Scratch, HOP_PADDING};
use crate::selfcong;
use crate::traversal::{ChildAction, Traversal, TraversalDir, Visitor};

/// Visitor that counts paths and accumulates demand.
#[derive(Debug)]
pub(crate) struct Enumerate {
    pub(crate) mode: BucketMode,
    /// Legal routing nodes (pins and wires) seen by the forward traversal;
    /// feeds the reliability-polynomial estimator.
    pub(crate) num_routing_nodes_in_subgraph: usize,
}

impl Enumerate {
    pub(crate) fn new(mode: BucketMode) -> Self {
        Self {
            mode,
            num_routing_nodes_in_subgraph: 0,
        }
    }
}

impl Visitor for Enumerate {
    fn node_popped(
        &mut self,
        t: &Traversal,
        scratch: &mut Scratch,
        node: NodeId,
    ) -> Result<(), Error> {
        // demand is only incremented while walking away from the source
        if t.dir != TraversalDir::Forward {
            return Ok(());
        }
        let kind = t.graph[node].kind();

        // output pins are skipped so that high opin demand does not skew
        // comparisons against opin-equivalent architectures
        if !matches!(kind, NodeKind::Source | NodeKind::Sink | NodeKind::OPin) {
            let dist = scratch.ss[node.inner()]
                .source_distance
                .ok_or(PathEnumError::UndefinedDistance(node))?;
            let contribution = scratch.topo[node.inner()].buckets.num_paths_through(
                t.graph[node].weight(),
                dist,
                t.max_path_weight,
            ) * t.opts.demand_multiplier;
            t.graph[node].increment_demand(contribution);

            if t.opts.self_congestion == SelfCongestionMode::Radius
                && matches!(
                    kind,
                    NodeKind::IPin | NodeKind::OPin | NodeKind::ChanX | NodeKind::ChanY
                )
            {
                selfcong::record_path_history(t.graph, node, t.from, contribution)?;
                selfcong::record_path_history(t.graph, node, t.to, contribution)?;
            }
        }

        if matches!(
            kind,
            NodeKind::ChanX | NodeKind::ChanY | NodeKind::IPin | NodeKind::OPin
        ) && scratch.is_legal(t.graph, node, t.max_path_weight)
        {
            self.num_routing_nodes_in_subgraph += 1;
        }
        Ok(())
    }

    fn child_iterated(
        &mut self,
        t: &Traversal,
        scratch: &mut Scratch,
        parent: NodeId,
        edge: usize,
        child: NodeId,
    ) -> Result<ChildAction, Error> {
        propagate_path_counts(t, scratch, parent, edge, child, self.mode)?;
        Ok(ChildAction::Expand)
    }
}

/// Adds the parent's path counts into the child's buckets, shifted by the
/// child's weight (one hop in hop mode). Counts that could no longer reach
/// the far terminal within the bound are not carried.
fn propagate_path_counts(
    t: &Traversal,
    scratch: &mut Scratch,
    parent: NodeId,
    edge: usize,
    child: NodeId,
    mode: BucketMode,
) -> Result<(), Error> {
    let (child_weight, max_dist) = match mode {
        BucketMode::ByPathWeight => (t.graph[child].weight(), t.max_path_weight),
        BucketMode::ByPathHops => (1, t.max_path_weight + HOP_PADDING),
    };

    let (parent_dist, child_dist_to_target) = match (t.dir, mode) {
        (TraversalDir::Forward, BucketMode::ByPathWeight) => (
            scratch.ss[parent.inner()].source_distance,
            scratch.ss[child.inner()].sink_distance,
        ),
        (TraversalDir::Backward, BucketMode::ByPathWeight) => (
            scratch.ss[parent.inner()].sink_distance,
            scratch.ss[child.inner()].source_distance,
        ),
        // hops between nodes count edges, so the parent/child hop is added
        (TraversalDir::Forward, BucketMode::ByPathHops) => (
            scratch.ss[parent.inner()].source_hops,
            scratch.ss[child.inner()].sink_hops.map(|h| h + 1),
        ),
        (TraversalDir::Backward, BucketMode::ByPathHops) => (
            scratch.ss[parent.inner()].sink_hops,
            scratch.ss[child.inner()].source_hops.map(|h| h + 1),
        ),
    };
    let parent_dist = parent_dist.ok_or(PathEnumError::UndefinedDistance(parent))? as usize;
    let child_dist = child_dist_to_target.ok_or(PathEnumError::UndefinedDistance(child))? as usize;

    let record_contributions = t.opts.self_congestion == SelfCongestionMode::PathDependence
        && t.dir == TraversalDir::Forward;
    let mut parent_shared = record_contributions.then(|| t.graph[parent].shared());

    let (p, c) = pair_mut(&mut scratch.topo, parent.inner(), child.inner());
    let (parent_buckets, child_buckets) = match t.dir {
        TraversalDir::Forward => (&p.buckets.source, &mut c.buckets.source),
        TraversalDir::Backward => (&p.buckets.sink, &mut c.buckets.sink),
    };

    for i in parent_dist..parent_buckets.len() {
        if i + child_dist > max_dist as usize {
            break;
        }
        let Some(count) = parent_buckets[i] else {
            continue;
        };
        let target = i + child_weight as usize;
        if let Some(slot) = child_buckets.get_mut(target) {
            *slot = Some(slot.unwrap_or(0.0) + count);
        }
        if let Some(shared) = parent_shared.as_mut() {
            // incremental record of the demand pushed to this child per weight
            if let Some(bucket) = shared
                .child_contributions
                .get_mut(edge)
                .and_then(|b| b.get_mut(i))
            {
                *bucket += count;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis;
    use crate::graph::RoutingGraph;
    use crate::opts::UserOptions;
    use crate::testing;

    fn enumerate(
        graph: &RoutingGraph,
        opts: &UserOptions,
        scratch: &mut Scratch,
        max_path_weight: u32,
    ) -> f64 {
        let (source, sink) = testing::terminals(graph);
        analysis::enumerate_pair(graph, source, sink, max_path_weight, None, opts, scratch)
            .unwrap()
            .expect("pair should be reachable")
    }

    #[test]
    fn straight_chain_has_one_path_and_unit_demand() {
        let graph = testing::chain_graph(2);
        let opts = UserOptions::default();
        let mut scratch = Scratch::new(graph.num_nodes(), 20);
        let enumerated = enumerate(&graph, &opts, &mut scratch, 6);
        assert_eq!(enumerated, 1.0);
        for node in graph.nodes() {
            let expected = match node.kind() {
                NodeKind::ChanX | NodeKind::IPin => 1.0,
                _ => 0.0,
            };
            assert_eq!(node.demand(None), expected, "kind {:?}", node.kind());
        }
    }

    #[test]
    fn enumerating_twice_doubles_demand() {
        let graph = testing::chain_graph(2);
        let opts = UserOptions::default();
        let mut scratch = Scratch::new(graph.num_nodes(), 20);
        enumerate(&graph, &opts, &mut scratch, 6);
        scratch.cleanup();
        enumerate(&graph, &opts, &mut scratch, 6);
        for node in graph.nodes() {
            if node.kind() == NodeKind::ChanX {
                assert!((node.demand(None) - 2.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn demand_multiplier_scales_contributions() {
        let graph = testing::chain_graph(2);
        let opts = UserOptions::builder().demand_multiplier(2.5).build();
        let mut scratch = Scratch::new(graph.num_nodes(), 20);
        enumerate(&graph, &opts, &mut scratch, 6);
        for node in graph.nodes() {
            if node.kind() == NodeKind::ChanX {
                assert!((node.demand(None) - 2.5).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn diamond_counts_both_branches() {
        let (graph, join) = testing::diamond_graph();
        let opts = UserOptions::default();
        let mut scratch = Scratch::new(graph.num_nodes(), 40);
        let enumerated = enumerate(&graph, &opts, &mut scratch, 20);
        // two disjoint branches, one path each
        assert_eq!(enumerated, 2.0);
        // the shared join node carries both paths
        assert!((graph[join].demand(None) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn cycle_counts_match_acyclic_relaxation() {
        let graph = testing::cycle_graph();
        let opts = UserOptions::default();
        let mut scratch = Scratch::new(graph.num_nodes(), 40);
        // the two-wire cycle must not inflate the path count
        let enumerated = enumerate(&graph, &opts, &mut scratch, 20);
        assert_eq!(enumerated, 1.0);
    }

    #[test]
    fn opins_accumulate_no_demand() {
        let graph = testing::chain_graph(1);
        let opts = UserOptions::default();
        let mut scratch = Scratch::new(graph.num_nodes(), 20);
        enumerate(&graph, &opts, &mut scratch, 6);
        for node in graph.nodes() {
            if node.kind() == NodeKind::OPin {
                assert_eq!(node.demand(None), 0.0);
            }
        }
    }
}
