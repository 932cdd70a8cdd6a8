//! The propagate estimator: carries per-weight reachability probabilities
//! from the source to the sink.
//!
//! Each source bucket `i` of a node holds the probability that some path of
//! cumulative weight `i` from the source reaches the node, treating paths as
//! independent (an explicit approximation). When a node pops, those
//! probabilities are ANDed with the node's own availability; when a parent
//! visits a child, they combine with OR.

use crate::arch::BlockType;
use crate::error::{Error, PathEnumError};
use crate::graph::NodeId;
use crate::opts::SelfCongestionMode;
use crate::scratch::{pair_mut, Scratch};
use crate::selfcong;
use crate::traversal::{ChildAction, Traversal, TraversalDir, Visitor};
use crate::utils::{clamp01, or_probs};

/// Visitor computing the probability that the sink is reachable.
#[derive(Debug)]
pub(crate) struct Propagate<'a> {
    pub(crate) fill_type: Option<&'a BlockType>,
    pub(crate) prob_routable: f64,
}

impl<'a> Propagate<'a> {
    pub(crate) fn new(fill_type: Option<&'a BlockType>) -> Self {
        Self {
            fill_type,
            prob_routable: 0.0,
        }
    }
}

impl Visitor for Propagate<'_> {
    fn node_popped(
        &mut self,
        t: &Traversal,
        scratch: &mut Scratch,
        node: NodeId,
    ) -> Result<(), Error> {
        // upstream probabilities have arrived; fold in this node's own
        // availability
        let demand =
            selfcong::adjusted_node_demand(t.graph, node, t.from, t.to, self.fill_type, t.opts)?;
        let demand = demand.min(1.0);

        let topo = &mut scratch.topo[node.inner()];
        // demand contributed by parents on this very connection is discounted,
        // but only on the buckets those parents actually fed
        let discount: f64 =
            topo.demand_discounts.iter().sum::<f64>() * t.opts.demand_multiplier;
        for i in 0..topo.buckets.source.len() {
            let Some(prob) = topo.buckets.source[i] else {
                continue;
            };
            let adjusted = if topo.demand_discounts[i] > 0.0 {
                demand - discount
            } else {
                demand
            };
            topo.buckets.source[i] = Some(prob * (1.0 - clamp01(adjusted)));
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
        propagate_probabilities(t, scratch, parent, edge, child)?;
        Ok(ChildAction::Expand)
    }

    fn traversal_done(&mut self, t: &Traversal, scratch: &mut Scratch) -> Result<(), Error> {
        let buckets = &scratch.topo[t.to.inner()].buckets.source;
        self.prob_routable = buckets
            .iter()
            .flatten()
            .fold(0.0, |acc, &p| or_probs(acc, p));
        Ok(())
    }
}

/// ORs the parent's per-weight reachability into the child's buckets and
/// threads the parent's per-edge demand contributions into the child's
/// discount table.
fn propagate_probabilities(
    t: &Traversal,
    scratch: &mut Scratch,
    parent: NodeId,
    edge: usize,
    child: NodeId,
) -> Result<(), Error> {
    let child_weight = t.graph[child].weight() as usize;
    let (parent_dist, child_dist_to_dest) = match t.dir {
        TraversalDir::Forward => (
            scratch.ss[parent.inner()].source_distance,
            scratch.ss[child.inner()].sink_distance,
        ),
        TraversalDir::Backward => (
            scratch.ss[parent.inner()].sink_distance,
            scratch.ss[child.inner()].source_distance,
        ),
    };
    let parent_dist = parent_dist.ok_or(PathEnumError::UndefinedDistance(parent))? as usize;
    let child_dist = child_dist_to_dest.ok_or(PathEnumError::UndefinedDistance(child))? as usize;

    let with_discounts = t.opts.self_congestion == SelfCongestionMode::PathDependence
        && t.dir == TraversalDir::Forward;
    let parent_shared = with_discounts.then(|| t.graph[parent].shared());

    let (p, c) = pair_mut(&mut scratch.topo, parent.inner(), child.inner());
    let (parent_buckets, child_buckets) = match t.dir {
        TraversalDir::Forward => (&p.buckets.source, &mut c.buckets.source),
        TraversalDir::Backward => (&p.buckets.sink, &mut c.buckets.sink),
    };

    for i in parent_dist..parent_buckets.len() {
        if i + child_dist > t.max_path_weight as usize {
            break;
        }
        let target = i + child_weight;
        if let Some(prob) = parent_buckets[i] {
            if let Some(slot) = child_buckets.get_mut(target) {
                *slot = Some(match *slot {
                    Some(existing) => or_probs(existing, prob),
                    None => prob,
                });
            }
        }
        if let Some(shared) = parent_shared.as_ref() {
            if let Some(contribution) = shared
                .child_contributions
                .get(edge)
                .and_then(|b| b.get(i))
            {
                if let Some(slot) = c.demand_discounts.get_mut(target) {
                    *slot += contribution;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::analysis;
    use crate::graph::{NodeKind, RoutingGraph};
    use crate::opts::{ProbabilityMode, SelfCongestionMode, UserOptions};
    use crate::scratch::Scratch;
    use crate::testing;

    fn estimate(graph: &RoutingGraph, opts: &UserOptions, max_path_weight: u32) -> f64 {
        let (source, sink) = testing::terminals(graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 4 * max_path_weight);
        analysis::estimate_pair(graph, source, sink, max_path_weight, None, opts, &mut scratch)
            .unwrap()
            .expect("probability should be defined")
    }

    #[test]
    fn uncongested_chain_is_certainly_routable() {
        let graph = testing::chain_graph(2);
        let opts = UserOptions::default();
        assert!((estimate(&graph, &opts, 6) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn half_congested_wire_halves_the_probability() {
        let graph = testing::chain_graph(2);
        testing::set_demand_by_kind(&graph, NodeKind::ChanX, &[0.5, 0.0]);
        let opts = UserOptions::default();
        assert!((estimate(&graph, &opts, 6) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn fully_congested_cut_blocks_the_connection() {
        let graph = testing::chain_graph(2);
        // both wires form the critical cut; saturating them kills the pair
        testing::set_demand_by_kind(&graph, NodeKind::ChanX, &[1.0, 1.0]);
        let opts = UserOptions::default();
        assert!(estimate(&graph, &opts, 6).abs() < 1e-12);
    }

    #[test]
    fn diamond_branches_combine_with_or() {
        let (graph, _) = testing::diamond_graph();
        for node in graph.nodes() {
            if node.kind().is_routing() {
                node.set_demand(0.3);
            }
        }
        let opts = UserOptions::default();
        let expected = {
            let branch = 0.7f64.powi(3);
            branch + branch - branch * branch
        };
        assert!((estimate(&graph, &opts, 20) - expected).abs() < 1e-9);
    }

    #[test]
    fn fixed_routing_demand_overrides_accumulated_demand() {
        let graph = testing::chain_graph(1);
        testing::set_demand_by_kind(&graph, NodeKind::ChanX, &[1.0]);
        let opts = UserOptions::builder()
            .use_routing_node_demand(Some(0.25))
            .build();
        assert!((estimate(&graph, &opts, 6) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn path_dependence_discount_restores_own_demand() {
        // enumerate a chain, then re-analyze the same pair: the demand the
        // pair contributed to each wire is discounted bucket-by-bucket, so
        // the connection still looks routable
        let graph = testing::chain_graph_with_contributions(2, 20);
        let opts = UserOptions::builder()
            .self_congestion(SelfCongestionMode::PathDependence)
            .probability_mode(ProbabilityMode::Propagate)
            .build();
        let (source, sink) = testing::terminals(&graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 20);
        analysis::enumerate_pair(&graph, source, sink, 6, None, &opts, &mut scratch).unwrap();
        scratch.cleanup();

        let prob = analysis::estimate_pair(&graph, source, sink, 6, None, &opts, &mut scratch)
            .unwrap()
            .unwrap();
        assert!(
            (prob - 1.0).abs() < 1e-9,
            "own demand should be fully discounted, got {prob}"
        );
    }
}
