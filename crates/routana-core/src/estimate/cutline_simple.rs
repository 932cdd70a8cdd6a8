//! The simple cutline estimator: levels come straight from hop counts.
//!
//! The connection's hop span is split into a source half and a sink half. A
//! node lands in a level by its source hops if it falls in the source half,
//! by its complement sink hops if it falls in the sink half, and nowhere
//! otherwise. No node may be claimed by both halves.

use crate::arch::BlockType;
use crate::error::{Error, PathEnumError};
use crate::graph::NodeId;
use crate::scratch::Scratch;
use crate::selfcong;
use crate::traversal::{Traversal, Visitor};
use crate::utils::or_probs;

/// Visitor assigning nodes to hop-derived levels.
#[derive(Debug)]
pub(crate) struct CutlineSimple<'a> {
    pub(crate) fill_type: Option<&'a BlockType>,
    levels: Vec<Vec<NodeId>>,
    pub(crate) prob_routable: f64,
}

impl<'a> CutlineSimple<'a> {
    /// `num_levels` is the source→sink hop count less one: every intermediate
    /// hop position is a candidate level.
    pub(crate) fn new(fill_type: Option<&'a BlockType>, num_levels: usize) -> Self {
        Self {
            fill_type,
            levels: vec![Vec::new(); num_levels],
            prob_routable: 0.0,
        }
    }
}

impl Visitor for CutlineSimple<'_> {
    fn node_popped(
        &mut self,
        t: &Traversal,
        scratch: &mut Scratch,
        node: NodeId,
    ) -> Result<(), Error> {
        if node == t.from || node == t.to {
            return Ok(());
        }
        let ss = &scratch.ss[node.inner()];
        let source_hops = ss
            .source_hops
            .ok_or(PathEnumError::UndefinedDistance(node))?;
        let sink_hops = ss.sink_hops.ok_or(PathEnumError::UndefinedDistance(node))?;
        let level_from_source = source_hops as i64 - 1;
        let level_from_sink = sink_hops as i64 - 1;

        let num_levels = self.levels.len() as i64;
        let last = num_levels - 1;
        let source_demarcation = (num_levels as f64 / 2.0).ceil() as i64 - 1;
        let sink_demarcation = last - (source_demarcation + 1);

        if level_from_source <= source_demarcation && level_from_sink <= sink_demarcation {
            return Err(PathEnumError::BothSpheres(node).into());
        }

        let index = if level_from_source <= source_demarcation {
            Some(level_from_source)
        } else if level_from_sink <= sink_demarcation {
            Some(num_levels - 1 - level_from_sink)
        } else {
            None
        };
        if let Some(index) = index.filter(|&i| i >= 0) {
            self.levels[index as usize].push(node);
        }
        Ok(())
    }

    fn traversal_done(&mut self, t: &Traversal, scratch: &mut Scratch) -> Result<(), Error> {
        let _ = scratch;
        let mut unreachable = 0.0;
        for level in &self.levels {
            if level.is_empty() {
                continue;
            }
            let mut level_prob = 1.0;
            for &node in level {
                let demand = selfcong::adjusted_node_demand(
                    t.graph,
                    node,
                    t.from,
                    t.to,
                    self.fill_type,
                    t.opts,
                )?;
                level_prob *= demand.min(1.0);
            }
            unreachable = or_probs(level_prob, unreachable);
        }
        self.prob_routable = 1.0 - unreachable;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::analysis;
    use crate::graph::{NodeKind, RoutingGraph};
    use crate::opts::{ProbabilityMode, UserOptions};
    use crate::scratch::Scratch;
    use crate::testing;

    fn estimate(graph: &RoutingGraph, max_path_weight: u32) -> f64 {
        let opts = UserOptions::builder()
            .probability_mode(ProbabilityMode::CutlineSimple)
            .build();
        let (source, sink) = testing::terminals(graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 4 * max_path_weight);
        analysis::estimate_pair(graph, source, sink, max_path_weight, None, &opts, &mut scratch)
            .unwrap()
            .expect("probability should be defined")
    }

    #[test]
    fn straight_chain_partitions_into_singleton_levels() {
        // a five-hop chain has four intermediate hop positions, each holding
        // exactly one node
        let graph = testing::chain_graph(2);
        assert!((estimate(&graph, 6) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn half_congested_wire_halves_the_probability() {
        let graph = testing::chain_graph(2);
        testing::set_demand_by_kind(&graph, NodeKind::ChanX, &[0.5, 0.0]);
        assert!((estimate(&graph, 6) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn both_wires_congested_combine_with_or() {
        let graph = testing::chain_graph(2);
        testing::set_demand_by_kind(&graph, NodeKind::ChanX, &[0.5, 0.5]);
        assert!((estimate(&graph, 6) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn parallel_wires_and_within_levels() {
        let (graph, _) = testing::diamond_graph();
        for node in graph.nodes() {
            if node.kind().is_routing() {
                node.set_demand(0.5);
            }
        }
        // three wire levels of two parallel wires each
        let expected = {
            let level = 0.25;
            let mut unreachable: f64 = 0.0;
            for _ in 0..3 {
                unreachable = level + unreachable - level * unreachable;
            }
            1.0 - unreachable
        };
        assert!((estimate(&graph, 20) - expected).abs() < 1e-9);
    }
}
