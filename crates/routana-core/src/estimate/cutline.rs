//! The levelled cutline estimator.
//!
//! The legal subgraph is partitioned into levels as the traversal discovers
//! them: a child's level is one more than the smallest level among its
//! visiting parents. Every source→sink path crosses every level, so the
//! connection is unroutable if any level is completely congested:
//! `P(unroutable) = OR over levels of (AND over level nodes of min(1, demand))`.

use crate::arch::BlockType;
use crate::error::{Error, PathEnumError};
use crate::graph::NodeId;
use crate::scratch::Scratch;
use crate::selfcong;
use crate::traversal::{ChildAction, Traversal, Visitor};
use crate::utils::or_probs;

/// Visitor building the level partition and folding it into a probability.
#[derive(Debug)]
pub(crate) struct Cutline<'a> {
    pub(crate) fill_type: Option<&'a BlockType>,
    levels: Vec<Vec<NodeId>>,
    pub(crate) prob_routable: f64,
}

impl<'a> Cutline<'a> {
    pub(crate) fn new(fill_type: Option<&'a BlockType>) -> Self {
        Self {
            fill_type,
            levels: Vec::new(),
            prob_routable: 0.0,
        }
    }
}

impl Visitor for Cutline<'_> {
    fn node_popped(
        &mut self,
        _t: &Traversal,
        scratch: &mut Scratch,
        node: NodeId,
    ) -> Result<(), Error> {
        let level = scratch.topo[node.inner()]
            .level
            .ok_or(PathEnumError::UndefinedLevel(node))?;
        let max_level = self.levels.len() as i64 - 1;
        match level as i64 - max_level {
            d if d > 1 => {
                // topological release order guarantees levels grow one at a time
                return Err(PathEnumError::LevelJump {
                    node,
                    level,
                    max: max_level.max(0) as u32,
                }
                .into());
            }
            1 => self.levels.push(Vec::new()),
            _ => {}
        }
        self.levels[level as usize].push(node);
        Ok(())
    }

    fn child_iterated(
        &mut self,
        _t: &Traversal,
        scratch: &mut Scratch,
        parent: NodeId,
        _edge: usize,
        child: NodeId,
    ) -> Result<ChildAction, Error> {
        let parent_level = scratch.topo[parent.inner()]
            .level
            .ok_or(PathEnumError::UndefinedLevel(parent))?;
        let topo = &mut scratch.topo[child.inner()];
        // child level follows its lowest-level parent
        topo.level = Some(match topo.level {
            Some(existing) => existing.min(parent_level + 1),
            None => parent_level + 1,
        });
        Ok(ChildAction::Expand)
    }

    fn traversal_done(&mut self, t: &Traversal, scratch: &mut Scratch) -> Result<(), Error> {
        // levels at or beyond the sink's are not cuts between the terminals
        let num_levels = scratch.topo[t.to.inner()]
            .level
            .ok_or(PathEnumError::UndefinedLevel(t.to))? as usize;
        if num_levels < 2 {
            return Err(PathEnumError::TooFewLevels(num_levels).into());
        }

        let mut unreachable = 0.0;
        for level in self.levels.iter().take(num_levels).skip(1) {
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
            .probability_mode(ProbabilityMode::Cutline)
            .build();
        let (source, sink) = testing::terminals(graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 4 * max_path_weight);
        analysis::estimate_pair(graph, source, sink, max_path_weight, None, &opts, &mut scratch)
            .unwrap()
            .expect("probability should be defined")
    }

    #[test]
    fn uncongested_chain_is_routable() {
        let graph = testing::chain_graph(2);
        assert!((estimate(&graph, 6) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_wire_level_carries_its_demand() {
        let graph = testing::chain_graph(2);
        testing::set_demand_by_kind(&graph, NodeKind::ChanX, &[0.5, 0.0]);
        // each chain node is its own level; only the half-congested one cuts
        assert!((estimate(&graph, 6) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn independent_levels_combine_with_or() {
        let graph = testing::chain_graph(2);
        testing::set_demand_by_kind(&graph, NodeKind::ChanX, &[0.5, 0.5]);
        // unroutable = OR(0.5, 0.5)
        assert!((estimate(&graph, 6) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn parallel_branches_and_within_a_level() {
        let (graph, _) = testing::diamond_graph();
        for node in graph.nodes() {
            if node.kind().is_routing() {
                node.set_demand(0.5);
            }
        }
        // levels hold the two branch wires pairwise: each of the three wire
        // levels cuts with probability 0.25
        let expected = {
            let level = 0.25;
            let mut unreachable = 0.0;
            for _ in 0..3 {
                unreachable = level + unreachable - level * unreachable;
            }
            1.0 - unreachable
        };
        assert!((estimate(&graph, 20) - expected).abs() < 1e-9);
    }
}
