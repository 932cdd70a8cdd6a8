//! The recursive cutline estimator.
//!
//! Like the levelled estimator, but a node that is the first to reach a given
//! height (source hops + sink hops) triggers a bounded sub-traversal that
//! "smooths" its descendants: the sub-subgraph collapses into an adjusted
//! demand on the node, and the smoothed descendants are skipped when the
//! outer traversal assigns levels. Topological state touched by a
//! sub-traversal is backed up and restored so the outer traversal can
//! continue unharmed.

use rustc_hash::FxHashMap;

use crate::arch::BlockType;
use crate::error::{Error, PathEnumError};
use crate::graph::NodeId;
use crate::scratch::{Scratch, WaitingKey};
use crate::selfcong;
use crate::traversal::{self, ChildAction, Traversal, TraversalDir, Visitor};
use crate::utils::or_probs;

/// Backup of the traversal-critical fields of one node's topological state.
#[derive(Debug, Clone)]
struct TopoBackup {
    done_from_source: bool,
    done_from_sink: bool,
    visits_from_source: u32,
    visits_from_sink: u32,
    num_legal_in: Option<u32>,
    num_legal_out: Option<u32>,
    smoothed: bool,
    waiting: Option<WaitingKey>,
}

impl TopoBackup {
    fn capture(scratch: &Scratch, node: NodeId) -> Self {
        let topo = &scratch.topo[node.inner()];
        Self {
            done_from_source: topo.done_from_source,
            done_from_sink: topo.done_from_sink,
            visits_from_source: topo.visits_from_source,
            visits_from_sink: topo.visits_from_sink,
            num_legal_in: topo.num_legal_in,
            num_legal_out: topo.num_legal_out,
            smoothed: topo.smoothed,
            waiting: topo.waiting,
        }
    }

    fn restore(&self, scratch: &mut Scratch, node: NodeId) {
        let topo = &mut scratch.topo[node.inner()];
        topo.done_from_source = self.done_from_source;
        topo.done_from_sink = self.done_from_sink;
        topo.visits_from_source = self.visits_from_source;
        topo.visits_from_sink = self.visits_from_sink;
        topo.num_legal_in = self.num_legal_in;
        topo.num_legal_out = self.num_legal_out;
        topo.smoothed = self.smoothed;
        topo.waiting = self.waiting;
    }

    /// Resets the fields a fresh sub-traversal must not inherit.
    fn clear(scratch: &mut Scratch, node: NodeId) {
        let topo = &mut scratch.topo[node.inner()];
        topo.done_from_source = false;
        topo.done_from_sink = false;
        topo.visits_from_source = 0;
        topo.visits_from_sink = 0;
        topo.num_legal_in = None;
        topo.num_legal_out = None;
        topo.smoothed = false;
        topo.waiting = None;
    }
}

/// Visitor for one (possibly recursive) cutline traversal.
#[derive(Debug)]
pub(crate) struct CutlineRecursive<'a> {
    /// Nodes at or beyond this many source hops are outside the traversal.
    bound_source_hops: i64,
    recurse_level: u32,
    backups: FxHashMap<NodeId, TopoBackup>,
    levels: Vec<Vec<NodeId>>,
    /// `None` when a level came up empty and the result is undefined.
    pub(crate) prob_routable: Option<f64>,
    source: NodeId,
    sink: NodeId,
    pub(crate) fill_type: Option<&'a BlockType>,
}

impl<'a> CutlineRecursive<'a> {
    pub(crate) fn new(
        fill_type: Option<&'a BlockType>,
        source: NodeId,
        sink: NodeId,
        bound_source_hops: i64,
        num_levels: usize,
    ) -> Self {
        Self {
            bound_source_hops,
            recurse_level: 0,
            backups: FxHashMap::default(),
            levels: vec![Vec::new(); num_levels],
            prob_routable: None,
            source,
            sink,
            fill_type,
        }
    }

    fn add_to_level(&mut self, node: NodeId, level: i64) {
        // levels beyond the structure can appear when smoothing reshapes the
        // subgraph; they carry no cut information
        if level >= 0 && (level as usize) < self.levels.len() {
            self.levels[level as usize].push(node);
        }
    }
}

fn node_height(scratch: &Scratch, node: NodeId) -> Option<i64> {
    let ss = &scratch.ss[node.inner()];
    match (ss.source_hops, ss.sink_hops) {
        (Some(src), Some(sink)) => Some(src as i64 + sink as i64),
        _ => None,
    }
}

/// True if the node has a legal parent at the given height with a smaller
/// source-hop count.
fn has_parents_of_height(
    t: &Traversal,
    scratch: &Scratch,
    node: NodeId,
    height: i64,
) -> bool {
    let node_source_hops = match scratch.ss[node.inner()].source_hops {
        Some(h) => h as i64,
        None => return false,
    };
    let parents = match t.dir {
        TraversalDir::Forward => t.graph[node].in_edges(),
        TraversalDir::Backward => t.graph[node].out_edges(),
    };
    parents.iter().any(|&parent| {
        scratch.is_legal(t.graph, parent, t.max_path_weight)
            && scratch.ss[parent.inner()]
                .source_hops
                .is_some_and(|h| (h as i64) < node_source_hops)
            && node_height(scratch, parent) == Some(height)
    })
}

impl Visitor for CutlineRecursive<'_> {
    fn node_popped(
        &mut self,
        t: &Traversal,
        scratch: &mut Scratch,
        node: NodeId,
    ) -> Result<(), Error> {
        let height =
            node_height(scratch, node).ok_or(PathEnumError::UndefinedDistance(node))?;
        let from_height =
            node_height(scratch, t.from).ok_or(PathEnumError::UndefinedDistance(t.from))?;
        let relative_height = height - from_height;

        let source_hops = scratch.ss[node.inner()]
            .source_hops
            .ok_or(PathEnumError::UndefinedDistance(node))? as i64;
        let from_source_hops = scratch.ss[t.from.inner()]
            .source_hops
            .ok_or(PathEnumError::UndefinedDistance(t.from))? as i64;
        let relative_source_hops = source_hops - from_source_hops;

        if relative_source_hops < 0
            || relative_source_hops >= self.bound_source_hops
            || relative_height < 0
        {
            return Err(PathEnumError::RecursionBounds(node).into());
        }

        // a smoothed node gets no level, but its children are still expanded
        if scratch.topo[node.inner()].smoothed {
            return Ok(());
        }

        let relative_level = if relative_height == 0 {
            Some(relative_source_hops)
        } else if has_parents_of_height(t, scratch, node, height) {
            Some(relative_source_hops - relative_height)
        } else {
            // first node at this height: smooth its descendants by collapsing
            // the sub-subgraph into an adjusted demand for this node
            let mut sub = CutlineRecursive {
                bound_source_hops: source_hops + relative_height + 1,
                recurse_level: self.recurse_level + 1,
                backups: FxHashMap::default(),
                levels: vec![Vec::new(); relative_height as usize + 1],
                prob_routable: None,
                source: self.source,
                sink: self.sink,
                fill_type: self.fill_type,
            };

            let backup = TopoBackup::capture(scratch, node);
            TopoBackup::clear(scratch, node);
            let sub_traversal = Traversal { from: node, ..*t };
            traversal::traverse(&sub_traversal, scratch, &mut sub)?;
            backup.restore(scratch, node);

            match sub.prob_routable {
                None => {
                    scratch.topo[node.inner()].smoothed = true;
                    None
                }
                Some(prob) => {
                    let demand = selfcong::adjusted_node_demand(
                        t.graph,
                        node,
                        self.source,
                        self.sink,
                        self.fill_type,
                        t.opts,
                    )?;
                    scratch.topo[node.inner()].adjusted_demand =
                        Some(or_probs(demand, 1.0 - prob));
                    Some(relative_source_hops)
                }
            }
        };

        if let Some(level) = relative_level.filter(|&l| l > 0) {
            self.add_to_level(node, level);
        }

        // smoothing traversals mark everything they level so the outer
        // traversal skips those nodes
        if self.recurse_level != 0 && node != t.from {
            scratch.topo[node.inner()].smoothed = true;
        }
        Ok(())
    }

    fn child_iterated(
        &mut self,
        t: &Traversal,
        scratch: &mut Scratch,
        _parent: NodeId,
        _edge: usize,
        child: NodeId,
    ) -> Result<ChildAction, Error> {
        let from_height = node_height(scratch, t.from);
        let child_height = node_height(scratch, child);
        let from_source_hops = scratch.ss[t.from.inner()].source_hops.map(|h| h as i64);
        let child_source_hops = scratch.ss[child.inner()].source_hops.map(|h| h as i64);

        let ignore = match (child_height, from_height, child_source_hops, from_source_hops) {
            (Some(ch), Some(fh), Some(cs), Some(fs)) => {
                let relative_source_hops = cs - fs;
                relative_source_hops < 0
                    || relative_source_hops >= self.bound_source_hops
                    || ch - fh < 0
            }
            _ => true,
        };
        if ignore {
            return Ok(ChildAction::Ignore);
        }

        if self.recurse_level > 0 {
            // each sub-traversal starts from clean state; the first visit
            // backs the node up for restoration at the end
            self.backups
                .entry(child)
                .or_insert_with(|| TopoBackup::capture(scratch, child));
            TopoBackup::clear(scratch, child);
        }
        Ok(ChildAction::Expand)
    }

    fn traversal_done(&mut self, t: &Traversal, scratch: &mut Scratch) -> Result<(), Error> {
        let mut unreachable = 0.0;
        let mut empty_level = false;
        for ilevel in 1..self.levels.len() {
            let level = std::mem::take(&mut self.levels[ilevel]);
            if level.is_empty() {
                empty_level = true;
                break;
            }
            let mut level_prob = 1.0;
            for &node in &level {
                let demand = match scratch.topo[node.inner()].adjusted_demand {
                    Some(adjusted) => adjusted,
                    None => selfcong::adjusted_node_demand(
                        t.graph,
                        node,
                        self.source,
                        self.sink,
                        self.fill_type,
                        t.opts,
                    )?,
                };
                level_prob *= demand.min(1.0);

                if self.recurse_level > 0 {
                    match self.backups.get(&node) {
                        Some(backup) => backup.restore(scratch, node),
                        None => return Err(PathEnumError::MissingBackup(node).into()),
                    }
                }
            }
            unreachable = or_probs(level_prob, unreachable);
            self.levels[ilevel] = level;
        }
        self.prob_routable = if empty_level {
            None
        } else {
            Some(1.0 - unreachable)
        };
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

    fn estimate(graph: &RoutingGraph, max_path_weight: u32) -> Option<f64> {
        let opts = UserOptions::builder()
            .probability_mode(ProbabilityMode::CutlineRecursive)
            .build();
        let (source, sink) = testing::terminals(graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 4 * max_path_weight);
        analysis::estimate_pair(graph, source, sink, max_path_weight, None, &opts, &mut scratch)
            .unwrap()
    }

    #[test]
    fn uncongested_chain_is_routable() {
        let graph = testing::chain_graph(2);
        let prob = estimate(&graph, 6).expect("chain probability should be defined");
        assert!((prob - 1.0).abs() < 1e-12);
    }

    #[test]
    fn congested_wire_cuts_the_chain() {
        let graph = testing::chain_graph(2);
        testing::set_demand_by_kind(&graph, NodeKind::ChanX, &[0.5, 0.0]);
        let prob = estimate(&graph, 6).expect("chain probability should be defined");
        assert!((prob - 0.5).abs() < 1e-12);
    }

    #[test]
    fn first_node_at_a_height_is_smoothed_out() {
        // the detour wire sits one hop deeper than the direct path; it is
        // first at its height, its sub-traversal finds an empty level, and it
        // is smoothed out of the level structure
        let (graph, detour) = testing::detour_graph();
        graph[detour].set_demand(0.9);
        let prob = estimate(&graph, 10).expect("detour probability should be defined");
        // the smoothed detour contributes no cut of its own
        assert!((prob - 1.0).abs() < 1e-12);
    }

    #[test]
    fn diamond_levels_match_the_levelled_estimator() {
        let (graph, _) = testing::diamond_graph();
        for node in graph.nodes() {
            if node.kind().is_routing() {
                node.set_demand(0.5);
            }
        }
        let prob = estimate(&graph, 20).expect("diamond probability should be defined");
        let expected = {
            let level = 0.25;
            let mut unreachable: f64 = 0.0;
            for _ in 0..3 {
                unreachable = level + unreachable - level * unreachable;
            }
            1.0 - unreachable
        };
        assert!((prob - expected).abs() < 1e-9);
    }
}
