//! Source/sink distance resolution.
//!
//! For each pair under analysis, two bounded Dijkstra runs fill every touched
//! node's minimum weight-distance from the source (over outgoing edges) and
//! from the sink (over incoming edges). A BFS over the legal subgraph fills
//! hop counts when an estimator needs them. The maximum path weight is
//! tightened per pair to a multiple of the actual minimum distance.

use crate::error::{Error, PathEnumError};
use crate::graph::{NodeId, NodeKind, RoutingGraph};
use crate::pq::BoundedPq;
use crate::scratch::Scratch;
use crate::traversal::TraversalDir;

/// Paths may exceed the minimum source→sink distance by this factor.
pub(crate) const PATH_FLEXIBILITY_FACTOR: f64 = 2.0;

/// Outcome of resolving a pair's distances.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedPair {
    /// The per-pair maximum path weight: the user bound tightened to
    /// `ceil(min_dist * PATH_FLEXIBILITY_FACTOR)`.
    pub(crate) max_path_weight: u32,
    /// Minimum source→sink weight-distance; `None` when the sink is
    /// unreachable within the bound.
    pub(crate) min_dist: Option<u32>,
}

/// Tightens the maximum path weight to the pair's actual minimum distance.
/// The tightened bound holds for the current pair only.
pub(crate) fn adjust_max_path_weight(min_dist: u32, current_max: u32) -> u32 {
    ((min_dist as f64 * PATH_FLEXIBILITY_FACTOR).ceil() as u32).min(current_max)
}

/// Fills source and sink distances for the subgraph relevant to the pair and
/// returns the tightened maximum path weight.
pub(crate) fn resolve_distances(
    graph: &RoutingGraph,
    source: NodeId,
    sink: NodeId,
    max_path_weight: u32,
    scratch: &mut Scratch,
) -> Result<ResolvedPair, Error> {
    set_node_distances(graph, source, sink, max_path_weight, TraversalDir::Forward, scratch)?;
    set_node_distances(graph, sink, source, max_path_weight, TraversalDir::Backward, scratch)?;

    let min_dist = scratch.ss[sink.inner()].source_distance;
    let max_path_weight = match min_dist {
        Some(d) => adjust_max_path_weight(d, max_path_weight),
        None => max_path_weight,
    };
    Ok(ResolvedPair {
        max_path_weight,
        min_dist,
    })
}

/// One Dijkstra run from `from` toward `to`, filling distances relative to
/// `from`. Every popped node is recorded in the scratch visited list so the
/// pair's cleanup can walk only the touched subgraph.
pub(crate) fn set_node_distances(
    graph: &RoutingGraph,
    from: NodeId,
    to: NodeId,
    mut max_path_weight: u32,
    dir: TraversalDir,
    scratch: &mut Scratch,
) -> Result<(), Error> {
    let dest = &graph[to];
    if dest.xlow() != dest.xhigh() || dest.ylow() != dest.yhigh() {
        return Err(PathEnumError::SpannedDestination(to).into());
    }
    let (dest_x, dest_y) = (dest.xlow(), dest.ylow());

    let mut pq = BoundedPq::new(max_path_weight * 2);
    pq.push(from, 0);
    {
        let ss = &mut scratch.ss[from.inner()];
        match dir {
            TraversalDir::Forward => {
                ss.source_distance = Some(0);
                ss.visited_from_source = true;
            }
            TraversalDir::Backward => {
                ss.sink_distance = Some(0);
                ss.visited_from_sink = true;
            }
        }
    }

    while let Some((node, path_weight)) = pq.pop() {
        if node == to {
            max_path_weight = adjust_max_path_weight(path_weight, max_path_weight);
        }
        relax_children(
            graph,
            node,
            path_weight,
            dest_x,
            dest_y,
            max_path_weight,
            dir,
            scratch,
            &mut pq,
        );
        scratch.visited.push(node);
    }
    Ok(())
}

/// Relaxes the children of a popped node, pruning geometrically hopeless ones
/// and (backward) nodes that cannot lie on any legal path.
#[allow(clippy::too_many_arguments)]
fn relax_children(
    graph: &RoutingGraph,
    parent: NodeId,
    base_weight: u32,
    dest_x: usize,
    dest_y: usize,
    max_path_weight: u32,
    dir: TraversalDir,
    scratch: &mut Scratch,
    pq: &mut BoundedPq<NodeId>,
) {
    let edges = dir.edges(&graph[parent]);
    for &child in edges {
        let node = &graph[child];
        let ss = &mut scratch.ss[child.inner()];
        let already = match dir {
            TraversalDir::Forward => ss.visited_from_source,
            TraversalDir::Backward => ss.visited_from_sink,
        };
        if already {
            continue;
        }

        let path_weight = base_weight + node.weight();
        match dir {
            TraversalDir::Forward => {
                // input pins are only interesting on the destination tile
                if node.kind() == NodeKind::IPin
                    && node.xlow() != dest_x
                    && node.ylow() != dest_y
                {
                    continue;
                }
                if !has_chance_to_reach(node.xlow(), node.xhigh(), node.ylow(), node.yhigh(), dest_x, dest_y, path_weight, max_path_weight) {
                    continue;
                }
                ss.source_distance = Some(path_weight);
                ss.visited_from_source = true;
            }
            TraversalDir::Backward => {
                if node.kind() == NodeKind::OPin
                    && node.xlow() != dest_x
                    && node.ylow() != dest_y
                {
                    continue;
                }
                ss.sink_distance = Some(path_weight);
                ss.visited_from_sink = true;
                // source distances are already in place, so nodes that cannot
                // lie on a legal path are dropped outright
                if !ss.is_legal(node.weight(), max_path_weight) {
                    ss.sink_distance = None;
                    ss.visited_from_sink = false;
                    continue;
                }
            }
        }
        pq.push(child, path_weight);
    }
}

/// Manhattan lower bound on whether a node terminating a path of
/// `path_weight` can still reach the destination within the bound.
#[allow(clippy::too_many_arguments)]
fn has_chance_to_reach(
    xlow: usize,
    xhigh: usize,
    ylow: usize,
    yhigh: usize,
    dest_x: usize,
    dest_y: usize,
    path_weight: u32,
    max_path_weight: u32,
) -> bool {
    let (xlow, xhigh, ylow, yhigh) = (xlow as i64, xhigh as i64, ylow as i64, yhigh as i64);
    let (dest_x, dest_y) = (dest_x as i64, dest_y as i64);

    let (x_diff, y_diff) = if xlow == xhigh {
        // node spans in the y direction (or is a single tile)
        let x_diff = (dest_x - xlow).abs();
        let y_diff = if dest_y > yhigh {
            dest_y - yhigh
        } else if dest_y >= ylow {
            0
        } else {
            ylow - dest_y
        };
        (x_diff, y_diff)
    } else {
        // node spans in the x direction
        if dest_x <= xhigh && dest_x >= xlow {
            (0, (dest_y - ylow).abs() - 1)
        } else if dest_x > xhigh {
            (dest_x - xhigh, (dest_y - ylow).abs())
        } else {
            (xlow - dest_x, (dest_y - ylow).abs())
        }
    };
    let remaining = (x_diff + y_diff - 1).max(0);
    path_weight as i64 + remaining <= max_path_weight as i64
}

/// BFS over the legal subgraph from `from`, filling the minimum hop count of
/// every reached node (source hops forward, sink hops backward).
pub(crate) fn set_node_hops(
    graph: &RoutingGraph,
    from: NodeId,
    max_path_weight: u32,
    dir: TraversalDir,
    scratch: &mut Scratch,
) {
    let mut queue = std::collections::VecDeque::new();
    queue.push_back(from);
    match dir {
        TraversalDir::Forward => scratch.ss[from.inner()].source_hops = Some(0),
        TraversalDir::Backward => scratch.ss[from.inner()].sink_hops = Some(0),
    }

    while let Some(node) = queue.pop_front() {
        let hops = {
            let ss = &mut scratch.ss[node.inner()];
            match dir {
                TraversalDir::Forward => {
                    ss.visited_from_source_hops = true;
                    ss.source_hops.unwrap_or(0)
                }
                TraversalDir::Backward => {
                    ss.visited_from_sink_hops = true;
                    ss.sink_hops.unwrap_or(0)
                }
            }
        };
        let edges = dir.edges(&graph[node]);
        for &child in edges {
            if !scratch.is_legal(graph, child, max_path_weight) {
                continue;
            }
            let ss = &mut scratch.ss[child.inner()];
            let already = match dir {
                TraversalDir::Forward => ss.visited_from_source_hops,
                TraversalDir::Backward => ss.visited_from_sink_hops,
            };
            if already {
                continue;
            }
            match dir {
                TraversalDir::Forward => {
                    ss.visited_from_source_hops = true;
                    ss.source_hops = Some(hops + 1);
                }
                TraversalDir::Backward => {
                    ss.visited_from_sink_hops = true;
                    ss.sink_hops = Some(hops + 1);
                }
            }
            queue.push_back(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn chain_distances_count_channel_weight() -> anyhow::Result<()> {
        let graph = testing::chain_graph(2);
        let (source, sink) = testing::terminals(&graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 20);
        let resolved = resolve_distances(&graph, source, sink, 10, &mut scratch)?;

        // two weight-1 wires between free pins
        assert_eq!(resolved.min_dist, Some(2));
        // bound tightens to ceil(2 * 2.0)
        assert_eq!(resolved.max_path_weight, 4);
        assert_eq!(scratch.ss[sink.inner()].source_distance, Some(2));
        assert_eq!(scratch.ss[source.inner()].sink_distance, Some(2));
        // every node on the chain is legal
        for id in graph.node_ids() {
            assert!(
                scratch.is_legal(&graph, id, resolved.max_path_weight),
                "node {id} should be legal"
            );
        }
        Ok(())
    }

    #[test]
    fn hops_count_edges_to_each_node() -> anyhow::Result<()> {
        let graph = testing::chain_graph(2);
        let (source, sink) = testing::terminals(&graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 20);
        let resolved = resolve_distances(&graph, source, sink, 10, &mut scratch)?;
        set_node_hops(&graph, source, resolved.max_path_weight, TraversalDir::Forward, &mut scratch);
        set_node_hops(&graph, sink, resolved.max_path_weight, TraversalDir::Backward, &mut scratch);

        // source -> opin -> chan -> chan -> ipin -> sink is five edges
        assert_eq!(scratch.ss[sink.inner()].source_hops, Some(5));
        assert_eq!(scratch.ss[source.inner()].sink_hops, Some(5));
        Ok(())
    }

    #[test]
    fn geometric_prune_rejects_hopeless_nodes() {
        // single-tile node at (1, 1), destination at (5, 5): the remaining
        // lower bound is 4 + 4 - 1 = 7
        assert!(has_chance_to_reach(1, 1, 1, 1, 5, 5, 0, 7));
        assert!(!has_chance_to_reach(1, 1, 1, 1, 5, 5, 0, 6));
        assert!(!has_chance_to_reach(1, 1, 1, 1, 5, 5, 2, 8));
        // an x-spanning wire covering the destination column
        assert!(has_chance_to_reach(1, 4, 2, 2, 3, 2, 5, 5));
    }

    #[test]
    fn unreachable_pair_yields_no_min_dist() -> anyhow::Result<()> {
        // a sink far beyond the weight bound is never reached
        let graph = testing::chain_graph(8);
        let (source, sink) = testing::terminals(&graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 20);
        let resolved = resolve_distances(&graph, source, sink, 3, &mut scratch)?;
        assert_eq!(resolved.min_dist, None);
        Ok(())
    }

    #[test]
    fn cleanup_after_resolution_resets_touched_state() -> anyhow::Result<()> {
        let graph = testing::chain_graph(2);
        let (source, sink) = testing::terminals(&graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 20);
        resolve_distances(&graph, source, sink, 10, &mut scratch)?;
        assert!(!scratch.visited.is_empty());
        scratch.cleanup();
        for id in graph.node_ids() {
            assert_eq!(scratch.ss[id.inner()].source_distance, None);
            assert_eq!(scratch.ss[id.inner()].sink_distance, None);
        }
        Ok(())
    }
}
