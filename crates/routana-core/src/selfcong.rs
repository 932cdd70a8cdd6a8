//! Self-congestion bookkeeping.
//!
//! Demand enumerated from a source to a sink conflicts with probability
//! analysis of that same pair: if the pair's own paths saturated a pin, every
//! connection through it would look unroutable. The radius mode keeps a
//! polar-indexed history of path counts per nearby terminal so that a pair's
//! own contribution can be subtracted when that pair is analyzed. (The
//! path-dependence mode lives in the per-edge contribution tables and is
//! discounted bucket-by-bucket inside the propagate estimator.)

use crate::arch::BlockType;
use crate::error::{Error, PathEnumError};
use crate::graph::{NodeId, NodeKind, RoutingGraph};
use crate::opts::UserOptions;

/// Polar-indexed path-count history. The table is keyed by the Manhattan
/// radius to the terminal, the arc position along that radius' circumference
/// (counted counterclockwise from the positive-x axis), and the terminal's
/// pin class.
#[derive(Debug, Clone)]
pub(crate) struct PathHistory {
    radius: usize,
    /// `[radius][arc][class]`
    counts: Vec<Vec<Vec<f64>>>,
}

impl PathHistory {
    /// A Manhattan circle of radius `r` has `max(1, 4r)` tiles on its
    /// circumference.
    pub(crate) fn new(radius: usize, num_classes: usize) -> Self {
        let counts = (0..=radius)
            .map(|r| vec![vec![0.0; num_classes]; (4 * r).max(1)])
            .collect();
        Self { radius, counts }
    }

    /// Maps a `(dx, dy)` offset to polar `(radius, arc)` coordinates, or
    /// `None` when the offset is beyond the recorded radius.
    fn slot(&self, dx: i64, dy: i64) -> Option<(usize, usize)> {
        let dist = (dx.abs() + dy.abs()) as usize;
        if dist > self.radius {
            return None;
        }
        let d = dist as i64;
        let arc = if dist == 0 {
            0
        } else if dx > 0 && dy >= 0 {
            dy
        } else if dx <= 0 && dy > 0 {
            -dx + d
        } else if dx < 0 && dy <= 0 {
            -dy + 2 * d
        } else {
            dx + 3 * d
        };
        Some((dist, arc as usize))
    }

    fn increment(&mut self, dx: i64, dy: i64, class: usize, value: f64) {
        if let Some((radius, arc)) = self.slot(dx, dy) {
            if let Some(count) = self.counts[radius][arc].get_mut(class) {
                *count += value;
            }
        }
    }

    fn get(&self, dx: i64, dy: i64, class: usize) -> f64 {
        match self.slot(dx, dy) {
            Some((radius, arc)) => self.counts[radius][arc].get(class).copied().unwrap_or(0.0),
            None => 0.0,
        }
    }
}

/// Records the demand a connection terminal contributed to a node. The
/// terminal must be the source or sink of the connection being enumerated.
pub(crate) fn record_path_history(
    graph: &RoutingGraph,
    node: NodeId,
    terminal: NodeId,
    value: f64,
) -> Result<(), Error> {
    let term = &graph[terminal];
    if !matches!(term.kind(), NodeKind::Source | NodeKind::Sink) {
        return Err(PathEnumError::UnexpectedNodeKind {
            node: terminal,
            kind: term.kind(),
        }
        .into());
    }
    let dx = graph[node].xlow() as i64 - term.xlow() as i64;
    let dy = graph[node].ylow() as i64 - term.ylow() as i64;
    let class = term.ptc();
    let mut shared = graph[node].shared();
    if let Some(history) = shared.path_history.as_mut() {
        history.increment(dx, dy, class, value);
    }
    Ok(())
}

/// A node's demand, less the share attributable to the connection currently
/// being analyzed (radius mode). Without a fill type (simple graphs) or
/// without recorded history, the demand is returned unmodified.
pub(crate) fn adjusted_node_demand(
    graph: &RoutingGraph,
    node: NodeId,
    source: NodeId,
    sink: NodeId,
    fill_type: Option<&BlockType>,
    opts: &UserOptions,
) -> Result<f64, Error> {
    let mut demand = graph[node].demand(opts.use_routing_node_demand);
    let Some(fill) = fill_type else {
        return Ok(demand);
    };

    let contribution_from = |terminal: NodeId| -> f64 {
        let term = &graph[terminal];
        let num_pins = fill
            .classes()
            .get(term.ptc())
            .map(|c| c.num_pins())
            .unwrap_or(1)
            .max(1);
        let dx = graph[node].xlow() as i64 - term.xlow() as i64;
        let dy = graph[node].ylow() as i64 - term.ylow() as i64;
        let shared = graph[node].shared();
        match shared.path_history.as_ref() {
            Some(history) => history.get(dx, dy, term.ptc()) / num_pins as f64,
            None => 0.0,
        }
    };

    let modifier = contribution_from(source)
        .max(contribution_from(sink))
        .max(0.0);
    if modifier > demand + 1e-5 {
        return Err(PathEnumError::DiscountExceedsDemand {
            node,
            demand,
            discount: modifier,
        }
        .into());
    }
    demand = (demand - modifier).max(0.0);
    Ok(demand)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis;
    use crate::opts::UserOptions;
    use crate::scratch::Scratch;
    use crate::testing::{self, GraphBuilder};

    #[test]
    fn radius_history_discounts_the_pair_that_caused_the_demand() {
        let mut b = GraphBuilder::new();
        let source = b.node(NodeKind::Source, 5, 5, 0);
        let opin = b.node(NodeKind::OPin, 5, 5, 0);
        let chan = b.node(NodeKind::ChanX, 5, 5, 0);
        let ipin = b.node(NodeKind::IPin, 6, 5, 1);
        let sink = b.node(NodeKind::Sink, 6, 5, 1);
        b.edge(source, opin);
        b.edge(opin, chan);
        b.edge(chan, ipin);
        b.edge(ipin, sink);
        // an unrelated pair whose terminals sit on neighboring tiles
        let other_source = b.node(NodeKind::Source, 4, 5, 0);
        let other_sink = b.node(NodeKind::Sink, 6, 6, 1);
        let mut graph = b.build();
        graph.alloc_path_histories(2);

        let opts = UserOptions::builder()
            .self_congestion(crate::opts::SelfCongestionMode::Radius)
            .build();
        let mut scratch = Scratch::new(graph.num_nodes(), 10);
        analysis::enumerate_pair(&graph, source, sink, 6, None, &opts, &mut scratch)
            .unwrap()
            .expect("pair should be reachable");
        scratch.cleanup();
        assert!((graph[chan].demand(None) - 1.0).abs() < 1e-12);

        let fill = testing::fill_block_type();
        // the wire shares the source's tile, so the pair's own demand is
        // fully discounted when analyzing that pair
        let own = adjusted_node_demand(&graph, chan, source, sink, Some(&fill), &opts).unwrap();
        assert!(own.abs() < 1e-12);
        // a different pair sees the full demand
        let other =
            adjusted_node_demand(&graph, chan, other_source, other_sink, Some(&fill), &opts)
                .unwrap();
        assert!((other - 1.0).abs() < 1e-12);

        // and the propagate estimator consequently sees the pair as routable
        let prob = analysis::estimate_pair(&graph, source, sink, 6, Some(&fill), &opts, &mut scratch)
            .unwrap()
            .unwrap();
        assert!((prob - 1.0).abs() < 1e-12);
    }

    #[test]
    fn polar_slots_cover_the_circumference() {
        let history = PathHistory::new(2, 1);
        // radius 1 has four arcs, radius 2 has eight
        assert_eq!(history.slot(0, 0), Some((0, 0)));
        assert_eq!(history.slot(1, 0), Some((1, 0)));
        assert_eq!(history.slot(0, 1), Some((1, 1)));
        assert_eq!(history.slot(-1, 0), Some((1, 2)));
        assert_eq!(history.slot(0, -1), Some((1, 3)));
        assert_eq!(history.slot(1, 1), Some((2, 1)));
        assert_eq!(history.slot(-1, 1), Some((2, 3)));
        assert_eq!(history.slot(-1, -1), Some((2, 5)));
        assert_eq!(history.slot(1, -1), Some((2, 7)));
        // beyond the radius nothing is recorded
        assert_eq!(history.slot(3, 0), None);
    }

    #[test]
    fn history_accumulates_per_class() {
        let mut history = PathHistory::new(1, 2);
        history.increment(1, 0, 0, 0.5);
        history.increment(1, 0, 0, 0.25);
        history.increment(1, 0, 1, 0.1);
        assert_eq!(history.get(1, 0, 0), 0.75);
        assert_eq!(history.get(1, 0, 1), 0.1);
        assert_eq!(history.get(0, 1, 0), 0.0);
        // out-of-radius reads are silent zeros
        assert_eq!(history.get(2, 0, 0), 0.0);
    }
}
