//! Per-pair scratch state: node distances, topological bookkeeping, and the
//! weight-indexed bucket arrays.
//!
//! Every worker owns one [`Scratch`] sized to the graph and reuses it across
//! pairs. Reset walks only the nodes the previous pair actually touched.

use crate::graph::{NodeId, RoutingGraph};
use crate::traversal::TraversalDir;

/// Distance of one node to the source and sink of the pair under analysis.
#[derive(Debug, Clone, Default)]
pub(crate) struct SsDistance {
    pub(crate) source_distance: Option<u32>,
    pub(crate) sink_distance: Option<u32>,
    pub(crate) visited_from_source: bool,
    pub(crate) visited_from_sink: bool,
    pub(crate) source_hops: Option<u32>,
    pub(crate) sink_hops: Option<u32>,
    pub(crate) visited_from_source_hops: bool,
    pub(crate) visited_from_sink_hops: bool,
}

impl SsDistance {
    /// A node can lie on a source→sink path of weight at most `max_path_weight`
    /// iff both distances are known and their sum, less the node's own weight
    /// (counted once in each distance), is within the bound.
    pub(crate) fn is_legal(&self, node_weight: u32, max_path_weight: u32) -> bool {
        match (self.source_distance, self.sink_distance) {
            (Some(src), Some(sink)) => src as i64 + sink as i64 - node_weight as i64 <= max_path_weight as i64,
            _ => false,
        }
    }

    pub(crate) fn distance_from(&self, dir: TraversalDir) -> Option<u32> {
        match dir {
            TraversalDir::Forward => self.source_distance,
            TraversalDir::Backward => self.sink_distance,
        }
    }

    fn clear(&mut self) {
        *self = SsDistance::default();
    }
}

/// Key under which a node with unmet dependencies waits in the cycle-breaking
/// set. Ordering is descending path weight, then ascending distance to the
/// traversal start, then ascending node id; the set's first element is the
/// node to release when the main queue runs dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaitingKey {
    pub(crate) path_weight: i64,
    pub(crate) dist_to_start: i64,
    pub(crate) node: NodeId,
}

impl Ord for WaitingKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .path_weight
            .cmp(&self.path_weight)
            .then_with(|| self.dist_to_start.cmp(&other.dist_to_start))
            .then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for WaitingKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Whether bucket indices count cumulative path weight or edge hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BucketMode {
    ByPathWeight,
    ByPathHops,
}

/// Extra bucket indices reserved in hop mode for the source→opin, ipin→sink,
/// and final edges.
pub(crate) const HOP_PADDING: u32 = 3;

/// Per-node bucket pair. `source[i]` holds the number (or probability) of
/// paths of cumulative weight `i` arriving from the source; `sink[i]` the
/// same from the sink. `None` distinguishes "no paths yet" from "zero paths".
#[derive(Debug, Clone)]
pub(crate) struct NodeBuckets {
    pub(crate) source: Vec<Option<f64>>,
    pub(crate) sink: Vec<Option<f64>>,
}

impl NodeBuckets {
    fn new(num_buckets: usize) -> Self {
        Self {
            source: vec![None; num_buckets],
            sink: vec![None; num_buckets],
        }
    }

    fn clear(&mut self) {
        self.source.fill(None);
        self.sink.fill(None);
    }

    /// Number of legal paths through the owning node: the sum over bucket
    /// pairs `(i, j)` with `i >= dist_to_source` and
    /// `i + j - node_weight <= max_path_weight` of `source[i] * sink[j]`.
    /// A running prefix sum over the sink buckets keeps this O(max weight).
    pub(crate) fn num_paths_through(
        &self,
        node_weight: u32,
        dist_to_source: u32,
        max_path_weight: u32,
    ) -> f64 {
        let mut paths = 0.0;
        let mut sink_prefix: f64 = self.sink[..=(node_weight as usize).min(self.sink.len() - 1)]
            .iter()
            .flatten()
            .sum();
        let mut next_j = node_weight as usize + 1;
        for i in (dist_to_source..=max_path_weight).rev() {
            if let Some(Some(v)) = self.source.get(i as usize) {
                paths += v * sink_prefix;
            }
            if let Some(Some(s)) = self.sink.get(next_j) {
                sink_prefix += s;
            }
            next_j += 1;
        }
        paths
    }
}

/// Topological traversal state of one node.
#[derive(Debug, Clone)]
pub(crate) struct TopoInfo {
    pub(crate) done_from_source: bool,
    pub(crate) done_from_sink: bool,
    pub(crate) visits_from_source: u32,
    pub(crate) visits_from_sink: u32,
    pub(crate) num_legal_in: Option<u32>,
    pub(crate) num_legal_out: Option<u32>,
    pub(crate) level: Option<u32>,
    pub(crate) smoothed: bool,
    pub(crate) adjusted_demand: Option<f64>,
    pub(crate) was_visited: bool,
    pub(crate) waiting: Option<WaitingKey>,
    /// Per-bucket demand contributed by visiting parents; subtracted by the
    /// propagate estimator in path-dependence mode.
    pub(crate) demand_discounts: Vec<f64>,
    pub(crate) buckets: NodeBuckets,
}

impl TopoInfo {
    fn new(num_buckets: usize) -> Self {
        Self {
            done_from_source: false,
            done_from_sink: false,
            visits_from_source: 0,
            visits_from_sink: 0,
            num_legal_in: None,
            num_legal_out: None,
            level: None,
            smoothed: false,
            adjusted_demand: None,
            was_visited: false,
            waiting: None,
            demand_discounts: vec![0.0; num_buckets],
            buckets: NodeBuckets::new(num_buckets),
        }
    }

    pub(crate) fn done_from(&self, dir: TraversalDir) -> bool {
        match dir {
            TraversalDir::Forward => self.done_from_source,
            TraversalDir::Backward => self.done_from_sink,
        }
    }

    pub(crate) fn set_done_from(&mut self, dir: TraversalDir) {
        match dir {
            TraversalDir::Forward => self.done_from_source = true,
            TraversalDir::Backward => self.done_from_sink = true,
        }
    }

    pub(crate) fn visit_from(&mut self, dir: TraversalDir) -> u32 {
        let visits = match dir {
            TraversalDir::Forward => &mut self.visits_from_source,
            TraversalDir::Backward => &mut self.visits_from_sink,
        };
        *visits += 1;
        *visits
    }

    fn clear(&mut self) {
        self.done_from_source = false;
        self.done_from_sink = false;
        self.visits_from_source = 0;
        self.visits_from_sink = 0;
        self.num_legal_in = None;
        self.num_legal_out = None;
        self.level = None;
        self.smoothed = false;
        self.adjusted_demand = None;
        self.was_visited = false;
        self.waiting = None;
        self.demand_discounts.fill(0.0);
        self.buckets.clear();
    }
}

/// All per-pair scratch owned by one worker.
#[derive(Debug)]
pub(crate) struct Scratch {
    pub(crate) ss: Vec<SsDistance>,
    pub(crate) topo: Vec<TopoInfo>,
    /// Nodes touched by the current pair; drives the cleanup walk.
    pub(crate) visited: Vec<NodeId>,
}

impl Scratch {
    /// Allocates scratch for `num_nodes` nodes with buckets sized to the
    /// absolute maximum path weight bound.
    pub(crate) fn new(num_nodes: usize, max_path_weight_bound: u32) -> Self {
        let num_buckets = max_path_weight_bound as usize + 1;
        Self {
            ss: vec![SsDistance::default(); num_nodes],
            topo: (0..num_nodes).map(|_| TopoInfo::new(num_buckets)).collect(),
            visited: Vec::with_capacity(num_nodes),
        }
    }

    pub(crate) fn is_legal(&self, graph: &RoutingGraph, node: NodeId, max_path_weight: u32) -> bool {
        self.ss[node.inner()].is_legal(graph[node].weight(), max_path_weight)
    }

    /// Lazily computed number of legal predecessors along the traversal
    /// direction (in-edges forward, out-edges backward).
    pub(crate) fn num_legal_parents(
        &mut self,
        graph: &RoutingGraph,
        node: NodeId,
        dir: TraversalDir,
        max_path_weight: u32,
    ) -> u32 {
        let cached = match dir {
            TraversalDir::Forward => self.topo[node.inner()].num_legal_in,
            TraversalDir::Backward => self.topo[node.inner()].num_legal_out,
        };
        if let Some(n) = cached {
            return n;
        }
        let edges = match dir {
            TraversalDir::Forward => graph[node].in_edges(),
            TraversalDir::Backward => graph[node].out_edges(),
        };
        let n = edges
            .iter()
            .filter(|&&p| self.ss[p.inner()].is_legal(graph[p].weight(), max_path_weight))
            .count() as u32;
        match dir {
            TraversalDir::Forward => self.topo[node.inner()].num_legal_in = Some(n),
            TraversalDir::Backward => self.topo[node.inner()].num_legal_out = Some(n),
        }
        n
    }

    /// Resets the state touched by the previous pair.
    pub(crate) fn cleanup(&mut self) {
        for i in 0..self.visited.len() {
            let node = self.visited[i].inner();
            let ss = &mut self.ss[node];
            if ss.visited_from_source || ss.visited_from_sink {
                ss.clear();
            }
            let topo = &mut self.topo[node];
            if topo.was_visited {
                topo.clear();
            }
        }
        self.visited.clear();
    }
}

/// Mutable references to two distinct entries of a slice.
pub(crate) fn pair_mut<T>(slice: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    assert_ne!(a, b);
    if a < b {
        let (lo, hi) = slice.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = slice.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legality_needs_both_distances() {
        let mut ss = SsDistance::default();
        assert!(!ss.is_legal(1, 10));
        ss.source_distance = Some(4);
        assert!(!ss.is_legal(1, 10));
        ss.sink_distance = Some(7);
        // 4 + 7 - 1 = 10 <= 10
        assert!(ss.is_legal(1, 10));
        assert!(!ss.is_legal(0, 10));
    }

    #[test]
    fn waiting_keys_order_by_descending_weight_first() {
        let key = |w, d, n| WaitingKey {
            path_weight: w,
            dist_to_start: d,
            node: NodeId::new(n),
        };
        let mut set = std::collections::BTreeSet::new();
        set.insert(key(3, 5, 0));
        set.insert(key(8, 9, 1));
        set.insert(key(8, 2, 2));
        set.insert(key(8, 2, 1));
        // highest weight first; ties by lower start distance, then lower id
        let order: Vec<_> = set
            .into_iter()
            .map(|k| (k.path_weight, k.dist_to_start, k.node.inner()))
            .collect();
        assert_eq!(order, vec![(8, 2, 1), (8, 2, 2), (8, 9, 1), (3, 5, 0)]);
    }

    #[test]
    fn num_paths_through_pairs_buckets_within_bound() {
        let mut buckets = NodeBuckets::new(11);
        // node of weight 2; three paths of weight 4 from the source, one of
        // weight 6; from the sink one path of weight 2 and one of weight 5
        buckets.source[4] = Some(3.0);
        buckets.source[6] = Some(1.0);
        buckets.sink[2] = Some(1.0);
        buckets.sink[5] = Some(1.0);
        // max 8: (4,2) ok (4+2-2=4), (4,5) ok (7), (6,2) ok (6), (6,5) is 9 > 8
        assert_eq!(buckets.num_paths_through(2, 4, 8), 3.0 + 3.0 + 1.0);
        // max 5: (4,2) ok, (6,2) is 6 > 5
        assert_eq!(buckets.num_paths_through(2, 4, 5), 3.0);
        // undefined buckets contribute nothing
        assert_eq!(buckets.num_paths_through(2, 7, 8), 0.0);
    }

    #[test]
    fn cleanup_resets_only_visited_nodes() {
        let mut scratch = Scratch::new(4, 10);
        scratch.ss[1].source_distance = Some(3);
        scratch.ss[1].visited_from_source = true;
        scratch.topo[1].was_visited = true;
        scratch.topo[1].buckets.source[0] = Some(1.0);
        scratch.ss[2].source_distance = Some(9);
        scratch.ss[2].visited_from_source = true;
        scratch.visited.push(NodeId::new(1));
        scratch.cleanup();
        assert_eq!(scratch.ss[1].source_distance, None);
        assert_eq!(scratch.topo[1].buckets.source[0], None);
        // node 2 was never recorded as visited, so it is left alone
        assert_eq!(scratch.ss[2].source_distance, Some(9));
        assert!(scratch.visited.is_empty());
    }

    #[test]
    fn pair_mut_splits_either_order() {
        let mut v = vec![1, 2, 3];
        let (a, b) = pair_mut(&mut v, 2, 0);
        *a += 10;
        *b += 20;
        assert_eq!(v, vec![21, 2, 13]);
    }
}
