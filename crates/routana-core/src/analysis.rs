//! Connection orchestration: builds the work list of source/sink pairs, runs
//! the enumeration and probability passes over a worker pool, and aggregates
//! the routability metrics.
//!
//! Work is preassigned to workers round-robin by source group; workers never
//! steal. Each worker owns its scratch and walks its pairs to completion.
//! The only shared mutable state is per-node (demand and self-congestion
//! bookkeeping, one mutex per node) and the global metric aggregator (one
//! mutex).

use std::sync::Mutex;

use ordered_float::OrderedFloat;
use rand::prelude::*;
use rayon::prelude::*;

use crate::arch::{Arch, BlockType, Coord, PinKind};
use crate::distance::{self, PATH_FLEXIBILITY_FACTOR};
use crate::enumerate::Enumerate;
use crate::error::{Error, PathEnumError};
use crate::estimate::cutline::Cutline;
use crate::estimate::cutline_recursive::CutlineRecursive;
use crate::estimate::cutline_simple::CutlineSimple;
use crate::estimate::propagate::Propagate;
use crate::estimate::reliability::reliability_polynomial;
use crate::graph::{NodeId, NodeKind, RoutingGraph};
use crate::opts::{ProbabilityMode, SelfCongestionMode, StructsMode, UserOptions};
use crate::pq::FixedSizePq;
use crate::scratch::{BucketMode, Scratch, HOP_PADDING};
use crate::settings::AnalysisSettings;
use crate::traversal::{self, Traversal, TraversalDir};
use crate::utils::{probs_equal, PROB_TOL};

/// Probability analysis is restricted to tiles at least this far from the
/// perimeter when core analysis is enabled.
const CORE_OFFSET: usize = 3;

/// Share of worst connection probabilities examined at each length.
const WORST_ROUTABILITY_PERCENTILE_DRIVERS: f64 = 0.1;
const WORST_ROUTABILITY_PERCENTILE_FANOUT: f64 = 0.1;

/// Weights combining the driver and fanout metrics when both are active.
const DRIVER_PROB_WEIGHT: f64 = 0.5;
const FANOUT_PROB_WEIGHT: f64 = 0.0;

/// Share of worst node demands averaged into the normalized demand metric.
const WORST_NODE_DEMAND_PERCENTILE: f64 = 0.05;

/// Everything a routability analysis needs.
#[derive(Debug, typed_builder::TypedBuilder)]
pub struct AnalysisSpec {
    /// The finalized routing graph.
    pub graph: RoutingGraph,
    /// The architecture read alongside the graph.
    pub arch: Arch,
    /// User options.
    pub opts: UserOptions,
}

/// Result of a full-architecture analysis.
#[derive(Debug, Clone)]
pub struct FpgaReport {
    /// Connections the work list asked for.
    pub desired_conns: usize,
    /// Connections actually enumerated.
    pub enumerated_conns: usize,
    /// Sum of channel-node demands.
    pub total_demand: f64,
    /// Sum of squared channel-node demands.
    pub squared_demand: f64,
    /// Mean demand of the worst few percent of channel nodes.
    pub normalized_demand: f64,
    /// Squared demand normalized by the channel-node count.
    pub normalized_squared_demand: f64,
    /// Number of channel nodes in the graph.
    pub num_routing_nodes: usize,
    /// Sum of scaled connection probabilities from real sources.
    pub total_driver_prob: f64,
    /// Sum of scaled connection probabilities from virtual (fanout) sources.
    pub total_fanout_prob: f64,
    /// Routability of connections enumerated from real sources.
    pub driver_metric: f64,
    /// Routability of connections enumerated from virtual (fanout) sources.
    pub fanout_metric: f64,
    /// The combined routability metric.
    pub routability_metric: f64,
}

impl FpgaReport {
    /// Fraction of desired connections that were enumerated.
    pub fn fraction_enumerated(&self) -> f64 {
        if self.desired_conns == 0 {
            0.0
        } else {
            self.enumerated_conns as f64 / self.desired_conns as f64
        }
    }
}

/// Result of a simple one-source/one-sink analysis.
#[derive(Debug, Clone)]
pub struct SimpleReport {
    /// Per-node enumerated path counts.
    pub node_paths: Vec<(NodeId, f64)>,
    /// Probability that the single connection is routable.
    pub connection_probability: f64,
}

/// Analysis output, by structs mode.
#[derive(Debug, Clone)]
pub enum AnalysisReport {
    /// Full-architecture analysis.
    Fpga(FpgaReport),
    /// One-source/one-sink analysis.
    Simple(SimpleReport),
}

/// The two topological passes over the work list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopologicalMode {
    Enumerate,
    Probability,
}

/// One source/sink connection to analyze.
#[derive(Debug, Clone)]
struct SourceSinkPair {
    source: NodeId,
    sink: NodeId,
    tile: Coord,
    length: usize,
    conns_at_length: usize,
}

/// Runs a routability analysis.
pub fn run(spec: AnalysisSpec) -> Result<AnalysisReport, Error> {
    spec.opts.validate()?;
    match spec.opts.structs_mode {
        StructsMode::Vpr => run_fpga(spec).map(AnalysisReport::Fpga),
        StructsMode::Simple => run_simple(spec).map(AnalysisReport::Simple),
    }
}

fn run_fpga(spec: AnalysisSpec) -> Result<FpgaReport, Error> {
    let AnalysisSpec {
        mut graph,
        arch,
        opts,
    } = spec;
    arch.validate()?;
    let settings = AnalysisSettings::from_opts(&opts, &arch)?;
    let fill = arch.fill_type().expect("validated arch has a fill type");

    let max_path_weight_bound = (settings.max_path_weight(opts.max_connection_length) as f64
        * PATH_FLEXIBILITY_FACTOR) as u32;

    match opts.self_congestion {
        SelfCongestionMode::Radius => graph.alloc_path_histories(fill.classes().len()),
        SelfCongestionMode::PathDependence => {
            graph.alloc_child_contributions(max_path_weight_bound as usize + 1)
        }
        SelfCongestionMode::None => {}
    }

    let driver_conns = conn_length_stats(&opts, &arch, &settings, PinKind::Driver)?;
    let receiver_conns = conn_length_stats(&opts, &arch, &settings, PinKind::Receiver)?;
    let results = SharedResults::new(&opts, &driver_conns, &receiver_conns);

    let (x_size, y_size) = arch.grid_size();
    let core_region = opts
        .analyze_core
        .then(|| prob_analysis_region(&opts, x_size, y_size));

    let (partitions, desired_conns) = build_work_list(&graph, &arch, &settings, &opts)?;
    log::info!(
        "work list holds {desired_conns} connections across {} workers",
        partitions.len()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.threads)
        .build()
        .map_err(|e| Error::Other(e.to_string()))?;

    log::info!("enumerating paths for block type '{}'", fill.name());
    run_pass(
        &pool,
        &graph,
        fill,
        &opts,
        &settings,
        &partitions,
        max_path_weight_bound,
        TopologicalMode::Enumerate,
        core_region,
        &results,
    )?;
    log::info!("estimating connection probabilities");
    run_pass(
        &pool,
        &graph,
        fill,
        &opts,
        &settings,
        &partitions,
        max_path_weight_bound,
        TopologicalMode::Probability,
        core_region,
        &results,
    )?;

    assemble_report(&graph, &opts, results, desired_conns)
}

fn run_simple(spec: AnalysisSpec) -> Result<SimpleReport, Error> {
    const LARGE_CONNECTION_WEIGHT: u32 = 1000;

    let AnalysisSpec { graph, opts, .. } = spec;
    let mut source = None;
    let mut sink = None;
    for id in graph.node_ids() {
        match graph[id].kind() {
            NodeKind::Source => {
                if source.replace(id).is_some() {
                    return Err(Error::Other("expected exactly one source node".into()));
                }
            }
            NodeKind::Sink => {
                if sink.replace(id).is_some() {
                    return Err(Error::Other("expected exactly one sink node".into()));
                }
            }
            _ => {}
        }
    }
    let source = source.ok_or_else(|| Error::Other("graph has no source node".into()))?;
    let sink = sink.ok_or_else(|| Error::Other("graph has no sink node".into()))?;

    let mut scratch = Scratch::new(
        graph.num_nodes(),
        LARGE_CONNECTION_WEIGHT + HOP_PADDING,
    );
    enumerate_pair(
        &graph,
        source,
        sink,
        LARGE_CONNECTION_WEIGHT,
        None,
        &opts,
        &mut scratch,
    )?;

    let node_paths = graph
        .node_ids()
        .map(|id| {
            let dist = scratch.ss[id.inner()].source_distance.unwrap_or(0);
            let paths = scratch.topo[id.inner()].buckets.num_paths_through(
                graph[id].weight(),
                dist,
                LARGE_CONNECTION_WEIGHT,
            );
            (id, paths)
        })
        .collect();

    scratch.cleanup();
    let connection_probability = estimate_pair(
        &graph,
        source,
        sink,
        LARGE_CONNECTION_WEIGHT,
        None,
        &opts,
        &mut scratch,
    )?
    .unwrap_or(0.0);

    Ok(SimpleReport {
        node_paths,
        connection_probability,
    })
}

/// Shared metric aggregation (C11). All cross-worker writes go through the
/// one mutex in here.
#[derive(Debug)]
struct SharedResults(Mutex<Metrics>);

#[derive(Debug)]
struct Metrics {
    enumerated: usize,
    total_prob_drivers: f64,
    total_prob_fanout: f64,
    max_possible_drivers: f64,
    max_possible_fanout: f64,
    lowest_drivers: Vec<FixedSizePq<OrderedFloat<f64>>>,
    lowest_fanout: Vec<FixedSizePq<OrderedFloat<f64>>>,
}

impl SharedResults {
    fn new(opts: &UserOptions, driver_conns: &[usize], receiver_conns: &[usize]) -> Self {
        // the per-length queues keep only the worst few percent of
        // connection probabilities
        let lowest_drivers = (0..=opts.max_connection_length)
            .map(|len| {
                let limit = driver_conns[len] as f64
                    * WORST_ROUTABILITY_PERCENTILE_DRIVERS
                    * opts.length_probabilities.get(len).copied().unwrap_or(0.0);
                FixedSizePq::new(limit as usize)
            })
            .collect();
        let lowest_fanout = (0..=opts.max_connection_length)
            .map(|len| {
                let limit = receiver_conns[len] as f64 * WORST_ROUTABILITY_PERCENTILE_FANOUT;
                FixedSizePq::new(limit as usize)
            })
            .collect();
        Self(Mutex::new(Metrics {
            enumerated: 0,
            total_prob_drivers: 0.0,
            total_prob_fanout: 0.0,
            max_possible_drivers: 0.0,
            max_possible_fanout: 0.0,
            lowest_drivers,
            lowest_fanout,
        }))
    }

    fn inc_enumerated(&self) {
        self.0.lock().unwrap().enumerated += 1;
    }

    /// Adds one analyzed connection to the metric. `num_subpins` spreads the
    /// increment across the pins bundled into the pair's super-terminals.
    fn add_probability(
        &self,
        source_pin_kind: PinKind,
        length: usize,
        increment: f64,
        max_possible: f64,
        num_subpins: usize,
    ) {
        let mut metrics = self.0.lock().unwrap();
        let metrics = &mut *metrics;
        let (total, max_total, pqs) = match source_pin_kind {
            PinKind::Driver => (
                &mut metrics.total_prob_drivers,
                &mut metrics.max_possible_drivers,
                &mut metrics.lowest_drivers,
            ),
            _ => (
                &mut metrics.total_prob_fanout,
                &mut metrics.max_possible_fanout,
                &mut metrics.lowest_fanout,
            ),
        };
        *total += increment;
        *max_total += max_possible;
        let push_value = increment / num_subpins as f64;
        if let Some(pq) = pqs.get_mut(length) {
            for _ in 0..num_subpins {
                pq.push(OrderedFloat(push_value));
            }
        }
    }
}

/// Sums the retained worst-percentile probabilities across lengths.
fn sum_lowest_probs(pqs: &[FixedSizePq<OrderedFloat<f64>>]) -> f64 {
    pqs.iter()
        .map(|pq| pq.iter().map(|v| v.0).sum::<f64>())
        .sum()
}

fn assemble_report(
    graph: &RoutingGraph,
    opts: &UserOptions,
    results: SharedResults,
    desired_conns: usize,
) -> Result<FpgaReport, Error> {
    let metrics = results.0.into_inner().unwrap();

    let mut total_demand = 0.0;
    let mut squared_demand = 0.0;
    let mut num_routing_nodes = 0usize;
    for node in graph.nodes() {
        if node.kind().is_routing() {
            let demand = node.demand(opts.use_routing_node_demand);
            total_demand += demand;
            squared_demand += demand * demand;
            num_routing_nodes += 1;
        }
    }
    let normalized_demand = node_demand_metric(graph, opts, num_routing_nodes)?;
    let normalized_squared_demand = if num_routing_nodes == 0 {
        0.0
    } else {
        squared_demand / num_routing_nodes as f64
    };

    let mut driver_metric = 0.0;
    if opts.opin_probability != 0.0 && metrics.max_possible_drivers > 0.0 {
        let worst = sum_lowest_probs(&metrics.lowest_drivers);
        driver_metric =
            worst / (metrics.max_possible_drivers * WORST_ROUTABILITY_PERCENTILE_DRIVERS);
    }
    let mut fanout_metric = 0.0;
    if opts.ipin_probability != 0.0 && metrics.max_possible_fanout > 0.0 {
        let worst = sum_lowest_probs(&metrics.lowest_fanout);
        fanout_metric =
            worst / (metrics.max_possible_fanout * WORST_ROUTABILITY_PERCENTILE_FANOUT);
    }

    let (driver_weight, fanout_weight) =
        if opts.opin_probability > 0.0 && opts.ipin_probability > 0.0 {
            (DRIVER_PROB_WEIGHT, FANOUT_PROB_WEIGHT)
        } else {
            (1.0, 1.0)
        };
    let routability_metric = driver_weight * driver_metric + fanout_weight * fanout_metric;

    Ok(FpgaReport {
        desired_conns,
        enumerated_conns: metrics.enumerated,
        total_demand,
        squared_demand,
        normalized_demand,
        normalized_squared_demand,
        num_routing_nodes,
        total_driver_prob: metrics.total_prob_drivers,
        total_fanout_prob: metrics.total_prob_fanout,
        driver_metric,
        fanout_metric,
        routability_metric,
    })
}

/// Mean demand of the worst few percent of channel nodes.
fn node_demand_metric(
    graph: &RoutingGraph,
    opts: &UserOptions,
    num_routing_nodes: usize,
) -> Result<f64, Error> {
    if num_routing_nodes == 0 {
        return Err(PathEnumError::EmptyDemandSample.into());
    }
    let limit = ((num_routing_nodes as f64 * WORST_NODE_DEMAND_PERCENTILE) as usize).max(1);

    // a min-at-top heap of fixed size retains the largest demands
    let mut worst = FixedSizePq::new(limit);
    for node in graph.nodes() {
        if node.kind().is_routing() {
            worst.push(std::cmp::Reverse(OrderedFloat(
                node.demand(opts.use_routing_node_demand),
            )));
        }
    }
    let count = worst.len();
    let sum: f64 = worst.iter().map(|v| v.0 .0).sum();
    Ok(sum / count as f64)
}

/// Number of connections at each length from every analyzable tile, for pins
/// of the given kind. Sizes the worst-percentile queues.
fn conn_length_stats(
    opts: &UserOptions,
    arch: &Arch,
    settings: &AnalysisSettings,
    kind: PinKind,
) -> Result<Vec<usize>, Error> {
    let (x_size, y_size) = arch.grid_size();
    let fill_ind = arch.fill_type_index().expect("fill type is set");
    let fill = &arch.block_types()[fill_ind];

    let mut conns_at_length = vec![0usize; opts.max_connection_length + 1];
    let (from_x, to_x, from_y, to_y) = prob_analysis_region(opts, x_size, y_size);

    // pins of the requested kind with a nonzero usage probability
    let num_tile_sources = (0..fill.num_pins())
        .filter(|&pin| {
            !fill.is_global_pin(pin)
                && fill.classes()[fill.class_of_pin(pin)].kind() == Some(kind)
                && settings.pin_probabilities[pin] > 0.0
        })
        .count();

    for x in from_x..=to_x {
        for y in from_y..=to_y {
            let tile = arch.tile(x, y);
            if tile.type_index() != fill_ind {
                return Err(PathEnumError::NotFillTile { x, y }.into());
            }
            if tile.width_offset() > 0 || tile.height_offset() > 0 {
                return Err(PathEnumError::TileOffset { x, y }.into());
            }
            for length in 1..=opts.max_connection_length {
                conns_at_length[length] +=
                    num_tile_sources * conns_at_distance_from_tile(arch, fill_ind, x, y, length)?;
            }
        }
    }
    Ok(conns_at_length)
}

/// Number of input pins on fill-type tiles exactly `length` away.
fn conns_at_distance_from_tile(
    arch: &Arch,
    fill_ind: usize,
    tile_x: usize,
    tile_y: usize,
    length: usize,
) -> Result<usize, Error> {
    let mut num_conns = 0;
    for (x, y) in ring_coords(tile_x, tile_y, length, arch.grid_size()) {
        let dest_ind = arch.tile(x, y).type_index();
        if dest_ind != fill_ind {
            return Err(PathEnumError::NotFillTile { x, y }.into());
        }
        num_conns += arch.block_types()[dest_ind].num_receivers();
    }
    Ok(num_conns)
}

/// Interior grid coordinates a Manhattan distance `length` from a tile.
fn ring_coords(
    tile_x: usize,
    tile_y: usize,
    length: usize,
    (x_size, y_size): (usize, usize),
) -> impl Iterator<Item = (usize, usize)> {
    let length = length as i64;
    let (tile_x, tile_y) = (tile_x as i64, tile_y as i64);
    let (x_size, y_size) = (x_size as i64, y_size as i64);
    (-length..=length).flat_map(move |dx| {
        let y_dist = length - dx.abs();
        let dys = if y_dist == 0 {
            vec![0]
        } else {
            vec![-y_dist, y_dist]
        };
        dys.into_iter().filter_map(move |dy| {
            let (x, y) = (tile_x + dx, tile_y + dy);
            (x > 0 && x < x_size - 1 && y > 0 && y < y_size - 1)
                .then_some((x as usize, y as usize))
        })
    })
}

/// Iteration limits (inclusive) of the analyzable region.
fn prob_analysis_region(
    opts: &UserOptions,
    x_size: usize,
    y_size: usize,
) -> (usize, usize, usize, usize) {
    if opts.analyze_core {
        (
            CORE_OFFSET,
            x_size - 1 - CORE_OFFSET,
            CORE_OFFSET,
            y_size - 1 - CORE_OFFSET,
        )
    } else {
        // the interior, excluding the I/O perimeter
        (1, x_size - 2, 1, y_size - 2)
    }
}

fn tile_in_region(region: (usize, usize, usize, usize), tile: Coord) -> bool {
    let (from_x, to_x, from_y, to_y) = region;
    tile.x >= from_x && tile.x <= to_x && tile.y >= from_y && tile.y <= to_y
}

/// Builds the per-worker work list. Pairs are sampled by length probability
/// with the seeded RNG and handed out round-robin per source group, driver
/// and fanout groups independently.
fn build_work_list(
    graph: &RoutingGraph,
    arch: &Arch,
    settings: &AnalysisSettings,
    opts: &UserOptions,
) -> Result<(Vec<Vec<SourceSinkPair>>, usize), Error> {
    let fill_ind = arch.fill_type_index().expect("fill type is set");
    let fill = &arch.block_types()[fill_ind];
    let mut rng = StdRng::seed_from_u64(opts.seed);

    let mut partitions = vec![Vec::new(); opts.threads];
    let mut desired_conns = 0usize;
    let mut next_driver_worker = 0usize;
    let mut next_fanout_worker = 0usize;

    for &tile in &settings.test_tiles {
        let grid_tile = arch.tile(tile.x, tile.y);
        if grid_tile.type_index() != fill_ind {
            return Err(PathEnumError::NotFillTile {
                x: tile.x,
                y: tile.y,
            }
            .into());
        }
        if grid_tile.width_offset() > 0 || grid_tile.height_offset() > 0 {
            return Err(PathEnumError::TileOffset {
                x: tile.x,
                y: tile.y,
            }
            .into());
        }

        for (class_ind, class) in fill.classes().iter().enumerate() {
            match class.kind() {
                Some(PinKind::Driver) => {
                    // enumerating from opins starts at the corresponding source
                    let Some(source) =
                        graph.node_at(NodeKind::Source, tile.x, tile.y, class_ind)
                    else {
                        log::warn!("no source node for class {class_ind} at ({}, {})", tile.x, tile.y);
                        continue;
                    };
                    let pairs = corresponding_sinks(
                        graph, arch, settings, opts, fill, source, tile, &mut rng,
                    )?;
                    desired_conns += pairs.len();
                    partitions[next_driver_worker].extend(pairs);
                    next_driver_worker = (next_driver_worker + 1) % opts.threads;
                }
                Some(PinKind::Receiver) => {
                    // fanout is modeled by enumerating from the virtual source
                    // attached to the sink of this class
                    let Some(sink) = graph.node_at(NodeKind::Source, tile.x, tile.y, class_ind)
                    else {
                        continue;
                    };
                    let Some(vsource) = graph[sink].virtual_source() else {
                        continue;
                    };
                    let pairs = corresponding_sinks(
                        graph, arch, settings, opts, fill, vsource, tile, &mut rng,
                    )?;
                    desired_conns += pairs.len();
                    partitions[next_fanout_worker].extend(pairs);
                    next_fanout_worker = (next_fanout_worker + 1) % opts.threads;
                }
                _ => {}
            }
        }
    }
    Ok((partitions, desired_conns))
}

/// The sinks a source should connect to: every receiver class on every
/// fill-type tile within the maximum connection length, sampled by length
/// probability.
#[allow(clippy::too_many_arguments)]
fn corresponding_sinks(
    graph: &RoutingGraph,
    arch: &Arch,
    settings: &AnalysisSettings,
    opts: &UserOptions,
    fill: &BlockType,
    source: NodeId,
    tile: Coord,
    rng: &mut StdRng,
) -> Result<Vec<SourceSinkPair>, Error> {
    // a zero-probability source contributes nothing
    let source_prob = sum_of_source_probabilities(graph, fill, settings, source)?;
    if source_prob == 0.0 {
        return Ok(Vec::new());
    }

    let (x_size, y_size) = arch.grid_size();
    // the farthest analyzable block is a legal (non-I/O) grid corner
    let max_block_dist = [
        (1, 1),
        (1, y_size - 2),
        (x_size - 2, y_size - 2),
        (x_size - 2, 1),
    ]
    .into_iter()
    .map(|(x, y)| tile.manhattan(x, y))
    .max()
    .unwrap_or(0);
    if max_block_dist < opts.max_connection_length {
        return Err(PathEnumError::UnreachableTestTile {
            x: tile.x,
            y: tile.y,
            length: opts.max_connection_length,
        }
        .into());
    }

    let fill_ind = arch.fill_type_index().expect("fill type is set");
    let mut pairs = Vec::new();
    for length in 1..=opts.max_connection_length {
        if settings.length_probabilities[length] == 0.0 {
            continue;
        }
        let conns_at_length =
            conns_at_distance_from_tile(arch, fill_ind, tile.x, tile.y, length)?;
        for (x, y) in ring_coords(tile.x, tile.y, length, (x_size, y_size)) {
            let dest_type = &arch.block_types()[arch.tile(x, y).type_index()];
            for (class_ind, class) in dest_type.classes().iter().enumerate() {
                if class.kind() != Some(PinKind::Receiver) || class.num_pins() == 0 {
                    continue;
                }
                // global pins ride dedicated networks
                if dest_type.is_global_pin(class.pins()[0]) {
                    continue;
                }
                let Some(sink) = graph.node_at(NodeKind::Sink, x, y, class_ind) else {
                    continue;
                };
                // sample connections down to the length's occurrence rate
                if rng.gen::<f64>() > opts.length_probabilities.get(length).copied().unwrap_or(0.0)
                {
                    continue;
                }
                pairs.push(SourceSinkPair {
                    source,
                    sink,
                    tile,
                    length,
                    conns_at_length,
                });
            }
        }
    }
    Ok(pairs)
}

/// Sum of the usage probabilities of the pins a source node represents. All
/// pins of one class must carry the same probability.
fn sum_of_source_probabilities(
    graph: &RoutingGraph,
    fill: &BlockType,
    settings: &AnalysisSettings,
    source: NodeId,
) -> Result<f64, Error> {
    let node = &graph[source];
    if node.kind() != NodeKind::Source {
        return Err(PathEnumError::UnexpectedNodeKind {
            node: source,
            kind: node.kind(),
        }
        .into());
    }
    let class = fill.classes().get(node.ptc()).ok_or({
        PathEnumError::UnexpectedNodeKind {
            node: source,
            kind: node.kind(),
        }
    })?;
    let mut sum = 0.0;
    let mut class_prob = None;
    for &pin in class.pins() {
        let prob = settings.pin_probabilities[pin];
        match class_prob {
            None => class_prob = Some(prob),
            Some(expected) if !probs_equal(expected, prob) => {
                return Err(PathEnumError::PinProbabilityMismatch {
                    expected,
                    got: prob,
                }
                .into());
            }
            _ => {}
        }
        sum += prob;
    }
    Ok(sum)
}

/// Pin count of the class a super-terminal represents. Virtual sources carry
/// the class of the sink they were attached to.
fn num_class_pins(
    graph: &RoutingGraph,
    fill: &BlockType,
    node: NodeId,
    expected: NodeKind,
) -> Result<usize, Error> {
    let n = &graph[node];
    if n.kind() != expected {
        return Err(PathEnumError::UnexpectedNodeKind {
            node,
            kind: n.kind(),
        }
        .into());
    }
    Ok(fill
        .classes()
        .get(n.ptc())
        .map(|c| c.num_pins())
        .unwrap_or(0))
}

/// Runs one pass (enumerate or probability) over all partitions.
#[allow(clippy::too_many_arguments)]
fn run_pass(
    pool: &rayon::ThreadPool,
    graph: &RoutingGraph,
    fill: &BlockType,
    opts: &UserOptions,
    settings: &AnalysisSettings,
    partitions: &[Vec<SourceSinkPair>],
    max_path_weight_bound: u32,
    mode: TopologicalMode,
    core_region: Option<(usize, usize, usize, usize)>,
    results: &SharedResults,
) -> Result<(), Error> {
    pool.install(|| {
        partitions
            .par_iter()
            .enumerate()
            .try_for_each(|(worker, pairs)| {
                let mut scratch = Scratch::new(graph.num_nodes(), max_path_weight_bound);
                let mut rng = StdRng::seed_from_u64(opts.seed.wrapping_add(worker as u64));
                let mut order: Vec<usize> = (0..pairs.len()).collect();
                order.shuffle(&mut rng);
                for index in order {
                    analyze_connection(
                        graph,
                        fill,
                        opts,
                        settings,
                        &pairs[index],
                        mode,
                        core_region,
                        results,
                        &mut scratch,
                    )?;
                }
                Ok(())
            })
    })
}

/// Analyzes one connection: computes scaling factors, runs the pass-specific
/// engine, updates the metrics, and resets the scratch.
#[allow(clippy::too_many_arguments)]
fn analyze_connection(
    graph: &RoutingGraph,
    fill: &BlockType,
    opts: &UserOptions,
    settings: &AnalysisSettings,
    pair: &SourceSinkPair,
    mode: TopologicalMode,
    core_region: Option<(usize, usize, usize, usize)>,
    results: &SharedResults,
    scratch: &mut Scratch,
) -> Result<(), Error> {
    let length_prob = settings.length_probabilities[pair.length];
    if probs_equal(length_prob, 0.0) {
        return Ok(());
    }
    // probability analysis may be restricted to the core region; enumeration
    // always covers everything
    if mode == TopologicalMode::Probability {
        if let Some(region) = core_region {
            if !tile_in_region(region, pair.tile) {
                return Ok(());
            }
        }
    }

    let source_prob = sum_of_source_probabilities(graph, fill, settings, pair.source)?;
    let num_sinks = num_class_pins(graph, fill, pair.sink, NodeKind::Sink)?;
    let num_sources = num_class_pins(graph, fill, pair.source, NodeKind::Source)?;
    let max_path_weight = settings.max_path_weight(pair.length);
    let scaling =
        num_sinks as f64 * source_prob * length_prob / pair.conns_at_length.max(1) as f64;

    match mode {
        TopologicalMode::Enumerate => {
            let enumerated = enumerate_pair(
                graph,
                pair.source,
                pair.sink,
                max_path_weight,
                Some(scaling),
                opts,
                scratch,
            )?;
            if enumerated.is_some() {
                results.inc_enumerated();
            }
        }
        TopologicalMode::Probability => {
            // the pin kind of the source class routes the result to the
            // driver or fanout half of the metric
            let source_class = fill
                .classes()
                .get(graph[pair.source].ptc())
                .and_then(|c| c.kind())
                .ok_or(PathEnumError::UnexpectedNodeKind {
                    node: pair.source,
                    kind: graph[pair.source].kind(),
                })?;
            if let Some(prob) = estimate_pair(
                graph,
                pair.source,
                pair.sink,
                max_path_weight,
                Some(fill),
                opts,
                scratch,
            )? {
                results.add_probability(
                    source_class,
                    pair.length,
                    scaling * prob,
                    scaling,
                    num_sources * num_sinks,
                );
            }
        }
    }
    scratch.cleanup();
    Ok(())
}

/// Enumerates the paths of one pair (C6): backward from the sink, then
/// forward from the source with the scaled seed. Returns the unscaled number
/// of enumerated paths, or `None` when the pair is unreachable within the
/// weight bound.
pub(crate) fn enumerate_pair(
    graph: &RoutingGraph,
    source: NodeId,
    sink: NodeId,
    max_path_weight: u32,
    scaling: Option<f64>,
    opts: &UserOptions,
    scratch: &mut Scratch,
) -> Result<Option<f64>, Error> {
    let resolved = distance::resolve_distances(graph, source, sink, max_path_weight, scratch)?;
    let max_path_weight = resolved.max_path_weight;
    if max_path_weight == 0 || !resolved.min_dist.is_some_and(|d| d > 0) {
        return Ok(None);
    }

    let mut visitor = Enumerate::new(BucketMode::ByPathWeight);

    // backward: seed one path at the sink and carry counts toward the source
    scratch.topo[sink.inner()].buckets.sink[0] = Some(1.0);
    let backward = Traversal {
        graph,
        from: sink,
        to: source,
        dir: TraversalDir::Backward,
        max_path_weight,
        opts,
    };
    traversal::traverse(&backward, scratch, &mut visitor)?;

    // total paths the forward run will enumerate, for scaling the seed
    scratch.topo[source.inner()].buckets.source[0] = Some(1.0);
    let num_enumerated = scratch.topo[source.inner()].buckets.num_paths_through(
        graph[source].weight(),
        0,
        max_path_weight,
    );
    let seed = if num_enumerated > 0.0 {
        match scaling {
            Some(scaling) => scaling / num_enumerated,
            None => 1.0,
        }
    } else {
        0.0
    };

    scratch.topo[source.inner()].buckets.source[0] = Some(seed);
    visitor.num_routing_nodes_in_subgraph = 0;
    let forward = Traversal {
        graph,
        from: source,
        to: sink,
        dir: TraversalDir::Forward,
        max_path_weight,
        opts,
    };
    traversal::traverse(&forward, scratch, &mut visitor)?;

    Ok(Some(num_enumerated))
}

/// Estimates the probability that one pair is routable (C7..C9), using the
/// configured estimator. Returns `Some(0.0)` for pairs unreachable within
/// the weight bound and `None` when the estimator cannot produce a defined
/// probability (an empty cutline level).
pub(crate) fn estimate_pair(
    graph: &RoutingGraph,
    source: NodeId,
    sink: NodeId,
    max_path_weight: u32,
    fill_type: Option<&BlockType>,
    opts: &UserOptions,
    scratch: &mut Scratch,
) -> Result<Option<f64>, Error> {
    let resolved = distance::resolve_distances(graph, source, sink, max_path_weight, scratch)?;
    let max_path_weight = resolved.max_path_weight;
    if max_path_weight == 0 || !resolved.min_dist.is_some_and(|d| d > 0) {
        return Ok(Some(0.0));
    }

    let forward = Traversal {
        graph,
        from: source,
        to: sink,
        dir: TraversalDir::Forward,
        max_path_weight,
        opts,
    };

    let prob = match opts.probability_mode {
        ProbabilityMode::Propagate => {
            scratch.topo[source.inner()].buckets.source[0] = Some(1.0);
            let mut visitor = Propagate::new(fill_type);
            traversal::traverse(&forward, scratch, &mut visitor)?;
            Some(visitor.prob_routable)
        }
        ProbabilityMode::Cutline => {
            scratch.topo[source.inner()].level = Some(0);
            let mut visitor = Cutline::new(fill_type);
            traversal::traverse(&forward, scratch, &mut visitor)?;
            Some(visitor.prob_routable)
        }
        ProbabilityMode::CutlineSimple => {
            distance::set_node_hops(graph, source, max_path_weight, TraversalDir::Forward, scratch);
            distance::set_node_hops(graph, sink, max_path_weight, TraversalDir::Backward, scratch);
            let total_hops = scratch.ss[source.inner()]
                .sink_hops
                .ok_or(PathEnumError::UndefinedDistance(source))?;
            let mut visitor =
                CutlineSimple::new(fill_type, (total_hops as usize).saturating_sub(1));
            traversal::traverse(&forward, scratch, &mut visitor)?;
            Some(visitor.prob_routable)
        }
        ProbabilityMode::CutlineRecursive => {
            distance::set_node_hops(graph, source, max_path_weight, TraversalDir::Forward, scratch);
            distance::set_node_hops(graph, sink, max_path_weight, TraversalDir::Backward, scratch);
            let source_hops = scratch.ss[sink.inner()]
                .source_hops
                .ok_or(PathEnumError::UndefinedDistance(sink))?;
            let mut visitor = CutlineRecursive::new(
                fill_type,
                source,
                sink,
                source_hops as i64,
                source_hops as usize,
            );
            traversal::traverse(&forward, scratch, &mut visitor)?;
            visitor.prob_routable
        }
        ProbabilityMode::ReliabilityPolynomial => {
            let fixed_demand = opts.use_routing_node_demand.ok_or_else(|| {
                crate::error::InitError::InvalidOption(
                    "reliability_polynomial requires use_routing_node_demand".into(),
                )
            })?;
            distance::set_node_hops(graph, source, max_path_weight, TraversalDir::Forward, scratch);
            distance::set_node_hops(graph, sink, max_path_weight, TraversalDir::Backward, scratch);

            // enumerate by hop count; demand is incremented a second time
            // here, but the fixed demand override ignores it anyway
            let mut visitor = Enumerate::new(BucketMode::ByPathHops);
            scratch.topo[source.inner()].buckets.source[0] = Some(1.0);
            traversal::traverse(&forward, scratch, &mut visitor)?;

            let source_sink_hops = scratch.ss[sink.inner()]
                .source_hops
                .ok_or(PathEnumError::UndefinedDistance(sink))?;
            let prob = reliability_polynomial(
                source_sink_hops,
                &scratch.topo[sink.inner()].buckets.source,
                visitor.num_routing_nodes_in_subgraph,
                1.0 - fixed_demand,
            )?;
            Some(prob)
        }
    };

    match prob {
        Some(p) if p > 1.0 + PROB_TOL || p < -PROB_TOL => {
            Err(PathEnumError::ProbabilityOutOfRange(p).into())
        }
        Some(p) => Ok(Some(p.clamp(0.0, 1.0))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn fpga_opts(threads: usize) -> UserOptions {
        UserOptions::builder()
            .threads(threads)
            .max_connection_length(3)
            .analyze_core(false)
            .ipin_probability(0.3)
            .build()
    }

    fn run_fpga_with(threads: usize) -> FpgaReport {
        let (arch, graph) = testing::tiny_fpga();
        let spec = AnalysisSpec::builder()
            .graph(graph)
            .arch(arch)
            .opts(fpga_opts(threads))
            .build();
        match run(spec).unwrap() {
            AnalysisReport::Fpga(report) => report,
            AnalysisReport::Simple(_) => unreachable!(),
        }
    }

    #[test]
    fn ring_coords_cover_the_manhattan_ring() {
        let coords: Vec<_> = ring_coords(3, 3, 2, (7, 7)).collect();
        // eight tiles on the radius-2 ring, all interior
        assert_eq!(coords.len(), 8);
        for (x, y) in coords {
            assert_eq!(x.abs_diff(3) + y.abs_diff(3), 2);
        }
        // near the perimeter the ring is clipped
        let clipped: Vec<_> = ring_coords(1, 1, 2, (7, 7)).collect();
        assert!(clipped.len() < 8);
        assert!(clipped.iter().all(|&(x, y)| x > 0 && y > 0));
    }

    #[test]
    fn core_region_shrinks_by_offset() {
        let opts = UserOptions::builder().analyze_core(true).build();
        assert_eq!(prob_analysis_region(&opts, 10, 10), (3, 6, 3, 6));
        let opts = UserOptions::builder().analyze_core(false).build();
        assert_eq!(prob_analysis_region(&opts, 10, 10), (1, 8, 1, 8));
    }

    #[test]
    fn fpga_run_produces_sane_metrics() {
        let report = run_fpga_with(1);
        assert!(report.desired_conns > 0);
        assert!(report.enumerated_conns > 0);
        assert!(report.enumerated_conns <= report.desired_conns);
        assert!(report.total_demand > 0.0);
        assert!(report.squared_demand > 0.0);
        assert!(report.normalized_demand > 0.0);
        assert!(report.driver_metric.is_finite() && report.driver_metric >= 0.0);
        assert!(report.fanout_metric.is_finite() && report.fanout_metric >= 0.0);
        assert!(report.routability_metric >= 0.0);
    }

    #[test]
    fn parallel_run_matches_serial_run() {
        let serial = run_fpga_with(1);
        let parallel = run_fpga_with(4);
        assert_eq!(serial.desired_conns, parallel.desired_conns);
        assert_eq!(serial.enumerated_conns, parallel.enumerated_conns);
        assert!((serial.total_demand - parallel.total_demand).abs() < 1e-9);
        assert!((serial.total_driver_prob - parallel.total_driver_prob).abs() < 1e-9);
        assert!((serial.total_fanout_prob - parallel.total_fanout_prob).abs() < 1e-9);
        assert!((serial.driver_metric - parallel.driver_metric).abs() < 1e-9);
        assert!((serial.fanout_metric - parallel.fanout_metric).abs() < 1e-9);
    }

    #[test]
    fn zero_probability_source_is_filtered() {
        let (arch, graph) = testing::tiny_fpga();
        let opts = UserOptions::builder()
            .analyze_core(false)
            .opin_probability(0.0)
            .ipin_probability(0.0)
            .build();
        let settings = AnalysisSettings::from_opts(&opts, &arch).unwrap();
        let (partitions, desired) = build_work_list(&graph, &arch, &settings, &opts).unwrap();
        assert_eq!(desired, 0);
        assert!(partitions.iter().all(Vec::is_empty));
    }

    #[test]
    fn unreachable_pair_skips_quietly() {
        let graph = testing::chain_graph(8);
        let opts = UserOptions::default();
        let (source, sink) = testing::terminals(&graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 20);
        let enumerated =
            enumerate_pair(&graph, source, sink, 3, None, &opts, &mut scratch).unwrap();
        assert!(enumerated.is_none());
        scratch.cleanup();
        let prob = estimate_pair(&graph, source, sink, 3, None, &opts, &mut scratch).unwrap();
        assert_eq!(prob, Some(0.0));
    }

    #[test]
    fn reliability_polynomial_mode_on_a_chain() {
        let graph = testing::chain_graph(2);
        let opts = UserOptions::builder()
            .probability_mode(ProbabilityMode::ReliabilityPolynomial)
            .use_routing_node_demand(Some(0.5))
            .build();
        let (source, sink) = testing::terminals(&graph);
        let mut scratch = Scratch::new(graph.num_nodes(), 20);
        let prob = estimate_pair(&graph, source, sink, 10, None, &opts, &mut scratch)
            .unwrap()
            .unwrap();
        // one minimum path through four routing nodes at p = 0.5
        assert!((prob - 0.5f64.powi(4)).abs() < 1e-12);
    }

    #[test]
    fn simple_mode_reports_paths_and_probability() {
        let graph = testing::chain_graph(2);
        let spec = AnalysisSpec::builder()
            .graph(graph)
            .arch(Arch::default())
            .opts(UserOptions::builder().structs_mode(StructsMode::Simple).build())
            .build();
        let report = match run(spec).unwrap() {
            AnalysisReport::Simple(report) => report,
            AnalysisReport::Fpga(_) => unreachable!(),
        };
        // every chain node lies on the single path
        for &(id, paths) in &report.node_paths {
            assert_eq!(paths, 1.0, "node {id}");
        }
        assert!((report.connection_probability - 1.0).abs() < 1e-12);
    }
}
