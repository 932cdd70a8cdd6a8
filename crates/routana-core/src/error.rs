//! The error taxonomy shared by the whole crate.
//!
//! Every failure surfaces as one of five kinds: initialization, architecture,
//! graph topology, path enumeration, or other. Violations of declared
//! invariants are non-recoverable; transient conditions (an unreachable pair,
//! a zero-probability source, an empty cutline level) are handled locally by
//! the orchestrator and never become errors.

use crate::graph::{GraphError, NodeId, NodeKind, ParseError};

/// The top-level error type. The variant identifies the error kind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad options or an unreadable/malformed graph file.
    #[error(transparent)]
    Init(#[from] InitError),

    /// Architecture-level violation.
    #[error(transparent)]
    Arch(#[from] crate::arch::ArchError),

    /// Graph topology violation.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Invariant violated during path enumeration or probability analysis.
    #[error(transparent)]
    PathEnum(#[from] PathEnumError),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// Errors raised before any analysis begins.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// Could not read the routing-structs file.
    #[error("failed to read routing structs file")]
    Io(#[from] std::io::Error),

    /// The routing-structs file is malformed.
    #[error("failed to parse routing structs file")]
    Parse(#[from] ParseError),

    /// An option carries an out-of-range or contradictory value.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// The length-probability table is too short for the requested
    /// maximum connection length.
    #[error(
        "insufficient length probabilities: {provided} provided, but \
         max_connection_length {max_length} calls for {required}"
    )]
    LengthProbabilities {
        /// Entries in the user table.
        provided: usize,
        /// Requested maximum connection length.
        max_length: usize,
        /// Entries required.
        required: usize,
    },
}

/// Hard invariant violations during enumeration or probability analysis.
#[derive(Debug, thiserror::Error)]
pub enum PathEnumError {
    /// A node participating in a traversal has no defined distance.
    #[error("node {0} has no defined distance to the traversal start")]
    UndefinedDistance(NodeId),

    /// A destination node spans more than one tile.
    #[error("destination node {0} is not localized to a single tile")]
    SpannedDestination(NodeId),

    /// A node of an unexpected kind was encountered.
    #[error("node {node} has unexpected kind {kind:?}")]
    UnexpectedNodeKind {
        /// The offending node.
        node: NodeId,
        /// Its kind.
        kind: NodeKind,
    },

    /// An estimator produced a probability outside `[0, 1]`.
    #[error("estimator produced probability {0} outside [0, 1]")]
    ProbabilityOutOfRange(f64),

    /// Pins of one class must share a single usage probability.
    #[error("pins of the same class carry different probabilities: {expected} vs {got}")]
    PinProbabilityMismatch {
        /// First probability seen in the class.
        expected: f64,
        /// Conflicting probability.
        got: f64,
    },

    /// A node appeared more than one level above every node seen so far.
    #[error("node {node} appeared at level {level}, more than one above the current max {max}")]
    LevelJump {
        /// The offending node.
        node: NodeId,
        /// Its claimed level.
        level: u32,
        /// Highest level seen so far.
        max: u32,
    },

    /// A node was reached before its level could be derived.
    #[error("node {0} has no topological level")]
    UndefinedLevel(NodeId),

    /// A cutline partition ended up with fewer than two levels.
    #[error("expected at least 2 cutline levels, got {0}")]
    TooFewLevels(usize),

    /// A node was claimed by both the source and the sink half of a
    /// simple-cutline partition.
    #[error("node {0} falls into both the source and sink spheres of influence")]
    BothSpheres(NodeId),

    /// Self-congestion discount larger than the demand it discounts.
    #[error("self-congestion discount {discount} exceeds demand {demand} at node {node}")]
    DiscountExceedsDemand {
        /// The node being discounted.
        node: NodeId,
        /// Its demand.
        demand: f64,
        /// The computed discount.
        discount: f64,
    },

    /// A recursive cutline traversal stepped outside its bounds.
    #[error("node {0} stepped outside the bounds of its recursive traversal")]
    RecursionBounds(NodeId),

    /// A smoothed node was levelled without a backup record.
    #[error("node {0} was not backed up, or appeared in more than one cutline level")]
    MissingBackup(NodeId),

    /// Reliability polynomials need at least four hops from source to sink.
    #[error("expected at least 4 hops from source to sink, got {0}")]
    TooFewHops(u32),

    /// A path shorter than the minimum hop distance was counted.
    #[error("found {count} paths of {hops} hops, below the source-sink minimum of {min_hops}")]
    PathBelowMinHops {
        /// Offending path count.
        count: f64,
        /// Its hop cardinality.
        hops: usize,
        /// Minimum possible hops.
        min_hops: u32,
    },

    /// Reliability polynomials need a node operation probability >= 0.
    #[error("routing node operation probability must be >= 0, got {0}")]
    NegativeNodeProbability(f64),

    /// A test tile cannot reach any block at the maximum connection length.
    #[error("tile ({x}, {y}) cannot reach any block a distance {length} away")]
    UnreachableTestTile {
        /// Tile x coordinate.
        x: usize,
        /// Tile y coordinate.
        y: usize,
        /// The unreachable connection length.
        length: usize,
    },

    /// Analysis touched a tile that is not of the fill type.
    #[error("tile ({x}, {y}) is not of the fill block type")]
    NotFillTile {
        /// Tile x coordinate.
        x: usize,
        /// Tile y coordinate.
        y: usize,
    },

    /// Fill-type tiles must sit at a zero width/height offset.
    #[error("fill tile ({x}, {y}) has a nonzero width/height offset")]
    TileOffset {
        /// Tile x coordinate.
        x: usize,
        /// Tile y coordinate.
        y: usize,
    },

    /// The worst-demand sample was empty.
    #[error("asked to analyze the demand of zero nodes")]
    EmptyDemandSample,
}
