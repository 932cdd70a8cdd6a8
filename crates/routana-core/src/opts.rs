//! User-facing options. The CLI parses its flags into [`UserOptions`], which
//! the analysis then treats as read-only.

use typed_builder::TypedBuilder;

use crate::error::InitError;

/// What the routing-structs file is expected to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StructsMode {
    /// A full dump: nodes, switches, block types, grid, and node indices.
    #[default]
    Vpr,
    /// A bare node list describing a one-source/one-sink graph.
    Simple,
}

/// How the demand a connection contributed during enumeration is discounted
/// when that same connection is later analyzed for routability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelfCongestionMode {
    /// No discounting.
    #[default]
    None,
    /// Nodes keep a polar-indexed history of path counts per nearby
    /// source/sink terminal.
    Radius,
    /// Nodes keep per-edge, per-weight records of the counts they pushed to
    /// each child.
    PathDependence,
}

/// Which estimator turns node demands into a connection probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbabilityMode {
    /// Propagate per-weight reachability probabilities to the sink.
    #[default]
    Propagate,
    /// Partition the subgraph into topological levels.
    Cutline,
    /// Partition by source/sink hop counts.
    CutlineSimple,
    /// Levelled partition with recursive smoothing of first-at-height nodes.
    CutlineRecursive,
    /// Bound the reachability with a reliability polynomial.
    ReliabilityPolynomial,
}

/// Default length-probability table. Index is connection length in tiles;
/// the tail beyond the maximum connection length is renormalized away.
pub const DEFAULT_LENGTH_PROBABILITIES: [f64; 17] = [
    0.0, 0.40, 0.23, 0.14, 0.08, 0.065, 0.035, 0.025, 0.015, 0.01, 0.008, 0.008, 0.006, 0.005,
    0.004, 0.003, 0.003,
];

/// Options controlling a routability analysis run.
#[derive(Debug, Clone, TypedBuilder)]
pub struct UserOptions {
    /// Expected contents of the routing-structs file.
    #[builder(default)]
    pub structs_mode: StructsMode,

    /// Number of worker threads for enumeration and probability analysis.
    #[builder(default = 1)]
    pub threads: usize,

    /// Maximum connection length (in tiles) considered during enumeration.
    #[builder(default = 3)]
    pub max_connection_length: usize,

    /// Restrict probability analysis to tiles at least three tiles away from
    /// the grid perimeter.
    #[builder(default = true)]
    pub analyze_core: bool,

    /// If set, channel nodes are treated as having this fixed demand and all
    /// other nodes as having zero demand.
    #[builder(default)]
    pub use_routing_node_demand: Option<f64>,

    /// Usage probability of each output pin.
    #[builder(default = 0.6)]
    pub opin_probability: f64,

    /// Usage probability of each input pin (drives the fanout metric).
    #[builder(default = 0.0)]
    pub ipin_probability: f64,

    /// Scalar applied to demand as it accumulates.
    #[builder(default = 1.0)]
    pub demand_multiplier: f64,

    /// Self-congestion bookkeeping mode.
    #[builder(default)]
    pub self_congestion: SelfCongestionMode,

    /// Estimator used during the probability pass.
    #[builder(default)]
    pub probability_mode: ProbabilityMode,

    /// Seed for work-list sampling and per-worker shuffling.
    #[builder(default = 3)]
    pub seed: u64,

    /// Probability of encountering a connection of each length.
    #[builder(default = DEFAULT_LENGTH_PROBABILITIES.to_vec())]
    pub length_probabilities: Vec<f64>,
}

impl Default for UserOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl UserOptions {
    /// Checks option combinations that must be rejected before any analysis
    /// begins.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.threads == 0 {
            return Err(InitError::InvalidOption(
                "number of threads must be greater than 0".into(),
            ));
        }
        if self.demand_multiplier <= 0.0 {
            return Err(InitError::InvalidOption(format!(
                "demand multiplier must be > 0, got {}",
                self.demand_multiplier
            )));
        }
        if let Some(demand) = self.use_routing_node_demand {
            if demand <= 0.0 {
                return Err(InitError::InvalidOption(format!(
                    "routing node demand must be > 0, got {demand}"
                )));
            }
            if self.self_congestion != SelfCongestionMode::None {
                return Err(InitError::InvalidOption(
                    "only the 'none' self-congestion mode is allowed together with \
                     use_routing_node_demand"
                        .into(),
                ));
            }
            if self.structs_mode == StructsMode::Simple {
                return Err(InitError::InvalidOption(
                    "use_routing_node_demand is not supported in simple structs mode".into(),
                ));
            }
        }
        if self.opin_probability < 0.0 || self.ipin_probability < 0.0 {
            return Err(InitError::InvalidOption(
                "pin probabilities must be >= 0".into(),
            ));
        }
        if self.probability_mode == ProbabilityMode::ReliabilityPolynomial
            && self.use_routing_node_demand.is_none()
        {
            return Err(InitError::InvalidOption(
                "the reliability_polynomial probability mode requires use_routing_node_demand"
                    .into(),
            ));
        }
        let required = self.max_connection_length + 1;
        if self.length_probabilities.len() < required {
            return Err(InitError::LengthProbabilities {
                provided: self.length_probabilities.len(),
                max_length: self.max_connection_length,
                required,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_validate() {
        assert!(UserOptions::default().validate().is_ok());
    }

    #[test]
    fn reliability_requires_fixed_demand() {
        let opts = UserOptions::builder()
            .probability_mode(ProbabilityMode::ReliabilityPolynomial)
            .build();
        assert!(matches!(
            opts.validate(),
            Err(InitError::InvalidOption(_))
        ));

        let opts = UserOptions::builder()
            .probability_mode(ProbabilityMode::ReliabilityPolynomial)
            .use_routing_node_demand(Some(0.5))
            .build();
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn fixed_demand_excludes_self_congestion() {
        let opts = UserOptions::builder()
            .use_routing_node_demand(Some(0.5))
            .self_congestion(SelfCongestionMode::Radius)
            .build();
        assert!(matches!(opts.validate(), Err(InitError::InvalidOption(_))));
    }

    #[test]
    fn short_length_table_fails() {
        let opts = UserOptions::builder()
            .max_connection_length(5)
            .length_probabilities(vec![0.0, 1.0])
            .build();
        assert!(matches!(
            opts.validate(),
            Err(InitError::LengthProbabilities { required: 6, .. })
        ));
    }
}
