//! The reliability-polynomial estimator.
//!
//! Given the spectrum of source→sink path counts by edge count, a reliability
//! polynomial `Σ Cᵢ pⁱ (1−p)^(m−i)` bounds the probability that the sink is
//! reachable when every routing node operates independently with probability
//! `p`. The minimum-cardinality coefficient is exact; the next one follows
//! from it; intermediate coefficients use the Sperner upper bound
//! `N_i <= (i+1)/(m−i) · N_{i+1}`.

use crate::error::{Error, PathEnumError};

/// Minimum possible edges from source to sink:
/// source → opin → wire → ipin → sink.
const MIN_POSSIBLE_HOPS: u32 = 4;

/// A path of `n` edges contains `n + 1` nodes; dropping the source/opin and
/// ipin/sink endpoints leaves the routing-node cardinality.
fn hops_to_routing_nodes(hops: u32) -> i64 {
    hops as i64 - 2 + 1
}

/// Evaluates the reliability polynomial.
///
/// * `source_sink_hops`: minimum edge count from source to sink.
/// * `path_counts`: per-hop-count path totals at the sink (`None` where no
///   paths of that cardinality exist).
/// * `num_routing_nodes`: routing nodes in the legal subgraph.
/// * `node_probability`: operational probability of each routing node.
pub(crate) fn reliability_polynomial(
    source_sink_hops: u32,
    path_counts: &[Option<f64>],
    num_routing_nodes: usize,
    node_probability: f64,
) -> Result<f64, Error> {
    if node_probability < 0.0 {
        return Err(PathEnumError::NegativeNodeProbability(node_probability).into());
    }
    if source_sink_hops < MIN_POSSIBLE_HOPS {
        return Err(PathEnumError::TooFewHops(source_sink_hops).into());
    }
    for (hops, count) in path_counts.iter().enumerate() {
        if let Some(count) = *count {
            if count > 0.0 && (hops as u32) < source_sink_hops {
                return Err(PathEnumError::PathBelowMinHops {
                    count,
                    hops,
                    min_hops: source_sink_hops,
                }
                .into());
            }
        }
    }

    let m = num_routing_nodes as i64;
    // (coefficient, cardinality) pairs
    let mut poly: Vec<(f64, i64)> = Vec::new();

    // the minimum-cardinality coefficient is the exact minimum-length count
    let first_value = path_counts
        .get(source_sink_hops as usize)
        .copied()
        .flatten()
        .unwrap_or(0.0);
    let first_subscript = hops_to_routing_nodes(source_sink_hops);
    poly.push((first_value, first_subscript));

    // every minimum pathset extended by any unused node forms a distinct
    // pathset of the next cardinality; add the counts native to that length
    let second_hops = source_sink_hops + 1;
    let second_subscript = hops_to_routing_nodes(second_hops);
    let mut second_value = path_counts
        .get(second_hops as usize)
        .copied()
        .flatten()
        .unwrap_or(0.0);
    let unused_nodes = m - first_subscript;
    if unused_nodes < 0 {
        return Err(Error::Other(format!(
            "subgraph has fewer routing nodes ({m}) than the minimum pathset ({first_subscript})"
        )));
    }
    second_value += first_value * unused_nodes as f64;
    poly.push((second_value, second_subscript));

    // the full subgraph is always a pathset
    let last_subscript = m;
    if last_subscript > second_subscript {
        poly.push((1.0, last_subscript));

        // Sperner-bound the coefficients between the second and the last,
        // walking down from N_m
        let mut prev = *poly.last().unwrap();
        for subscript in (second_subscript + 1..last_subscript).rev() {
            let (n_plus, ind) = prev;
            let i = ind as f64 - 1.0;
            let bound = (i + 1.0) / (m as f64 - i) * n_plus;
            prev = (bound, subscript);
            poly.push(prev);
        }
    }

    let probability = poly
        .iter()
        .filter(|&&(coeff, _)| coeff != 0.0)
        .map(|&(coeff, ind)| {
            let operational = ind as f64;
            let failed = (m - ind) as f64;
            coeff * node_probability.powf(operational) * (1.0 - node_probability).powf(failed)
        })
        .sum();
    Ok(probability)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_minimum_path_reduces_to_power_of_p() {
        // one path of five edges through a four-node subgraph: the polynomial
        // collapses to p^4
        let mut counts = vec![None; 10];
        counts[5] = Some(1.0);
        let p = 0.5;
        let prob = reliability_polynomial(5, &counts, 4, p).unwrap();
        assert!((prob - p.powi(4)).abs() < 1e-12);
    }

    #[test]
    fn perfect_nodes_route_with_certainty() {
        let mut counts = vec![None; 10];
        counts[5] = Some(1.0);
        let prob = reliability_polynomial(5, &counts, 4, 1.0).unwrap();
        assert!((prob - 1.0).abs() < 1e-12);
    }

    #[test]
    fn extra_nodes_contribute_bounded_pathsets() {
        // one minimum path of 4 nodes inside a 6-node subgraph
        let mut counts = vec![None; 12];
        counts[5] = Some(1.0);
        let m = 6i64;
        let p: f64 = 0.5;
        let prob = reliability_polynomial(5, &counts, m as usize, p).unwrap();
        // N_4 = 1, N_5 = 1 * (6 - 4) = 2, N_6 = 1, and the Sperner bound fills
        // nothing because cardinality 5 and 6 are adjacent
        let expected = p.powi(4) * (1.0 - p).powi(2) + 2.0 * p.powi(5) * (1.0 - p) + p.powi(6);
        assert!((prob - expected).abs() < 1e-12);
    }

    #[test]
    fn paths_shorter_than_min_hops_fail() {
        let mut counts = vec![None; 8];
        counts[3] = Some(1.0);
        counts[5] = Some(1.0);
        let res = reliability_polynomial(5, &counts, 4, 0.5);
        assert!(matches!(
            res,
            Err(Error::PathEnum(PathEnumError::PathBelowMinHops { .. }))
        ));
    }

    #[test]
    fn too_few_hops_fail() {
        let counts = vec![None; 8];
        let res = reliability_polynomial(3, &counts, 4, 0.5);
        assert!(matches!(
            res,
            Err(Error::PathEnum(PathEnumError::TooFewHops(3)))
        ));
    }
}
