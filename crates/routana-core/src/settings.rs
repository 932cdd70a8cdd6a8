//! Analysis settings derived from the user options and the architecture:
//! per-pin usage probabilities, normalized length probabilities, and the test
//! tiles from which connections are enumerated.

use itertools::iproduct;

use crate::arch::{Arch, ArchError, Coord};
use crate::error::{Error, InitError};
use crate::opts::UserOptions;

/// Derived, immutable settings shared by every worker.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// Usage probability of each fill-block pin. Zero-probability pins are
    /// never enumerated from.
    pub pin_probabilities: Vec<f64>,
    /// Probability of a connection having each length, normalized to sum to
    /// one over the analyzable lengths.
    pub length_probabilities: Vec<f64>,
    /// Tiles from which connections are enumerated.
    pub test_tiles: Vec<Coord>,
}

impl AnalysisSettings {
    /// Derives settings for the given options and architecture.
    pub fn from_opts(opts: &UserOptions, arch: &Arch) -> Result<Self, Error> {
        let fill = arch.fill_type().ok_or(ArchError::NoFillType)?;

        // drivers get the opin probability, receivers the ipin probability,
        // global and open pins get zero
        let pin_probabilities = (0..fill.num_pins())
            .map(|pin| {
                if fill.is_global_pin(pin) {
                    return 0.0;
                }
                match fill.classes()[fill.class_of_pin(pin)].kind() {
                    Some(crate::arch::PinKind::Driver) => opts.opin_probability,
                    Some(crate::arch::PinKind::Receiver) => opts.ipin_probability,
                    _ => 0.0,
                }
            })
            .collect();

        // lengths beyond the maximum are dropped, so the kept probabilities
        // are rescaled to sum to one
        let num_lengths = opts.max_connection_length + 1;
        if opts.length_probabilities.len() < num_lengths {
            return Err(InitError::LengthProbabilities {
                provided: opts.length_probabilities.len(),
                max_length: opts.max_connection_length,
                required: num_lengths,
            }
            .into());
        }
        let sum: f64 = opts.length_probabilities[..num_lengths].iter().sum();
        if sum <= 0.0 {
            return Err(InitError::InvalidOption(
                "length probabilities must not all be zero".into(),
            )
            .into());
        }
        let length_probabilities = opts.length_probabilities[..num_lengths]
            .iter()
            .map(|p| p / sum)
            .collect();

        // every non-perimeter tile is a test tile
        let (x_size, y_size) = arch.grid_size();
        let test_tiles = iproduct!(1..x_size.saturating_sub(1), 1..y_size.saturating_sub(1))
            .map(|(x, y)| Coord::new(x, y))
            .collect();

        Ok(Self {
            pin_probabilities,
            length_probabilities,
            test_tiles,
        })
    }

    /// Maximum allowable path weight for a connection of the given length.
    /// Gives enumeration some slack beyond the straight-line cost.
    pub fn max_path_weight(&self, conn_length: usize) -> u32 {
        (15.0 + conn_length as f64 * 1.3) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn length_probabilities_are_renormalized() {
        let (arch, _) = testing::tiny_fpga();
        let opts = UserOptions::builder()
            .max_connection_length(2)
            .length_probabilities(vec![0.0, 0.4, 0.1])
            .build();
        let settings = AnalysisSettings::from_opts(&opts, &arch).unwrap();
        assert_eq!(settings.length_probabilities.len(), 3);
        assert!((settings.length_probabilities[1] - 0.8).abs() < 1e-12);
        assert!((settings.length_probabilities[2] - 0.2).abs() < 1e-12);
        let sum: f64 = settings.length_probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn pin_probabilities_follow_pin_kind() {
        let (arch, _) = testing::tiny_fpga();
        let opts = UserOptions::builder()
            .opin_probability(0.6)
            .ipin_probability(0.3)
            .build();
        let settings = AnalysisSettings::from_opts(&opts, &arch).unwrap();
        let fill = arch.fill_type().unwrap();
        for pin in 0..fill.num_pins() {
            let expected = match fill.classes()[fill.class_of_pin(pin)].kind() {
                Some(crate::arch::PinKind::Driver) => 0.6,
                Some(crate::arch::PinKind::Receiver) => 0.3,
                _ => 0.0,
            };
            assert_eq!(settings.pin_probabilities[pin], expected);
        }
    }

    #[test]
    fn test_tiles_exclude_the_perimeter() {
        let (arch, _) = testing::tiny_fpga();
        let settings =
            AnalysisSettings::from_opts(&UserOptions::default(), &arch).unwrap();
        let (x_size, y_size) = arch.grid_size();
        assert_eq!(settings.test_tiles.len(), (x_size - 2) * (y_size - 2));
        for tile in &settings.test_tiles {
            assert!(tile.x > 0 && tile.x < x_size - 1);
            assert!(tile.y > 0 && tile.y < y_size - 1);
        }
    }

    #[test]
    fn max_path_weight_grows_with_length() {
        let (arch, _) = testing::tiny_fpga();
        let settings =
            AnalysisSettings::from_opts(&UserOptions::default(), &arch).unwrap();
        assert_eq!(settings.max_path_weight(0), 15);
        assert_eq!(settings.max_path_weight(3), 18);
        assert_eq!(settings.max_path_weight(10), 28);
    }
}
