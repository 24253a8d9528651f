//! Imaginary-frequency remediation: displace the geometry along the
//! offending normal modes and hand back both displaced structures as new
//! conformers to optimize.

use crate::probe::{VibrationalData, VibrationalParser};
use essq_core::model::Xyz;
use serde::Serialize;
use std::path::Path;

const DEFAULT_FACTOR: f64 = 1.1;
const MAX_TREATMENTS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NegFreqTreatment {
    /// Frequencies treated in this step, rounded to two decimals.
    pub treated: Vec<f64>,
    pub conformers: Vec<Xyz>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

fn same_frequency(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-2 + 1e-4 * b.abs()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reads vibrational data at `path` and displaces the geometry of `label`
/// along its imaginary modes. `history` holds every frequency treated in
/// earlier attempts.
pub fn treat_negative_frequencies(
    parser: &dyn VibrationalParser,
    path: &Path,
    label: &str,
    history: &[f64],
    scanning_rotors: bool,
) -> NegFreqTreatment {
    let mut result = NegFreqTreatment::default();

    if history.len() > MAX_TREATMENTS {
        let message = format!(
            "Species {} was troubleshot for imaginary frequencies {} times, giving up",
            label,
            history.len()
        );
        if scanning_rotors {
            result.warnings.push(message);
        } else {
            result.errors.push(message);
        }
        return result;
    }

    let data = match parser.parse(path) {
        Ok(data) => data,
        Err(e) => {
            result
                .errors
                .push(format!("Could not read vibrational data for {}: {}", label, e));
            return result;
        }
    };
    if let Err(e) = data.validate() {
        result.errors.push(format!(
            "Inconsistent vibrational data for {}: {}",
            label, e
        ));
        return result;
    }
    displace(&data, label, history, &mut result);
    result
}

fn displace(data: &VibrationalData, label: &str, history: &[f64], result: &mut NegFreqTreatment) {
    let imaginary: Vec<usize> = data
        .frequencies
        .iter()
        .enumerate()
        .filter(|(_, f)| **f < 0.0)
        .map(|(i, _)| i)
        .collect();
    if imaginary.is_empty() {
        result
            .warnings
            .push(format!("Species {} has no imaginary frequencies", label));
        return;
    }

    let seen = |index: &usize| {
        history
            .iter()
            .filter(|h| same_frequency(data.frequencies[*index], **h))
            .count()
    };

    let (modes, factor) = if let [only] = imaginary.as_slice() {
        let times = seen(only);
        let factor = if times == 0 {
            DEFAULT_FACTOR
        } else {
            1.0 + 0.1 * (times as f64 + 1.0)
        };
        (vec![*only], factor)
    } else if imaginary.iter().all(|i| seen(i) == 0) {
        let largest = imaginary
            .iter()
            .copied()
            .max_by(|a, b| {
                data.frequencies[*a]
                    .abs()
                    .total_cmp(&data.frequencies[*b].abs())
            })
            .into_iter()
            .collect();
        (largest, DEFAULT_FACTOR)
    } else {
        (imaginary, DEFAULT_FACTOR)
    };

    tracing::info!(
        "Displacing {} along {} imaginary mode(s) with factor {:.1}",
        label,
        modes.len(),
        factor
    );
    for index in modes {
        let mode = &data.normal_modes[index];
        for sign in [-1.0, 1.0] {
            let mut xyz = data.xyz.clone();
            for (coord, shift) in xyz.coords.iter_mut().zip(mode) {
                for (c, s) in coord.iter_mut().zip(shift) {
                    *c += sign * factor * s;
                }
            }
            result.conformers.push(xyz);
        }
        result.treated.push(round2(data.frequencies[index]));
    }
}
