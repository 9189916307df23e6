//! Cumulative damage calculator.
//!
//! Masses are indexed by damage state (index 0 = no damage) and are expressed in the units of
//! the original asset: a probability for individual buildings, a building count for
//! aggregates. Exceedance vectors are always normalized to `[0, 1]`.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Masses at or below this value are treated as empty.
pub const MASS_EPS: f64 = 1e-10;

/// Whether the engine's probabilities already account for the current damage state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragilityRegime {
    /// Reported distribution replaces the prior one.
    StateDependent,
    /// Reported probabilities assume an undamaged start and are combined with history.
    StateIndependent,
}

/// Result of one cumulative update for a single original asset.
#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeUpdate {
    pub masses: Vec<f64>,
    /// Cumulative probability of non-exceedance per damage state.
    pub non_exceedance: Vec<f64>,
    /// Number of values that had to be clamped to keep the result consistent.
    pub clamped: usize,
}

/// PoE per damage state: `poe[k] = sum(mass[k..]) / total`.
pub fn exceedance_from_masses(masses: &[f64], total: f64) -> Vec<f64> {
    let mut poe = vec![0.0; masses.len()];
    if total <= MASS_EPS {
        if let Some(first) = poe.first_mut() {
            *first = 1.0;
        }
        return poe;
    }
    let mut acc = 0.0;
    for k in (0..masses.len()).rev() {
        acc += masses[k];
        poe[k] = acc / total;
    }
    poe
}

/// Inverse of [`exceedance_from_masses`].
pub fn masses_from_exceedance(poe: &[f64], total: f64) -> Vec<f64> {
    (0..poe.len())
        .map(|k| {
            let next = poe.get(k + 1).copied().unwrap_or(0.0);
            (poe[k] - next) * total
        })
        .collect()
}

/// Makes an exceedance vector valid in place and returns how many entries changed.
///
/// Every entry is clipped to `[0, 1]`, the no-damage entry is pinned to 1, and no entry may
/// exceed the one before it (a more severe state cannot be more likely to be exceeded).
pub fn enforce_monotonic(poe: &mut [f64]) -> usize {
    let mut clamped = 0;
    for k in 0..poe.len() {
        let ceiling = if k == 0 { 1.0 } else { poe[k - 1] };
        let floor = if k == 0 { 1.0 } else { 0.0 };
        let v = poe[k].clamp(floor, ceiling);
        if v != poe[k] {
            clamped += 1;
            poe[k] = v;
        }
    }
    clamped
}

/// Combines an event's exceedance probabilities with the prior cumulative non-exceedance.
///
/// `PoNE_n(k) = PoNE_{n-1}(k) * (1 - PoE_event(k))` for every state above the floor.
pub fn accumulate_state_independent(
    prior_non_exceedance: &[f64],
    event_exceedance: &[f64],
    total: f64,
) -> CumulativeUpdate {
    let n = prior_non_exceedance.len();
    debug_assert_eq!(n, event_exceedance.len());

    let mut poe = vec![1.0; n];
    for k in 1..n {
        let pone = prior_non_exceedance[k] * (1.0 - event_exceedance[k].clamp(0.0, 1.0));
        poe[k] = 1.0 - pone;
    }
    let clamped = enforce_monotonic(&mut poe);
    if clamped > 0 {
        debug!("Clamped {clamped} cumulative exceedance value(s) to keep severity order");
    }

    let non_exceedance = poe.iter().map(|p| 1.0 - p).collect();
    CumulativeUpdate {
        masses: masses_from_exceedance(&poe, total),
        non_exceedance,
        clamped,
    }
}

/// Uses the reported masses as the new distribution, rescaled to the asset total.
pub fn replace_state_dependent(reported: &[f64], total: f64) -> CumulativeUpdate {
    let mut masses = reported.to_vec();
    let clamped = clamp_negative_masses(&mut masses, total);
    let non_exceedance = exceedance_from_masses(&masses, total)
        .into_iter()
        .map(|p| 1.0 - p)
        .collect();
    CumulativeUpdate {
        masses,
        non_exceedance,
        clamped,
    }
}

/// Zeroes negative masses and rescales the remaining ones so they sum to `total`.
///
/// Returns the number of entries that were negative.
pub fn clamp_negative_masses(masses: &mut [f64], total: f64) -> usize {
    let mut clamped = 0;
    for m in masses.iter_mut() {
        if *m < 0.0 {
            *m = 0.0;
            clamped += 1;
        }
    }
    let sum: f64 = masses.iter().sum();
    if sum > MASS_EPS {
        let scale = total / sum;
        if (scale - 1.0).abs() > f64::EPSILON {
            masses.iter_mut().for_each(|m| *m *= scale);
        }
    } else if let Some(first) = masses.first_mut() {
        // Nothing left to scale: the whole mass goes back to the floor state.
        *first = total;
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-9, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn test_hundred_buildings_two_events() {
        let total = 100.0;
        let event = [1.0, 0.3, 0.1];

        let first = accumulate_state_independent(&[0.0, 1.0, 1.0], &event, total);
        assert_close(&first.masses, &[70.0, 20.0, 10.0]);

        let second = accumulate_state_independent(&first.non_exceedance, &event, total);
        assert_close(&second.masses, &[49.0, 32.0, 19.0]);
        assert_close(&second.non_exceedance, &[0.0, 0.49, 0.81]);
        assert!((second.masses.iter().sum::<f64>() - total).abs() < 1e-9);
        assert_eq!(second.clamped, 0);
    }

    #[test]
    fn test_exceedance_never_increases_with_severity() {
        // Severity order violated by the event itself.
        let update =
            accumulate_state_independent(&[0.0, 1.0, 1.0, 1.0], &[1.0, 0.2, 0.4, 0.1], 1.0);
        assert!(update.clamped > 0);
        let poe: Vec<f64> = update.non_exceedance.iter().map(|p| 1.0 - p).collect();
        for k in 1..poe.len() {
            assert!(poe[k] <= poe[k - 1] + 1e-12);
        }
        assert!(update.masses.iter().all(|m| *m >= 0.0));
        assert!((update.masses.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_exceedance_never_decreases_across_events() {
        let mut pone = vec![0.0, 1.0, 1.0];
        let mut last = exceedance_from_masses(&[1.0, 0.0, 0.0], 1.0);
        for event in [[1.0, 0.1, 0.0], [1.0, 0.05, 0.02], [1.0, 0.4, 0.3]] {
            let update = accumulate_state_independent(&pone, &event, 1.0);
            let poe = exceedance_from_masses(&update.masses, 1.0);
            for k in 0..poe.len() {
                assert!(poe[k] + 1e-12 >= last[k]);
            }
            pone = update.non_exceedance;
            last = poe;
        }
    }

    #[test]
    fn test_replacement_is_idempotent() {
        let reported = [0.2, 0.5, 0.3];
        let a = replace_state_dependent(&reported, 1.0);
        let b = replace_state_dependent(&a.masses, 1.0);
        assert_close(&a.masses, &reported);
        assert_eq!(a, b);
    }

    #[test]
    fn test_negative_mass_is_redistributed() {
        let mut masses = [-1e-12, 60.0, 40.0 + 1e-12];
        let clamped = clamp_negative_masses(&mut masses, 100.0);
        assert_eq!(clamped, 1);
        assert_eq!(masses[0], 0.0);
        assert!((masses.iter().sum::<f64>() - 100.0).abs() < 1e-9);
        assert!((masses[1] / masses[2] - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_exceedance_round_trip() {
        let masses = [3.0, 2.0, 5.0];
        let poe = exceedance_from_masses(&masses, 10.0);
        assert_close(&poe, &[1.0, 0.7, 0.5]);
        assert_close(&masses_from_exceedance(&poe, 10.0), &masses);
    }
}
