//! Contract with the external hazard/damage engine.
//!
//! The engine is opaque: it receives an exposure snapshot, a rupture and a fragility
//! reference and answers with a [`EngineOutcome`]. The three conditions that mean "no new
//! damage" are variants of the outcome, never errors.

pub mod replay;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::warn;

use crate::damage::DamageState;
use crate::exposure::ExposureSnapshot;
use crate::occupancy::TimeOfDay;
use crate::rupture::{Earthquake, Rupture};
use crate::uid::TransientAssetId;

pub use replay::ReplayEngine;

/// One line of the engine output.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageRow {
    pub asset_id: TransientAssetId,
    pub damage_state: DamageState,
    /// Probability (individual buildings) or building count (aggregates).
    pub value: f64,
}

/// Engine output grouped by snapshot row, one value per damage state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DamageTable {
    n_states: usize,
    rows: BTreeMap<TransientAssetId, Vec<f64>>,
}

impl DamageTable {
    pub fn from_rows<I>(n_states: usize, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = DamageRow>,
    {
        let mut table = Self {
            n_states,
            rows: BTreeMap::new(),
        };
        for row in rows {
            if row.damage_state.index() >= n_states {
                bail!(
                    "Damage results for asset '{}' use damage state {} beyond the scale",
                    row.asset_id,
                    row.damage_state.index()
                );
            }
            if !row.value.is_finite() {
                bail!("Damage results for asset '{}' are not finite", row.asset_id);
            }
            let values = table
                .rows
                .entry(row.asset_id)
                .or_insert_with(|| vec![0.0; n_states]);
            values[row.damage_state.index()] += row.value;
        }
        Ok(table)
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: &TransientAssetId) -> Option<&[f64]> {
        self.rows.get(id).map(|v| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TransientAssetId, &[f64])> {
        self.rows.iter().map(|(id, v)| (id, v.as_slice()))
    }

    /// Keeps only the rows for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&TransientAssetId) -> bool,
    {
        self.rows.retain(|id, _| keep(id));
    }

    /// Removes negative values left over by the engine's numerics.
    ///
    /// Negative entries are zeroed and the row is rescaled to its original total. A negative
    /// entry larger than `tolerance` (relative to the row total) is an error. Returns the
    /// number of corrected entries.
    pub fn sanitize(&mut self, tolerance: f64) -> Result<usize> {
        let mut corrected = 0;
        for (id, values) in self.rows.iter_mut() {
            let total: f64 = values.iter().sum();
            let worst = values.iter().copied().fold(0.0, f64::min);
            if worst >= 0.0 {
                continue;
            }
            let scale = total.abs().max(f64::MIN_POSITIVE);
            if -worst / scale > tolerance {
                bail!(
                    "Damage results for asset '{id}' contain a negative value ({worst}) beyond \
                     the tolerance of {tolerance}"
                );
            }
            let mut positive = 0.0;
            for v in values.iter_mut() {
                if *v < 0.0 {
                    *v = 0.0;
                    corrected += 1;
                } else {
                    positive += *v;
                }
            }
            if positive > 0.0 {
                values.iter_mut().for_each(|v| *v *= total / positive);
            }
        }
        if corrected > 0 {
            warn!("Corrected {corrected} negative damage value(s) in the engine output");
        }
        Ok(corrected)
    }
}

/// Everything the engine needs for one earthquake.
pub struct EngineRequest<'a> {
    /// `"rla"` or the forecast id the event belongs to.
    pub batch: &'a str,
    pub event: &'a Earthquake,
    pub rupture: &'a Rupture,
    pub snapshot: &'a ExposureSnapshot,
    /// Fragility model reference, passed through untouched.
    pub fragility: &'a str,
    pub time_of_day: TimeOfDay,
    /// Directory the engine may use exclusively for this call.
    pub scratch_dir: &'a Path,
}

/// What an engine call produced.
pub enum EngineOutcome {
    Damage(DamageTable),
    /// Every exposure site is beyond the maximum source-to-site distance.
    BeyondMaximumDistance,
    /// Ground motion is negligible everywhere.
    NegligibleGroundMotion,
    /// The engine finished without any damage output.
    NoDamageOutput,
    /// Any other failure. Fatal.
    Failed(anyhow::Error),
}

impl EngineOutcome {
    /// True for the conditions that mean "no additional damage".
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            Self::BeyondMaximumDistance | Self::NegligibleGroundMotion | Self::NoDamageOutput
        )
    }
}

impl fmt::Debug for EngineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Damage(table) => write!(f, "Damage({} rows)", table.len()),
            Self::BeyondMaximumDistance => f.write_str("BeyondMaximumDistance"),
            Self::NegligibleGroundMotion => f.write_str("NegligibleGroundMotion"),
            Self::NoDamageOutput => f.write_str("NoDamageOutput"),
            Self::Failed(err) => write!(f, "Failed({err:#})"),
        }
    }
}

/// External hazard/damage engine.
///
/// Implementations may be called from several realizations at once, each with its own
/// scratch directory.
pub trait HazardEngine: Send + Sync {
    fn name(&self) -> &str;

    fn compute_damage(&self, request: &EngineRequest<'_>) -> EngineOutcome;
}
