//! Run configuration.

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::damage::{DamageScale, FragilityRegime};
use crate::io::read_json;
use crate::occupancy::{RecoveryTables, TimeOfDayFactors};
use crate::rupture::StochasticRuptureConfig;

pub const DEFAULT_NEGATIVE_TOLERANCE: f64 = 1e-4;

/// Forecast (OELF) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OelfConfig {
    /// Assume every SES id in `ses_range` exists, even if absent from the catalogue.
    pub continuous_ses_numbering: bool,
    /// Inclusive SES id range, required with continuous numbering.
    pub ses_range: Option<(u32, u32)>,
    /// Earthquakes below this magnitude are not run.
    pub min_magnitude: f64,
    /// Earthquakes farther than this from every exposure site are not run (km).
    pub max_distance_km: f64,
    /// Realizations run concurrently on this many threads (0 = one per core).
    pub workers: usize,
    /// Seed of the stochastic rupture generator.
    pub rupture_seed: u64,
}

impl OelfConfig {
    pub fn new() -> Self {
        Self {
            continuous_ses_numbering: false,
            ses_range: None,
            min_magnitude: 3.5,
            max_distance_km: 200.0,
            workers: 0,
            rupture_seed: 42,
        }
    }

    /// SES range to enumerate, if numbering is continuous.
    pub fn continuous_range(&self) -> Option<(u32, u32)> {
        if self.continuous_ses_numbering {
            self.ses_range
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(3.0..=10.0).contains(&self.min_magnitude) {
            bail!(
                "oelf.min_magnitude must lie in [3, 10], got {}",
                self.min_magnitude
            );
        }
        if !(0.0..=1000.0).contains(&self.max_distance_km) {
            bail!(
                "oelf.max_distance_km must lie in [0, 1000], got {}",
                self.max_distance_km
            );
        }
        match (self.continuous_ses_numbering, self.ses_range) {
            (true, None) => bail!("oelf.ses_range is required with continuous SES numbering"),
            (_, Some((first, last))) if first > last => {
                bail!("oelf.ses_range is not ordered: ({first}, {last})")
            }
            _ => Ok(()),
        }
    }
}

impl Default for OelfConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything that parameterizes one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub description: String,
    /// Damage state labels, least severe first.
    pub damage_states: DamageScale,
    pub fragility_regime: FragilityRegime,
    /// Fragility model reference handed to the engine.
    pub fragility_model: String,
    /// Fixed local time offset, in hours east of UTC.
    #[serde(default)]
    pub utc_offset_hours: f64,
    pub time_of_day_occupancy: TimeOfDayFactors,
    pub recovery: RecoveryTables,
    /// Largest negative engine value accepted (relative to the row total).
    #[serde(default = "default_negative_tolerance")]
    pub negative_tolerance: f64,
    /// Keep per-event snapshots and raw engine output.
    #[serde(default)]
    pub keep_intermediate: bool,
    #[serde(default)]
    pub oelf: OelfConfig,
    #[serde(default)]
    pub rupture_generator: StochasticRuptureConfig,
}

fn default_negative_tolerance() -> f64 {
    DEFAULT_NEGATIVE_TOLERANCE
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: RunConfig = read_json(path)?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration: {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.utc_offset()?;
        if !(self.negative_tolerance.is_finite() && self.negative_tolerance >= 0.0) {
            bail!(
                "negative_tolerance must be non-negative, got {}",
                self.negative_tolerance
            );
        }
        if self.fragility_model.is_empty() {
            bail!("fragility_model must not be empty");
        }
        self.time_of_day_occupancy.validate()?;
        self.oelf.validate()?;
        self.rupture_generator.validate()?;
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        let seconds = (self.utc_offset_hours * 3600.0).round();
        if !(-12.0 * 3600.0..=14.0 * 3600.0).contains(&seconds) {
            bail!(
                "utc_offset_hours must lie in [-12, 14], got {}",
                self.utc_offset_hours
            );
        }
        FixedOffset::east_opt(seconds as i32)
            .with_context(|| format!("Invalid UTC offset: {} hours", self.utc_offset_hours))
    }
}
