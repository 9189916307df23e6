//! Exposure model: undamaged assets, the damage ledger and its engine-facing snapshots.

pub mod aggregate;
pub mod ledger;
pub mod snapshot;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::uid::{BuildingId, OriginalAssetId};

pub use aggregate::RealizationAverage;
pub use ledger::{AssetUpdate, ExposureLedger, LedgerUpdate};
pub use snapshot::{ExposureSnapshot, SnapshotRow};

/// How the `number` of an asset is to be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingKind {
    /// One physical building; `number` is a probability weight of the building class.
    Individual,
    /// A group of co-located buildings; `number` is a building count.
    #[default]
    Aggregate,
}

/// One (building, building class) combination of the undamaged exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalAsset {
    pub id: OriginalAssetId,
    pub building_id: BuildingId,
    /// Building class without damage state, e.g. `"MUR/LWAL/H:2"`.
    pub building_class: String,
    #[serde(default)]
    pub kind: BuildingKind,
    pub lon: f64,
    pub lat: f64,
    /// Total mass: probability (individual) or building count (aggregate).
    pub number: f64,
    /// Replacement cost of the whole asset.
    pub structural: f64,
    /// Census occupants of the whole asset, regardless of time of day.
    pub census: f64,
    /// Occupancy class keying the time-of-day factors (e.g. `"Res"`).
    pub occupancy: String,
}

impl OriginalAsset {
    pub fn validate(&self) -> Result<()> {
        if !(self.number.is_finite() && self.number > 0.0) {
            bail!("Asset '{}' has a non-positive number of buildings", self.id);
        }
        if self.kind == BuildingKind::Individual && self.number > 1.0 + 1e-9 {
            bail!(
                "Asset '{}' belongs to an individual building but its probability {} exceeds 1",
                self.id,
                self.number
            );
        }
        if self.structural < 0.0 || self.census < 0.0 {
            bail!("Asset '{}' has a negative replacement cost or census", self.id);
        }
        if !(-180.0..=180.0).contains(&self.lon) || !(-90.0..=90.0).contains(&self.lat) {
            bail!("Asset '{}' has invalid coordinates ({}, {})", self.id, self.lon, self.lat);
        }
        Ok(())
    }

    /// Share of the asset carried by `mass` buildings.
    pub fn share(&self, mass: f64) -> f64 {
        mass / self.number
    }
}

/// Exposure of one building, summed over its original assets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BuildingTotals {
    pub structural: f64,
    pub census: f64,
}
