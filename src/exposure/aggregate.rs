use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::damage::DamageScale;
use crate::exposure::{ExposureLedger, OriginalAsset};
use crate::uid::{BuildingId, OriginalAssetId};

/// Running weighted sum of the terminal ledgers of stochastic realizations.
///
/// Addition is plain summation, so the result does not depend on merge order.
#[derive(Debug, Clone, Default)]
pub struct RealizationAverage {
    scale: Option<Arc<DamageScale>>,
    sums: BTreeMap<OriginalAssetId, (Arc<OriginalAsset>, Vec<f64>)>,
    weight: f64,
    count: usize,
}

impl RealizationAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, ledger: &ExposureLedger, weight: f64) -> Result<()> {
        if !(weight.is_finite() && weight > 0.0) {
            bail!("Invalid realization weight {weight}");
        }
        match &self.scale {
            Some(scale) => ledger.check_compatible(scale)?,
            None => self.scale = Some(ledger.shared_scale()),
        }
        if self.count > 0 && self.sums.len() != ledger.len() {
            bail!("Realization ledgers hold different sets of original assets");
        }
        for (asset, masses) in ledger.shared_distributions() {
            let (_, acc) = self
                .sums
                .entry(asset.id.clone())
                .or_insert_with(|| (Arc::clone(asset), vec![0.0; masses.len()]));
            for (a, m) in acc.iter_mut().zip(masses) {
                *a += m * weight;
            }
        }
        self.weight += weight;
        self.count += 1;
        Ok(())
    }

    /// Number of realizations merged so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Averaged mass of one original asset.
    pub fn masses(&self, id: &OriginalAssetId) -> Option<&[f64]> {
        self.sums.get(id).map(|(_, m)| m.as_slice())
    }

    pub fn damage_by_building(&self) -> BTreeMap<BuildingId, Vec<f64>> {
        let mut out: BTreeMap<BuildingId, Vec<f64>> = BTreeMap::new();
        for (asset, masses) in self.sums.values() {
            let acc = out
                .entry(asset.building_id.clone())
                .or_insert_with(|| vec![0.0; masses.len()]);
            for (a, m) in acc.iter_mut().zip(masses) {
                *a += m;
            }
        }
        out
    }

    /// Expected ledger. Weights must add up to one.
    pub fn to_ledger(&self) -> Result<ExposureLedger> {
        let Some(scale) = &self.scale else {
            bail!("No realization has been merged");
        };
        if (self.weight - 1.0).abs() > 1e-9 {
            bail!(
                "Realization weights add up to {} after {} realization(s), expected 1",
                self.weight,
                self.count
            );
        }
        let distributions = self
            .sums
            .values()
            .map(|(asset, masses)| (Arc::clone(asset), masses.clone()))
            .collect();
        Ok(ExposureLedger::from_distributions(
            Arc::clone(scale),
            distributions,
        ))
    }
}
