//! Damage ledger: the current damage-state distribution of every original asset.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{debug, warn};

use crate::damage::cumulative::{
    MASS_EPS, accumulate_state_independent, clamp_negative_masses, exceedance_from_masses,
    replace_state_dependent,
};
use crate::damage::{DamageScale, DamageState, FragilityRegime};
use crate::engine::DamageTable;
use crate::exposure::{
    BuildingTotals, ExposureSnapshot, OriginalAsset, RealizationAverage, SnapshotRow,
};
use crate::uid::{BuildingId, OriginalAssetId, TransientAssetId};

/// Mass conservation tolerance, relative to the asset total.
const CONSERVATION_TOL: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
struct LedgerEntry {
    asset: Arc<OriginalAsset>,
    masses: Vec<f64>,
    non_exceedance: Vec<f64>,
}

impl LedgerEntry {
    fn undamaged(asset: Arc<OriginalAsset>, n_states: usize) -> Self {
        let mut masses = vec![0.0; n_states];
        masses[0] = asset.number;
        let mut non_exceedance = vec![1.0; n_states];
        non_exceedance[0] = 0.0;
        Self {
            asset,
            masses,
            non_exceedance,
        }
    }

    fn set_masses(&mut self, masses: Vec<f64>) {
        self.non_exceedance = exceedance_from_masses(&masses, self.asset.number)
            .into_iter()
            .map(|p| 1.0 - p)
            .collect();
        self.masses = masses;
    }
}

/// Change of one original asset caused by one event.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetUpdate {
    pub id: OriginalAssetId,
    pub building_id: BuildingId,
    pub previous: Vec<f64>,
    pub masses: Vec<f64>,
    /// Occupants present at event time, by post-event damage state.
    pub occupants: Vec<f64>,
}

impl AssetUpdate {
    /// Damage states above the floor that gained mass.
    pub fn increased_states(&self) -> impl Iterator<Item = DamageState> + '_ {
        (1..self.masses.len())
            .filter(|&k| self.masses[k] > self.previous[k] + MASS_EPS)
            .map(DamageState::new)
    }
}

/// Outcome of applying one event to the ledger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerUpdate {
    pub assets: Vec<AssetUpdate>,
    /// Number of values clamped to keep distributions consistent.
    pub clamped: usize,
}

impl LedgerUpdate {
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn get(&self, id: &OriginalAssetId) -> Option<&AssetUpdate> {
        self.assets.iter().find(|a| &a.id == id)
    }
}

/// Per original asset distribution of mass over damage states.
///
/// Owned by the caller and threaded through every event. Forking is a plain clone.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureLedger {
    scale: Arc<DamageScale>,
    entries: BTreeMap<OriginalAssetId, LedgerEntry>,
}

impl ExposureLedger {
    /// Creates an undamaged ledger.
    pub fn new(scale: Arc<DamageScale>, assets: Vec<OriginalAsset>) -> Result<Self> {
        if assets.is_empty() {
            bail!("The exposure model contains no assets");
        }
        let mut entries = BTreeMap::new();
        for asset in assets {
            asset.validate()?;
            let id = asset.id.clone();
            let entry = LedgerEntry::undamaged(Arc::new(asset), scale.len());
            if entries.insert(id.clone(), entry).is_some() {
                bail!("Original asset '{id}' appears more than once in the exposure model");
            }
        }
        Ok(Self { scale, entries })
    }

    /// Rebuilds a ledger from explicit distributions (used for averaged realizations).
    pub(crate) fn from_distributions(
        scale: Arc<DamageScale>,
        distributions: Vec<(Arc<OriginalAsset>, Vec<f64>)>,
    ) -> Self {
        let entries = distributions
            .into_iter()
            .map(|(asset, masses)| {
                let mut entry = LedgerEntry::undamaged(asset, scale.len());
                entry.set_masses(masses);
                (entry.asset.id.clone(), entry)
            })
            .collect();
        Self { scale, entries }
    }

    pub fn scale(&self) -> &DamageScale {
        &self.scale
    }

    pub fn shared_scale(&self) -> Arc<DamageScale> {
        Arc::clone(&self.scale)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn asset(&self, id: &OriginalAssetId) -> Option<&OriginalAsset> {
        self.entries.get(id).map(|e| e.asset.as_ref())
    }

    pub fn assets(&self) -> impl Iterator<Item = &OriginalAsset> {
        self.entries.values().map(|e| e.asset.as_ref())
    }

    pub fn masses(&self, id: &OriginalAssetId) -> Option<&[f64]> {
        self.entries.get(id).map(|e| e.masses.as_slice())
    }

    /// `(asset, masses)` for every original asset, ordered by asset id.
    pub fn distributions(&self) -> impl Iterator<Item = (&OriginalAsset, &[f64])> {
        self.entries
            .values()
            .map(|e| (e.asset.as_ref(), e.masses.as_slice()))
    }

    pub(crate) fn shared_distributions(
        &self,
    ) -> impl Iterator<Item = (&Arc<OriginalAsset>, &[f64])> {
        self.entries.values().map(|e| (&e.asset, e.masses.as_slice()))
    }

    /// Distinct asset locations.
    pub fn sites(&self) -> Vec<(f64, f64)> {
        let mut sites: Vec<(f64, f64)> = self.assets().map(|a| (a.lon, a.lat)).collect();
        sites.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        sites.dedup();
        sites
    }

    pub fn building_assets(&self, building_id: &BuildingId) -> Vec<&OriginalAssetId> {
        self.entries
            .iter()
            .filter(|(_, e)| &e.asset.building_id == building_id)
            .map(|(id, _)| id)
            .collect()
    }

    /// Damage-state distribution per building (sum over its original assets).
    pub fn damage_by_building(&self) -> BTreeMap<BuildingId, Vec<f64>> {
        let mut out: BTreeMap<BuildingId, Vec<f64>> = BTreeMap::new();
        for e in self.entries.values() {
            let acc = out
                .entry(e.asset.building_id.clone())
                .or_insert_with(|| vec![0.0; self.scale.len()]);
            for (a, m) in acc.iter_mut().zip(&e.masses) {
                if *m > MASS_EPS {
                    *a += m;
                }
            }
        }
        out
    }

    /// Replacement cost and census occupants per building.
    pub fn building_totals(&self) -> BTreeMap<BuildingId, BuildingTotals> {
        let mut out: BTreeMap<BuildingId, BuildingTotals> = BTreeMap::new();
        for e in self.entries.values() {
            let totals = out.entry(e.asset.building_id.clone()).or_default();
            totals.structural += e.asset.structural;
            totals.census += e.asset.census;
        }
        out
    }

    /// Largest relative deviation of any asset's mass sum from its total.
    pub fn max_mass_error(&self) -> f64 {
        self.entries
            .values()
            .map(|e| (e.masses.iter().sum::<f64>() - e.asset.number).abs() / e.asset.number)
            .fold(0.0, f64::max)
    }

    /// Builds the flat exposure table for one engine call.
    ///
    /// `occupants` receives the asset, the row's damage state and its mass and returns the
    /// number of people present in that row. Rows with negligible mass are omitted.
    pub fn snapshot<F>(&self, mut occupants: F) -> ExposureSnapshot
    where
        F: FnMut(&OriginalAsset, DamageState, f64) -> f64,
    {
        let mut rows = Vec::new();
        for e in self.entries.values() {
            let a = e.asset.as_ref();
            for (k, &mass) in e.masses.iter().enumerate() {
                if mass <= MASS_EPS {
                    continue;
                }
                let ds = DamageState::new(k);
                rows.push(SnapshotRow {
                    asset_id: TransientAssetId::nth(rows.len() + 1),
                    original_asset_id: a.id.clone(),
                    building_id: a.building_id.clone(),
                    taxonomy: self.scale.tag(&a.building_class, ds),
                    damage_state: ds,
                    number: mass,
                    structural: a.structural * a.share(mass),
                    occupants: occupants(a, ds, mass),
                    lon: a.lon,
                    lat: a.lat,
                    occupancy: a.occupancy.clone(),
                });
            }
        }
        ExposureSnapshot::from_rows(rows)
    }

    /// Combines the engine's per-row results with the current distributions.
    ///
    /// Only original assets with at least one reported row change. Rows the engine did not
    /// report keep their mass in their current damage state.
    pub fn apply_event_result(
        &mut self,
        snapshot: &ExposureSnapshot,
        table: &DamageTable,
        regime: FragilityRegime,
    ) -> Result<LedgerUpdate> {
        if table.n_states() != self.scale.len() {
            bail!(
                "Damage results carry {} damage states, the damage scale has {}",
                table.n_states(),
                self.scale.len()
            );
        }

        let mut reported: BTreeMap<&OriginalAssetId, Vec<(&SnapshotRow, &[f64])>> =
            BTreeMap::new();
        for (asset_id, values) in table.iter() {
            let Some(row) = snapshot.get(asset_id) else {
                bail!("Damage results refer to unknown asset '{asset_id}'");
            };
            if !self.entries.contains_key(&row.original_asset_id) {
                bail!(
                    "Damage results refer to original asset '{}', which is not in the exposure \
                     model",
                    row.original_asset_id
                );
            }
            reported
                .entry(&row.original_asset_id)
                .or_default()
                .push((row, values));
        }

        let mut update = LedgerUpdate::default();
        for (original, rows) in reported {
            let n = self.scale.len();
            let reported_ids: HashSet<&TransientAssetId> =
                rows.iter().map(|(r, _)| &r.asset_id).collect();
            let Some(entry) = self.entries.get_mut(original) else {
                continue;
            };
            let total = entry.asset.number;

            let mut occupants = vec![0.0; n];
            for row in snapshot.rows_for(original) {
                if !reported_ids.contains(&row.asset_id) {
                    occupants[row.damage_state.index()] += row.occupants;
                }
            }

            let result = match regime {
                FragilityRegime::StateDependent => {
                    let mut next = entry.masses.clone();
                    for (row, values) in &rows {
                        let sum: f64 = values.iter().sum();
                        next[row.damage_state.index()] -= row.number;
                        if sum <= MASS_EPS {
                            // Nothing reported for this row: it stays where it was.
                            next[row.damage_state.index()] += row.number;
                            occupants[row.damage_state.index()] += row.occupants;
                            continue;
                        }
                        for k in 0..n {
                            next[k] += values[k] * row.number / sum;
                            occupants[k] += row.occupants * values[k] / sum;
                        }
                    }
                    replace_state_dependent(&next, total)
                }
                FragilityRegime::StateIndependent => {
                    let mut tail = vec![0.0; n];
                    let mut weight = 0.0;
                    let mut present = 0.0;
                    for (row, values) in &rows {
                        let sum: f64 = values.iter().sum();
                        if sum <= MASS_EPS {
                            continue;
                        }
                        let mut acc = 0.0;
                        for k in (0..n).rev() {
                            acc += values[k];
                            tail[k] += acc * row.number / sum;
                        }
                        weight += row.number;
                        present += row.occupants;
                    }
                    if weight <= MASS_EPS {
                        continue;
                    }
                    let poe: Vec<f64> = tail.iter().map(|t| t / weight).collect();
                    let mut result =
                        accumulate_state_independent(&entry.non_exceedance, &poe, total);
                    result.clamped += clamp_negative_masses(&mut result.masses, total);
                    for k in 0..n {
                        occupants[k] += present * result.masses[k] / total;
                    }
                    result
                }
            };

            if result.clamped > 0 {
                debug!(
                    "Clamped {} value(s) while updating original asset '{original}'",
                    result.clamped
                );
                update.clamped += result.clamped;
            }
            let error = (result.masses.iter().sum::<f64>() - total).abs() / total;
            if error > CONSERVATION_TOL {
                bail!(
                    "Damage update for original asset '{original}' does not conserve its mass \
                     ({} vs {total})",
                    result.masses.iter().sum::<f64>()
                );
            }

            let previous = std::mem::replace(&mut entry.masses, result.masses);
            entry.non_exceedance = result.non_exceedance;
            update.assets.push(AssetUpdate {
                id: original.clone(),
                building_id: entry.asset.building_id.clone(),
                previous,
                masses: entry.masses.clone(),
                occupants,
            });
        }
        if update.clamped > 0 {
            warn!("Clamped {} damage value(s) while applying event results", update.clamped);
        }
        Ok(update)
    }

    /// Replaces the distribution of every original asset of `building_id`.
    ///
    /// `distribution` holds one probability per damage state. The engine result for the
    /// building, if any, is discarded by the caller; `snapshot` is only used to carry the
    /// people present at event time over to the new damage states.
    pub fn override_with_external_assessment(
        &mut self,
        building_id: &BuildingId,
        event_id: &str,
        distribution: &[f64],
        snapshot: &ExposureSnapshot,
    ) -> Result<LedgerUpdate> {
        if distribution.len() != self.scale.len() {
            bail!(
                "External assessment of building '{building_id}' for event '{event_id}' has {} \
                 damage states, the damage scale has {}",
                distribution.len(),
                self.scale.len()
            );
        }
        if distribution.iter().any(|p| !p.is_finite() || *p < 0.0) {
            bail!(
                "External assessment of building '{building_id}' for event '{event_id}' \
                 contains invalid probabilities"
            );
        }
        let sum: f64 = distribution.iter().sum();
        if (sum - 1.0).abs() > 1e-3 {
            bail!(
                "External assessment of building '{building_id}' for event '{event_id}' sums \
                 to {sum}, not 1"
            );
        }

        let ids: Vec<OriginalAssetId> = self
            .building_assets(building_id)
            .into_iter()
            .cloned()
            .collect();
        if ids.is_empty() {
            bail!(
                "External assessment for event '{event_id}' refers to building \
                 '{building_id}', which is not in the exposure model"
            );
        }

        let mut update = LedgerUpdate::default();
        for id in ids {
            let present: f64 = snapshot.rows_for(&id).map(|r| r.occupants).sum();
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            let total = entry.asset.number;
            let masses: Vec<f64> = distribution.iter().map(|p| total * p / sum).collect();
            let previous = entry.masses.clone();
            entry.set_masses(masses);
            update.assets.push(AssetUpdate {
                id,
                building_id: building_id.clone(),
                previous,
                masses: entry.masses.clone(),
                occupants: distribution.iter().map(|p| present * p / sum).collect(),
            });
        }
        debug!("Applied external assessment of building '{building_id}' for event '{event_id}'");
        Ok(update)
    }

    /// Independent copy for one stochastic realization.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Adds this ledger's distributions, scaled by `weight`, to a running average.
    pub fn merge_as_realization(
        &self,
        average: &mut RealizationAverage,
        weight: f64,
    ) -> Result<()> {
        average.add(self, weight)
    }

    pub(crate) fn check_compatible(&self, other_scale: &DamageScale) -> Result<()> {
        if self.scale.as_ref() != other_scale {
            bail!("Ledgers built on different damage scales cannot be combined");
        }
        Ok(())
    }
}
