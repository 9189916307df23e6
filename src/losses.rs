//! Economic and human consequences of damage.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::damage::{DamageScale, DamageState};
use crate::damage::cumulative::MASS_EPS;
use crate::exposure::{ExposureLedger, LedgerUpdate};
use crate::uid::{BuildingId, OriginalAssetId};

/// Ratio tables keyed by building class, then damage state label.
pub type RatioTable = BTreeMap<String, BTreeMap<String, f64>>;

/// Consequence models as configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsequenceTables {
    /// Mean economic loss ratio (fraction of replacement cost).
    pub economic: RatioTable,
    /// Mean ratio of occupants injured, keyed by injury severity first.
    pub injuries: BTreeMap<String, RatioTable>,
}

/// Consequence models resolved against the damage scale.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsequenceModels {
    economic: BTreeMap<String, Vec<f64>>,
    /// Per severity (same order as `severities`), per building class.
    injuries: Vec<BTreeMap<String, Vec<f64>>>,
    severities: Vec<String>,
}

fn resolve_table(
    what: &str,
    table: &RatioTable,
    scale: &DamageScale,
) -> Result<BTreeMap<String, Vec<f64>>> {
    table
        .iter()
        .map(|(class, row)| {
            let dense = scale.dense(&format!("{what} of building class '{class}'"), row)?;
            if dense.iter().any(|r| !(0.0..=1.0).contains(r)) {
                bail!("{what} of building class '{class}' must lie in [0, 1]");
            }
            Ok((class.clone(), dense))
        })
        .collect()
}

impl ConsequenceModels {
    pub fn new(tables: &ConsequenceTables, scale: &DamageScale) -> Result<Self> {
        if tables.injuries.is_empty() {
            bail!("The injuries consequence model defines no injury severity");
        }
        let economic = resolve_table("Economic loss ratios", &tables.economic, scale)?;
        let mut severities = Vec::new();
        let mut injuries = Vec::new();
        for (severity, table) in &tables.injuries {
            severities.push(severity.clone());
            injuries.push(resolve_table(
                &format!("Injury ratios (severity {severity})"),
                table,
                scale,
            )?);
        }
        Ok(Self {
            economic,
            injuries,
            severities,
        })
    }

    pub fn severities(&self) -> &[String] {
        &self.severities
    }

    /// Fails if any building class lacks an economic or injury model.
    pub fn check_coverage<'a, I>(&self, classes: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for class in classes {
            if !self.economic.contains_key(class) {
                bail!("Building class '{class}' is missing from the economic consequence model");
            }
            for (severity, table) in self.severities.iter().zip(&self.injuries) {
                if !table.contains_key(class) {
                    bail!(
                        "Building class '{class}' is missing from the injuries consequence \
                         model of severity '{severity}'"
                    );
                }
            }
        }
        Ok(())
    }

    pub fn loss_ratio(&self, class: &str, ds: DamageState) -> Result<f64> {
        self.economic
            .get(class)
            .map(|r| r[ds.index()])
            .with_context(|| format!("No economic loss ratios for building class '{class}'"))
    }

    pub fn injury_ratio(&self, severity: usize, class: &str, ds: DamageState) -> Result<f64> {
        self.injuries[severity]
            .get(class)
            .map(|r| r[ds.index()])
            .with_context(|| {
                format!(
                    "No injury ratios of severity '{}' for building class '{class}'",
                    self.severities[severity]
                )
            })
    }

    /// Expected economic loss per building for the current damage distribution.
    pub fn economic_losses(&self, ledger: &ExposureLedger) -> Result<BTreeMap<BuildingId, f64>> {
        let mut out = BTreeMap::new();
        for (asset, masses) in ledger.distributions() {
            let mut loss = 0.0;
            for (k, &mass) in masses.iter().enumerate() {
                if mass <= MASS_EPS {
                    continue;
                }
                let ratio = self.loss_ratio(&asset.building_class, DamageState::new(k))?;
                loss += asset.structural * asset.share(mass) * ratio;
            }
            *out.entry(asset.building_id.clone()).or_insert(0.0) += loss;
        }
        Ok(out)
    }

    /// Casualties caused by one event, from the people present when it struck.
    pub fn casualties(&self, update: &LedgerUpdate, ledger: &ExposureLedger) -> Result<Casualties> {
        let n = self.severities.len();
        let mut out = Casualties::new(n);
        for change in &update.assets {
            let Some(asset) = ledger.asset(&change.id) else {
                bail!("Original asset '{}' is not in the exposure model", change.id);
            };
            let mut per_severity = vec![0.0; n];
            for (k, &people) in change.occupants.iter().enumerate() {
                if people <= 0.0 {
                    continue;
                }
                for (s, total) in per_severity.iter_mut().enumerate() {
                    let ratio =
                        self.injury_ratio(s, &asset.building_class, DamageState::new(k))?;
                    *total += people * ratio;
                }
            }
            out.add_asset(&change.id, &change.building_id, &per_severity);
        }
        Ok(out)
    }
}

/// People injured, per severity (in the order of [`ConsequenceModels::severities`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Casualties {
    pub per_asset: BTreeMap<OriginalAssetId, Vec<f64>>,
    pub per_building: BTreeMap<BuildingId, Vec<f64>>,
    #[serde(skip)]
    n_severities: usize,
}

impl Casualties {
    pub fn new(n_severities: usize) -> Self {
        Self {
            per_asset: BTreeMap::new(),
            per_building: BTreeMap::new(),
            n_severities,
        }
    }

    fn add_asset(&mut self, asset: &OriginalAssetId, building: &BuildingId, values: &[f64]) {
        let n = self.n_severities;
        for (acc, v) in self
            .per_asset
            .entry(asset.clone())
            .or_insert_with(|| vec![0.0; n])
            .iter_mut()
            .zip(values)
        {
            *acc += v;
        }
        for (acc, v) in self
            .per_building
            .entry(building.clone())
            .or_insert_with(|| vec![0.0; n])
            .iter_mut()
            .zip(values)
        {
            *acc += v;
        }
    }

    /// Adds `other`, scaled by `weight`.
    pub fn accumulate(&mut self, other: &Casualties, weight: f64) {
        let n = self.n_severities.max(other.n_severities);
        self.n_severities = n;
        for (id, values) in &other.per_asset {
            let acc = self.per_asset.entry(id.clone()).or_insert_with(|| vec![0.0; n]);
            for (a, v) in acc.iter_mut().zip(values) {
                *a += v * weight;
            }
        }
        for (id, values) in &other.per_building {
            let acc = self.per_building.entry(id.clone()).or_insert_with(|| vec![0.0; n]);
            for (a, v) in acc.iter_mut().zip(values) {
                *a += v * weight;
            }
        }
    }

    pub fn total(&self, severity: usize) -> f64 {
        self.per_building.values().map(|v| v[severity]).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.per_building.is_empty()
    }
}
