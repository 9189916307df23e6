//! Engine that serves precomputed damage results.
//!
//! Results are read from JSON files, one per batch (`rla.json`, `<forecast id>.json`), each
//! mapping event ids to a [`ReplayRecord`]. Probabilities are looked up for every snapshot
//! row by original asset id, then by damage-tagged building class, then by building class.
//! Rows without an entry are not reported and keep their current damage state. An event
//! without a stored result is a failure.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::damage::{DamageScale, DamageState};
use crate::engine::{DamageRow, DamageTable, EngineOutcome, EngineRequest, HazardEngine};
use crate::exposure::SnapshotRow;
use crate::io::read_json;

/// Damage probabilities per damage state label.
pub type Distribution = BTreeMap<String, f64>;

/// Stored result of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplayRecord {
    Damage {
        probabilities: BTreeMap<String, Distribution>,
    },
    BeyondMaximumDistance,
    NegligibleGroundMotion,
    NoDamageOutput,
    Failed {
        message: String,
    },
}

pub struct ReplayEngine {
    scale: Arc<DamageScale>,
    /// Batch, then event id.
    records: BTreeMap<String, BTreeMap<String, ReplayRecord>>,
}

impl ReplayEngine {
    pub fn new(scale: Arc<DamageScale>) -> Self {
        Self {
            scale,
            records: BTreeMap::new(),
        }
    }

    /// Loads every `*.json` file of `dir`; the file stem names the batch.
    pub fn from_dir(scale: Arc<DamageScale>, dir: &Path) -> Result<Self> {
        let mut engine = Self::new(scale);
        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to list damage results in: {}", dir.display()))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("Failed to list damage results in: {}", dir.display()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(batch) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let records: BTreeMap<String, ReplayRecord> = read_json(&path)?;
            debug!("Loaded {} damage result(s) for batch '{batch}'", records.len());
            engine.insert_batch(batch, records)?;
        }
        info!(
            "Replay engine holds {} batch(es) from {}",
            engine.records.len(),
            dir.display()
        );
        Ok(engine)
    }

    pub fn insert_batch(
        &mut self,
        batch: &str,
        records: BTreeMap<String, ReplayRecord>,
    ) -> Result<()> {
        for (event_id, record) in &records {
            if let ReplayRecord::Damage { probabilities } = record {
                for (key, dist) in probabilities {
                    self.check_distribution(event_id, key, dist)?;
                }
            }
        }
        self.records.entry(batch.to_string()).or_default().extend(records);
        Ok(())
    }

    fn check_distribution(&self, event_id: &str, key: &str, dist: &Distribution) -> Result<()> {
        let mut sum = 0.0;
        for (label, p) in dist {
            self.scale.require(label).with_context(|| {
                format!("Damage results of event '{event_id}' for '{key}'")
            })?;
            if !(p.is_finite() && *p >= 0.0) {
                bail!(
                    "Damage results of event '{event_id}' for '{key}' contain invalid \
                     probabilities"
                );
            }
            sum += p;
        }
        if (sum - 1.0).abs() > 1e-3 {
            bail!("Damage results of event '{event_id}' for '{key}' sum to {sum}, not 1");
        }
        Ok(())
    }

    fn lookup<'a>(
        &self,
        probabilities: &'a BTreeMap<String, Distribution>,
        row: &SnapshotRow,
    ) -> Option<&'a Distribution> {
        let class = row
            .taxonomy
            .rsplit_once('/')
            .map(|(class, _)| class)
            .unwrap_or(&row.taxonomy);
        probabilities
            .get(row.original_asset_id.as_str())
            .or_else(|| probabilities.get(&row.taxonomy))
            .or_else(|| probabilities.get(class))
    }

    fn damage_table(
        &self,
        probabilities: &BTreeMap<String, Distribution>,
        request: &EngineRequest<'_>,
    ) -> Result<DamageTable> {
        let mut rows = Vec::new();
        for row in request.snapshot.rows() {
            let Some(dist) = self.lookup(probabilities, row) else {
                continue;
            };
            for (label, p) in dist {
                let damage_state: DamageState = self.scale.require(label)?;
                rows.push(DamageRow {
                    asset_id: row.asset_id.clone(),
                    damage_state,
                    value: p * row.number,
                });
            }
        }
        DamageTable::from_rows(self.scale.len(), rows)
    }
}

impl HazardEngine for ReplayEngine {
    fn name(&self) -> &str {
        "replay"
    }

    fn compute_damage(&self, request: &EngineRequest<'_>) -> EngineOutcome {
        let event_id = request.event.event_id.as_str();
        let record = self
            .records
            .get(request.batch)
            .and_then(|batch| batch.get(event_id));
        match record {
            None => EngineOutcome::Failed(anyhow!(
                "No damage results for event '{event_id}' in batch '{}'",
                request.batch
            )),
            Some(ReplayRecord::BeyondMaximumDistance) => EngineOutcome::BeyondMaximumDistance,
            Some(ReplayRecord::NegligibleGroundMotion) => EngineOutcome::NegligibleGroundMotion,
            Some(ReplayRecord::NoDamageOutput) => EngineOutcome::NoDamageOutput,
            Some(ReplayRecord::Failed { message }) => {
                EngineOutcome::Failed(anyhow!("{message}"))
            }
            Some(ReplayRecord::Damage { probabilities }) => {
                match self.damage_table(probabilities, request) {
                    Ok(table) if table.is_empty() => EngineOutcome::NoDamageOutput,
                    Ok(table) => EngineOutcome::Damage(table),
                    Err(err) => EngineOutcome::Failed(err),
                }
            }
        }
    }
}
