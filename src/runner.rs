//! Processing of a single earthquake against the ledger and the occupancy timeline.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::engine::{EngineOutcome, EngineRequest, HazardEngine};
use crate::exposure::{ExposureLedger, LedgerUpdate};
use crate::external::ExternalAssessments;
use crate::io::{file_name_for, write_json};
use crate::losses::{Casualties, ConsequenceModels};
use crate::occupancy::{OccupancyTimeline, TimeOfDay};
use crate::rupture::{Earthquake, RuptureSource};
use crate::uid::BuildingId;

/// Shared read-only context of every event of a run.
pub struct RunContext<'a> {
    pub config: &'a RunConfig,
    pub consequences: &'a ConsequenceModels,
    pub engine: &'a dyn HazardEngine,
    pub ruptures: &'a dyn RuptureSource,
    pub external: &'a ExternalAssessments,
    /// Root of the per-event scratch directories handed to the engine.
    pub scratch_root: &'a Path,
    /// Where snapshots and raw engine tables are kept, if at all.
    pub intermediate: Option<&'a Path>,
    zone: FixedOffset,
}

impl<'a> RunContext<'a> {
    pub fn new(
        config: &'a RunConfig,
        consequences: &'a ConsequenceModels,
        engine: &'a dyn HazardEngine,
        ruptures: &'a dyn RuptureSource,
        external: &'a ExternalAssessments,
        scratch_root: &'a Path,
        intermediate: Option<&'a Path>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            consequences,
            engine,
            ruptures,
            external,
            scratch_root,
            intermediate,
            zone: config.utc_offset()?,
        })
    }

    pub fn zone(&self) -> FixedOffset {
        self.zone
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    EngineCall,
    RecoverOrApply,
    LedgerUpdate,
    TimelineUpdate,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prepare => "prepare",
            Self::EngineCall => "engine call",
            Self::RecoverOrApply => "recover or apply",
            Self::LedgerUpdate => "ledger update",
            Self::TimelineUpdate => "timeline update",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// How the damage of an event was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Damage,
    BeyondMaximumDistance,
    NegligibleGroundMotion,
    NoDamageOutput,
}

impl OutcomeKind {
    pub fn is_fallback(self) -> bool {
        self != Self::Damage
    }
}

/// Result of one processed earthquake.
#[derive(Debug, Clone)]
pub struct EventReport {
    pub time_of_day: TimeOfDay,
    pub outcome: OutcomeKind,
    pub update: LedgerUpdate,
    /// Buildings whose damage came from an external assessment.
    pub externally_assessed: Vec<BuildingId>,
    pub casualties: Casualties,
}

impl EventReport {
    fn unchanged(time_of_day: TimeOfDay, outcome: OutcomeKind, n_severities: usize) -> Self {
        Self {
            time_of_day,
            outcome,
            update: LedgerUpdate::default(),
            externally_assessed: Vec::new(),
            casualties: Casualties::new(n_severities),
        }
    }
}

pub struct SingleEventRunner;

impl SingleEventRunner {
    /// Runs one earthquake.
    ///
    /// `batch` is `"rla"` or the forecast id; it keeps scratch space and replayed results of
    /// different batches apart. External assessments are only consulted when
    /// `allow_external` is set, and they still apply when the engine falls back. A fallback
    /// without external assessments changes neither `ledger` nor `timeline`.
    pub fn run(
        ctx: &RunContext<'_>,
        batch: &str,
        event: &Earthquake,
        ledger: &mut ExposureLedger,
        timeline: &mut OccupancyTimeline,
        allow_external: bool,
    ) -> Result<EventReport> {
        let config = ctx.config;
        let n_severities = ctx.consequences.severities().len();
        let t = event.datetime;

        debug!(event = %event.event_id, stage = %Stage::Prepare);
        event.validate()?;
        let time_of_day = TimeOfDay::at(t, ctx.zone);
        let mut factors = BTreeMap::new();
        for asset in ledger.assets() {
            if !factors.contains_key(&asset.occupancy) {
                let f = config
                    .time_of_day_occupancy
                    .factor(&asset.occupancy, time_of_day)?;
                factors.insert(asset.occupancy.clone(), f);
            }
        }
        let snapshot = ledger.snapshot(|asset, ds, mass| {
            let f = factors.get(&asset.occupancy).copied().unwrap_or(0.0);
            timeline.present_occupants(asset, ds, mass, t, f)
        });
        let rupture = match &event.rupture {
            Some(rupture) => rupture.clone(),
            None => ctx
                .ruptures
                .rupture_for(event, config.oelf.rupture_seed)
                .with_context(|| format!("No rupture for event '{}'", event.event_id))?,
        };
        let scratch_dir = ctx
            .scratch_root
            .join(file_name_for(batch))
            .join(file_name_for(&event.event_id));
        fs::create_dir_all(&scratch_dir).with_context(|| {
            format!("Failed to create directory: {}", scratch_dir.display())
        })?;

        debug!(event = %event.event_id, stage = %Stage::EngineCall, rows = snapshot.len());
        let request = EngineRequest {
            batch,
            event,
            rupture: &rupture,
            snapshot: &snapshot,
            fragility: &config.fragility_model,
            time_of_day,
            scratch_dir: &scratch_dir,
        };
        let outcome = ctx.engine.compute_damage(&request);
        if !config.keep_intermediate
            && let Err(err) = fs::remove_dir_all(&scratch_dir)
        {
            warn!("Failed to remove scratch directory {}: {err}", scratch_dir.display());
        }

        debug!(event = %event.event_id, stage = %Stage::RecoverOrApply);
        let (outcome, table) = match outcome {
            EngineOutcome::Damage(table) => (OutcomeKind::Damage, Some(table)),
            EngineOutcome::BeyondMaximumDistance => {
                info!(
                    "Event {}: all exposure sites are beyond the maximum distance, no damage",
                    event.event_id
                );
                (OutcomeKind::BeyondMaximumDistance, None)
            }
            EngineOutcome::NegligibleGroundMotion => {
                info!("Event {}: negligible ground motion, no damage", event.event_id);
                (OutcomeKind::NegligibleGroundMotion, None)
            }
            EngineOutcome::NoDamageOutput => {
                info!("Event {}: the engine produced no damage output", event.event_id);
                (OutcomeKind::NoDamageOutput, None)
            }
            EngineOutcome::Failed(err) => {
                return Err(err.context(format!(
                    "Engine '{}' failed for event '{}'",
                    ctx.engine.name(),
                    event.event_id
                )));
            }
        };
        let assessed = if allow_external {
            ctx.external.for_event(&event.event_id)
        } else {
            None
        };

        debug!(event = %event.event_id, stage = %Stage::LedgerUpdate);
        let mut update = match table {
            Some(mut table) => {
                table.sanitize(config.negative_tolerance).with_context(|| {
                    format!("Invalid damage results for event '{}'", event.event_id)
                })?;
                if let Some(dir) = ctx.intermediate {
                    let dir = dir
                        .join(file_name_for(batch))
                        .join(file_name_for(&event.event_id));
                    write_json(&dir.join("exposure.json"), &snapshot)?;
                    write_json(&dir.join("damage.json"), &table)?;
                }
                if let Some(assessed) = assessed {
                    table.retain(|id| {
                        snapshot
                            .get(id)
                            .is_none_or(|row| !assessed.contains_key(&row.building_id))
                    });
                }
                ledger
                    .apply_event_result(&snapshot, &table, config.fragility_regime)
                    .with_context(|| {
                        format!("Failed to apply damage of event '{}'", event.event_id)
                    })?
            }
            // Nothing from the engine: only external assessments can still change the state.
            None if assessed.is_none() => {
                return Ok(EventReport::unchanged(time_of_day, outcome, n_severities));
            }
            None => LedgerUpdate::default(),
        };
        let mut externally_assessed = Vec::new();
        for (building_id, distribution) in assessed.into_iter().flatten() {
            let external = ledger.override_with_external_assessment(
                building_id,
                &event.event_id,
                distribution,
                &snapshot,
            )?;
            update.assets.extend(external.assets);
            externally_assessed.push(building_id.clone());
        }
        if !externally_assessed.is_empty() {
            info!(
                "Event {}: damage of {} building(s) taken from external assessments",
                event.event_id,
                externally_assessed.len()
            );
        }
        let casualties = ctx.consequences.casualties(&update, ledger)?;

        debug!(event = %event.event_id, stage = %Stage::TimelineUpdate);
        for asset in &update.assets {
            timeline.record_damage(&asset.id, asset.increased_states(), t);
        }
        for (asset_id, people) in &casualties.per_asset {
            for (severity, n) in ctx.consequences.severities().iter().zip(people) {
                timeline.record_casualties(asset_id, severity, *n, t)?;
            }
        }

        debug!(event = %event.event_id, stage = %Stage::Done, assets = update.assets.len());
        Ok(EventReport {
            time_of_day,
            outcome,
            update,
            externally_assessed,
            casualties,
        })
    }
}
