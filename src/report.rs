//! Per-event and per-forecast results, and the run summary derived from them.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::exposure::BuildingTotals;
use crate::occupancy::TimeOfDay;
use crate::rupture::Earthquake;
use crate::runner::OutcomeKind;
use crate::uid::{BuildingId, RunId};

/// Result of one RLA earthquake. Keyed by building id throughout.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub earthquake: Earthquake,
    pub time_of_day: TimeOfDay,
    pub outcome: OutcomeKind,
    pub externally_assessed: Vec<BuildingId>,
    /// Damage state distribution after the event (probabilities or building counts).
    pub damage_by_building: BTreeMap<BuildingId, Vec<f64>>,
    pub economic_losses_cumulative: BTreeMap<BuildingId, f64>,
    /// People injured by this event, per severity.
    pub casualties_incremental: BTreeMap<BuildingId, Vec<f64>>,
    pub clamped: usize,
}

/// Expected results of one forecast, over all its realizations.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastRecord {
    pub forecast_id: String,
    pub realizations: usize,
    /// Earthquakes in the catalogue (within the SES range, if any).
    pub earthquakes: usize,
    /// Earthquakes that passed the filter and were run.
    pub processed: usize,
    pub damage_by_building: BTreeMap<BuildingId, Vec<f64>>,
    /// Cumulative, including damage from before the forecast.
    pub economic_losses: BTreeMap<BuildingId, f64>,
    /// People injured during the forecast, per severity.
    pub casualties: BTreeMap<BuildingId, Vec<f64>>,
    pub loss_ratios: LossRatios,
}

/// Losses in percent of what each building exposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LossRatios {
    /// Economic loss over replacement cost.
    pub economic: BTreeMap<BuildingId, f64>,
    /// People injured over census occupants, per severity.
    pub casualties: BTreeMap<BuildingId, Vec<f64>>,
}

impl LossRatios {
    /// A building with nothing exposed has a ratio of zero.
    pub fn new(
        buildings: &BTreeMap<BuildingId, BuildingTotals>,
        economic: &BTreeMap<BuildingId, f64>,
        casualties: &BTreeMap<BuildingId, Vec<f64>>,
    ) -> Self {
        let totals = |id: &BuildingId| buildings.get(id).copied().unwrap_or_default();
        let economic = economic
            .iter()
            .map(|(id, loss)| (id.clone(), percent(*loss, totals(id).structural)))
            .collect();
        let casualties = casualties
            .iter()
            .map(|(id, people)| {
                let census = totals(id).census;
                (id.clone(), people.iter().map(|p| percent(*p, census)).collect())
            })
            .collect();
        Self {
            economic,
            casualties,
        }
    }
}

fn percent(value: f64, total: f64) -> f64 {
    if total > 0.0 { 100.0 * value / total } else { 0.0 }
}

/// Everything a run produced, in processing order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub damage_states: Vec<String>,
    pub injury_severities: Vec<String>,
    /// Replacement cost and census per building, the base of every loss ratio.
    pub buildings: BTreeMap<BuildingId, BuildingTotals>,
    pub rla: Vec<EventRecord>,
    pub oelf: Vec<ForecastRecord>,
}

/// One line of the RLA summary.
#[derive(Debug, Clone, Serialize)]
pub struct RlaSummary {
    pub event_id: String,
    pub datetime: String,
    pub outcome: OutcomeKind,
    pub economic_losses_incremental: BTreeMap<BuildingId, f64>,
    pub economic_losses_cumulative: BTreeMap<BuildingId, f64>,
    pub casualties_incremental: BTreeMap<BuildingId, Vec<f64>>,
    pub casualties_cumulative: BTreeMap<BuildingId, Vec<f64>>,
    pub loss_ratios_incremental: LossRatios,
    pub loss_ratios_cumulative: LossRatios,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub damage_states: Vec<String>,
    pub injury_severities: Vec<String>,
    pub rla: Vec<RlaSummary>,
    pub oelf: Vec<ForecastRecord>,
}

impl RunReport {
    pub fn new(
        run_id: RunId,
        damage_states: Vec<String>,
        injury_severities: Vec<String>,
        buildings: BTreeMap<BuildingId, BuildingTotals>,
    ) -> Self {
        Self {
            run_id,
            damage_states,
            injury_severities,
            buildings,
            rla: Vec::new(),
            oelf: Vec::new(),
        }
    }

    /// Economic losses caused by each RLA event alone.
    pub fn economic_losses_incremental(&self) -> Vec<BTreeMap<BuildingId, f64>> {
        let mut previous: BTreeMap<BuildingId, f64> = BTreeMap::new();
        let mut out = Vec::with_capacity(self.rla.len());
        for record in &self.rla {
            let step = record
                .economic_losses_cumulative
                .iter()
                .map(|(id, loss)| {
                    let before = previous.get(id).copied().unwrap_or(0.0);
                    (id.clone(), loss - before)
                })
                .collect();
            out.push(step);
            previous = record.economic_losses_cumulative.clone();
        }
        out
    }

    /// People injured by all RLA events up to and including each one.
    pub fn casualties_cumulative(&self) -> Vec<BTreeMap<BuildingId, Vec<f64>>> {
        let n = self.injury_severities.len();
        let mut running: BTreeMap<BuildingId, Vec<f64>> = BTreeMap::new();
        let mut out = Vec::with_capacity(self.rla.len());
        for record in &self.rla {
            for (id, values) in &record.casualties_incremental {
                let acc = running.entry(id.clone()).or_insert_with(|| vec![0.0; n]);
                for (a, v) in acc.iter_mut().zip(values) {
                    *a += v;
                }
            }
            out.push(running.clone());
        }
        out
    }

    pub fn summary(&self) -> RunSummary {
        let rla = self
            .rla
            .iter()
            .zip(self.economic_losses_incremental())
            .zip(self.casualties_cumulative())
            .map(|((record, losses), casualties)| RlaSummary {
                event_id: record.earthquake.event_id.clone(),
                datetime: record.earthquake.datetime.to_rfc3339(),
                outcome: record.outcome,
                loss_ratios_incremental: LossRatios::new(
                    &self.buildings,
                    &losses,
                    &record.casualties_incremental,
                ),
                loss_ratios_cumulative: LossRatios::new(
                    &self.buildings,
                    &record.economic_losses_cumulative,
                    &casualties,
                ),
                economic_losses_incremental: losses,
                economic_losses_cumulative: record.economic_losses_cumulative.clone(),
                casualties_incremental: record.casualties_incremental.clone(),
                casualties_cumulative: casualties,
            })
            .collect();
        RunSummary {
            run_id: self.run_id,
            damage_states: self.damage_states.clone(),
            injury_severities: self.injury_severities.clone(),
            rla,
            oelf: self.oelf.clone(),
        }
    }
}
