//! Operational earthquake loss forecasting.
//!
//! A forecast is a set of stochastic event sets (SES). Each SES starts from the same
//! pre-forecast ledger and occupancy timeline, is run on its own forked copy, and only its
//! terminal state is kept. The forecast result is the uniform average of those terminal
//! states; nothing a forecast does is committed to the run's ledger.

pub mod catalogue;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::exposure::{ExposureLedger, RealizationAverage};
use crate::losses::Casualties;
use crate::occupancy::OccupancyTimeline;
use crate::report::{ForecastRecord, LossRatios};
use crate::runner::{RunContext, SingleEventRunner};
use crate::uid::BuildingId;

pub use catalogue::{CatalogueEntry, EventFilter, ForecastCatalogue, Realization};

/// Terminal state of one realization.
struct RealizationOutcome {
    ledger: ExposureLedger,
    economic_losses: BTreeMap<BuildingId, f64>,
    casualties: Casualties,
    processed: usize,
}

pub struct ForecastOrchestrator<'c, 'a> {
    ctx: &'c RunContext<'a>,
    pool: rayon::ThreadPool,
}

impl<'c, 'a> ForecastOrchestrator<'c, 'a> {
    pub fn new(ctx: &'c RunContext<'a>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(ctx.config.oelf.workers)
            .thread_name(|i| format!("oelf-{i}"))
            .build()
            .context("Failed to start the forecast worker pool")?;
        Ok(Self { ctx, pool })
    }

    /// Runs one forecast against the current (pre-forecast) state.
    pub fn run(
        &self,
        forecast_id: &str,
        catalogue: &ForecastCatalogue,
        ledger: &ExposureLedger,
        timeline: &OccupancyTimeline,
    ) -> Result<ForecastRecord> {
        let oelf = &self.ctx.config.oelf;
        let realizations = catalogue
            .realizations(oelf.continuous_range())
            .with_context(|| format!("Invalid catalogue for forecast '{forecast_id}'"))?;
        let filter = EventFilter::new(oelf.min_magnitude, oelf.max_distance_km, ledger.sites());
        let (accepted, earthquakes) = filter.summarize(&realizations);
        info!(
            "OELF: forecast {forecast_id} with {} realization(s), {accepted} earthquake(s) to run",
            realizations.len()
        );

        if realizations.is_empty() {
            warn!("OELF: forecast {forecast_id} contains no stochastic event set");
            let economic_losses = self.ctx.consequences.economic_losses(ledger)?;
            let casualties = BTreeMap::new();
            return Ok(ForecastRecord {
                forecast_id: forecast_id.to_string(),
                realizations: 0,
                earthquakes,
                processed: 0,
                damage_by_building: ledger.damage_by_building(),
                loss_ratios: LossRatios::new(
                    &ledger.building_totals(),
                    &economic_losses,
                    &casualties,
                ),
                economic_losses,
                casualties,
            });
        }

        let outcomes: Vec<RealizationOutcome> = self.pool.install(|| {
            realizations
                .par_iter()
                .map(|r| self.run_realization(forecast_id, r, &filter, ledger, timeline))
                .collect::<Result<Vec<_>>>()
        })?;

        // Uniform weight, including realizations where nothing was run.
        let weight = 1.0 / outcomes.len() as f64;
        let mut average = RealizationAverage::new();
        let mut casualties = Casualties::new(self.ctx.consequences.severities().len());
        let mut economic_losses: BTreeMap<BuildingId, f64> = BTreeMap::new();
        let mut processed = 0;
        for outcome in &outcomes {
            outcome.ledger.merge_as_realization(&mut average, weight)?;
            casualties.accumulate(&outcome.casualties, weight);
            for (id, loss) in &outcome.economic_losses {
                *economic_losses.entry(id.clone()).or_insert(0.0) += loss * weight;
            }
            processed += outcome.processed;
        }
        let expected = average.to_ledger()?;

        let total_loss: f64 = economic_losses.values().sum();
        info!(
            "OELF: forecast {forecast_id} done, {processed} earthquake(s) run, expected \
             economic loss {total_loss:.2}"
        );
        Ok(ForecastRecord {
            forecast_id: forecast_id.to_string(),
            realizations: outcomes.len(),
            earthquakes,
            processed,
            damage_by_building: expected.damage_by_building(),
            loss_ratios: LossRatios::new(
                &ledger.building_totals(),
                &economic_losses,
                &casualties.per_building,
            ),
            economic_losses,
            casualties: casualties.per_building,
        })
    }

    fn run_realization(
        &self,
        forecast_id: &str,
        realization: &Realization,
        filter: &EventFilter,
        ledger: &ExposureLedger,
        timeline: &OccupancyTimeline,
    ) -> Result<RealizationOutcome> {
        let ctx = self.ctx;
        let mut ledger = ledger.fork();
        let mut timeline = timeline.clone();
        let mut casualties = Casualties::new(ctx.consequences.severities().len());
        let mut processed = 0;

        for event in realization.events.iter().filter(|e| filter.accepts(e)) {
            let report =
                SingleEventRunner::run(ctx, forecast_id, event, &mut ledger, &mut timeline, false)
                    .with_context(|| {
                        format!(
                            "Forecast '{forecast_id}' aborted in SES {}",
                            realization.ses_id
                        )
                    })?;
            casualties.accumulate(&report.casualties, 1.0);
            processed += 1;
        }
        debug!(
            "OELF: forecast {forecast_id}, SES {}: {processed} of {} earthquake(s) run",
            realization.ses_id,
            realization.events.len()
        );

        let economic_losses = ctx.consequences.economic_losses(&ledger)?;
        Ok(RealizationOutcome {
            ledger,
            economic_losses,
            casualties,
            processed,
        })
    }
}
