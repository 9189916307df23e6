//! Rapid loss assessment of real earthquakes.

use anyhow::Result;
use tracing::info;

use crate::exposure::ExposureLedger;
use crate::occupancy::OccupancyTimeline;
use crate::report::EventRecord;
use crate::runner::{RunContext, SingleEventRunner};
use crate::rupture::Earthquake;

/// Batch name of all real earthquakes.
pub const RLA_BATCH: &str = "rla";

/// Runs one real earthquake, permanently updating `ledger` and `timeline`.
///
/// Unlike forecasts, losses are evaluated after every single earthquake.
pub fn assess_earthquake(
    ctx: &RunContext<'_>,
    event: &Earthquake,
    ledger: &mut ExposureLedger,
    timeline: &mut OccupancyTimeline,
) -> Result<EventRecord> {
    info!(
        "RLA: event {} (M{:.1}) at {}",
        event.event_id, event.magnitude, event.datetime
    );
    let report = SingleEventRunner::run(ctx, RLA_BATCH, event, ledger, timeline, true)?;
    let economic_losses_cumulative = ctx.consequences.economic_losses(ledger)?;

    let total_loss: f64 = economic_losses_cumulative.values().sum();
    let injured: f64 = (0..ctx.consequences.severities().len())
        .map(|s| report.casualties.total(s))
        .sum();
    info!(
        "RLA: event {} done ({:?}), cumulative economic loss {total_loss:.2}, {injured:.3} \
         people injured",
        event.event_id, report.outcome
    );

    Ok(EventRecord {
        earthquake: event.clone(),
        time_of_day: report.time_of_day,
        outcome: report.outcome,
        externally_assessed: report.externally_assessed,
        damage_by_building: ledger.damage_by_building(),
        economic_losses_cumulative,
        casualties_incremental: report.casualties.per_building,
        clamped: report.update.clamped,
    })
}
