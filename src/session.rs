//! A run: the ledger and timeline that persist across the triggering sequence.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::config::RunConfig;
use crate::engine::{HazardEngine, ReplayEngine};
use crate::exposure::{ExposureLedger, OriginalAsset};
use crate::external::{ExternalAssessmentTables, ExternalAssessments};
use crate::io::{InputLayout, OutputLayout, RunInputs, Trigger};
use crate::losses::{ConsequenceModels, ConsequenceTables};
use crate::occupancy::OccupancyTimeline;
use crate::oelf::{ForecastCatalogue, ForecastOrchestrator};
use crate::report::{EventRecord, ForecastRecord, RunReport};
use crate::rla;
use crate::runner::RunContext;
use crate::rupture::{Earthquake, RuptureSource, StochasticRuptureGenerator};
use crate::uid::RunId;

/// Read-only models of a run.
struct Models {
    config: RunConfig,
    consequences: ConsequenceModels,
    external: ExternalAssessments,
    engine: Box<dyn HazardEngine>,
    ruptures: Box<dyn RuptureSource>,
    scratch_root: PathBuf,
    intermediate: Option<PathBuf>,
}

impl Models {
    fn context(&self) -> Result<RunContext<'_>> {
        RunContext::new(
            &self.config,
            &self.consequences,
            self.engine.as_ref(),
            self.ruptures.as_ref(),
            &self.external,
            &self.scratch_root,
            self.intermediate.as_deref(),
        )
    }
}

pub struct Session {
    run_id: RunId,
    models: Models,
    ledger: ExposureLedger,
    timeline: OccupancyTimeline,
    report: RunReport,
}

impl Session {
    /// Checks every model against the exposure and starts from undamaged buildings.
    ///
    /// Engine calls get scratch space below `scratch_dir/<run id>`.
    pub fn new(
        config: RunConfig,
        assets: Vec<OriginalAsset>,
        consequences: &ConsequenceTables,
        external: &ExternalAssessmentTables,
        engine: Box<dyn HazardEngine>,
        ruptures: Box<dyn RuptureSource>,
        scratch_dir: &Path,
    ) -> Result<Self> {
        config.validate()?;
        let scale = Arc::new(config.damage_states.clone());
        let consequences = ConsequenceModels::new(consequences, &scale)?;
        consequences.check_coverage(assets.iter().map(|a| a.building_class.as_str()))?;
        let occupancies: BTreeSet<&str> = assets.iter().map(|a| a.occupancy.as_str()).collect();
        for occupancy in occupancies {
            if !config.time_of_day_occupancy.contains(occupancy) {
                bail!("No time-of-day occupancy factors for occupancy class '{occupancy}'");
            }
        }
        let plan = config
            .recovery
            .resolve(&scale, consequences.severities())?;
        let external = ExternalAssessments::new(external, &scale)?;
        let ledger = ExposureLedger::new(Arc::clone(&scale), assets)?;
        let timeline = OccupancyTimeline::new(Arc::new(plan));
        if timeline.is_noop() {
            info!("All recovery times are zero, occupancy is never reduced by past events");
        }

        let run_id = RunId::new();
        let report = RunReport::new(
            run_id,
            scale.labels().to_vec(),
            consequences.severities().to_vec(),
            ledger.building_totals(),
        );
        info!(
            "Run {run_id}: {} original asset(s), engine '{}'",
            ledger.len(),
            engine.name()
        );
        Ok(Self {
            run_id,
            models: Models {
                config,
                consequences,
                external,
                engine,
                ruptures,
                scratch_root: scratch_dir.join(run_id.to_string()),
                intermediate: None,
            },
            ledger,
            timeline,
            report,
        })
    }

    /// Keeps snapshots and raw engine tables under `dir`.
    pub fn with_intermediate(mut self, dir: PathBuf) -> Self {
        self.models.intermediate = Some(dir);
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.models.config
    }

    pub fn ledger(&self) -> &ExposureLedger {
        &self.ledger
    }

    pub fn timeline(&self) -> &OccupancyTimeline {
        &self.timeline
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn into_report(self) -> RunReport {
        self.report
    }

    /// Processes a real earthquake. Earthquakes must arrive in chronological order.
    pub fn run_rla(&mut self, event: &Earthquake) -> Result<&EventRecord> {
        if self
            .report
            .rla
            .iter()
            .any(|r| r.earthquake.event_id == event.event_id)
        {
            bail!("Earthquake '{}' is triggered more than once", event.event_id);
        }
        if let Some(last) = self.report.rla.last()
            && event.datetime < last.earthquake.datetime
        {
            bail!(
                "Earthquake '{}' ({}) precedes the previous one '{}' ({})",
                event.event_id,
                event.datetime,
                last.earthquake.event_id,
                last.earthquake.datetime
            );
        }
        let ctx = self.models.context()?;
        let record = rla::assess_earthquake(&ctx, event, &mut self.ledger, &mut self.timeline)?;
        self.report.rla.push(record);
        self.report
            .rla
            .last()
            .context("RLA record missing after being added")
    }

    /// Runs a forecast from the current state. The state itself is left untouched.
    pub fn run_oelf(
        &mut self,
        forecast_id: &str,
        catalogue: &ForecastCatalogue,
    ) -> Result<&ForecastRecord> {
        let ctx = self.models.context()?;
        let orchestrator = ForecastOrchestrator::new(&ctx)?;
        let record = orchestrator.run(forecast_id, catalogue, &self.ledger, &self.timeline)?;
        self.report.oelf.push(record);
        self.report
            .oelf
            .last()
            .context("OELF record missing after being added")
    }
}

/// Runs the triggering sequence of an input directory and writes every result.
pub fn run(config_path: &Path, input_dir: &Path, output_dir: &Path) -> Result<RunReport> {
    let config = RunConfig::load(config_path)?;
    let layout = InputLayout::new(input_dir);
    let RunInputs {
        assets,
        consequences,
        triggers,
        external,
        catalogues,
    } = RunInputs::load(&layout)?;
    let outputs = OutputLayout::prepare(output_dir)?;

    let scale = Arc::new(config.damage_states.clone());
    let engine = ReplayEngine::from_dir(scale, &layout.damage_dir())?;
    let ruptures = StochasticRuptureGenerator::new(config.rupture_generator.clone())?;
    let keep_intermediate = config.keep_intermediate;

    let mut session = Session::new(
        config,
        assets,
        &consequences,
        &external,
        Box::new(engine),
        Box::new(ruptures),
        &outputs.scratch_dir(),
    )?;
    let run_id = session.run_id();
    if keep_intermediate {
        session = session.with_intermediate(outputs.intermediate_dir());
    }

    let result = run_triggers(&mut session, &triggers, &catalogues, &outputs);
    if !keep_intermediate {
        outputs.remove_scratch(run_id);
    }
    result?;

    outputs.write_report(session.report())?;
    Ok(session.into_report())
}

fn run_triggers(
    session: &mut Session,
    triggers: &[Trigger],
    catalogues: &BTreeMap<String, ForecastCatalogue>,
    outputs: &OutputLayout,
) -> Result<()> {
    for trigger in triggers {
        match trigger {
            Trigger::Rla { earthquake } => {
                let record = session.run_rla(earthquake)?;
                outputs.write_rla(record)?;
            }
            Trigger::Oelf {
                forecast_id,
                catalogue,
            } => {
                let Some(catalogue) = catalogues.get(catalogue) else {
                    bail!("Catalogue '{catalogue}' of forecast '{forecast_id}' was not loaded");
                };
                let record = session.run_oelf(forecast_id, catalogue)?;
                outputs.write_oelf(record)?;
            }
        }
    }
    Ok(())
}
