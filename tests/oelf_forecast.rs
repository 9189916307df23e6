mod common;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use quakeloss::external::ExternalAssessmentTables;
use quakeloss::oelf::CatalogueEntry;
use quakeloss::{
    BuildingId, DamageRow, DamageState, DamageTable, EngineOutcome, EngineRequest,
    ForecastCatalogue, HazardEngine, OriginalAssetId,
};
use tempfile::tempdir;

use common::{asset, config, hours, session, session_with_config, t0};

/// Moves every reported row fully into DS1 and remembers what it was asked.
#[derive(Default)]
struct ScriptedEngine {
    fail_on: Option<String>,
    calls: Mutex<Vec<(String, PathBuf, f64)>>,
}

impl HazardEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn compute_damage(&self, request: &EngineRequest<'_>) -> EngineOutcome {
        self.calls.lock().unwrap().push((
            request.event.event_id.clone(),
            request.scratch_dir.to_path_buf(),
            request.rupture.strike,
        ));
        if self.fail_on.as_deref() == Some(request.event.event_id.as_str()) {
            return EngineOutcome::Failed(anyhow!("out of memory"));
        }
        let rows = request.snapshot.rows().iter().map(|row| DamageRow {
            asset_id: row.asset_id.clone(),
            damage_state: DamageState::new(1),
            value: row.number,
        });
        match DamageTable::from_rows(3, rows) {
            Ok(table) => EngineOutcome::Damage(table),
            Err(err) => EngineOutcome::Failed(err),
        }
    }
}

fn entry(ses_id: u32, offset_hours: i64, magnitude: f64) -> CatalogueEntry {
    CatalogueEntry {
        ses_id,
        event_id: None,
        longitude: 13.38,
        latitude: 42.34,
        depth: None,
        magnitude,
        datetime: t0() + hours(offset_hours),
    }
}

/// SES 2 only holds an earthquake below the minimum magnitude.
fn catalogue() -> ForecastCatalogue {
    ForecastCatalogue::new(vec![
        entry(1, 5, 5.0),
        entry(2, 6, 3.5),
        entry(3, 7, 4.8),
        entry(4, 8, 5.2),
    ])
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn test_filtered_realization_counts_as_undamaged() -> Result<()> {
    let scratch = tempdir()?;
    let mut session = session(
        "state_independent",
        vec![asset("a1", "b1", 100.0)],
        Box::new(ScriptedEngine::default()),
        &ExternalAssessmentTables::new(),
        scratch.path(),
    )?;
    let before = session.ledger().clone();

    let record = session.run_oelf("forecast-1", &catalogue())?.clone();
    assert_eq!(record.realizations, 4);
    assert_eq!(record.earthquakes, 4);
    assert_eq!(record.processed, 3);

    let b1 = BuildingId::from("b1");
    let dist = &record.damage_by_building[&b1];
    assert!(close(dist[0], 25.0));
    assert!(close(dist[1], 75.0));
    assert!(close(dist[2], 0.0));
    // 100 buildings at 1000 each, 10% loss in DS1, in three of four realizations.
    assert!(close(record.economic_losses[&b1], 7500.0));

    // Forecasts never commit their damage.
    assert_eq!(session.ledger(), &before);
    assert_eq!(session.ledger().masses(&OriginalAssetId::from("a1")).unwrap()[0], 100.0);
    Ok(())
}

#[test]
fn test_continuous_numbering_adds_undamaged_realizations() -> Result<()> {
    let scratch = tempdir()?;
    let mut config = config("state_independent");
    config.oelf.continuous_ses_numbering = true;
    config.oelf.ses_range = Some((1, 5));
    let mut session = session_with_config(
        config,
        vec![asset("a1", "b1", 100.0)],
        Box::new(ScriptedEngine::default()),
        &ExternalAssessmentTables::new(),
        scratch.path(),
    )?;
    let record = session.run_oelf("forecast-1", &catalogue())?.clone();
    assert_eq!(record.realizations, 5);
    let dist = &record.damage_by_building[&BuildingId::from("b1")];
    assert!(close(dist[1], 60.0));
    assert!(close(dist[0], 40.0));
    Ok(())
}

#[test]
fn test_realizations_get_disjoint_scratch_space() -> Result<()> {
    let scratch = tempdir()?;
    let mut first = session(
        "state_independent",
        vec![asset("a1", "b1", 100.0)],
        Box::new(ScriptedEngine::default()),
        &ExternalAssessmentTables::new(),
        scratch.path(),
    )?;
    first.run_oelf("forecast-1", &catalogue())?;

    let shared = Arc::new(ScriptedEngine::default());
    let mut second = session(
        "state_independent",
        vec![asset("a1", "b1", 100.0)],
        Box::new(Forward(Arc::clone(&shared))),
        &ExternalAssessmentTables::new(),
        scratch.path(),
    )?;
    second.run_oelf("forecast-1", &catalogue())?;
    second.run_oelf("forecast-2", &catalogue())?;

    let calls = shared.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 6);
    let dirs: BTreeSet<&PathBuf> = calls.iter().map(|(_, dir, _)| dir).collect();
    assert_eq!(dirs.len(), 6);
    let run_scratch = scratch.path().join(second.run_id().to_string());
    assert!(dirs.iter().all(|d| d.starts_with(&run_scratch)));
    assert_ne!(first.run_id(), second.run_id());

    // Same event, same seed: same rupture in every forecast.
    let strikes: BTreeSet<(String, u64)> = calls
        .iter()
        .map(|(id, _, strike)| (id.clone(), strike.to_bits()))
        .collect();
    assert_eq!(strikes.len(), 3);
    Ok(())
}

/// Lets the test inspect an engine owned by a session.
struct Forward(Arc<ScriptedEngine>);

impl HazardEngine for Forward {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn compute_damage(&self, request: &EngineRequest<'_>) -> EngineOutcome {
        self.0.compute_damage(request)
    }
}

#[test]
fn test_failure_in_one_realization_aborts_the_forecast() -> Result<()> {
    let scratch = tempdir()?;
    let engine = ScriptedEngine {
        fail_on: Some("3-1".to_string()),
        ..Default::default()
    };
    let mut session = session(
        "state_independent",
        vec![asset("a1", "b1", 100.0)],
        Box::new(engine),
        &ExternalAssessmentTables::new(),
        scratch.path(),
    )?;
    let err = session.run_oelf("forecast-1", &catalogue()).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("3-1"));
    assert!(message.contains("SES 3"));
    assert!(session.report().oelf.is_empty());
    Ok(())
}
