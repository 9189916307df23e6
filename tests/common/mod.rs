#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use quakeloss::engine::ReplayEngine;
use quakeloss::engine::replay::ReplayRecord;
use quakeloss::external::ExternalAssessmentTables;
use quakeloss::exposure::BuildingKind;
use quakeloss::losses::ConsequenceTables;
use quakeloss::rupture::{StochasticRuptureConfig, StochasticRuptureGenerator};
use quakeloss::{DamageScale, Earthquake, HazardEngine, OriginalAsset, RunConfig, Session};

pub fn config(regime: &str) -> RunConfig {
    let json = format!(
        r#"{{
            "damage_states": ["DS0", "DS1", "DS2"],
            "fragility_regime": "{regime}",
            "fragility_model": "fragility.json",
            "utc_offset_hours": 1,
            "time_of_day_occupancy": {{"Res": {{"day": 0.5, "night": 1.0, "transit": 0.75}}}},
            "recovery": {{
                "damage": {{
                    "DS0": {{"inspection_days": 0, "repair_days": 0}},
                    "DS1": {{"inspection_days": 2, "repair_days": 8}},
                    "DS2": {{"inspection_days": 5, "repair_days": 360}}
                }},
                "injuries": {{"1": 5}},
                "longest_time_days": 3650
            }},
            "oelf": {{"min_magnitude": 4.0, "max_distance_km": 100, "workers": 2}}
        }}"#
    );
    serde_json::from_str(&json).expect("valid test configuration")
}

pub fn consequences() -> ConsequenceTables {
    serde_json::from_str(
        r#"{
            "economic": {"CR": {"DS0": 0.0, "DS1": 0.1, "DS2": 0.6}},
            "injuries": {"1": {"CR": {"DS0": 0.0, "DS1": 0.0, "DS2": 0.1}}}
        }"#,
    )
    .expect("valid consequence tables")
}

pub fn asset(id: &str, building: &str, number: f64) -> OriginalAsset {
    OriginalAsset {
        id: id.into(),
        building_id: building.into(),
        building_class: "CR".to_string(),
        kind: if number <= 1.0 {
            BuildingKind::Individual
        } else {
            BuildingKind::Aggregate
        },
        lon: 13.4,
        lat: 42.35,
        number,
        structural: 1000.0 * number,
        census: 4.0 * number,
        occupancy: "Res".to_string(),
    }
}

/// 2009-04-06 01:32 UTC, night in local time.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2009, 4, 6, 1, 32, 0).unwrap()
}

pub fn earthquake(id: &str, at: DateTime<Utc>, magnitude: f64) -> Earthquake {
    Earthquake {
        event_id: id.to_string(),
        ses_id: None,
        longitude: 13.38,
        latitude: 42.34,
        depth: Some(8.0),
        magnitude,
        datetime: at,
        rupture: None,
    }
}

pub fn hours(n: i64) -> Duration {
    Duration::hours(n)
}

pub fn damage(probabilities: &[(&str, [f64; 3])]) -> ReplayRecord {
    ReplayRecord::Damage {
        probabilities: probabilities
            .iter()
            .map(|(key, p)| {
                let dist = p
                    .iter()
                    .enumerate()
                    .map(|(k, v)| (format!("DS{k}"), *v))
                    .collect();
                (key.to_string(), dist)
            })
            .collect(),
    }
}

pub fn replay(batch: &str, records: Vec<(&str, ReplayRecord)>) -> ReplayEngine {
    let scale = Arc::new(DamageScale::numbered(3).unwrap());
    let mut engine = ReplayEngine::new(scale);
    let records: BTreeMap<String, ReplayRecord> = records
        .into_iter()
        .map(|(id, r)| (id.to_string(), r))
        .collect();
    engine.insert_batch(batch, records).unwrap();
    engine
}

pub fn session(
    regime: &str,
    assets: Vec<OriginalAsset>,
    engine: Box<dyn HazardEngine>,
    external: &ExternalAssessmentTables,
    scratch: &Path,
) -> Result<Session> {
    session_with_config(config(regime), assets, engine, external, scratch)
}

pub fn session_with_config(
    config: RunConfig,
    assets: Vec<OriginalAsset>,
    engine: Box<dyn HazardEngine>,
    external: &ExternalAssessmentTables,
    scratch: &Path,
) -> Result<Session> {
    let ruptures = StochasticRuptureGenerator::new(StochasticRuptureConfig::new())?;
    Session::new(
        config,
        assets,
        &consequences(),
        external,
        engine,
        Box::new(ruptures),
        scratch,
    )
}
