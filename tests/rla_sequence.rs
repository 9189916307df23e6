mod common;

use anyhow::Result;
use chrono::Duration;
use quakeloss::engine::replay::ReplayRecord;
use quakeloss::external::ExternalAssessmentTables;
use quakeloss::runner::OutcomeKind;
use quakeloss::{BuildingId, DamageState, OriginalAssetId, TimeOfDay};
use tempfile::tempdir;

use common::{asset, damage, earthquake, hours, replay, session, t0};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn test_two_events_state_independent() -> Result<()> {
    let scratch = tempdir()?;
    let engine = replay(
        "rla",
        vec![
            ("EQ1", damage(&[("CR", [0.7, 0.2, 0.1])])),
            ("EQ2", damage(&[("CR", [0.7, 0.2, 0.1])])),
        ],
    );
    let mut session = session(
        "state_independent",
        vec![asset("a1", "b1", 100.0)],
        Box::new(engine),
        &ExternalAssessmentTables::new(),
        scratch.path(),
    )?;
    let a1 = OriginalAssetId::from("a1");
    let b1 = BuildingId::from("b1");

    let first = session.run_rla(&earthquake("EQ1", t0(), 6.1))?.clone();
    assert_eq!(first.time_of_day, TimeOfDay::Night);
    assert_eq!(first.outcome, OutcomeKind::Damage);
    // 400 people at night, 40 of them in collapsed buildings.
    assert!(close(first.casualties_incremental[&b1][0], 4.0));
    assert!(close(first.economic_losses_cumulative[&b1], 8000.0));
    let masses = session.ledger().masses(&a1).unwrap().to_vec();
    assert!(close(masses[0], 70.0) && close(masses[1], 20.0) && close(masses[2], 10.0));

    let t1 = t0() + hours(35);
    let second = session.run_rla(&earthquake("EQ2", t1, 5.4))?.clone();
    assert_eq!(second.time_of_day, TimeOfDay::Day);
    let masses = session.ledger().masses(&a1).unwrap().to_vec();
    assert!(close(masses[0], 49.0) && close(masses[1], 32.0) && close(masses[2], 19.0));
    assert!(close(masses.iter().sum::<f64>(), 100.0));

    // Daytime, damaged buildings still closed and 4 people in hospital:
    // 0.5 * (400 - 4) * 0.7 present, 19% of them now in collapsed buildings.
    assert!(close(second.casualties_incremental[&b1][0], 138.6 * 0.19 * 0.1));
    assert!(close(second.economic_losses_cumulative[&b1], 14600.0));

    let incremental = session.report().economic_losses_incremental();
    assert!(close(incremental[1][&b1], 6600.0));
    let cumulative = session.report().casualties_cumulative();
    assert!(close(cumulative[1][&b1][0], 4.0 + 2.6334));

    // A later disruption extends an unexpired one.
    let timeline = session.timeline();
    let ds1 = DamageState::new(1);
    assert!(!timeline.is_usable(&a1, ds1, t0() + Duration::days(10) + hours(1)));
    assert!(timeline.is_usable(&a1, ds1, t1 + Duration::days(10)));
    assert!(!timeline.is_usable(&a1, DamageState::new(2), t1 + Duration::days(300)));
    assert!(timeline.is_usable(&a1, DamageState::new(0), t1));
    Ok(())
}

#[test]
fn test_state_dependent_results_replace_history() -> Result<()> {
    let scratch = tempdir()?;
    let engine = replay(
        "rla",
        vec![
            ("EQ1", damage(&[("CR", [0.7, 0.2, 0.1])])),
            (
                "EQ2",
                damage(&[
                    ("CR/DS0", [1.0, 0.0, 0.0]),
                    ("CR/DS1", [0.0, 0.5, 0.5]),
                    ("CR/DS2", [0.0, 0.0, 1.0]),
                ]),
            ),
        ],
    );
    let mut session = session(
        "state_dependent",
        vec![asset("a1", "b1", 100.0)],
        Box::new(engine),
        &ExternalAssessmentTables::new(),
        scratch.path(),
    )?;
    session.run_rla(&earthquake("EQ1", t0(), 6.1))?;
    session.run_rla(&earthquake("EQ2", t0() + hours(2), 5.0))?;

    let masses = session.ledger().masses(&"a1".into()).unwrap().to_vec();
    assert!(close(masses[0], 70.0) && close(masses[1], 10.0) && close(masses[2], 20.0));
    Ok(())
}

#[test]
fn test_fallbacks_leave_state_untouched() -> Result<()> {
    let scratch = tempdir()?;
    let engine = replay(
        "rla",
        vec![
            ("EQ1", damage(&[("CR", [0.5, 0.3, 0.2])])),
            ("EQ2", ReplayRecord::NegligibleGroundMotion),
            ("EQ3", ReplayRecord::BeyondMaximumDistance),
            ("EQ4", ReplayRecord::NoDamageOutput),
        ],
    );
    let mut session = session(
        "state_independent",
        vec![asset("a1", "b1", 12.0), asset("a2", "b2", 1.0)],
        Box::new(engine),
        &ExternalAssessmentTables::new(),
        scratch.path(),
    )?;
    session.run_rla(&earthquake("EQ1", t0(), 6.1))?;
    let ledger = session.ledger().clone();
    let timeline = session.timeline().clone();

    let expected = [
        ("EQ2", OutcomeKind::NegligibleGroundMotion),
        ("EQ3", OutcomeKind::BeyondMaximumDistance),
        ("EQ4", OutcomeKind::NoDamageOutput),
    ];
    for (i, (id, kind)) in expected.into_iter().enumerate() {
        let at = t0() + hours(1 + i as i64);
        let record = session.run_rla(&earthquake(id, at, 4.5))?.clone();
        assert_eq!(record.outcome, kind);
        assert!(record.casualties_incremental.is_empty());
        assert_eq!(session.ledger(), &ledger);
        assert_eq!(session.timeline(), &timeline);
    }

    let incremental = session.report().economic_losses_incremental();
    assert!(incremental[3].values().all(|l| close(*l, 0.0)));
    Ok(())
}

#[test]
fn test_external_assessment_overrides_engine() -> Result<()> {
    let scratch = tempdir()?;
    let engine = replay("rla", vec![("EQ1", damage(&[("CR", [0.7, 0.2, 0.1])]))]);
    let external: ExternalAssessmentTables =
        serde_json::from_str(r#"{"EQ1": {"b2": {"DS2": 1.0}}}"#)?;
    let mut session = session(
        "state_independent",
        vec![asset("a1", "b1", 100.0), asset("a2", "b2", 1.0)],
        Box::new(engine),
        &external,
        scratch.path(),
    )?;
    let record = session.run_rla(&earthquake("EQ1", t0(), 6.1))?.clone();
    assert_eq!(record.externally_assessed, vec![BuildingId::from("b2")]);
    // Everyone in b2 was in a collapsed building.
    assert!(close(record.casualties_incremental[&BuildingId::from("b2")][0], 0.4));

    let a1 = session.ledger().masses(&"a1".into()).unwrap().to_vec();
    let a2 = session.ledger().masses(&"a2".into()).unwrap().to_vec();
    assert!(close(a1[1], 20.0) && close(a1[2], 10.0));
    assert_eq!(a2, vec![0.0, 0.0, 1.0]);
    Ok(())
}

#[test]
fn test_external_assessment_applies_when_engine_falls_back() -> Result<()> {
    let scratch = tempdir()?;
    let engine = replay("rla", vec![("EQ1", ReplayRecord::NegligibleGroundMotion)]);
    let external: ExternalAssessmentTables =
        serde_json::from_str(r#"{"EQ1": {"b1": {"DS2": 1.0}}}"#)?;
    let mut session = session(
        "state_independent",
        vec![asset("a1", "b1", 100.0), asset("a2", "b2", 10.0)],
        Box::new(engine),
        &external,
        scratch.path(),
    )?;
    let record = session.run_rla(&earthquake("EQ1", t0(), 6.1))?.clone();
    assert_eq!(record.outcome, OutcomeKind::NegligibleGroundMotion);
    assert_eq!(record.externally_assessed, vec![BuildingId::from("b1")]);
    // 400 people at home at night, all in collapsed buildings.
    assert!(close(record.casualties_incremental[&BuildingId::from("b1")][0], 40.0));

    let a1 = OriginalAssetId::from("a1");
    assert_eq!(session.ledger().masses(&a1).unwrap(), &[0.0, 0.0, 100.0]);
    assert_eq!(session.ledger().masses(&"a2".into()).unwrap(), &[10.0, 0.0, 0.0]);
    let timeline = session.timeline();
    assert!(!timeline.is_usable(&a1, DamageState::new(2), t0() + Duration::days(100)));
    assert!(timeline.is_usable(&"a2".into(), DamageState::new(2), t0() + Duration::days(100)));
    Ok(())
}

#[test]
fn test_buildings_reopen_independently() -> Result<()> {
    let scratch = tempdir()?;
    let engine = replay(
        "rla",
        vec![
            ("EQ1", damage(&[("a1", [0.0, 1.0, 0.0])])),
            ("EQ2", damage(&[("a2", [0.0, 1.0, 0.0])])),
            ("EQ3", damage(&[("a1", [0.0, 0.0, 1.0])])),
        ],
    );
    let mut session = session(
        "state_dependent",
        vec![asset("a1", "b1", 100.0), asset("a2", "b2", 100.0)],
        Box::new(engine),
        &ExternalAssessmentTables::new(),
        scratch.path(),
    )?;
    session.run_rla(&earthquake("EQ1", t0(), 5.8))?;
    session.run_rla(&earthquake("EQ2", t0() + Duration::days(20), 5.1))?;
    let third = session
        .run_rla(&earthquake("EQ3", t0() + Duration::days(21), 5.5))?
        .clone();

    // b1 reopened on day 10; b2 closing on day 20 does not empty it again.
    assert_eq!(third.time_of_day, TimeOfDay::Night);
    assert!(close(third.casualties_incremental[&BuildingId::from("b1")][0], 40.0));
    assert!(third.casualties_incremental.get(&BuildingId::from("b2")).is_none());

    let timeline = session.timeline();
    let ds1 = DamageState::new(1);
    let day = t0() + Duration::days(21);
    assert!(timeline.is_usable(&"a1".into(), ds1, day));
    assert!(!timeline.is_usable(&"a2".into(), ds1, day));
    Ok(())
}

#[test]
fn test_engine_failure_names_the_event() -> Result<()> {
    let scratch = tempdir()?;
    let engine = replay(
        "rla",
        vec![(
            "EQ9",
            ReplayRecord::Failed {
                message: "job crashed".to_string(),
            },
        )],
    );
    let mut session = session(
        "state_independent",
        vec![asset("a1", "b1", 10.0)],
        Box::new(engine),
        &ExternalAssessmentTables::new(),
        scratch.path(),
    )?;
    let err = session.run_rla(&earthquake("EQ9", t0(), 6.1)).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("EQ9"));
    assert!(message.contains("job crashed"));
    assert!(session.report().rla.is_empty());
    Ok(())
}

#[test]
fn test_earthquakes_must_be_chronological() -> Result<()> {
    let scratch = tempdir()?;
    let engine = replay("rla", vec![("EQ2", ReplayRecord::NegligibleGroundMotion)]);
    let mut session = session(
        "state_independent",
        vec![asset("a1", "b1", 10.0)],
        Box::new(engine),
        &ExternalAssessmentTables::new(),
        scratch.path(),
    )?;
    session.run_rla(&earthquake("EQ2", t0(), 5.0))?;
    assert!(session.run_rla(&earthquake("EQ1", t0() - hours(1), 5.0)).is_err());
    assert!(session.run_rla(&earthquake("EQ2", t0() + hours(1), 5.0)).is_err());
    Ok(())
}

#[test]
fn test_unknown_building_class_is_rejected_up_front() {
    let scratch = tempdir().unwrap();
    let mut unknown = asset("a1", "b1", 10.0);
    unknown.building_class = "MUR".to_string();
    let err = session(
        "state_independent",
        vec![unknown],
        Box::new(replay("rla", vec![])),
        &ExternalAssessmentTables::new(),
        scratch.path(),
    )
    .err()
    .expect("missing consequence model");
    assert!(err.to_string().contains("MUR"));
}
