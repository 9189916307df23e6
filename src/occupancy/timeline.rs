//! Forward-looking availability of buildings and people after damaging events.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::damage::{DamageScale, DamageState};
use crate::exposure::OriginalAsset;
use crate::uid::OriginalAssetId;

/// Longest horizon accepted, in days.
const MAX_HORIZON_DAYS: f64 = 1.0e6;

/// Days until a building in a given damage state may be occupied again.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepairTime {
    pub inspection_days: f64,
    pub repair_days: f64,
}

impl RepairTime {
    pub fn total_days(&self) -> f64 {
        self.inspection_days + self.repair_days
    }
}

/// Recovery inputs as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryTables {
    /// Keyed by damage state label.
    pub damage: BTreeMap<String, RepairTime>,
    /// Days in hospital, keyed by injury severity.
    pub injuries: BTreeMap<String, f64>,
    /// No disruption lasts longer than this after its event.
    pub longest_time_days: f64,
}

impl RecoveryTables {
    /// Checks the tables against the damage scale and injury severities.
    pub fn resolve(&self, scale: &DamageScale, severities: &[String]) -> Result<RecoveryPlan> {
        if !(self.longest_time_days.is_finite()
            && (0.0..=MAX_HORIZON_DAYS).contains(&self.longest_time_days))
        {
            bail!(
                "Recovery horizon of {} days is outside [0, {MAX_HORIZON_DAYS}]",
                self.longest_time_days
            );
        }
        let mut damage_days = vec![None; scale.len()];
        for (label, t) in &self.damage {
            let Some(ds) = scale.state(label) else {
                bail!("Recovery times refer to unknown damage state '{label}'");
            };
            if !(t.inspection_days >= 0.0 && t.repair_days >= 0.0) {
                bail!("Recovery times of damage state '{label}' must be non-negative");
            }
            damage_days[ds.index()] = Some(t.total_days());
        }
        let damage_days = damage_days
            .into_iter()
            .enumerate()
            .map(|(k, d)| match d {
                Some(d) => Ok(d),
                None => bail!(
                    "Recovery times are missing damage state '{}'",
                    scale.label(DamageState::new(k))
                ),
            })
            .collect::<Result<Vec<f64>>>()?;

        let mut injury_days = BTreeMap::new();
        for severity in severities {
            match self.injuries.get(severity) {
                Some(&d) if d >= 0.0 => {
                    injury_days.insert(severity.clone(), d);
                }
                Some(_) => bail!("Discharge time of injury severity '{severity}' is negative"),
                None => bail!("Recovery times are missing injury severity '{severity}'"),
            }
        }
        Ok(RecoveryPlan {
            damage_days,
            injury_days,
            horizon_days: self.longest_time_days,
        })
    }
}

/// Recovery durations resolved against the damage scale.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPlan {
    damage_days: Vec<f64>,
    injury_days: BTreeMap<String, f64>,
    horizon_days: f64,
}

impl RecoveryPlan {
    /// All recovery durations are zero: nothing is ever unavailable.
    pub fn is_noop(&self) -> bool {
        self.damage_days.iter().all(|d| *d == 0.0) && self.injury_days.values().all(|d| *d == 0.0)
    }

    fn capped(&self, days: f64) -> Duration {
        let days = days.min(self.horizon_days);
        Duration::seconds((days * 86_400.0).round() as i64)
    }

    pub fn repair_duration(&self, ds: DamageState) -> Duration {
        self.capped(self.damage_days[ds.index()])
    }

    pub fn discharge_duration(&self, severity: &str) -> Option<Duration> {
        self.injury_days.get(severity).map(|d| self.capped(*d))
    }
}

/// People of one original asset who are away until a given time.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AwaySpell {
    until: DateTime<Utc>,
    people: f64,
}

/// Usability of damaged buildings and health status of occupants, in absolute time.
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyTimeline {
    plan: Arc<RecoveryPlan>,
    /// Per original asset and damage state, the time from which it may be occupied again.
    usable_from: BTreeMap<OriginalAssetId, Vec<Option<DateTime<Utc>>>>,
    still_away: BTreeMap<OriginalAssetId, Vec<AwaySpell>>,
}

impl OccupancyTimeline {
    pub fn new(plan: Arc<RecoveryPlan>) -> Self {
        Self {
            plan,
            usable_from: BTreeMap::new(),
            still_away: BTreeMap::new(),
        }
    }

    pub fn plan(&self) -> &RecoveryPlan {
        &self.plan
    }

    pub fn is_noop(&self) -> bool {
        self.plan.is_noop()
    }

    /// Time from which the part of the asset in `ds` is occupied again, if ever closed.
    pub fn release_time(&self, id: &OriginalAssetId, ds: DamageState) -> Option<DateTime<Utc>> {
        self.usable_from
            .get(id)
            .and_then(|slots| slots.get(ds.index()))
            .copied()
            .flatten()
    }

    pub fn is_usable(&self, id: &OriginalAssetId, ds: DamageState, t: DateTime<Utc>) -> bool {
        match self.release_time(id, ds) {
            Some(release) => t >= release,
            None => true,
        }
    }

    /// 1 when the part of the asset in `ds` may be occupied at `t`, else 0.
    pub fn usability_factor(
        &self,
        id: &OriginalAssetId,
        ds: DamageState,
        t: DateTime<Utc>,
    ) -> f64 {
        if self.is_noop() || self.is_usable(id, ds, t) {
            1.0
        } else {
            0.0
        }
    }

    /// People of the asset who are still away at `t` because of injuries.
    pub fn still_away(&self, id: &OriginalAssetId, t: DateTime<Utc>) -> f64 {
        if self.is_noop() {
            return 0.0;
        }
        self.still_away
            .get(id)
            .map(|spells| spells.iter().filter(|s| s.until > t).map(|s| s.people).sum())
            .unwrap_or(0.0)
    }

    /// People present at `t` in the part of `asset` that is in damage state `ds` with `mass`.
    pub fn present_occupants(
        &self,
        asset: &OriginalAsset,
        ds: DamageState,
        mass: f64,
        t: DateTime<Utc>,
        time_of_day_factor: f64,
    ) -> f64 {
        let census = asset.census;
        let away = self.still_away(&asset.id, t).min(census);
        let available = (census - away).max(0.0);
        let usable = self.usability_factor(&asset.id, ds, t);
        time_of_day_factor * usable * available * asset.share(mass)
    }

    /// Starts inspection and repair of every damage state of the asset that gained mass at `t`.
    ///
    /// An unexpired release time is never brought forward.
    pub fn record_damage<I>(&mut self, id: &OriginalAssetId, increased: I, t: DateTime<Utc>)
    where
        I: IntoIterator<Item = DamageState>,
    {
        let n = self.plan.damage_days.len();
        for ds in increased {
            let duration = self.plan.repair_duration(ds);
            if duration <= Duration::zero() {
                continue;
            }
            let release = t + duration;
            let slots = self
                .usable_from
                .entry(id.clone())
                .or_insert_with(|| vec![None; n]);
            let slot = &mut slots[ds.index()];
            *slot = Some(match *slot {
                Some(existing) => merged_release(existing, release),
                None => release,
            });
            debug!("Asset {id}: damage state {} unusable until {release}", ds.index());
        }
    }

    /// Sends `people` of the asset to hospital with injuries of `severity` at `t`.
    pub fn record_casualties(
        &mut self,
        id: &OriginalAssetId,
        severity: &str,
        people: f64,
        t: DateTime<Utc>,
    ) -> Result<()> {
        let Some(duration) = self.plan.discharge_duration(severity) else {
            bail!("Unknown injury severity '{severity}'");
        };
        let spells = self.still_away.entry(id.clone()).or_default();
        spells.retain(|s| s.until > t);
        if duration > Duration::zero() && people > 0.0 {
            spells.push(AwaySpell {
                until: t + duration,
                people,
            });
        }
        if spells.is_empty() {
            self.still_away.remove(id);
        }
        Ok(())
    }
}

/// Later of two release times.
pub fn merged_release(a: DateTime<Utc>, b: DateTime<Utc>) -> DateTime<Utc> {
    a.max(b)
}
