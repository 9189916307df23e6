//! Seismicity forecast catalogues.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::rupture::Earthquake;
use crate::rupture::geodesy::min_distance_km;

/// One earthquake of a forecast, as read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub ses_id: u32,
    /// Position within its SES; numbered chronologically from 1 when absent.
    #[serde(default)]
    pub event_id: Option<u32>,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub depth: Option<f64>,
    pub magnitude: f64,
    pub datetime: DateTime<Utc>,
}

/// One stochastic event set, in chronological order.
#[derive(Debug, Clone, PartialEq)]
pub struct Realization {
    pub ses_id: u32,
    pub events: Vec<Earthquake>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForecastCatalogue {
    entries: Vec<CatalogueEntry>,
}

impl ForecastCatalogue {
    pub fn new(entries: Vec<CatalogueEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Splits the catalogue into realizations.
    ///
    /// With a continuous `range`, every SES id in it yields a realization (possibly empty)
    /// and earthquakes of SES outside it are dropped. Otherwise only observed SES ids count.
    pub fn realizations(&self, range: Option<(u32, u32)>) -> Result<Vec<Realization>> {
        let mut by_ses: BTreeMap<u32, Vec<&CatalogueEntry>> = BTreeMap::new();
        for entry in &self.entries {
            by_ses.entry(entry.ses_id).or_default().push(entry);
        }

        let ses_ids: Vec<u32> = match range {
            Some((first, last)) => {
                let outside: BTreeSet<u32> = by_ses
                    .keys()
                    .copied()
                    .filter(|id| !(first..=last).contains(id))
                    .collect();
                if !outside.is_empty() {
                    warn!(
                        "Forecast catalogue contains {} SES id(s) outside the range [{first}, \
                         {last}]; their earthquakes are ignored: {outside:?}",
                        outside.len()
                    );
                }
                (first..=last).collect()
            }
            None => by_ses.keys().copied().collect(),
        };

        let mut out = Vec::with_capacity(ses_ids.len());
        for ses_id in ses_ids {
            let mut entries = by_ses.remove(&ses_id).unwrap_or_default();
            entries.sort_by_key(|e| e.datetime);
            let mut seen = BTreeSet::new();
            let mut events = Vec::with_capacity(entries.len());
            for (i, e) in entries.into_iter().enumerate() {
                let number = e.event_id.unwrap_or(i as u32 + 1);
                if !seen.insert(number) {
                    bail!("SES {ses_id} contains event {number} more than once");
                }
                let eq = Earthquake {
                    event_id: format!("{ses_id}-{number}"),
                    ses_id: Some(ses_id),
                    longitude: e.longitude,
                    latitude: e.latitude,
                    depth: e.depth,
                    magnitude: e.magnitude,
                    datetime: e.datetime,
                    rupture: None,
                };
                eq.validate()?;
                events.push(eq);
            }
            out.push(Realization { ses_id, events });
        }
        Ok(out)
    }
}

/// Decides which forecast earthquakes are worth running.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub min_magnitude: f64,
    pub max_distance_km: f64,
    sites: Vec<(f64, f64)>,
}

impl EventFilter {
    pub fn new(min_magnitude: f64, max_distance_km: f64, sites: Vec<(f64, f64)>) -> Self {
        Self {
            min_magnitude,
            max_distance_km,
            sites,
        }
    }

    /// Magnitude at least the minimum and epicenter within range of some exposure site.
    pub fn accepts(&self, event: &Earthquake) -> bool {
        if event.magnitude < self.min_magnitude {
            return false;
        }
        match min_distance_km(event.longitude, event.latitude, &self.sites) {
            Some(d) => d <= self.max_distance_km,
            None => false,
        }
    }

    /// Counts accepted earthquakes, for logging.
    pub fn summarize(&self, realizations: &[Realization]) -> (usize, usize) {
        let total: usize = realizations.iter().map(|r| r.events.len()).sum();
        let kept = realizations
            .iter()
            .flat_map(|r| &r.events)
            .filter(|e| self.accepts(e))
            .count();
        info!(
            "{kept} of {total} forecast earthquakes have magnitude >= {} and lie within {} km \
             of the exposure",
            self.min_magnitude, self.max_distance_km
        );
        (kept, total)
    }
}
