use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, bail};
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Period of the day used to scale census occupants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    /// 10:00 to 18:00
    Day,
    /// 22:00 to 06:00
    Night,
    /// 06:00 to 10:00 and 18:00 to 22:00
    Transit,
}

impl TimeOfDay {
    /// Hours wrap around midnight.
    pub fn from_local_hour(hour: u32) -> Self {
        match hour % 24 {
            10..=17 => Self::Day,
            6..=9 | 18..=21 => Self::Transit,
            _ => Self::Night,
        }
    }

    /// Classifies an event time in the given local time zone.
    pub fn at(datetime: DateTime<Utc>, zone: FixedOffset) -> Self {
        Self::from_local_hour(datetime.with_timezone(&zone).hour())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Night => "night",
            Self::Transit => "transit",
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fraction of census occupants present in each period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyFactors {
    pub day: f64,
    pub night: f64,
    pub transit: f64,
}

impl DailyFactors {
    pub fn get(&self, period: TimeOfDay) -> f64 {
        match period {
            TimeOfDay::Day => self.day,
            TimeOfDay::Night => self.night,
            TimeOfDay::Transit => self.transit,
        }
    }
}

/// Time-of-day factors keyed by occupancy class (`"Res"`, `"Com"`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeOfDayFactors(BTreeMap<String, DailyFactors>);

impl TimeOfDayFactors {
    pub fn new(factors: BTreeMap<String, DailyFactors>) -> Self {
        Self(factors)
    }

    pub fn factor(&self, occupancy: &str, period: TimeOfDay) -> Result<f64> {
        match self.0.get(occupancy) {
            Some(f) => Ok(f.get(period)),
            None => bail!("No time-of-day occupancy factors for occupancy class '{occupancy}'"),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (class, f) in &self.0 {
            if [f.day, f.night, f.transit]
                .iter()
                .any(|v| !(v.is_finite() && *v >= 0.0))
            {
                bail!("Time-of-day factors of occupancy class '{class}' must be non-negative");
            }
        }
        Ok(())
    }

    pub fn contains(&self, occupancy: &str) -> bool {
        self.0.contains_key(occupancy)
    }
}
