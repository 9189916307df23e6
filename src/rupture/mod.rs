//! Earthquakes and the finite ruptures handed to the engine.

pub mod geodesy;
pub mod stochastic;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use stochastic::{StochasticRuptureGenerator, StochasticRuptureConfig};

/// One earthquake, real (RLA) or sampled (OELF).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Earthquake {
    pub event_id: String,
    /// Stochastic event set the earthquake belongs to (forecasts only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ses_id: Option<u32>,
    pub longitude: f64,
    pub latitude: f64,
    /// Hypocentral depth in km. Sampled by the rupture generator when absent.
    #[serde(default)]
    pub depth: Option<f64>,
    pub magnitude: f64,
    pub datetime: DateTime<Utc>,
    /// Explicit rupture, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rupture: Option<Rupture>,
}

impl Earthquake {
    pub fn validate(&self) -> Result<()> {
        if !(-180.0..=180.0).contains(&self.longitude) || !(-90.0..=90.0).contains(&self.latitude)
        {
            bail!(
                "Earthquake '{}' has invalid coordinates ({}, {})",
                self.event_id,
                self.longitude,
                self.latitude
            );
        }
        if !self.magnitude.is_finite() {
            bail!("Earthquake '{}' has no valid magnitude", self.event_id);
        }
        if let Some(depth) = self.depth
            && !(depth.is_finite() && depth >= 0.0)
        {
            bail!("Earthquake '{}' has an invalid depth {depth}", self.event_id);
        }
        Ok(())
    }
}

/// Longitude/latitude in degrees, depth in km.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
    pub depth: f64,
}

/// Planar rectangular rupture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rupture {
    pub magnitude: f64,
    pub strike: f64,
    pub dip: f64,
    pub rake: f64,
    pub hypocenter: GeoPoint,
    pub top_left: GeoPoint,
    pub top_right: GeoPoint,
    pub bottom_left: GeoPoint,
    pub bottom_right: GeoPoint,
}

impl Rupture {
    pub fn top_depth(&self) -> f64 {
        self.top_left.depth.min(self.top_right.depth)
    }

    pub fn bottom_depth(&self) -> f64 {
        self.bottom_left.depth.max(self.bottom_right.depth)
    }

    /// Length along strike, in km.
    pub fn length(&self) -> f64 {
        geodesy::distance_km(
            self.top_left.lon,
            self.top_left.lat,
            self.top_right.lon,
            self.top_right.lat,
        )
    }
}

/// Produces the rupture of an earthquake.
///
/// For a fixed `seed` the result must be deterministic.
pub trait RuptureSource: Send + Sync {
    fn rupture_for(&self, event: &Earthquake, seed: u64) -> Result<Rupture>;
}
