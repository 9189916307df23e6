//! Seeded generation of planar ruptures for catalogue earthquakes.
//!
//! Hypocentral depth (when the catalogue has none), nodal plane and aspect ratio are sampled
//! from discrete distributions, the area follows the Leonard (2014) interplate scaling, and
//! the plane is fitted inside the seismogenic layer.

use anyhow::{Context, Result, bail};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::geodesy::{point_at, polygon_contains};
use super::{Earthquake, GeoPoint, Rupture, RuptureSource};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodalPlane {
    pub strike: f64,
    pub dip: f64,
    pub rake: f64,
}

/// One outcome of a discrete distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weighted<T> {
    pub weight: f64,
    pub value: T,
}

fn weighted<T>(weight: f64, value: T) -> Weighted<T> {
    Weighted { weight, value }
}

fn validate_pmf<T>(what: &str, pmf: &[Weighted<T>]) -> Result<()> {
    if pmf.is_empty() {
        bail!("The {what} distribution is empty");
    }
    if pmf.iter().any(|w| !(w.weight.is_finite() && w.weight >= 0.0)) {
        bail!("The {what} distribution has invalid weights");
    }
    let sum: f64 = pmf.iter().map(|w| w.weight).sum();
    if (sum - 1.0).abs() > 1e-6 {
        bail!("The {what} distribution weights add up to {sum}, not 1");
    }
    Ok(())
}

fn sample<'a, T>(pmf: &'a [Weighted<T>], rng: &mut ChaCha8Rng) -> &'a T {
    let u: f64 = rng.r#gen();
    let mut acc = 0.0;
    for w in pmf {
        acc += w.weight;
        if u < acc {
            return &w.value;
        }
    }
    // Rounding left `u` above the last cumulative weight.
    &pmf[pmf.len() - 1].value
}

/// Area source with its own depth and nodal plane distributions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceZone {
    pub id: String,
    /// `(lon, lat)` vertices.
    pub polygon: Vec<(f64, f64)>,
    #[serde(default)]
    pub upper_seismogenic_depth: Option<f64>,
    #[serde(default)]
    pub lower_seismogenic_depth: Option<f64>,
    #[serde(default)]
    pub hypo_depths: Option<Vec<Weighted<f64>>>,
    #[serde(default)]
    pub nodal_planes: Option<Vec<Weighted<NodalPlane>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StochasticRuptureConfig {
    /// Used for events outside every zone and for zones without their own.
    pub hypo_depths: Vec<Weighted<f64>>,
    pub nodal_planes: Vec<Weighted<NodalPlane>>,
    pub upper_seismogenic_depth: f64,
    pub lower_seismogenic_depth: f64,
    /// Length/width ratio is drawn uniformly from this range.
    pub aspect_limits: (f64, f64),
    pub zones: Vec<SourceZone>,
}

impl StochasticRuptureConfig {
    pub fn new() -> Self {
        let vertical = |strike| NodalPlane {
            strike,
            dip: 90.0,
            rake: 0.0,
        };
        Self {
            hypo_depths: vec![weighted(0.25, 6.0), weighted(0.5, 10.0), weighted(0.25, 14.0)],
            nodal_planes: vec![
                weighted(0.25, vertical(0.0)),
                weighted(0.25, vertical(45.0)),
                weighted(0.25, vertical(90.0)),
                weighted(0.25, vertical(135.0)),
            ],
            upper_seismogenic_depth: 0.0,
            lower_seismogenic_depth: 25.0,
            aspect_limits: (1.0, 1.5),
            zones: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_pmf("hypocentral depth", &self.hypo_depths)?;
        validate_pmf("nodal plane", &self.nodal_planes)?;
        check_layer(self.upper_seismogenic_depth, self.lower_seismogenic_depth)?;
        let (lo, hi) = self.aspect_limits;
        if !(lo > 0.0 && lo <= hi) {
            bail!("Invalid rupture aspect ratio limits ({lo}, {hi})");
        }
        for zone in &self.zones {
            if zone.polygon.len() < 3 {
                bail!("Source zone '{}' needs at least three vertices", zone.id);
            }
            if let Some(pmf) = &zone.hypo_depths {
                validate_pmf(&format!("hypocentral depth (zone '{}')", zone.id), pmf)?;
            }
            if let Some(pmf) = &zone.nodal_planes {
                validate_pmf(&format!("nodal plane (zone '{}')", zone.id), pmf)?;
                for plane in pmf {
                    check_plane(&plane.value)
                        .with_context(|| format!("Source zone '{}'", zone.id))?;
                }
            }
            check_layer(
                zone.upper_seismogenic_depth.unwrap_or(self.upper_seismogenic_depth),
                zone.lower_seismogenic_depth.unwrap_or(self.lower_seismogenic_depth),
            )?;
        }
        for plane in &self.nodal_planes {
            check_plane(&plane.value)?;
        }
        Ok(())
    }
}

impl Default for StochasticRuptureConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn check_layer(usd: f64, lsd: f64) -> Result<()> {
    if !(usd >= 0.0 && lsd > usd) {
        bail!("Invalid seismogenic layer: upper depth {usd} km, lower depth {lsd} km");
    }
    Ok(())
}

fn check_plane(plane: &NodalPlane) -> Result<()> {
    if !(plane.dip > 0.0 && plane.dip <= 90.0) {
        bail!("Nodal plane dip {} is outside (0, 90]", plane.dip);
    }
    Ok(())
}

/// Median rupture area in km² (Leonard 2014, interplate).
pub fn leonard_area(magnitude: f64, rake: f64) -> f64 {
    let strike_slip = (-45.0..=45.0).contains(&rake) || rake >= 135.0 || rake <= -135.0;
    if strike_slip {
        10f64.powf(magnitude - 3.99)
    } else {
        10f64.powf(magnitude - 4.0)
    }
}

/// Rupture `(length, horizontal width, vertical height)` in km.
///
/// The down-dip width is capped so the plane fits in a layer of `thickness` km; the length
/// grows to keep the area.
pub fn rupture_dimensions(
    area: f64,
    dip: f64,
    thickness: f64,
    aspect_ratio: f64,
) -> (f64, f64, f64) {
    let mut length = (area * aspect_ratio).sqrt();
    let mut width = area / length;
    let rdip = dip.to_radians();
    let max_width = thickness / rdip.sin();
    if width > max_width {
        width = max_width;
        length = area / width;
    }
    (length, width * rdip.cos(), width * rdip.sin())
}

/// Rectangle corners around the hypocenter, shifted vertically into `[usd, lsd]`.
fn build_plane(
    usd: f64,
    lsd: f64,
    dims: (f64, f64, f64),
    plane: &NodalPlane,
    lon: f64,
    lat: f64,
    depth: f64,
) -> [GeoPoint; 4] {
    let (half_length, half_width, half_height) = (dims.0 / 2.0, dims.1 / 2.0, dims.2 / 2.0);
    let rdip = plane.dip.to_radians();
    let azimuth_down = plane.strike + 90.0;
    let azimuth_up = plane.strike + 270.0;

    let mut vshift = usd - depth + half_height;
    if vshift < 0.0 {
        vshift = lsd - depth - half_height;
        if vshift > 0.0 {
            vshift = 0.0;
        }
    }

    let (mut clon, mut clat, mut cdep) = (lon, lat, depth);
    if vshift != 0.0 {
        let hshift = (vshift / rdip.tan()).abs();
        let azimuth = if vshift < 0.0 { azimuth_up } else { azimuth_down };
        (clon, clat) = point_at(clon, clat, azimuth, hshift);
        cdep += vshift;
    }

    let theta = half_width.atan2(half_length).to_degrees();
    let hor_dist = half_length.hypot(half_width);
    let corner = |azimuth: f64, depth: f64| {
        let (lon, lat) = point_at(clon, clat, azimuth, hor_dist);
        GeoPoint { lon, lat, depth }
    };
    [
        corner(plane.strike + 180.0 + theta, cdep - half_height),
        corner(plane.strike - theta, cdep - half_height),
        corner(plane.strike + 180.0 - theta, cdep + half_height),
        corner(plane.strike + theta, cdep + half_height),
    ]
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// Seed of one event, independent of the order events are processed in.
pub fn event_seed(run_seed: u64, event_id: &str) -> u64 {
    event_id
        .bytes()
        .fold(splitmix64(run_seed), |acc, b| splitmix64(acc ^ u64::from(b)))
}

pub struct StochasticRuptureGenerator {
    config: StochasticRuptureConfig,
}

impl StochasticRuptureGenerator {
    pub fn new(config: StochasticRuptureConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StochasticRuptureConfig {
        &self.config
    }

    fn zone_for(&self, event: &Earthquake) -> Option<&SourceZone> {
        let candidates: Vec<&SourceZone> = self
            .config
            .zones
            .iter()
            .filter(|z| polygon_contains(&z.polygon, event.longitude, event.latitude))
            .collect();
        match (candidates.len(), event.depth) {
            (0, _) => None,
            (1, _) => Some(candidates[0]),
            (_, Some(depth)) => candidates.into_iter().find(|z| {
                let usd = z.upper_seismogenic_depth.unwrap_or(self.config.upper_seismogenic_depth);
                let lsd = z.lower_seismogenic_depth.unwrap_or(self.config.lower_seismogenic_depth);
                (usd..=lsd).contains(&depth)
            }),
            (_, None) => Some(candidates[0]),
        }
    }
}

impl RuptureSource for StochasticRuptureGenerator {
    fn rupture_for(&self, event: &Earthquake, seed: u64) -> Result<Rupture> {
        event.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(event_seed(seed, &event.event_id));
        let cfg = &self.config;

        let zone = self.zone_for(event);
        if zone.is_none() && !cfg.zones.is_empty() {
            debug!(
                "Event {} ({:.4}E, {:.4}N) is not in any source zone",
                event.event_id, event.longitude, event.latitude
            );
        }
        let depths = zone
            .and_then(|z| z.hypo_depths.as_deref())
            .unwrap_or(cfg.hypo_depths.as_slice());
        let planes = zone
            .and_then(|z| z.nodal_planes.as_deref())
            .unwrap_or(cfg.nodal_planes.as_slice());
        let usd = zone
            .and_then(|z| z.upper_seismogenic_depth)
            .unwrap_or(cfg.upper_seismogenic_depth);
        let lsd = zone
            .and_then(|z| z.lower_seismogenic_depth)
            .unwrap_or(cfg.lower_seismogenic_depth);

        // Always draw in the same order so a given event consumes the same random stream.
        let sampled_depth = *sample(depths, &mut rng);
        let plane = *sample(planes, &mut rng);
        check_plane(&plane)?;
        let (lo, hi) = cfg.aspect_limits;
        let aspect_ratio = if hi > lo { rng.gen_range(lo..hi) } else { lo };

        let depth = event.depth.unwrap_or(sampled_depth);
        let area = leonard_area(event.magnitude, plane.rake);
        let dims = rupture_dimensions(area, plane.dip, lsd - usd, aspect_ratio);
        let [top_left, top_right, bottom_left, bottom_right] =
            build_plane(usd, lsd, dims, &plane, event.longitude, event.latitude, depth);

        Ok(Rupture {
            magnitude: event.magnitude,
            strike: plane.strike,
            dip: plane.dip,
            rake: plane.rake,
            hypocenter: GeoPoint {
                lon: event.longitude,
                lat: event.latitude,
                depth,
            },
            top_left,
            top_right,
            bottom_left,
            bottom_right,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rupture::geodesy::distance_km;
    use chrono::{TimeZone, Utc};

    fn event(id: &str, magnitude: f64, depth: Option<f64>) -> Earthquake {
        Earthquake {
            event_id: id.to_string(),
            ses_id: Some(1),
            longitude: 13.4,
            latitude: 42.35,
            depth,
            magnitude,
            datetime: Utc.with_ymd_and_hms(2009, 4, 6, 1, 32, 39).unwrap(),
            rupture: None,
        }
    }

    #[test]
    fn test_leonard_area() {
        assert!((leonard_area(6.0, 0.0) - 10f64.powf(2.01)).abs() < 1e-9);
        assert!((leonard_area(6.0, 90.0) - 100.0).abs() < 1e-9);
        assert!((leonard_area(6.0, -170.0) - 10f64.powf(2.01)).abs() < 1e-9);
    }

    #[test]
    fn test_width_is_capped_by_layer() {
        let (length, horizontal, vertical) = rupture_dimensions(1000.0, 90.0, 10.0, 1.0);
        assert!((vertical - 10.0).abs() < 1e-9);
        assert!(horizontal.abs() < 1e-9);
        assert!((length * vertical - 1000.0).abs() < 1e-6);

        let (length, _, vertical) = rupture_dimensions(100.0, 90.0, 25.0, 1.0);
        assert!((length - 10.0).abs() < 1e-9 && (vertical - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_same_seed_same_rupture() -> Result<()> {
        let generator = StochasticRuptureGenerator::new(StochasticRuptureConfig::new())?;
        let eq = event("3-1", 5.5, None);
        let a = generator.rupture_for(&eq, 42)?;
        let b = generator.rupture_for(&eq, 42)?;
        assert_eq!(a, b);
        assert!([6.0, 10.0, 14.0].contains(&a.hypocenter.depth));
        assert_eq!(a.dip, 90.0);
        Ok(())
    }

    #[test]
    fn test_seed_depends_on_event_and_run() {
        assert_ne!(event_seed(1, "1-1"), event_seed(1, "1-2"));
        assert_ne!(event_seed(1, "1-1"), event_seed(2, "1-1"));
        assert_eq!(event_seed(7, "12-3"), event_seed(7, "12-3"));
    }

    #[test]
    fn test_rupture_stays_in_seismogenic_layer() -> Result<()> {
        let mut config = StochasticRuptureConfig::new();
        let plane = NodalPlane {
            strike: 30.0,
            dip: 45.0,
            rake: 90.0,
        };
        config.nodal_planes = vec![weighted(1.0, plane)];
        let generator = StochasticRuptureGenerator::new(config)?;
        for (i, depth) in [1.0, 12.0, 24.0].into_iter().enumerate() {
            let eq = event(&format!("1-{i}"), 6.5, Some(depth));
            let rup = generator.rupture_for(&eq, 9)?;
            assert!(rup.top_depth() >= -1e-9, "top {}", rup.top_depth());
            assert!(rup.bottom_depth() <= 25.0 + 1e-9, "bottom {}", rup.bottom_depth());
            assert!(rup.length() > 0.0);
            assert!(distance_km(rup.top_left.lon, rup.top_left.lat, 13.4, 42.35) < 100.0);
        }
        Ok(())
    }

    fn zone(dip: f64) -> SourceZone {
        let plane = NodalPlane {
            strike: 150.0,
            dip,
            rake: -90.0,
        };
        SourceZone {
            id: "Z1".to_string(),
            polygon: vec![(13.0, 42.0), (14.0, 42.0), (14.0, 43.0), (13.0, 43.0)],
            upper_seismogenic_depth: Some(2.0),
            lower_seismogenic_depth: Some(18.0),
            hypo_depths: Some(vec![weighted(1.0, 8.0)]),
            nodal_planes: Some(vec![weighted(1.0, plane)]),
        }
    }

    #[test]
    fn test_zone_distributions_take_precedence() -> Result<()> {
        let mut config = StochasticRuptureConfig::new();
        config.zones.push(zone(50.0));
        let generator = StochasticRuptureGenerator::new(config)?;
        let rup = generator.rupture_for(&event("1-1", 5.0, None), 1)?;
        assert_eq!(rup.hypocenter.depth, 8.0);
        assert_eq!(rup.strike, 150.0);
        assert!(rup.top_depth() >= 2.0 - 1e-9);
        Ok(())
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = StochasticRuptureConfig::new();
        config.hypo_depths = vec![weighted(0.5, 10.0)];
        assert!(StochasticRuptureGenerator::new(config).is_err());
        let mut config = StochasticRuptureConfig::new();
        config.lower_seismogenic_depth = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_flat_zone_plane_rejected() {
        let mut config = StochasticRuptureConfig::new();
        config.zones.push(zone(0.0));
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("Z1"));
        assert!(StochasticRuptureGenerator::new(config).is_err());
    }
}
