pub mod config;
pub mod damage;
pub mod engine;
pub mod exposure;
pub mod external;
pub mod io;
pub mod losses;
pub mod occupancy;
pub mod oelf;
pub mod report;
pub mod rla;
pub mod runner;
pub mod rupture;
pub mod session;
pub mod uid;

// Prelude
pub use config::{OelfConfig, RunConfig};
pub use damage::{DamageScale, DamageState, FragilityRegime};
pub use engine::{DamageRow, DamageTable, EngineOutcome, EngineRequest, HazardEngine};
pub use exposure::{ExposureLedger, ExposureSnapshot, OriginalAsset, RealizationAverage};
pub use occupancy::{OccupancyTimeline, TimeOfDay};
pub use oelf::{ForecastCatalogue, ForecastOrchestrator};
pub use report::{EventRecord, ForecastRecord, LossRatios, RunReport};
pub use rupture::{Earthquake, Rupture, RuptureSource};
pub use session::{Session, run};
pub use uid::{BuildingId, OriginalAssetId, RunId, TransientAssetId};
