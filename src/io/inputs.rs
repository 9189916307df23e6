//! Input directory of a run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::exposure::OriginalAsset;
use crate::external::ExternalAssessmentTables;
use crate::io::read_json;
use crate::losses::ConsequenceTables;
use crate::oelf::{CatalogueEntry, ForecastCatalogue};
use crate::rupture::Earthquake;

pub const EXPOSURE_FILE: &str = "exposure.json";
pub const CONSEQUENCES_FILE: &str = "consequences.json";
pub const TRIGGERS_FILE: &str = "triggers.json";
pub const EXTERNAL_ASSESSMENTS_FILE: &str = "external_assessments.json";
pub const DAMAGE_DIR: &str = "damage";
pub const CATALOGUES_DIR: &str = "catalogues";

/// One entry of the triggering sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// A real earthquake.
    Rla { earthquake: Earthquake },
    /// A seismicity forecast, read from `catalogues/<catalogue>`.
    Oelf {
        forecast_id: String,
        catalogue: String,
    },
}

/// Paths of the input directory.
#[derive(Debug, Clone)]
pub struct InputLayout {
    root: PathBuf,
}

impl InputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exposure(&self) -> PathBuf {
        self.root.join(EXPOSURE_FILE)
    }

    pub fn consequences(&self) -> PathBuf {
        self.root.join(CONSEQUENCES_FILE)
    }

    pub fn triggers(&self) -> PathBuf {
        self.root.join(TRIGGERS_FILE)
    }

    pub fn external_assessments(&self) -> PathBuf {
        self.root.join(EXTERNAL_ASSESSMENTS_FILE)
    }

    /// Precomputed damage results, one file per batch.
    pub fn damage_dir(&self) -> PathBuf {
        self.root.join(DAMAGE_DIR)
    }

    pub fn catalogue(&self, name: &str) -> Result<PathBuf> {
        let path = Path::new(name);
        if path.components().count() != 1 || path.file_name().is_none() {
            bail!("Catalogue '{name}' must be a plain file name inside {CATALOGUES_DIR}/");
        }
        Ok(self.root.join(CATALOGUES_DIR).join(path))
    }
}

/// Everything read from the input directory.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub assets: Vec<OriginalAsset>,
    pub consequences: ConsequenceTables,
    pub triggers: Vec<Trigger>,
    pub external: ExternalAssessmentTables,
    /// Keyed by the file name used in the triggers.
    pub catalogues: BTreeMap<String, ForecastCatalogue>,
}

impl RunInputs {
    pub fn load(layout: &InputLayout) -> Result<Self> {
        let assets: Vec<OriginalAsset> = read_json(&layout.exposure())?;
        let consequences: ConsequenceTables = read_json(&layout.consequences())?;
        let triggers: Vec<Trigger> = read_json(&layout.triggers())?;

        let external_path = layout.external_assessments();
        let external: ExternalAssessmentTables = if external_path.exists() {
            read_json(&external_path)?
        } else {
            ExternalAssessmentTables::new()
        };

        let mut forecast_ids = BTreeSet::new();
        let mut catalogues = BTreeMap::new();
        for trigger in &triggers {
            let Trigger::Oelf {
                forecast_id,
                catalogue,
            } = trigger
            else {
                continue;
            };
            if !forecast_ids.insert(forecast_id.as_str()) {
                bail!("Forecast '{forecast_id}' is triggered more than once");
            }
            if !catalogues.contains_key(catalogue) {
                let entries: Vec<CatalogueEntry> = read_json(&layout.catalogue(catalogue)?)?;
                catalogues.insert(catalogue.clone(), ForecastCatalogue::new(entries));
            }
        }

        info!(
            "Read {} asset(s), {} trigger(s) and {} catalogue(s) from {}",
            assets.len(),
            triggers.len(),
            catalogues.len(),
            layout.root().display()
        );
        Ok(Self {
            assets,
            consequences,
            triggers,
            external,
            catalogues,
        })
    }
}
