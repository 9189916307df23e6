//! Output directory of a run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::io::{file_name_for, write_json};
use crate::report::{EventRecord, ForecastRecord, RunReport};
use crate::uid::RunId;

pub const REPORT_FILE: &str = "report.json";
pub const INTERMEDIATE_DIR: &str = "intermediate";
pub const SCRATCH_DIR: &str = "scratch";

#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Creates the output directory. Fails if it already holds the report of a run.
    pub fn prepare(root: &Path) -> Result<Self> {
        let report = root.join(REPORT_FILE);
        if report.exists() {
            bail!(
                "Output directory {} already contains a run report, refusing to overwrite it",
                root.display()
            );
        }
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create directory: {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parent of the scratch space of every run writing here.
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    /// Scratch space of one run; engine calls get subdirectories of it.
    pub fn scratch_root(&self, run_id: RunId) -> PathBuf {
        self.scratch_dir().join(run_id.to_string())
    }

    pub fn intermediate_dir(&self) -> PathBuf {
        self.root.join(INTERMEDIATE_DIR)
    }

    pub fn rla_path(&self, event_id: &str) -> PathBuf {
        self.root.join(format!("rla_{}.json", file_name_for(event_id)))
    }

    pub fn oelf_path(&self, forecast_id: &str) -> PathBuf {
        self.root.join(format!("oelf_{}.json", file_name_for(forecast_id)))
    }

    pub fn write_rla(&self, record: &EventRecord) -> Result<()> {
        write_json(&self.rla_path(&record.earthquake.event_id), record)
    }

    pub fn write_oelf(&self, record: &ForecastRecord) -> Result<()> {
        write_json(&self.oelf_path(&record.forecast_id), record)
    }

    pub fn write_report(&self, report: &RunReport) -> Result<()> {
        let path = self.root.join(REPORT_FILE);
        write_json(&path, &report.summary())?;
        info!("Run report written to {}", path.display());
        Ok(())
    }

    pub fn remove_scratch(&self, run_id: RunId) {
        let dir = self.scratch_root(run_id);
        if dir.exists()
            && let Err(err) = fs::remove_dir_all(&dir)
        {
            warn!("Failed to remove scratch directory {}: {err}", dir.display());
        }
        // Only succeeds once no other run uses the parent.
        let _ = fs::remove_dir(self.scratch_dir());
    }
}
