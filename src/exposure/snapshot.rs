use std::collections::HashMap;

use serde::Serialize;

use crate::damage::DamageState;
use crate::uid::{BuildingId, OriginalAssetId, TransientAssetId};

/// One row of the flat exposure table handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRow {
    pub asset_id: TransientAssetId,
    pub original_asset_id: OriginalAssetId,
    pub building_id: BuildingId,
    /// Building class tagged with the damage state, e.g. `"CR/LFINF/H:1/DS2"`.
    pub taxonomy: String,
    #[serde(skip)]
    pub damage_state: DamageState,
    pub number: f64,
    pub structural: f64,
    pub occupants: f64,
    pub lon: f64,
    pub lat: f64,
    pub occupancy: String,
}

/// Exposure table for a single engine call.
///
/// Transient ids are only meaningful together with the snapshot that issued them.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ExposureSnapshot {
    rows: Vec<SnapshotRow>,
    #[serde(skip)]
    index: HashMap<TransientAssetId, usize>,
}

impl ExposureSnapshot {
    pub(crate) fn from_rows(rows: Vec<SnapshotRow>) -> Self {
        let index = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.asset_id.clone(), i))
            .collect();
        Self { rows, index }
    }

    pub fn rows(&self) -> &[SnapshotRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: &TransientAssetId) -> Option<&SnapshotRow> {
        self.index.get(id).map(|&i| &self.rows[i])
    }

    /// Rows issued for one original asset.
    pub fn rows_for<'a>(
        &'a self,
        original: &'a OriginalAssetId,
    ) -> impl Iterator<Item = &'a SnapshotRow> + 'a {
        self.rows
            .iter()
            .filter(move |r| &r.original_asset_id == original)
    }

    pub fn total_occupants(&self) -> f64 {
        self.rows.iter().map(|r| r.occupants).sum()
    }
}
