//! Damage assessments from an independent source (e.g. structural health monitoring).

use std::collections::BTreeMap;

use anyhow::{Context, Result};

use crate::damage::DamageScale;
use crate::uid::BuildingId;

/// As read from disk: event id, then building id, then damage state label.
pub type ExternalAssessmentTables = BTreeMap<String, BTreeMap<BuildingId, BTreeMap<String, f64>>>;

/// Per event, the damage-state probabilities of the buildings that were assessed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalAssessments {
    by_event: BTreeMap<String, BTreeMap<BuildingId, Vec<f64>>>,
}

impl ExternalAssessments {
    pub fn new(tables: &ExternalAssessmentTables, scale: &DamageScale) -> Result<Self> {
        let mut by_event = BTreeMap::new();
        for (event_id, buildings) in tables {
            let mut resolved = BTreeMap::new();
            for (building_id, dist) in buildings {
                let mut dense = vec![0.0; scale.len()];
                for (label, p) in dist {
                    let ds = scale.require(label).with_context(|| {
                        format!(
                            "External assessment of building '{building_id}' for event \
                             '{event_id}'"
                        )
                    })?;
                    dense[ds.index()] = *p;
                }
                resolved.insert(building_id.clone(), dense);
            }
            by_event.insert(event_id.clone(), resolved);
        }
        Ok(Self { by_event })
    }

    pub fn for_event(&self, event_id: &str) -> Option<&BTreeMap<BuildingId, Vec<f64>>> {
        self.by_event.get(event_id).filter(|b| !b.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.by_event.is_empty()
    }
}
