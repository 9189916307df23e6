//! Damage scale and cumulative damage arithmetic.
//!
//! Damage states are user-supplied labels in a fixed order of increasing severity. The first
//! label is the "no damage" floor. The order is never inferred from the labels themselves.

pub mod cumulative;

use std::collections::HashMap;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

pub use cumulative::{CumulativeUpdate, FragilityRegime};

/// Position of a damage state on the [`DamageScale`] (0 = no damage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DamageState(usize);

impl DamageState {
    pub const NONE: DamageState = DamageState(0);

    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }

    pub fn is_undamaged(self) -> bool {
        self.0 == 0
    }
}

/// Ordered list of damage-state labels, least severe first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct DamageScale {
    labels: Vec<String>,
    #[serde(skip)]
    lookup: HashMap<String, usize>,
}

impl TryFrom<Vec<String>> for DamageScale {
    type Error = anyhow::Error;

    fn try_from(labels: Vec<String>) -> Result<Self> {
        Self::new(labels)
    }
}

impl From<DamageScale> for Vec<String> {
    fn from(scale: DamageScale) -> Self {
        scale.labels
    }
}

impl DamageScale {
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            bail!("The damage scale needs at least one damage state");
        }
        let mut lookup = HashMap::with_capacity(labels.len());
        for (i, label) in labels.iter().enumerate() {
            if label.is_empty() || label.contains('/') {
                bail!("Invalid damage state label '{label}'");
            }
            if lookup.insert(label.clone(), i).is_some() {
                bail!("Damage state '{label}' appears more than once in the damage scale");
            }
        }
        Ok(Self { labels, lookup })
    }

    /// Convenience constructor for `DS0..DS{n-1}`.
    pub fn numbered(n: usize) -> Result<Self> {
        Self::new((0..n).map(|i| format!("DS{i}")).collect())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label(&self, state: DamageState) -> &str {
        &self.labels[state.index()]
    }

    pub fn state(&self, label: &str) -> Option<DamageState> {
        self.lookup.get(label).copied().map(DamageState)
    }

    /// Like [`Self::state`], but an unknown label is an error.
    pub fn require(&self, label: &str) -> Result<DamageState> {
        match self.state(label) {
            Some(ds) => Ok(ds),
            None => bail!(
                "Unknown damage state '{label}' (expected one of: {})",
                self.labels.join(", ")
            ),
        }
    }

    pub fn states(&self) -> impl Iterator<Item = DamageState> + '_ {
        (0..self.labels.len()).map(DamageState)
    }

    pub fn most_severe(&self) -> DamageState {
        DamageState(self.labels.len() - 1)
    }

    /// Engine-facing building-class tag, e.g. `"CR/LFINF/H:1/DS2"`.
    pub fn tag(&self, building_class: &str, state: DamageState) -> String {
        format!("{building_class}/{}", self.label(state))
    }

    /// Inverse of [`Self::tag`]: splits at the last `/`.
    pub fn split_tag<'a>(&self, tag: &'a str) -> Result<(&'a str, DamageState)> {
        let Some((class, label)) = tag.rsplit_once('/') else {
            bail!("Building class tag '{tag}' carries no damage state");
        };
        Ok((class, self.require(label)?))
    }

    /// Converts a label-keyed table into a dense vector ordered by severity.
    ///
    /// Missing labels are an error; extra labels are an error too.
    pub fn dense<'a, I>(&self, what: &str, entries: I) -> Result<Vec<f64>>
    where
        I: IntoIterator<Item = (&'a String, &'a f64)>,
    {
        let mut out = vec![None; self.len()];
        for (label, &value) in entries {
            let ds = self
                .state(label)
                .ok_or_else(|| anyhow::anyhow!("{what}: unknown damage state '{label}'"))?;
            out[ds.index()] = Some(value);
        }
        out.into_iter()
            .enumerate()
            .map(|(i, v)| {
                v.ok_or_else(|| {
                    anyhow::anyhow!("{what}: missing damage state '{}'", self.labels[i])
                })
            })
            .collect()
    }
}
