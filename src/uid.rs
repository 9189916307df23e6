use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Clone, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// A physical building, or an aggregate of co-located buildings.
    BuildingId
);

string_id!(
    /// One (building, building class) combination of the undamaged exposure.
    OriginalAssetId
);

string_id!(
    /// Row identifier handed to the hazard/damage engine.
    ///
    /// Only valid for the snapshot it was issued with; regenerated on every engine call.
    TransientAssetId
);

impl TransientAssetId {
    /// The `n`-th row of a snapshot (1-based, as the engine tables are).
    pub fn nth(n: usize) -> Self {
        Self(format!("res_{n}"))
    }
}

/// Identifier of one program run.
///
/// Prefixes every scratch directory handed to the engine, so that concurrent runs (and
/// concurrent realizations of one run) never share scratch space.
#[derive(Eq, PartialEq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
