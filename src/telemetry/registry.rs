use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const UNKNOWN_LOCATION: &str = "Unknown location";

/// Display metadata for a bin (`[[bins]]` in the config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Maps bin ids to names and locations.
#[derive(Debug, Clone, Default)]
pub struct BinRegistry {
    bins: HashMap<String, BinInfo>,
}

impl BinRegistry {
    pub fn new(bins: impl IntoIterator<Item = BinInfo>) -> Self {
        Self {
            bins: bins.into_iter().map(|b| (b.id.clone(), b)).collect(),
        }
    }

    /// `(name, location)` for a bin; unknown bins get placeholder values.
    pub fn describe(&self, bin_id: &str) -> (String, String) {
        let info = self.bins.get(bin_id);
        let name = info
            .and_then(|b| b.name.clone())
            .unwrap_or_else(|| format!("Bin {bin_id}"));
        let location = info
            .and_then(|b| b.location.clone())
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());
        (name, location)
    }
}
