//! Fill-level bands. Boundaries and labels come from configuration.

use serde::{Deserialize, Serialize};

use crate::tasks::Priority;

/// Levels at or above `min_level` (and below the next band) map to `priority`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub min_level: f64,
    pub priority: Priority,
    pub label: String,
}

/// The `[thresholds]` section: bands in ascending `min_level` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBands {
    #[serde(default = "default_bands")]
    pub bands: Vec<ThresholdBand>,
}

fn default_bands() -> Vec<ThresholdBand> {
    vec![
        ThresholdBand {
            min_level: 85.0,
            priority: Priority::Medium,
            label: "warning".into(),
        },
        ThresholdBand {
            min_level: 90.0,
            priority: Priority::High,
            label: "high".into(),
        },
        ThresholdBand {
            min_level: 95.0,
            priority: Priority::Critical,
            label: "critical".into(),
        },
    ]
}

impl Default for ThresholdBands {
    fn default() -> Self {
        Self {
            bands: default_bands(),
        }
    }
}

/// Label used for a level below every band.
pub const NORMAL_LABEL: &str = "normal";

impl ThresholdBands {
    /// The highest band whose floor the level reaches.
    pub fn classify(&self, level_percent: f64) -> Option<&ThresholdBand> {
        self.bands
            .iter()
            .rev()
            .find(|band| level_percent >= band.min_level)
    }

    pub fn label_for(&self, level_percent: f64) -> &str {
        self.classify(level_percent)
            .map(|b| b.label.as_str())
            .unwrap_or(NORMAL_LABEL)
    }

    /// Bands must be non-empty, inside 0–100, strictly ascending, and never
    /// map a higher band to a lower priority.
    pub fn validate(&self) -> Result<(), String> {
        if self.bands.is_empty() {
            return Err("at least one threshold band is required".into());
        }
        for band in &self.bands {
            if !(0.0..=100.0).contains(&band.min_level) {
                return Err(format!("band '{}' floor {} outside 0-100", band.label, band.min_level));
            }
            if band.label.trim().is_empty() {
                return Err(format!("band at {} has an empty label", band.min_level));
            }
        }
        for pair in self.bands.windows(2) {
            if pair[1].min_level <= pair[0].min_level {
                return Err(format!(
                    "bands must ascend: '{}' ({}) follows '{}' ({})",
                    pair[1].label, pair[1].min_level, pair[0].label, pair[0].min_level
                ));
            }
            if pair[1].priority < pair[0].priority {
                return Err(format!(
                    "band '{}' has lower priority than '{}'",
                    pair[1].label, pair[0].label
                ));
            }
        }
        Ok(())
    }
}
