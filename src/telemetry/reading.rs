use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;

/// One fill-level sample from a networked bin. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinReading {
    pub bin_id: String,
    /// Fill level, 0–100.
    pub level_percent: f64,
    pub weight_kg: f64,
    pub height_percent: f64,
    pub gps_valid: bool,
    #[serde(default)]
    pub satellite_count: u8,
    pub timestamp: DateTime<Utc>,
}

impl BinReading {
    /// Reject readings a sensor could not have produced.
    pub fn validate(&self) -> Result<(), TelemetryError> {
        let invalid = |reason: String| TelemetryError::InvalidReading {
            bin_id: self.bin_id.clone(),
            reason,
        };

        if self.bin_id.trim().is_empty() {
            return Err(invalid("empty bin id".into()));
        }
        if !(0.0..=100.0).contains(&self.level_percent) {
            return Err(invalid(format!("level {} outside 0-100", self.level_percent)));
        }
        if !(0.0..=100.0).contains(&self.height_percent) {
            return Err(invalid(format!("height {} outside 0-100", self.height_percent)));
        }
        if !self.weight_kg.is_finite() || self.weight_kg < 0.0 {
            return Err(invalid(format!("weight {} is not a valid mass", self.weight_kg)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(level: f64) -> BinReading {
        BinReading {
            bin_id: "bin1".into(),
            level_percent: level,
            weight_kg: 0.041,
            height_percent: 0.0,
            gps_valid: true,
            satellite_count: 7,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn accepts_boundary_levels() {
        assert!(reading(0.0).validate().is_ok());
        assert!(reading(100.0).validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(reading(100.5).validate().is_err());
        assert!(reading(f64::NAN).validate().is_err());

        let mut r = reading(50.0);
        r.weight_kg = -1.0;
        assert!(r.validate().is_err());

        let mut r = reading(50.0);
        r.bin_id = " ".into();
        assert!(r.validate().is_err());
    }

    #[test]
    fn parses_camel_case_json_line() {
        let line = r#"{"binId":"bin1","levelPercent":88,"weightKg":0.041,"heightPercent":0,"gpsValid":false,"timestamp":"2026-10-19T08:00:00Z"}"#;
        let r: BinReading = serde_json::from_str(line).unwrap();
        assert_eq!(r.bin_id, "bin1");
        assert_eq!(r.level_percent, 88.0);
        assert_eq!(r.satellite_count, 0);
        assert!(!r.gps_valid);
    }
}
