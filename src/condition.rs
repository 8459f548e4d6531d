use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// Categorical soil moisture condition derived from a raw sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Dry,
    Normal,
    Wet,
    Unknown,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Condition::Dry => "dry",
            Condition::Normal => "normal",
            Condition::Wet => "wet",
            Condition::Unknown => "unknown",
        }
    }

    pub fn is_abnormal(self) -> bool {
        matches!(self, Condition::Dry | Condition::Wet)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Calibration for the resistive analog scale.
///
/// | Reading                  | Condition |
/// |--------------------------|-----------|
/// | `v < dry`                | dry       |
/// | `dry <= v <= wet`        | normal    |
/// | `v > wet`                | wet       |
///
/// Defaults (1200 / 1800) match the stock soil probes; deployments with
/// different probes override them through `DRY_THRESHOLD` / `WET_THRESHOLD`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    dry: f64,
    wet: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { dry: 1200.0, wet: 1800.0 }
    }
}

impl Thresholds {
    pub fn new(dry: f64, wet: f64) -> Result<Self> {
        if !dry.is_finite() || !wet.is_finite() {
            bail!("thresholds must be finite numbers");
        }
        if dry >= wet {
            bail!("dry threshold ({dry}) must be below wet threshold ({wet})");
        }
        Ok(Self { dry, wet })
    }

    /// Map a reading to exactly one condition. `None` is `Unknown`.
    pub fn classify(&self, value: Option<f64>) -> Condition {
        match value {
            None => Condition::Unknown,
            Some(v) if v.is_nan() => Condition::Unknown,
            Some(v) if v < self.dry => Condition::Dry,
            Some(v) if v <= self.wet => Condition::Normal,
            Some(_) => Condition::Wet,
        }
    }

    /// Build one alert message covering every abnormal reading, or `None`
    /// when both readings are normal or unknown.
    pub fn check_anomaly(&self, readings: [(&str, Option<f64>); 2]) -> Option<String> {
        let phrases: Vec<String> = readings
            .iter()
            .filter_map(|(label, value)| {
                let v = (*value)?;
                let condition = self.classify(Some(v));
                condition
                    .is_abnormal()
                    .then(|| format!("{label} is {condition} ({v})"))
            })
            .collect();

        if phrases.is_empty() {
            None
        } else {
            Some(phrases.join(" & "))
        }
    }
}
