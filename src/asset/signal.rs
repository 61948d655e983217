//! signal.rs
//! The analog signal form exchanged between samplers, owners, the gateway and
//! remote systems: `{value, unit, timestamp, version}` with RFC3339 time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SIGNAL_VERSION: &str = "SignalA_v1.0";

pub const PERCENT: &str = "Percent";
pub const CELSIUS: &str = "Celsius";
pub const MILLISECOND: &str = "millisecond";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    SIGNAL_VERSION.to_string()
}

impl Signal {
    /// Signal captured now.
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self::at(value, unit, Utc::now())
    }

    pub fn at(value: f64, unit: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            unit: unit.into(),
            timestamp,
            version: default_version(),
        }
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.value.is_finite()
    }
}
