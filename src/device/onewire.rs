//! onewire.rs
//! DS18B20-style 1-wire thermometer read through the kernel's w1 sysfs tree.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::device::SampleSource;
use crate::error::SourceError;

pub const W1_DEVICES: &str = "/sys/bus/w1/devices";

pub struct OneWireThermometer {
    path: PathBuf,
}

impl OneWireThermometer {
    /// `device` is the sensor id, e.g. `28-00000a1b2c3d`.
    pub fn new(root: impl Into<PathBuf>, device: &str) -> Self {
        Self {
            path: root.into().join(device).join("w1_slave"),
        }
    }
}

#[async_trait]
impl SampleSource for OneWireThermometer {
    async fn sample(&mut self) -> Result<f64, SourceError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;
        parse_w1_slave(&raw)
    }
}

/// Degrees Celsius from the two-line `w1_slave` dump; the second line ends in
/// `t=<millidegrees>`.
pub fn parse_w1_slave(raw: &str) -> Result<f64, SourceError> {
    if raw.trim().is_empty() {
        return Err(SourceError::Parse("empty w1_slave".into()));
    }
    let line = raw
        .lines()
        .nth(1)
        .ok_or_else(|| SourceError::Parse(format!("truncated w1_slave: {raw:?}")))?;
    let (_, milli) = line
        .split_once("t=")
        .ok_or_else(|| SourceError::Parse(format!("no t= in {line:?}")))?;
    let milli: f64 = milli
        .trim()
        .parse()
        .map_err(|e| SourceError::Parse(format!("{milli:?}: {e}")))?;
    Ok(milli / 1000.0)
}
