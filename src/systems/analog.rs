//! analog.rs
//! Analog I/O channel of a PLC-style module. GET returns the last normalized
//! input in percent; PUT/POST drives the output word when an actuator is bound.

use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::asset::{signal::PERCENT, Asset, AssetProfile, ServiceDef, Signal};
use crate::device::{percent_to_raw, Actuator};
use crate::error::OwnerError;
use crate::owner::{AssetState, Reply};
use crate::systems::LastReading;

pub const ACCESS: &str = "access";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalogTraits {
    /// Channel name on the I/O module, e.g. `InputValue_1`.
    pub address: String,
    /// Start-up value in percent.
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub min_value: f64,
    #[serde(default = "default_max")]
    pub max_value: f64,
}

fn default_max() -> f64 {
    10_000.0
}

pub struct AnalogChannel {
    profile: AssetProfile,
    traits: AnalogTraits,
    reading: LastReading,
    output: Option<Box<dyn Actuator>>,
}

impl AnalogChannel {
    pub fn new(profile: AssetProfile, traits: AnalogTraits, output: Option<Box<dyn Actuator>>) -> Self {
        let reading = LastReading::seeded(Signal::at(traits.value, PERCENT, Utc::now()));
        Self {
            profile,
            traits,
            reading,
            output,
        }
    }

    pub fn default_services() -> Vec<ServiceDef> {
        vec![ServiceDef::new(
            "level",
            ACCESS,
            PERCENT,
            "reads the input (GET) or changes the output (POST) of the channel",
        )]
    }
}

impl Asset for AnalogChannel {
    fn profile(&self) -> &AssetProfile {
        &self.profile
    }
}

#[async_trait]
impl AssetState for AnalogChannel {
    fn read(&self, service: &str) -> Reply {
        match service {
            ACCESS => self.reading.get(),
            other => Err(OwnerError::UnknownService(other.to_string())),
        }
    }

    async fn write(&mut self, service: &str, signal: Signal) -> Reply {
        if service != ACCESS {
            return Err(OwnerError::UnknownService(service.to_string()));
        }
        let Some(output) = self.output.as_mut() else {
            return Err(OwnerError::Rejected(format!(
                "{} is an input channel",
                self.traits.address
            )));
        };

        let percent = signal.value.clamp(0.0, 100.0);
        let raw = percent_to_raw(percent);
        info!(
            "[{}] output request {:.2}% -> {} on {}",
            self.profile.name, percent, raw, self.traits.address
        );
        output.apply(raw).await?;
        Ok(Signal::new(percent, PERCENT))
    }

    fn absorb(&mut self, signal: Signal) {
        self.reading.store(signal);
    }

    async fn release(&mut self) {
        if let Some(output) = self.output.as_mut() {
            if let Err(e) = output.release().await {
                warn!("[{}] releasing {} failed: {}", self.profile.name, self.traits.address, e);
            }
        }
    }
}
