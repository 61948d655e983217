//! thermometer.rs
//! 1-wire temperature probe. Read-only: a sampler keeps the reading fresh.

use async_trait::async_trait;
use log::trace;

use crate::asset::{signal::CELSIUS, Asset, AssetProfile, ServiceDef, Signal};
use crate::error::OwnerError;
use crate::owner::{AssetState, Reply};
use crate::systems::LastReading;

pub const TEMPERATURE: &str = "temperature";

pub struct Thermometer {
    profile: AssetProfile,
    reading: LastReading,
}

impl Thermometer {
    pub fn new(profile: AssetProfile) -> Self {
        Self {
            profile,
            reading: LastReading::default(),
        }
    }

    pub fn default_services() -> Vec<ServiceDef> {
        vec![ServiceDef::new(
            TEMPERATURE,
            TEMPERATURE,
            CELSIUS,
            "provides the temperature (GET) of the resource temperature sensor",
        )]
    }
}

impl Asset for Thermometer {
    fn profile(&self) -> &AssetProfile {
        &self.profile
    }
}

#[async_trait]
impl AssetState for Thermometer {
    fn read(&self, service: &str) -> Reply {
        match service {
            TEMPERATURE => self.reading.get(),
            other => Err(OwnerError::UnknownService(other.to_string())),
        }
    }

    fn absorb(&mut self, signal: Signal) {
        trace!("[{}] {:.3} {}", self.profile.name, signal.value, signal.unit);
        self.reading.store(signal);
    }
}
