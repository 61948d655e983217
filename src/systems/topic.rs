//! topic.rs
//! Asset mirroring one message-bus topic. Subscribed payloads update the
//! stored signal; writes are published and become the new stored value.

use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetProfile, ServiceDef, Signal};
use crate::bus::TopicBus;
use crate::error::{ActuatorError, OwnerError};
use crate::owner::{AssetState, Reply};
use crate::systems::LastReading;

pub const ACCESS: &str = "access";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicTraits {
    pub topic: String,
    /// Detail keys for each topic level, e.g. `["Location", "Device"]`.
    #[serde(default)]
    pub pattern: Vec<String>,
    pub unit: String,
}

pub struct TopicAsset {
    profile: AssetProfile,
    traits: TopicTraits,
    reading: LastReading,
    bus: Arc<dyn TopicBus>,
}

impl TopicAsset {
    pub fn new(profile: AssetProfile, traits: TopicTraits, bus: Arc<dyn TopicBus>) -> Self {
        Self {
            profile,
            traits,
            reading: LastReading::default(),
            bus,
        }
    }

    pub fn default_services(definition: &str, unit: &str) -> Vec<ServiceDef> {
        vec![ServiceDef::new(
            definition,
            ACCESS,
            unit,
            "reads the last message (GET) or publishes a new one (PUT)",
        )]
    }
}

impl Asset for TopicAsset {
    fn profile(&self) -> &AssetProfile {
        &self.profile
    }
}

#[async_trait]
impl AssetState for TopicAsset {
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
        let payload = serde_json::to_vec(&signal).map_err(|e| ActuatorError::Publish {
            topic: self.traits.topic.clone(),
            reason: e.to_string(),
        })?;
        self.bus.publish(&self.traits.topic, payload)?;
        info!("[{}] published {} {}", self.traits.topic, signal.value, signal.unit);
        self.reading.store(signal.clone());
        Ok(signal)
    }

    fn absorb(&mut self, signal: Signal) {
        self.reading.store(signal);
    }
}
