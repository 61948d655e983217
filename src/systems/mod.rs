//! Concrete asset variants. Each one is an [`AssetState`](crate::owner::AssetState)
//! run by its own owner task; configuration-specific fields stay private.

pub mod analog;
pub mod leveler;
pub mod servo;
pub mod thermometer;
pub mod topic;

use crate::asset::Signal;
use crate::error::OwnerError;

pub use analog::AnalogChannel;
pub use leveler::Leveler;
pub use servo::Servo;
pub use thermometer::Thermometer;
pub use topic::TopicAsset;

/// Last sampled signal, kept with its capture timestamp.
#[derive(Debug, Clone, Default)]
pub struct LastReading {
    signal: Option<Signal>,
}

impl LastReading {
    pub fn seeded(signal: Signal) -> Self {
        Self {
            signal: Some(signal),
        }
    }

    pub fn store(&mut self, signal: Signal) {
        self.signal = Some(signal);
    }

    pub fn get(&self) -> Result<Signal, OwnerError> {
        self.signal.clone().ok_or(OwnerError::NoData)
    }
}
