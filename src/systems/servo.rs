//! servo.rs
//! Standard hobby servo on a PWM channel. The position is kept in whole
//! percent of its travel; the pulse is recomputed on every write.

use async_trait::async_trait;
use log::{info, warn};

use crate::asset::{signal::PERCENT, Asset, AssetProfile, ServiceDef, Signal};
use crate::device::{servo_pulse_width_us, Actuator};
use crate::error::OwnerError;
use crate::owner::{AssetState, Reply};

pub const ROTATION: &str = "rotation";
const NEUTRAL: u8 = 50;

pub struct Servo {
    profile: AssetProfile,
    position: u8,
    output: Box<dyn Actuator>,
}

impl Servo {
    pub fn new(profile: AssetProfile, output: Box<dyn Actuator>) -> Self {
        Self {
            profile,
            position: NEUTRAL,
            output,
        }
    }

    pub fn default_services() -> Vec<ServiceDef> {
        vec![ServiceDef::new(
            ROTATION,
            ROTATION,
            PERCENT,
            "provides the current position (GET) or sets a new one (PUT)",
        )]
    }

    fn position_signal(&self) -> Signal {
        Signal::new(f64::from(self.position), PERCENT)
    }
}

impl Asset for Servo {
    fn profile(&self) -> &AssetProfile {
        &self.profile
    }
}

#[async_trait]
impl AssetState for Servo {
    async fn start(&mut self) {
        let pulse = servo_pulse_width_us(self.position);
        if let Err(e) = self.output.apply(pulse).await {
            warn!("[{}] failed to center servo: {}", self.profile.name, e);
        }
    }

    fn read(&self, service: &str) -> Reply {
        match service {
            ROTATION => Ok(self.position_signal()),
            other => Err(OwnerError::UnknownService(other.to_string())),
        }
    }

    async fn write(&mut self, service: &str, signal: Signal) -> Reply {
        if service != ROTATION {
            return Err(OwnerError::UnknownService(service.to_string()));
        }
        let position = signal.value.round().clamp(0.0, 100.0) as u8;
        let pulse = servo_pulse_width_us(position);
        self.output.apply(pulse).await?;
        self.position = position;
        info!("[{}] position {}% ({} µs)", self.profile.name, position, pulse);
        Ok(self.position_signal())
    }

    // Position is commanded, never sampled.
    fn absorb(&mut self, _signal: Signal) {}

    async fn release(&mut self) {
        let neutral = servo_pulse_width_us(NEUTRAL);
        if let Err(e) = self.output.apply(neutral).await {
            warn!("[{}] failed to return servo to neutral: {}", self.profile.name, e);
        }
        if let Err(e) = self.output.release().await {
            warn!("[{}] failed to de-energize servo: {}", self.profile.name, e);
        }
    }
}
