//! Hardware boundary: sample sources and actuators.
//!
//! Owners and samplers only see these two traits. Bindings come in three
//! flavours: native I/O (`onewire`, `pwm`), subprocess shims around vendor
//! command-line tools (`command`) and simulation (`simulated`).

pub mod command;
pub mod onewire;
pub mod pwm;
pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ActuatorError, SourceError};

pub use command::{CommandActuator, CommandSource};
pub use onewire::OneWireThermometer;
pub use pwm::SysfsPwm;
pub use simulated::{RecordingActuator, SimulatedSource, SineSource};

/// Possibly slow, fallible read primitive.
#[async_trait]
pub trait SampleSource: Send {
    async fn sample(&mut self) -> Result<f64, SourceError>;
}

/// Device with a physical effect. Commands are raw device units
/// (hundredths of a percent, pulse width in microseconds, ...).
#[async_trait]
pub trait Actuator: Send {
    async fn apply(&mut self, raw: i64) -> Result<(), ActuatorError>;

    /// De-energize the output.
    async fn release(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

/// Conversion from a raw reading to the asset's declared unit range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalizer {
    #[default]
    Identity,
    /// Linear map of `[min, max]` onto `[0, 100]`, clamped.
    Percent { min: f64, max: f64 },
}

impl Normalizer {
    pub fn apply(&self, raw: f64) -> f64 {
        match *self {
            Normalizer::Identity => raw,
            Normalizer::Percent { min, max } => normalize_to_percent(raw, min, max),
        }
    }
}

pub fn normalize_to_percent(raw: f64, min: f64, max: f64) -> f64 {
    if max <= min || raw.is_nan() {
        return 0.0;
    }
    (100.0 * (raw - min) / (max - min)).clamp(0.0, 100.0)
}

/// Percent to the 16-bit analog output word (0..=10000).
pub fn percent_to_raw(percent: f64) -> i64 {
    let p = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
    (p * 100.0) as i64
}

// Servo pulse widths: 620 µs, 1520 µs, 2420 µs map to 0°, 90°, 180°.
pub const SERVO_MIN_PULSE_US: i64 = 620;
pub const SERVO_CENTER_PULSE_US: i64 = 1520;
pub const SERVO_MAX_PULSE_US: i64 = 2420;
pub const SERVO_FRAME_US: i64 = 20_000;

/// Pulse width for a position in whole percent.
pub fn servo_pulse_width_us(position: u8) -> i64 {
    let position = i64::from(position.min(100));
    position * (SERVO_MAX_PULSE_US - SERVO_MIN_PULSE_US) / 100 + SERVO_MIN_PULSE_US
}
