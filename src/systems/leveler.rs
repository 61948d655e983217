//! leveler.rs
//! Level controller. Offers its setpoint, the current level error and the
//! control cycle jitter; a feedback task reads the `level` service, asks this
//! asset for the next pump speed and pushes it to the `pumpSpeed` service.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::asset::{
    signal::{MILLISECOND, PERCENT},
    Asset, AssetProfile, ServiceDef, Signal,
};
use crate::config::period_from_secs;
use crate::control::{ControlInput, ControllerState, PiController, PiGains};
use crate::error::OwnerError;
use crate::owner::{AssetState, Reply};

pub const SETPOINT: &str = "setpoint";
pub const LEVEL_ERROR: &str = "levelerror";
pub const JITTER: &str = "jitter";

/// Consumed service definitions.
pub const UPSTREAM: &str = "level";
pub const DOWNSTREAM: &str = "pumpSpeed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelerTraits {
    #[serde(default = "default_setpoint")]
    pub set_pt: f64,
    /// Control period in seconds.
    #[serde(default = "default_period")]
    pub period: f64,
    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub output_min: f64,
    #[serde(default = "default_output_max")]
    pub output_max: f64,
}

fn default_setpoint() -> f64 {
    20.0
}

fn default_period() -> f64 {
    5.0
}

fn default_kp() -> f64 {
    5.0
}

fn default_lambda() -> f64 {
    0.5
}

fn default_output_max() -> f64 {
    100.0
}

impl Default for LevelerTraits {
    fn default() -> Self {
        Self {
            set_pt: default_setpoint(),
            period: default_period(),
            kp: default_kp(),
            lambda: default_lambda(),
            ki: 0.0,
            output_min: 0.0,
            output_max: default_output_max(),
        }
    }
}

impl LevelerTraits {
    pub fn period(&self) -> Duration {
        period_from_secs(self.period)
    }

    pub fn controller(&self) -> PiController {
        PiController::new(PiGains {
            kp: self.kp,
            ki: self.ki,
            lambda: self.lambda,
        })
        .with_output_limits(self.output_min, self.output_max)
    }
}

pub struct Leveler {
    profile: AssetProfile,
    setpoint: Signal,
    period: Duration,
    controller: PiController,
    state: ControllerState,
    output_unit: String,
}

impl Leveler {
    pub fn new(profile: AssetProfile, traits: &LevelerTraits) -> Self {
        // The pump's unit if the directory told us, percent otherwise.
        let output_unit = profile
            .consumed
            .iter()
            .find(|c| c.definition == DOWNSTREAM)
            .and_then(|c| c.details.get("Unit"))
            .and_then(|units| units.first())
            .cloned()
            .unwrap_or_else(|| PERCENT.to_string());

        Self {
            setpoint: Signal::new(traits.set_pt, PERCENT),
            period: traits.period(),
            controller: traits.controller(),
            state: ControllerState::default(),
            output_unit,
            profile,
        }
    }

    pub fn default_services() -> Vec<ServiceDef> {
        vec![
            ServiceDef::new(
                SETPOINT,
                SETPOINT,
                PERCENT,
                "provides the current level setpoint (GET) or sets it (PUT)",
            ),
            ServiceDef::new(
                LEVEL_ERROR,
                LEVEL_ERROR,
                PERCENT,
                "provides the current difference between the set point and the level (GET)",
            ),
            ServiceDef::new(
                JITTER,
                JITTER,
                MILLISECOND,
                "provides the current jitter or control algorithm execution calculated every period (GET)",
            ),
        ]
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    fn measure(&mut self, measured: Signal) -> Reply {
        let setpoint = self.setpoint.value;
        let previous = self.state.previous_deviation;
        let output = self
            .controller
            .step(&mut self.state, setpoint, measured.value, self.period);

        if previous != Some(self.state.deviation) {
            info!(
                "[{}] level {:.2} {} setpoint {:.2}, error {:.2}, output {:.2} {}",
                self.profile.name,
                measured.value,
                measured.unit,
                setpoint,
                self.state.deviation,
                output,
                self.output_unit
            );
        } else {
            debug!("[{}] level error unchanged at {:.2}, output {:.2}", self.profile.name, self.state.deviation, output);
        }
        self.state.previous_deviation = Some(self.state.deviation);

        Ok(Signal::new(output, self.output_unit.clone()))
    }
}

impl Asset for Leveler {
    fn profile(&self) -> &AssetProfile {
        &self.profile
    }
}

#[async_trait]
impl AssetState for Leveler {
    fn read(&self, service: &str) -> Reply {
        match service {
            SETPOINT => Ok(self.setpoint.clone()),
            LEVEL_ERROR => Ok(Signal::new(self.state.deviation, PERCENT)),
            JITTER => Ok(Signal::new(
                self.state.jitter.as_secs_f64() * 1000.0,
                MILLISECOND,
            )),
            other => Err(OwnerError::UnknownService(other.to_string())),
        }
    }

    async fn write(&mut self, service: &str, signal: Signal) -> Reply {
        match service {
            SETPOINT => {
                info!("[{}] setpoint {:.2} -> {:.2}", self.profile.name, self.setpoint.value, signal.value);
                self.setpoint = Signal::new(signal.value, PERCENT);
                Ok(self.setpoint.clone())
            }
            LEVEL_ERROR | JITTER => Err(OwnerError::Rejected(format!("`{service}` is read-only"))),
            other => Err(OwnerError::UnknownService(other.to_string())),
        }
    }

    // Measurements arrive as control messages, not samples.
    fn absorb(&mut self, _signal: Signal) {}

    fn control(&mut self, input: ControlInput) -> Reply {
        match input {
            ControlInput::Measurement(measured) if measured.is_finite() => self.measure(measured),
            ControlInput::Measurement(measured) => Err(OwnerError::Rejected(format!(
                "non-finite measurement {}",
                measured.value
            ))),
            ControlInput::Completed { jitter } => {
                self.state.jitter = jitter;
                Ok(Signal::new(jitter.as_secs_f64() * 1000.0, MILLISECOND))
            }
        }
    }
}
