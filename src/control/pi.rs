//! pi.rs
//! Proportional-integral controller with leaky-bucket anti-windup.
//!
//! The integral decays by exp(-T/λ) every cycle before the new error is added,
//! so under a constant deviation d it settles at d·T / (1 - exp(-T/λ)) instead
//! of growing without bound. The output is clamped to the actuator range.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PiGains {
    pub kp: f64,
    pub ki: f64,
    /// Integral decay time constant in seconds. Must be > 0.
    pub lambda: f64,
}

/// Everything the control loop remembers between cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerState {
    pub deviation: f64,
    pub integral: f64,
    pub output: f64,
    pub jitter: Duration,
    /// Deviation the previous cycle saw; repeats are not logged.
    pub previous_deviation: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PiController {
    pub gains: PiGains,
    pub output_min: f64,
    pub output_max: f64,
}

impl PiController {
    pub fn new(gains: PiGains) -> Self {
        Self {
            gains,
            output_min: 0.0,
            output_max: 100.0,
        }
    }

    pub fn with_output_limits(mut self, min: f64, max: f64) -> Self {
        self.output_min = min;
        self.output_max = max;
        self
    }

    /// One control cycle of length `period`. Advances `state` and returns the
    /// clamped output.
    pub fn step(
        &self,
        state: &mut ControllerState,
        setpoint: f64,
        measured: f64,
        period: Duration,
    ) -> f64 {
        let t = period.as_secs_f64();
        let deviation = setpoint - measured;

        let decay = (-t / self.gains.lambda).exp();
        let integral = decay * state.integral + deviation * t;
        // An overflowed integral would poison every later cycle.
        if integral.is_finite() {
            state.integral = integral;
        }

        let raw = self.gains.kp * deviation + self.gains.ki * state.integral;
        let output = self.clamp(raw);

        state.deviation = deviation;
        state.output = output;
        output
    }

    fn clamp(&self, raw: f64) -> f64 {
        if raw.is_nan() {
            self.output_min
        } else {
            raw.clamp(self.output_min, self.output_max)
        }
    }

    /// Where the integral settles under a constant `deviation`.
    pub fn steady_integral(&self, deviation: f64, period: Duration) -> f64 {
        let t = period.as_secs_f64();
        deviation * t / (1.0 - (-t / self.gains.lambda).exp())
    }
}
