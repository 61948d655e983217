//! simulated.rs
//! Bench-top stand-ins for hardware: noisy constant readings, a sine wave
//! generator, and an actuator that records what it was told.

use std::{
    f64::consts::PI,
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use rand::random_range;

use crate::device::{Actuator, SampleSource};
use crate::error::{ActuatorError, SourceError};

/// `base` plus uniform noise in `noise`. Every `fail_every`-th sample fails.
pub struct SimulatedSource {
    base: f64,
    noise: (f64, f64),
    fail_every: Option<u32>,
    count: u32,
}

impl SimulatedSource {
    pub fn new(base: f64, noise: (f64, f64)) -> Self {
        Self {
            base,
            noise,
            fail_every: None,
            count: 0,
        }
    }

    pub fn failing_every(mut self, n: u32) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }
}

#[async_trait]
impl SampleSource for SimulatedSource {
    async fn sample(&mut self) -> Result<f64, SourceError> {
        self.count = self.count.wrapping_add(1);
        if let Some(n) = self.fail_every {
            if self.count % n == 0 {
                return Err(SourceError::Simulated);
            }
        }
        let (lo, hi) = self.noise;
        let noise = if hi > lo { random_range(lo..hi) } else { 0.0 };
        Ok(self.base + noise)
    }
}

/// `amplitude · sin(2πt / period) + offset`, t measured from construction.
pub struct SineSource {
    amplitude: f64,
    offset: f64,
    period_s: f64,
    started: Instant,
}

impl SineSource {
    pub fn new(amplitude: f64, offset: f64, period_s: f64) -> Self {
        Self {
            amplitude,
            offset,
            period_s,
            started: Instant::now(),
        }
    }

    pub fn value_at(&self, elapsed_s: f64) -> f64 {
        if self.period_s <= 0.0 {
            return self.offset;
        }
        self.amplitude * (2.0 * PI * elapsed_s / self.period_s).sin() + self.offset
    }
}

#[async_trait]
impl SampleSource for SineSource {
    async fn sample(&mut self) -> Result<f64, SourceError> {
        Ok(self.value_at(self.started.elapsed().as_secs_f64()))
    }
}

/// Shared view of what a [`RecordingActuator`] received.
#[derive(Clone, Default)]
pub struct ActuatorLog {
    inner: Arc<Mutex<ActuatorRecord>>,
}

#[derive(Default)]
struct ActuatorRecord {
    applied: Vec<i64>,
    released: bool,
    failing: bool,
}

impl ActuatorLog {
    pub fn applied(&self) -> Vec<i64> {
        self.lock().applied.clone()
    }

    pub fn released(&self) -> bool {
        self.lock().released
    }

    /// Make subsequent commands fail.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ActuatorRecord> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Default)]
pub struct RecordingActuator {
    log: ActuatorLog,
}

impl RecordingActuator {
    pub fn new() -> (Self, ActuatorLog) {
        let log = ActuatorLog::default();
        (Self { log: log.clone() }, log)
    }
}

#[async_trait]
impl Actuator for RecordingActuator {
    async fn apply(&mut self, raw: i64) -> Result<(), ActuatorError> {
        let mut record = self.log.lock();
        if record.failing {
            return Err(ActuatorError::Simulated);
        }
        record.applied.push(raw);
        Ok(())
    }

    async fn release(&mut self) -> Result<(), ActuatorError> {
        self.log.lock().released = true;
        Ok(())
    }
}
