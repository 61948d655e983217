//! pwm.rs
//! Servo output on a kernel PWM channel (`/sys/class/pwm/pwmchipN/pwmM`).

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::device::{Actuator, SERVO_FRAME_US};
use crate::error::ActuatorError;

pub struct SysfsPwm {
    channel: PathBuf,
    period_ns: u64,
    configured: bool,
}

impl SysfsPwm {
    /// `channel` is an exported PWM directory; `period_us` the frame length.
    pub fn new(channel: impl Into<PathBuf>, period_us: Option<u64>) -> Self {
        Self {
            channel: channel.into(),
            period_ns: period_us.unwrap_or(SERVO_FRAME_US as u64) * 1_000,
            configured: false,
        }
    }

    async fn put(&self, attribute: &str, value: impl ToString) -> Result<(), ActuatorError> {
        let path = self.channel.join(attribute);
        write_attribute(&path, &value.to_string()).await
    }
}

async fn write_attribute(path: &Path, value: &str) -> Result<(), ActuatorError> {
    tokio::fs::write(path, value)
        .await
        .map_err(|source| ActuatorError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl Actuator for SysfsPwm {
    /// `raw` is the pulse width in microseconds.
    async fn apply(&mut self, raw: i64) -> Result<(), ActuatorError> {
        if !self.configured {
            self.put("period", self.period_ns).await?;
            self.configured = true;
        }
        let duty_ns = (raw.max(0) as u64 * 1_000).min(self.period_ns);
        self.put("duty_cycle", duty_ns).await?;
        self.put("enable", 1).await
    }

    async fn release(&mut self) -> Result<(), ActuatorError> {
        self.put("duty_cycle", 0).await?;
        self.put("enable", 0).await
    }
}
