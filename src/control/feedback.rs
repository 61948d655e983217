//! feedback.rs
//! The controller task closing a loop between an upstream measurement service
//! and a downstream actuator service.
//!
//! Per cycle: read upstream → hand the measurement to the owner, which runs the
//! PI step on its own controller state → push the output downstream → report
//! the cycle time (jitter) back to the owner. Remote I/O happens here, outside
//! the owner's turns, so the asset keeps answering requests meanwhile.

use std::{sync::Arc, time::Duration};

use log::{debug, warn};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::control::{ControlInput, RemoteService};
use crate::owner::AssetHandle;

pub struct FeedbackLoop {
    pub asset: AssetHandle,
    pub upstream: Arc<dyn RemoteService>,
    pub downstream: Arc<dyn RemoteService>,
    pub period: Duration,
    /// Bound on every mailbox exchange with the owner.
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Measured, computed and actuated.
    Complete,
    /// Upstream read (or the owner exchange) failed; nothing changed.
    Skipped,
    /// State advanced but the downstream push failed.
    ActuationFailed,
}

impl FeedbackLoop {
    /// One control cycle. Never fails: every error is logged and reflected in
    /// the outcome, and the next tick tries again from scratch.
    pub async fn cycle(&self) -> CycleOutcome {
        let start = Instant::now();
        let name = self.asset.name();

        let measured = match self.upstream.read().await {
            Ok(signal) => signal,
            Err(e) => {
                warn!("[{}] unable to obtain a {} reading: {}", name, self.upstream.definition(), e);
                return CycleOutcome::Skipped;
            }
        };

        let output = match self
            .asset
            .control(ControlInput::Measurement(measured), self.request_timeout)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!("[{}] controller state not updated: {}", name, e);
                return CycleOutcome::Skipped;
            }
        };

        let outcome = match self.downstream.write(&output).await {
            Ok(()) => CycleOutcome::Complete,
            Err(e) => {
                warn!("[{}] cannot update {}: {}", name, self.downstream.definition(), e);
                CycleOutcome::ActuationFailed
            }
        };

        let jitter = start.elapsed();
        if let Err(e) = self
            .asset
            .control(ControlInput::Completed { jitter }, self.request_timeout)
            .await
        {
            debug!("[{}] jitter not recorded: {}", name, e);
        }

        outcome
    }
}

/// Ticks `control` every `period` until `token` fires.
pub async fn run_feedback_loop(control: FeedbackLoop, token: CancellationToken) {
    let mut interval = time::interval(control.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick of an interval is immediate; give upstream samplers one
    // period to produce a reading.
    interval.reset();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = control.cycle() => {}
        }
    }

    debug!("[{}] feedback loop stopped", control.asset.name());
}
