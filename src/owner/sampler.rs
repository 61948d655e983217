//! sampler.rs
//! Periodic acquisition feeding an owner.
//!
//! - fixed interval; late ticks are skipped rather than bunched
//! - a failed read is logged and the tick dropped; the owner keeps its
//!   last good signal
//! - delivery waits on the owner's update queue but gives up on cancellation

use std::time::Duration;

use log::{debug, warn};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::asset::Signal;
use crate::device::{Normalizer, SampleSource};
use crate::owner::UpdateSink;

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub period: Duration,
    pub unit: String,
    pub normalizer: Normalizer,
}

/// Runs until `token` fires or the owner goes away.
pub async fn run_sampler(
    name: String,
    mut source: Box<dyn SampleSource>,
    settings: SamplerSettings,
    sink: UpdateSink,
    token: CancellationToken,
) {
    let mut interval = time::interval(settings.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let expected_us = settings.period.as_micros() as u64;
    let mut last_tick: Option<Instant> = None;

    loop {
        let tick = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            tick = interval.tick() => tick,
        };

        if let Some(prev) = last_tick {
            let actual_us = tick.duration_since(prev).as_micros() as u64;
            debug!("[{}] tick jitter {} µs", name, actual_us.abs_diff(expected_us));
        }
        last_tick = Some(tick);

        let reading = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            reading = source.sample() => reading,
        };

        let raw = match reading {
            Ok(raw) => raw,
            Err(e) => {
                warn!("[{}] sample failed, skipping tick: {}", name, e);
                continue;
            }
        };

        // Percent normalization would turn NaN into a plausible 0.
        let value = settings.normalizer.apply(raw);
        if !raw.is_finite() || !value.is_finite() {
            warn!("[{}] non-finite sample {} dropped", name, raw);
            continue;
        }

        if !sink.deliver(Signal::new(value, settings.unit.as_str()), &token).await {
            break;
        }
    }

    debug!("[{}] sampler stopped", name);
}
