//! Controller task against scripted upstream/downstream services.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use asset_services::asset::{signal::PERCENT, AssetProfile, Signal};
use asset_services::control::{feedback::CycleOutcome, run_feedback_loop, FeedbackLoop, RemoteService};
use asset_services::error::RemoteError;
use asset_services::owner::{spawn_owner, AssetHandle};
use asset_services::systems::{
    leveler::{LevelerTraits, JITTER, LEVEL_ERROR, SETPOINT},
    Leveler,
};

const LIMIT: Duration = Duration::from_secs(5);

/// Remote service answering with a fixed value, optionally failing or slow.
#[derive(Default)]
struct Scripted {
    value: f64,
    failing: bool,
    delay: Duration,
    written: Mutex<Vec<f64>>,
}

impl Scripted {
    fn reading(value: f64) -> Arc<Self> {
        Arc::new(Self {
            value,
            ..Default::default()
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: true,
            ..Default::default()
        })
    }

    fn written(&self) -> Vec<f64> {
        self.written.lock().unwrap().clone()
    }

    fn refuse(&self) -> RemoteError {
        RemoteError::Status {
            url: "http://scripted/".into(),
            status: 503,
        }
    }
}

#[async_trait]
impl RemoteService for Scripted {
    fn definition(&self) -> &str {
        "scripted"
    }

    async fn read(&self) -> Result<Signal, RemoteError> {
        tokio::time::sleep(self.delay).await;
        if self.failing {
            return Err(self.refuse());
        }
        Ok(Signal::new(self.value, PERCENT))
    }

    async fn write(&self, signal: &Signal) -> Result<(), RemoteError> {
        if self.failing {
            return Err(self.refuse());
        }
        self.written.lock().unwrap().push(signal.value);
        Ok(())
    }
}

fn leveler(traits: LevelerTraits, token: &CancellationToken) -> (AssetHandle, JoinHandle<()>) {
    let profile = AssetProfile {
        name: "Leveler_1".into(),
        details: Default::default(),
        services: Leveler::default_services(),
        consumed: vec![],
    };
    let (handle, _sink, owner) = spawn_owner(Leveler::new(profile, &traits), 8, token.clone());
    (handle, owner)
}

fn control(asset: AssetHandle, upstream: Arc<Scripted>, downstream: Arc<Scripted>) -> FeedbackLoop {
    FeedbackLoop {
        asset,
        upstream,
        downstream,
        period: Duration::from_secs(5),
        request_timeout: LIMIT,
    }
}

#[tokio::test(start_paused = true)]
async fn proportional_cycle_drives_pump() {
    let token = CancellationToken::new();
    let (handle, _owner) = leveler(LevelerTraits::default(), &token);
    let pump = Scripted::reading(0.0);

    let outcome = control(handle.clone(), Scripted::reading(15.0), pump.clone())
        .cycle()
        .await;

    assert_eq!(outcome, CycleOutcome::Complete);
    assert_eq!(pump.written(), [25.0]);
    assert_eq!(handle.read(LEVEL_ERROR, LIMIT).await.unwrap().value, 5.0);
}

#[tokio::test(start_paused = true)]
async fn large_gain_saturates_output() {
    let token = CancellationToken::new();
    let traits = LevelerTraits {
        kp: 50.0,
        ..LevelerTraits::default()
    };
    let (handle, _owner) = leveler(traits, &token);
    let pump = Scripted::reading(0.0);

    control(handle, Scripted::reading(0.0), pump.clone()).cycle().await;
    assert_eq!(pump.written(), [100.0]);
}

#[tokio::test(start_paused = true)]
async fn upstream_failure_skips_the_cycle() {
    let token = CancellationToken::new();
    let (handle, _owner) = leveler(LevelerTraits::default(), &token);
    let pump = Scripted::reading(0.0);

    let outcome = control(handle.clone(), Scripted::failing(), pump.clone())
        .cycle()
        .await;

    assert_eq!(outcome, CycleOutcome::Skipped);
    assert!(pump.written().is_empty());
    assert_eq!(handle.read(LEVEL_ERROR, LIMIT).await.unwrap().value, 0.0);
    assert_eq!(handle.read(JITTER, LIMIT).await.unwrap().value, 0.0);
}

#[tokio::test(start_paused = true)]
async fn downstream_failure_still_advances_state() {
    let token = CancellationToken::new();
    let (handle, _owner) = leveler(LevelerTraits::default(), &token);

    let outcome = control(handle.clone(), Scripted::reading(15.0), Scripted::failing())
        .cycle()
        .await;

    assert_eq!(outcome, CycleOutcome::ActuationFailed);
    assert_eq!(handle.read(LEVEL_ERROR, LIMIT).await.unwrap().value, 5.0);
}

#[tokio::test(start_paused = true)]
async fn jitter_is_the_cycle_wall_time() {
    let token = CancellationToken::new();
    let (handle, _owner) = leveler(LevelerTraits::default(), &token);
    let slow = Arc::new(Scripted {
        value: 18.0,
        delay: Duration::from_millis(40),
        ..Default::default()
    });

    control(handle.clone(), slow, Scripted::reading(0.0)).cycle().await;

    let jitter = handle.read(JITTER, LIMIT).await.unwrap();
    assert_eq!(jitter.unit, "millisecond");
    assert!(jitter.value >= 40.0, "jitter {}", jitter.value);
}

#[tokio::test(start_paused = true)]
async fn setpoint_stays_available_during_slow_upstream() {
    let token = CancellationToken::new();
    let (handle, _owner) = leveler(LevelerTraits::default(), &token);
    let slow = Arc::new(Scripted {
        value: 15.0,
        delay: Duration::from_secs(4),
        ..Default::default()
    });
    let pump = Scripted::reading(0.0);

    let cycle = tokio::spawn({
        let control = control(handle.clone(), slow, pump.clone());
        async move { control.cycle().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let accepted = handle
        .write(SETPOINT, Signal::new(30.0, PERCENT), Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(accepted.value, 30.0);

    assert_eq!(cycle.await.unwrap(), CycleOutcome::Complete);
    // the new setpoint is used by the cycle that was already running
    assert_eq!(pump.written(), [75.0]);
}

#[tokio::test(start_paused = true)]
async fn loop_ticks_every_period_until_cancelled() {
    let token = CancellationToken::new();
    let (handle, _owner) = leveler(LevelerTraits::default(), &token);
    let pump = Scripted::reading(0.0);

    let task = tokio::spawn(run_feedback_loop(
        control(handle, Scripted::reading(19.0), pump.clone()),
        token.child_token(),
    ));

    // first cycle after one period, then every period
    tokio::time::sleep(Duration::from_millis(12_500)).await;
    assert_eq!(pump.written(), [5.0, 5.0]);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop stops on cancellation")
        .unwrap();
}
