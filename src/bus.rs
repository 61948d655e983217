//! bus.rs
//! Message-bus binding for topic assets.
//!
//! A topic asset has no sampler: the bus pushes payloads into its update
//! queue through a [`TopicDelivery`], which parses them and hands them to the
//! owner exactly like a sampler would. Outgoing writes go through
//! [`TopicBus::publish`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, warn};
use tokio::{
    sync::broadcast,
    time::{self, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::asset::{Details, Signal};
use crate::device::SampleSource;
use crate::error::{ActuatorError, ConfigError, SourceError};
use crate::owner::UpdateSink;

/// Messages buffered per topic before slow subscribers start lagging.
const TOPIC_BUFFER: usize = 16;

pub trait TopicBus: Send + Sync {
    /// Routes every future payload on `topic` to `delivery` until its token
    /// is cancelled. Forwarding tasks go on `tasks`, so shutdown waits for
    /// them.
    fn subscribe(&self, topic: &str, delivery: TopicDelivery, tasks: &TaskTracker);

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ActuatorError>;
}

/// Delivery side of a topic subscription.
#[derive(Clone)]
pub struct TopicDelivery {
    topic: String,
    unit: String,
    sink: UpdateSink,
    token: CancellationToken,
}

impl TopicDelivery {
    pub fn new(topic: &str, unit: &str, sink: UpdateSink, token: CancellationToken) -> Self {
        Self {
            topic: topic.to_string(),
            unit: unit.to_string(),
            sink,
            token,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Synchronous entry for broker callbacks. Returns `false` if the payload
    /// was dropped (unparseable, full queue, owner gone).
    pub fn offer(&self, payload: &[u8]) -> bool {
        match parse_payload(payload, &self.unit) {
            Ok(signal) => self.sink.try_deliver(signal),
            Err(e) => {
                warn!("[{}] dropped payload: {}", self.topic, e);
                false
            }
        }
    }

    /// Awaiting variant for bus tasks; waits for queue space while observing
    /// cancellation.
    pub async fn forward(&self, payload: &[u8]) -> bool {
        match parse_payload(payload, &self.unit) {
            Ok(signal) => self.sink.deliver(signal, &self.token).await,
            Err(e) => {
                warn!("[{}] dropped payload: {}", self.topic, e);
                !self.sink.is_closed()
            }
        }
    }
}

/// Accepts a full signal document or a bare number (stamped now, in `unit`).
pub fn parse_payload(payload: &[u8], unit: &str) -> Result<Signal, SourceError> {
    if let Ok(signal) = serde_json::from_slice::<Signal>(payload) {
        return finite(signal);
    }
    let text = std::str::from_utf8(payload)
        .map_err(|e| SourceError::Parse(e.to_string()))?
        .trim();
    let value = text
        .parse::<f64>()
        .map_err(|_| SourceError::Parse(format!("`{text}` is neither a signal nor a number")))?;
    finite(Signal::new(value, unit))
}

fn finite(signal: Signal) -> Result<Signal, SourceError> {
    if signal.is_finite() {
        Ok(signal)
    } else {
        Err(SourceError::Parse(format!("non-finite value {}", signal.value)))
    }
}

/// Splits `kitchen/sensor/temperature` against a pattern such as
/// `[Location, Device, Measurement]`. Returns the details, the service
/// definition (last segment) and the asset name (`kitchen_sensor_temperature`).
pub fn topic_details(topic: &str, pattern: &[String]) -> Result<(Details, String, String), ConfigError> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
        return Err(ConfigError::invalid(
            topic,
            "a topic needs at least two non-empty `/`-separated levels",
        ));
    }

    let mut details = Details::new();
    for (key, segment) in pattern.iter().zip(&segments) {
        details.entry(key.clone()).or_default().push(segment.to_string());
    }

    let definition = segments[segments.len() - 1].to_string();
    Ok((details, definition, topic.replace('/', "_")))
}

/// Publishes a value from `source` on `topic` every `period` (test signal
/// generator). Failed samples and publishes are logged and skipped.
pub async fn run_publisher(
    topic: String,
    mut source: Box<dyn SampleSource>,
    unit: String,
    period: Duration,
    bus: Arc<dyn TopicBus>,
    token: CancellationToken,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let sample = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => tokio::select! {
                biased;
                _ = token.cancelled() => break,
                sample = source.sample() => sample,
            },
        };

        let signal = match sample {
            Ok(value) if value.is_finite() => Signal::new(value, unit.as_str()),
            Ok(value) => {
                warn!("[{}] generator produced {}", topic, value);
                continue;
            }
            Err(e) => {
                warn!("[{}] generator failed: {}", topic, e);
                continue;
            }
        };

        let published = serde_json::to_vec(&signal)
            .map_err(|e| ActuatorError::Publish {
                topic: topic.clone(),
                reason: e.to_string(),
            })
            .and_then(|payload| bus.publish(&topic, payload));
        if let Err(e) = published {
            warn!("{}", e);
        }
    }

    debug!("[{}] publisher stopped", topic);
}

// ============================================================================
// In-process bus
// ============================================================================

/// Broadcast bus living inside this process. Every topic gets its own
/// channel on first use.
#[derive(Clone, Default)]
pub struct LocalBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        let mut topics = match self.topics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_BUFFER).0)
            .clone()
    }
}

impl TopicBus for LocalBus {
    fn subscribe(&self, topic: &str, delivery: TopicDelivery, tasks: &TaskTracker) {
        let mut messages = self.channel(topic).subscribe();
        let topic = topic.to_string();

        tasks.spawn(async move {
            loop {
                let payload = tokio::select! {
                    biased;
                    _ = delivery.token().cancelled() => break,
                    received = messages.recv() => received,
                };
                match payload {
                    Ok(payload) => {
                        if !delivery.forward(&payload).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("[{}] subscriber lagged, {} messages skipped", topic, missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("[{}] subscription ended", topic);
        });
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ActuatorError> {
        // No receivers is not an error: nobody listens yet.
        let _ = self.channel(topic).send(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::signal::CELSIUS;

    #[test]
    fn bare_number_payload_takes_topic_unit() {
        let signal = parse_payload(b" 21.25\n", CELSIUS).unwrap();
        assert_eq!(signal.value, 21.25);
        assert_eq!(signal.unit, CELSIUS);
    }

    #[test]
    fn signal_payload_keeps_its_own_fields() {
        let body = br#"{"value": 3.0, "unit": "bar", "timestamp": "2025-01-02T03:04:05Z"}"#;
        let signal = parse_payload(body, CELSIUS).unwrap();
        assert_eq!(signal.unit, "bar");
        assert_eq!(signal.timestamp.to_rfc3339(), "2025-01-02T03:04:05+00:00");
    }

    #[test]
    fn garbage_and_nan_payloads_are_refused() {
        assert!(parse_payload(b"warm", CELSIUS).is_err());
        assert!(parse_payload(b"NaN", CELSIUS).is_err());
    }

    #[test]
    fn topic_pattern_becomes_details() {
        let pattern = vec!["Location".to_string(), "Device".to_string()];
        let (details, definition, name) = topic_details("kitchen/probe/temperature", &pattern).unwrap();

        assert_eq!(details["Location"], ["kitchen"]);
        assert_eq!(details["Device"], ["probe"]);
        assert_eq!(definition, "temperature");
        assert_eq!(name, "kitchen_probe_temperature");
    }

    fn kitchen_topic(bus: Arc<LocalBus>) -> crate::systems::TopicAsset {
        use crate::systems::{topic::TopicTraits, TopicAsset};

        let (_, definition, name) = topic_details("kitchen/temperature", &[]).unwrap();
        let profile = crate::asset::AssetProfile {
            name,
            details: Details::new(),
            services: TopicAsset::default_services(&definition, CELSIUS),
            consumed: vec![],
        };
        let traits = TopicTraits {
            topic: "kitchen/temperature".into(),
            pattern: vec![],
            unit: CELSIUS.into(),
        };
        TopicAsset::new(profile, traits, bus)
    }

    #[tokio::test]
    async fn subscription_feeds_update_queue() {
        use crate::owner::{spawn_owner, AssetState};

        let bus = Arc::new(LocalBus::new());
        let token = CancellationToken::new();
        let asset = kitchen_topic(bus.clone());
        assert!(asset.read("access").is_err());

        let (handle, sink, _owner) = spawn_owner(asset, 4, token.clone());
        bus.subscribe(
            "kitchen/temperature",
            TopicDelivery::new("kitchen/temperature", CELSIUS, sink, token.clone()),
            &TaskTracker::new(),
        );
        bus.publish("kitchen/temperature", b"23.5".to_vec()).unwrap();

        let limit = Duration::from_secs(1);
        let mut value = None;
        for _ in 0..50 {
            if let Ok(signal) = handle.read("access", limit).await {
                value = Some(signal.value);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(value, Some(23.5));
        token.cancel();
    }

    #[tokio::test]
    async fn subscription_is_tracked_until_cancelled() {
        let bus = Arc::new(LocalBus::new());
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (_handle, sink, owner) = crate::owner::owner_parts(kitchen_topic(bus.clone()), 4, token.clone());
        tracker.spawn(owner);

        bus.subscribe(
            "kitchen/temperature",
            TopicDelivery::new("kitchen/temperature", CELSIUS, sink, token.clone()),
            &tracker,
        );
        assert_eq!(tracker.len(), 2);

        tracker.close();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait())
            .await
            .expect("subscription outlived cancellation");
        assert!(tracker.is_empty());
    }

    #[test]
    fn flat_topic_is_rejected() {
        assert!(topic_details("temperature", &[]).is_err());
        assert!(topic_details("kitchen//temperature", &[]).is_err());
    }
}
