//! system.rs
//! Composition root: turns a validated [`SystemConfig`] into running tasks.
//!
//! Per asset one owner task, plus a sampler for sampled kinds, a bus
//! subscription for topics and a feedback task for controllers. Everything
//! hangs off one cancellation token and one task tracker, so shutdown is a
//! single cancel followed by a bounded wait.

use std::{net::SocketAddr, sync::Arc, thread, time::Duration};

use log::{info, warn};
use tokio::{runtime::Handle, time};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::asset::{ConsumedService, Registry, RegistryBuilder};
use crate::bus::{run_publisher, TopicBus, TopicDelivery};
use crate::config::{period_from_secs, AssetConfig, AssetKind, SystemConfig};
use crate::control::{
    remote::parse_local_url, run_feedback_loop, FeedbackLoop, HttpService, LocalService, RemoteService,
};
use crate::error::{ConfigError, SystemError};
use crate::gateway::Gateway;
use crate::owner::{owner_parts, run_sampler, AssetHandle, AssetState, SamplerSettings, UpdateSink};
use crate::systems::{
    leveler::{DOWNSTREAM, UPSTREAM},
    AnalogChannel, Leveler, Servo, Thermometer, TopicAsset,
};

pub struct System {
    config: SystemConfig,
    registry: Arc<Registry>,
    token: CancellationToken,
    tracker: TaskTracker,
    gateway: Option<thread::JoinHandle<()>>,
}

/// A controller waiting for the registry to be complete.
struct PendingLoop {
    handle: AssetHandle,
    consumed: Vec<ConsumedService>,
    period: Duration,
}

impl System {
    /// Spawns every asset of `config`. Must run inside a tokio runtime.
    pub fn build(config: SystemConfig, bus: Arc<dyn TopicBus>) -> Result<Self, SystemError> {
        config.validate()?;

        let token = CancellationToken::new();
        // Tasks already spawned are stopped if assembly fails half way.
        let abort = token.clone().drop_guard();
        let tracker = TaskTracker::new();
        let mut builder = RegistryBuilder::new();
        let mut pending = Vec::new();

        for asset in &config.assets {
            let profile = asset.profile()?;
            let name = profile.name.clone();
            let child = token.child_token();
            let capacity = config.mailbox_capacity;

            let (handle, sink) = match &asset.kind {
                AssetKind::Thermometer(_) => {
                    launch(&tracker, Thermometer::new(profile.clone()), capacity, child.clone())
                }
                AssetKind::AnalogChannel(analog) => {
                    let output = analog.output.as_ref().map(|spec| spec.build());
                    let state = AnalogChannel::new(profile.clone(), analog.traits.clone(), output);
                    launch(&tracker, state, capacity, child.clone())
                }
                AssetKind::Servo(servo) => {
                    let state = Servo::new(profile.clone(), servo.output.build());
                    launch(&tracker, state, capacity, child.clone())
                }
                AssetKind::Leveler(traits) => {
                    let (handle, sink) =
                        launch(&tracker, Leveler::new(profile.clone(), traits), capacity, child.clone());
                    pending.push(PendingLoop {
                        handle: handle.clone(),
                        consumed: asset.consumed.clone(),
                        period: traits.period(),
                    });
                    (handle, sink)
                }
                AssetKind::Topic(topic) => {
                    let state = TopicAsset::new(profile.clone(), topic.traits(), Arc::clone(&bus));
                    let (handle, sink) = launch(&tracker, state, capacity, child.clone());
                    bus.subscribe(
                        &topic.topic,
                        TopicDelivery::new(&topic.topic, &topic.unit, sink.clone(), child.clone()),
                        &tracker,
                    );
                    if let Some(generator) = &topic.generator {
                        tracker.spawn(run_publisher(
                            topic.topic.clone(),
                            generator.source.build(),
                            topic.unit.clone(),
                            period_from_secs(generator.period_s),
                            Arc::clone(&bus),
                            child.clone(),
                        ));
                    }
                    (handle, sink)
                }
            };

            start_sampler(&tracker, asset, &name, sink, child);
            builder.insert(profile, handle)?;
            info!("[{}] started", name);
        }

        let registry = Arc::new(builder.freeze());
        let request_timeout = config.request_timeout();
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;

        for controller in pending {
            let upstream = resolve(&controller, UPSTREAM, &registry, &client, request_timeout)?;
            let downstream = resolve(&controller, DOWNSTREAM, &registry, &client, request_timeout)?;
            let control = FeedbackLoop {
                asset: controller.handle,
                upstream,
                downstream,
                period: controller.period,
                request_timeout,
            };
            tracker.spawn(run_feedback_loop(control, token.child_token()));
        }

        abort.disarm();
        info!("{} running {} assets", config.name, registry.len());
        Ok(Self {
            config,
            registry,
            token,
            tracker,
            gateway: None,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Root token; cancelling it stops every task of the system.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Starts the request gateway on the configured address. Returns the
    /// bound socket address.
    pub fn serve(&mut self) -> Result<Option<SocketAddr>, SystemError> {
        let gateway = Arc::new(Gateway::new(
            &self.config.name,
            Arc::clone(&self.registry),
            self.config.request_timeout(),
        ));
        let addr = format!("{}:{}", self.config.address, self.config.port);
        let (bound, thread) = gateway.serve(&addr, Handle::current(), self.token.child_token())?;
        self.gateway = Some(thread);
        Ok(bound)
    }

    /// Cancels everything and waits up to `grace` for tasks to finish their
    /// cleanup.
    pub async fn shutdown(self, grace: Duration) {
        info!("{} shutting down", self.config.name);
        self.token.cancel();
        self.tracker.close();

        if time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!("{} tasks still running after {:?}", self.tracker.len(), grace);
        }

        if let Some(gateway) = self.gateway {
            let joined = tokio::task::spawn_blocking(move || gateway.join());
            if time::timeout(grace, joined).await.is_err() {
                warn!("gateway thread did not stop within {:?}", grace);
            }
        }
        info!("{} stopped", self.config.name);
    }
}

fn launch<S: AssetState>(
    tracker: &TaskTracker,
    state: S,
    capacity: usize,
    token: CancellationToken,
) -> (AssetHandle, UpdateSink) {
    let (handle, sink, owner) = owner_parts(state, capacity, token);
    tracker.spawn(owner);
    (handle, sink)
}

fn start_sampler(
    tracker: &TaskTracker,
    asset: &AssetConfig,
    name: &str,
    sink: UpdateSink,
    token: CancellationToken,
) {
    if let Some((period, unit, normalizer, source)) = asset.sampling() {
        let settings = SamplerSettings {
            period,
            unit: unit.to_string(),
            normalizer,
        };
        tracker.spawn(run_sampler(name.to_string(), source.build(), settings, sink, token));
    }
}

/// A consumed service as a client: `local://` URLs go through the target's
/// mailbox, anything else over HTTP.
fn resolve(
    controller: &PendingLoop,
    definition: &str,
    registry: &Registry,
    client: &reqwest::Client,
    limit: Duration,
) -> Result<Arc<dyn RemoteService>, ConfigError> {
    let name = controller.handle.name();
    let consumed = controller
        .consumed
        .iter()
        .find(|c| c.definition == definition)
        .ok_or_else(|| ConfigError::invalid(name, format!("no consumed `{definition}` service")))?;

    if let Some((asset, sub_path)) = parse_local_url(&consumed.url) {
        let target = registry
            .get(asset)
            .ok_or_else(|| ConfigError::invalid(name, format!("`{}` names no local asset", consumed.url)))?;
        return Ok(Arc::new(LocalService::new(
            definition,
            target.handle.clone(),
            sub_path,
            limit,
        )));
    }

    Ok(Arc::new(HttpService::new(definition, &consumed.url, client.clone(), limit)))
}
