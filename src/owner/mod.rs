//! State owner: the one task allowed to touch an asset's live state.
//!
//! Everything else reaches the state through messages:
//! - the sampler (or a topic subscription) pushes fresh [`Signal`]s through an
//!   [`UpdateSink`];
//! - the gateway and the feedback controller send [`Tray`]s through an
//!   [`AssetHandle`] and wait on a single-use reply.
//!
//! The owner processes exactly one event per turn, so no read can observe a
//! half-applied write and no sample lands in the middle of a request.

pub mod sampler;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, info};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::asset::{Asset, Signal};
use crate::control::ControlInput;
use crate::error::OwnerError;

pub use sampler::{run_sampler, SamplerSettings};

/// Depth of the sample update queue. Updates are last-writer-wins, so a short
/// queue is enough; a full queue makes the sampler wait (cancellably).
pub const UPDATE_QUEUE_DEPTH: usize = 4;

pub type Reply = Result<Signal, OwnerError>;

#[derive(Debug)]
pub enum Action {
    Read { service: String },
    Write { service: String, signal: Signal },
    Control(ControlInput),
}

/// A request envelope. `reply` is used at most once; if the caller gave up,
/// sending on it fails and the owner moves on.
#[derive(Debug)]
pub struct Tray {
    pub action: Action,
    reply: oneshot::Sender<Reply>,
}

/// Behaviour of one asset variant, run inside its owner task.
#[async_trait]
pub trait AssetState: Asset + Send + 'static {
    /// Called once before the first event (drive outputs to a known position).
    async fn start(&mut self) {}

    fn read(&self, service: &str) -> Reply;

    async fn write(&mut self, service: &str, _signal: Signal) -> Reply {
        Err(OwnerError::Rejected(format!("`{service}` is read-only")))
    }

    /// Fresh sample from the sampler or a subscription. Overwrites the stored
    /// reading unconditionally.
    fn absorb(&mut self, signal: Signal);

    fn control(&mut self, _input: ControlInput) -> Reply {
        Err(OwnerError::Rejected(format!("{} has no control loop", self.name())))
    }

    /// Device cleanup on shutdown. Runs even when cancellation cut a
    /// `start` or `write` short, so it must not assume either finished.
    async fn release(&mut self) {}
}

// ============================================================================
// Caller side
// ============================================================================

/// Cloneable request side of an owner's mailbox.
#[derive(Clone, Debug)]
pub struct AssetHandle {
    name: Arc<str>,
    trays: mpsc::Sender<Tray>,
}

impl AssetHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn read(&self, service: &str, limit: Duration) -> Reply {
        self.request(
            Action::Read {
                service: service.to_string(),
            },
            limit,
        )
        .await
    }

    pub async fn write(&self, service: &str, signal: Signal, limit: Duration) -> Reply {
        self.request(
            Action::Write {
                service: service.to_string(),
                signal,
            },
            limit,
        )
        .await
    }

    pub async fn control(&self, input: ControlInput, limit: Duration) -> Reply {
        self.request(Action::Control(input), limit).await
    }

    /// One round trip. `limit` bounds both queueing and the reply; on expiry the
    /// reply receiver is dropped here, so the owner's later send just fails.
    async fn request(&self, action: Action, limit: Duration) -> Reply {
        let (reply, response) = oneshot::channel();
        let exchange = async {
            self.trays
                .send(Tray { action, reply })
                .await
                .map_err(|_| OwnerError::Closed)?;
            response.await.map_err(|_| OwnerError::Closed)?
        };

        match time::timeout(limit, exchange).await {
            Ok(reply) => reply,
            Err(_) => Err(OwnerError::Timeout),
        }
    }

    /// Handle with no owner behind it.
    #[cfg(test)]
    pub(crate) fn detached(name: &str) -> Self {
        let (trays, _) = mpsc::channel(1);
        Self {
            name: Arc::from(name),
            trays,
        }
    }
}

/// Cloneable update side of an owner: where samples are delivered.
#[derive(Clone, Debug)]
pub struct UpdateSink {
    updates: mpsc::Sender<Signal>,
}

impl UpdateSink {
    /// Waits for queue space unless `token` fires first. Returns `false` when
    /// cancelled or when the owner has exited.
    pub async fn deliver(&self, signal: Signal, token: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = token.cancelled() => false,
            sent = self.updates.send(signal) => sent.is_ok(),
        }
    }

    /// Non-waiting delivery for callback contexts. A full queue drops the
    /// sample; the next one supersedes it anyway.
    pub fn try_deliver(&self, signal: Signal) -> bool {
        match self.updates.try_send(signal) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("update queue full, sample dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.updates.is_closed()
    }
}

// ============================================================================
// Owner side
// ============================================================================

/// Spawns the owner task for `state`.
pub fn spawn_owner<S: AssetState>(
    state: S,
    mailbox_capacity: usize,
    token: CancellationToken,
) -> (AssetHandle, UpdateSink, JoinHandle<()>) {
    let (handle, sink, owner) = owner_parts(state, mailbox_capacity, token);
    (handle, sink, tokio::spawn(owner))
}

/// Same as [`spawn_owner`] but leaves spawning to the caller (task trackers).
pub fn owner_parts<S: AssetState>(
    state: S,
    mailbox_capacity: usize,
    token: CancellationToken,
) -> (AssetHandle, UpdateSink, impl std::future::Future<Output = ()> + Send + 'static) {
    let (tray_tx, tray_rx) = mpsc::channel(mailbox_capacity.max(1));
    let (update_tx, update_rx) = mpsc::channel(UPDATE_QUEUE_DEPTH);

    let handle = AssetHandle {
        name: Arc::from(state.name()),
        trays: tray_tx,
    };
    let sink = UpdateSink { updates: update_tx };

    (handle, sink, run_owner(state, tray_rx, update_rx, token))
}

async fn run_owner<S: AssetState>(
    mut state: S,
    mut trays: mpsc::Receiver<Tray>,
    mut updates: mpsc::Receiver<Signal>,
    token: CancellationToken,
) {
    // Cancellation preempts every suspension point of the turns, including a
    // device write in progress; the abandoned tray's reply sender is dropped
    // and its caller sees `Closed`.
    tokio::select! {
        biased;
        _ = token.cancelled() => {}
        _ = run_turns(&mut state, &mut trays, &mut updates) => {}
    }

    state.release().await;
    info!("[{}] owner stopped", state.name());
}

/// Start-up followed by one event per turn. Never returns on its own.
async fn run_turns<S: AssetState>(
    state: &mut S,
    trays: &mut mpsc::Receiver<Tray>,
    updates: &mut mpsc::Receiver<Signal>,
) {
    state.start().await;
    debug!("[{}] owner started", state.name());

    loop {
        tokio::select! {
            biased;
            Some(signal) = updates.recv() => state.absorb(signal),
            Some(tray) = trays.recv() => serve(state, tray).await,
            // Both queues closed: idle until cancellation.
            else => std::future::pending::<()>().await,
        }
    }
}

async fn serve<S: AssetState>(state: &mut S, tray: Tray) {
    let reply = match tray.action {
        Action::Read { service } => state.read(&service),
        Action::Write { service, signal } => {
            if signal.is_finite() {
                state.write(&service, signal).await
            } else {
                Err(OwnerError::Rejected(format!("non-finite value {}", signal.value)))
            }
        }
        Action::Control(input) => state.control(input),
    };

    if tray.reply.send(reply).is_err() {
        debug!("[{}] caller left before the reply", state.name());
    }
}
