//! Feedback control: the PI algorithm, the controller task that closes the
//! loop between two remote services, and the remote-service client.

pub mod feedback;
pub mod pi;
pub mod remote;

use std::time::Duration;

use crate::asset::Signal;

pub use feedback::{run_feedback_loop, FeedbackLoop};
pub use pi::{ControllerState, PiController, PiGains};
pub use remote::{HttpService, LocalService, RemoteService};

/// Messages from a controller task to the owner holding its state.
#[derive(Debug, Clone)]
pub enum ControlInput {
    /// Fresh upstream measurement; the owner replies with the clamped output.
    Measurement(Signal),
    /// The cycle finished (actuation attempted); `jitter` is its wall time.
    Completed { jitter: Duration },
}
