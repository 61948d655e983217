//! # Asset services
//!
//! Devices and message-bus topics exposed as HTTP capabilities, each asset's
//! live state held by exactly one tokio task.
//!
//! ## Layout
//! - **owner:** the single-owner state task, its mailbox and the sampler loop.
//! - **systems:** thermometer, analog channel, servo, level controller, topic.
//! - **control:** PI algorithm with decaying integral, feedback task, remote clients.
//! - **device:** sample sources and actuators (sysfs, subprocess, simulated).
//! - **gateway:** `/{system}/{asset}/{service}` over `tiny_http`.
//! - **system:** builds everything from `systemconfig.json`, shuts it down.

pub mod asset;
pub mod bus;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod gateway;
pub mod owner;
pub mod system;
pub mod systems;
