//! # Asset service entry point
//!
//! Loads `systemconfig.json` (or the path given as first argument), starts
//! every configured asset and the request gateway, then runs until Ctrl-C.
//!
//! A missing configuration file is replaced by a template and the process
//! exits so the operator can edit it.
//!
//! Logging follows `RUST_LOG`; the default level is `info`.

use std::sync::Arc;

use anyhow::Context;
use log::info;

use asset_services::{
    bus::LocalBus,
    config::{SystemConfig, DEFAULT_CONFIG_PATH},
    system::System,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = SystemConfig::load(&path).with_context(|| format!("configuration {path}"))?;
    let grace = config.shutdown_grace();

    info!("=== {} START ===", config.name);
    let mut system = System::build(config, Arc::new(LocalBus::new())).context("assembling assets")?;
    if let Some(addr) = system.serve().context("starting gateway")? {
        info!("serving on http://{}", addr);
    }

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Ctrl-C received");
    system.shutdown(grace).await;
    Ok(())
}
