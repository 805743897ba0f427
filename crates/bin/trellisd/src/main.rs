//! # trellisd — trellis daemon
//!
//! Composition root that wires hosts, the device registry and the
//! automation runtime together and runs until asked to stop.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars)
//! - Initialise logging
//! - Register hosts and bind the configured devices
//! - Register scenes and schedules with the automation runtime
//! - Tear every automation down on SIGINT/SIGTERM
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;
mod wiring;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use trellis_app::ports::Scheduler;
use trellis_app::scheduler::TokioScheduler;

use crate::config::Config;
use crate::wiring::Controller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .with_target(true)
        .init();

    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler);
    let Controller {
        registry,
        automations,
        runtime,
        virtual_host,
    } = wiring::assemble(&config, scheduler)?;
    tracing::info!(
        devices = registry.len(),
        virtual_devices = virtual_host.as_ref().map_or(0, |host| host.identifiers().count()),
        automations = runtime.len(),
        "trellisd started"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested");
            shutdown.cancel();
        }
    });

    runtime.run(shutdown.clone()).await?;
    // With no automations configured the runtime returns at once; keep
    // device state logging alive until asked to stop.
    shutdown.cancelled().await;
    tracing::info!(
        started = automations.initialized().len(),
        "trellisd stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
