use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use tether::config::AgentConfig;
use tether::device::CustomDevice;
use tether::remote::RemoteApi;
use tether::store::ConfigStore;
use tether::sync::SyncEngine;
use tether::util::http::Client;

fn initialize_tracing() {
    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(
            // Use some log defaults. These can be overriden using
            // RUST_LOG
            EnvFilter::try_from_default_env().unwrap_or(
                EnvFilter::default()
                    .add_directive("info".parse().unwrap())
                    .add_directive("tether=debug".parse().unwrap())
                    .add_directive("hyper=error".parse().unwrap())
                    .add_directive("reqwest=warn".parse().unwrap()),
            ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    initialize_tracing();

    let config = AgentConfig::parse();

    let client = Client::new(config.request_timeout()).with_access_key(&config.access_key);
    let remote = RemoteApi::new(client, config.api_endpoint.clone(), config.uuid.clone());

    let store = match &config.state_dir {
        Some(dir) => ConfigStore::new(dir),
        None => ConfigStore::default_root(),
    };

    let device = Arc::new(CustomDevice::new());

    let engine = Arc::new(SyncEngine::new(
        remote,
        store,
        device,
        config.keep_alive_interval(),
    ));

    info!(uuid = %config.uuid, endpoint = %config.api_endpoint, "starting agent");

    engine.initial_sync().await;

    // the startup flush announces the device and picks up anything
    // queued while it was offline
    engine.telemetry().update_status("online");

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    let _ = shutdown_tx.send(());
    runner.await.context("sync engine task panicked")?;

    Ok(())
}
