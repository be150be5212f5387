//! hsmd: HSM signing agent daemon.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use hsm_core::config::{AgentConfig, LoggingConfig};
use hsm_services::{
    CommandSigner, FileSink, RotatingFile, SharedSink, Signer, SinkSet, TracingSink,
    UnavailableSigner,
};
use hsmd::{AgentStatus, RequestDispatcher, SessionSettings, StreamSession, Supervisor};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => AgentConfig::load_from(Path::new(&path)),
        None => {
            if let Err(e) = AgentConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            AgentConfig::load()
        }
    }
    .context("failed to load config")?;
    config.validate().context("invalid config")?;

    let sink = build_sinks(&config.logging);

    let signer: Arc<dyn Signer> = if config.signer.command.is_empty() {
        tracing::warn!("no signer command configured, signing requests will fail");
        Arc::new(UnavailableSigner)
    } else {
        Arc::new(CommandSigner::new(
            config.signer.command.clone(),
            config.signer.args.clone(),
        ))
    };

    let identity = Arc::new(config.session_identity());
    tracing::info!(serial = %identity.serial, host = %identity.host, "hsmd starting");

    let status = Arc::new(AgentStatus::new());
    let dispatcher = Arc::new(RequestDispatcher::new(
        Arc::clone(&identity),
        signer,
        Arc::clone(&status),
    ));
    let session = StreamSession::new(
        identity,
        SessionSettings::from(&config.network),
        dispatcher,
        status,
        Arc::clone(&sink),
    );
    let supervisor = Supervisor::new(session, config.network.retry_delay(), sink);

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(());
    });

    supervisor.run(shutdown_rx).await;
    tracing::info!("hsmd stopped");
    Ok(())
}

fn build_sinks(logging: &LoggingConfig) -> SharedSink {
    let mut sinks = SinkSet::new().with(Arc::new(TracingSink));
    if logging.enabled {
        if let Some(dir) = logging.path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!(error = %e, dir = %dir.display(), "failed to create log directory");
            }
        }
        let file = RotatingFile::new(&logging.path, &logging.backup_path, logging.max_bytes);
        sinks = sinks.with(Arc::new(FileSink::new(file)));
    }
    Arc::new(sinks)
}
