mod autostart;
mod console;
mod input;
mod notifier;

use std::env;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use aicap_sync::{
    EngineCommand, EngineDeps, EngineOptions, HttpBackend, LocalStore, SyncConfig, SyncEngine,
};

use autostart::XdgAutostart;
use console::{ConsoleFrontend, PendingConfirm, RenderMode};
use notifier::LogNotifier;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = SyncConfig::from_env()?;
    info!(
        api_url = %config.api_url,
        data_dir = %config.data_dir.display(),
        refresh_interval_secs = config.refresh_interval_secs,
        "starting aicap tray client"
    );

    let backend = Arc::new(HttpBackend::new(&config)?);
    let pending = PendingConfirm::default();
    let frontend = Arc::new(ConsoleFrontend::new(
        RenderMode::from_env(),
        pending.clone(),
    ));

    let mut engine = SyncEngine::new(
        EngineDeps {
            backend,
            frontend,
            notifier: Arc::new(LogNotifier),
            autostart: Arc::new(XdgAutostart::for_current_exe()),
            store: LocalStore::new(config.data_dir.clone()),
        },
        EngineOptions::from_config(&config),
    );

    let (commands, receiver) = mpsc::channel(32);
    let _input = tokio::spawn(input::read_commands(commands.clone(), pending));

    let shutdown = commands;
    tokio::spawn(async move {
        shutdown_signal().await;
        if shutdown.send(EngineCommand::Shutdown).await.is_err() {
            warn!("engine already stopped");
        }
    });

    engine.run(receiver).await;

    info!("aicap tray client shutting down");
    Ok(())
}

/// `RUST_LOG` wins, then `AICAP_LOG_LEVEL`, then `info`. Logs go to stderr so
/// stdout stays free for the rendered view.
fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            let level = env::var("AICAP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
            EnvFilter::try_new(level)
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(anyhow::Error::msg)?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
