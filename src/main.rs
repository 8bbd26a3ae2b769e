//! Xiangqi Online Server
//!
//! Binds the configured address and serves authenticated multiplayer
//! sessions until interrupted.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use xiangqi_server::repo::InMemoryRepository;
use xiangqi_server::{Core, Server, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("xiangqi-server v{}", VERSION);

    let config = ServerConfig::from_env();
    let repo = Arc::new(InMemoryRepository::new());
    let core = Arc::new(Core::new(config, repo));
    let server = Server::new(core);
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down");
            let _ = shutdown.send(());
        }
    });

    #[cfg(unix)]
    {
        let shutdown = server.shutdown_handle();
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("received sigterm, shutting down");
                    let _ = shutdown.send(());
                }
                Err(err) => error!(error = %err, "failed to install sigterm handler"),
            }
        });
    }

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server exited with an error");
            ExitCode::FAILURE
        }
    }
}
